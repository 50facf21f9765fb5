//! Configuration loading.
//!
//! The config file is TOML at `<user-config-dir>/devcards/devcards.toml`:
//!
//! ```toml
//! port = 50051
//! editor = "vscode"
//!
//! [appearance]
//! stylesheets = ["builtin", "builtin/light"]
//! code-highlighting = "rust"
//!
//! [project.my-project]
//! dir = "/absolute/path/to/my-project"
//! inject-code = ""
//!
//! [project.my-project.code-generators]
//! "proto" = ["protoc", "--rust_out=.", "$file"]
//! ```
//!
//! A broken or missing config is not fatal: the error is kept on the loaded
//! [`Config`] and surfaced on the home page, so the user can fix the file
//! and restart from the browser.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 50051;

/// Server configuration, plus enough raw state to report config problems.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the config file lives (or should live).
    pub path: PathBuf,
    /// Raw file contents, when the file was readable.
    pub data: Option<String>,
    /// The loading error, when there was one. Non-fatal.
    pub err: Option<String>,

    pub port: u16,
    pub editor: String,
    /// Custom editor-opener command; takes `<path> <line>` arguments.
    pub opener: String,
    pub appearance: Appearance,
    /// Projects in the order they appear in the config file.
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone)]
pub struct Appearance {
    pub stylesheets: Vec<String>,
    pub code_highlighting: String,
}

impl Default for Appearance {
    fn default() -> Self {
        Appearance {
            stylesheets: vec!["builtin".into(), "builtin/light".into()],
            code_highlighting: "rust".into(),
        }
    }
}

/// Configuration of one supervised project.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    pub name: String,
    /// Absolute project root.
    pub dir: PathBuf,
    /// Source snippet injected verbatim into every package of the fork.
    pub injection: String,
    /// Code generators: `;`-separated extension group → command line.
    pub generators: BTreeMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct RawConfig {
    port: Option<u16>,
    editor: Option<String>,
    #[serde(rename = "custom-opener")]
    opener: Option<String>,
    appearance: Option<RawAppearance>,
}

#[derive(Deserialize)]
struct RawAppearance {
    stylesheets: Option<Vec<String>>,
    #[serde(rename = "code-highlighting")]
    code_highlighting: Option<String>,
}

#[derive(Deserialize)]
struct RawProject {
    dir: Option<String>,
    #[serde(rename = "inject-code")]
    inject: Option<String>,
    #[serde(rename = "code-generators")]
    generators: Option<BTreeMap<String, Vec<String>>>,
}

/// Path of the config file under the OS user-config directory.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(dir.join("devcards").join("devcards.toml"))
}

/// Load the configuration, falling back to defaults on any problem.
pub fn load() -> Config {
    let mut cfg = default_config();
    let path = match config_path() {
        Ok(path) => path,
        Err(err) => {
            cfg.err = Some(err.to_string());
            return cfg;
        }
    };
    cfg.path = path.clone();

    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(err) => {
            cfg.err = Some(if err.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path).to_string()
            } else {
                err.to_string()
            });
            return cfg;
        }
    };
    cfg.data = Some(data.clone());

    if let Err(err) = apply(&mut cfg, &data) {
        cfg.err = Some(err.to_string());
    }
    cfg
}

/// Parse `data` into `cfg`. Project order follows the document.
fn apply(cfg: &mut Config, data: &str) -> Result<(), ConfigError> {
    let raw: RawConfig = toml::from_str(data)?;
    if let Some(port) = raw.port {
        cfg.port = port;
    }
    if let Some(editor) = raw.editor {
        cfg.editor = editor;
    }
    if let Some(opener) = raw.opener {
        cfg.opener = opener;
    }
    if let Some(appearance) = raw.appearance {
        if let Some(stylesheets) = appearance.stylesheets {
            cfg.appearance.stylesheets = stylesheets;
        }
        if let Some(hl) = appearance.code_highlighting {
            cfg.appearance.code_highlighting = hl;
        }
    }

    // The `toml` map preserves document order, which is what the navigation
    // on the home page shows.
    let table: toml::Table = toml::from_str(data)?;
    if let Some(projects) = table.get("project").and_then(|v| v.as_table()) {
        cfg.projects.clear();
        for (name, value) in projects {
            let raw: RawProject = value.clone().try_into()?;
            cfg.projects.push(ProjectConfig {
                name: name.clone(),
                dir: PathBuf::from(raw.dir.unwrap_or_default()),
                injection: raw.inject.unwrap_or_default(),
                generators: raw.generators.unwrap_or_default(),
            });
        }
    }
    Ok(())
}

fn default_config() -> Config {
    let mut cfg = Config {
        path: PathBuf::new(),
        data: None,
        err: None,
        port: DEFAULT_PORT,
        editor: "vscode".into(),
        opener: String::new(),
        appearance: Appearance::default(),
        projects: Vec::new(),
    };

    // With no config file, serve the Cargo package the server was started
    // in, if there is one.
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(root) = project_root(&cwd) {
            cfg.projects.push(ProjectConfig {
                name: root
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "project".into()),
                dir: root,
                ..Default::default()
            });
        }
    }
    cfg
}

/// Walk up from `dir` to the closest directory containing a `Cargo.toml`.
fn project_root(dir: &Path) -> Option<PathBuf> {
    let mut dir = dir.to_path_buf();
    loop {
        if dir.join("Cargo.toml").is_file() {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

impl Config {
    /// Write a commented default config file at `self.path`.
    pub fn create(&self) -> Result<(), ConfigError> {
        let mut projects = String::new();
        for project in &self.projects {
            projects.push_str(&format!(
                "\n[project.{}]\ndir = \"{}\"\n",
                project.name,
                project.dir.display()
            ));
        }

        let contents = format!(
            r#"port = {port}
editor = "vscode"

[appearance]
# Builtin styles:
# * builtin/light
# * builtin/dark
stylesheets = ["builtin", "builtin/light"]
code-highlighting = "rust"
{projects}
# [project.name-of-your-project]
# dir = "/absolute/path/to/your/project"
"#,
            port = self.port,
        );

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    /// The configuration of a named project.
    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &str) -> Config {
        let mut cfg = Config {
            path: PathBuf::new(),
            data: Some(data.to_string()),
            err: None,
            port: DEFAULT_PORT,
            editor: "vscode".into(),
            opener: String::new(),
            appearance: Appearance::default(),
            projects: Vec::new(),
        };
        apply(&mut cfg, data).unwrap();
        cfg
    }

    #[test]
    fn test_scalar_keys() {
        let cfg = parse(
            r#"
port = 1234
editor = "emacs"
custom-opener = "my-open"
"#,
        );
        assert_eq!(cfg.port, 1234);
        assert_eq!(cfg.editor, "emacs");
        assert_eq!(cfg.opener, "my-open");
    }

    #[test]
    fn test_appearance() {
        let cfg = parse(
            r#"
[appearance]
stylesheets = ["builtin", "builtin/dark"]
code-highlighting = "rust"
"#,
        );
        assert_eq!(cfg.appearance.stylesheets, vec!["builtin", "builtin/dark"]);
        assert_eq!(cfg.appearance.code_highlighting, "rust");
    }

    #[test]
    fn test_projects_keep_document_order() {
        let cfg = parse(
            r#"
[project.zeta]
dir = "/srv/zeta"

[project.alpha]
dir = "/srv/alpha"

[project.middle]
dir = "/srv/middle"
"#,
        );
        let names: Vec<&str> = cfg.projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "middle"]);
    }

    #[test]
    fn test_project_generators_and_injection() {
        let cfg = parse(
            r#"
[project.demo]
dir = "/srv/demo"
inject-code = "pub fn injected() {}"

[project.demo.code-generators]
"proto;proto3" = ["protoc", "$file"]
"" = ["make", "generate"]
"#,
        );
        let p = &cfg.projects[0];
        assert_eq!(p.injection, "pub fn injected() {}");
        assert_eq!(p.generators["proto;proto3"], vec!["protoc", "$file"]);
        assert_eq!(p.generators[""], vec!["make", "generate"]);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut cfg = default_config();
        assert!(apply(&mut cfg, "port = [oops").is_err());
    }

    #[test]
    fn test_create_writes_parseable_default() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = Config {
            path: tmp.path().join("devcards").join("devcards.toml"),
            projects: vec![ProjectConfig {
                name: "demo".into(),
                dir: PathBuf::from("/srv/demo"),
                ..Default::default()
            }],
            ..default_config_for_tests()
        };
        cfg.create().unwrap();

        let data = std::fs::read_to_string(&cfg.path).unwrap();
        let mut parsed = default_config_for_tests();
        apply(&mut parsed, &data).unwrap();
        assert_eq!(parsed.port, DEFAULT_PORT);
        assert_eq!(parsed.projects.len(), 1);
        assert_eq!(parsed.projects[0].name, "demo");
    }

    fn default_config_for_tests() -> Config {
        Config {
            path: PathBuf::new(),
            data: None,
            err: None,
            port: DEFAULT_PORT,
            editor: "vscode".into(),
            opener: String::new(),
            appearance: Appearance::default(),
            projects: Vec::new(),
        }
    }
}
