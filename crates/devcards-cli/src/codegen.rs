//! External code generators.
//!
//! A project may register pre-build hooks: a map from file-extension groups
//! to command lines. Changed files are queued with [`Generator::add_file`];
//! [`Generator::run`] executes the matching commands before the next build.
//! A command registered under the empty extension group runs once per
//! `run()` call, regardless of which files changed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::config::ProjectConfig;
use crate::error::ProjectError;

#[derive(Debug, Clone)]
struct CommandSpec {
    program: String,
    args: Vec<String>,
}

/// Pre-build code generator hooks for one project.
#[derive(Debug)]
pub struct Generator {
    project_dir: PathBuf,
    generators: HashMap<String, CommandSpec>,
    pending: HashSet<PathBuf>,
}

impl Generator {
    /// Build the generator table from a project's configuration.
    ///
    /// Extension-group keys are split on `;`; a leading `~/` in the program
    /// path is expanded against the home directory.
    pub fn new(cfg: &ProjectConfig) -> Generator {
        let mut generators = HashMap::new();
        for (extensions, cmd_with_args) in &cfg.generators {
            let Some((program, args)) = cmd_with_args.split_first() else {
                continue;
            };
            let program = expand_home(program);
            for ext in extensions.split(';') {
                generators.insert(
                    ext.trim().to_string(),
                    CommandSpec {
                        program: program.clone(),
                        args: args.to_vec(),
                    },
                );
            }
        }
        Generator {
            project_dir: cfg.dir.clone(),
            generators,
            pending: HashSet::new(),
        }
    }

    /// Queue a changed file for the next [`run`](Generator::run).
    pub fn add_file(&mut self, path: &Path) {
        self.pending.insert(path.to_path_buf());
    }

    /// Run generators for all pending files, then the global generator if
    /// one is registered under the empty extension group.
    ///
    /// A file leaves the pending set only when its command succeeds or the
    /// file no longer exists; failures accumulate into one joined error and
    /// don't abort the batch.
    pub async fn run(&mut self) -> Result<(), ProjectError> {
        let mut failures = Vec::new();

        let files: Vec<PathBuf> = self.pending.iter().cloned().collect();
        for file in files {
            let ext = file
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default();
            let Some(spec) = self.generators.get(&ext).cloned() else {
                continue;
            };
            match run_command(&self.project_dir, &spec, Some(&file)).await {
                Ok(()) => {
                    self.pending.remove(&file);
                }
                Err(err) if !file.exists() => {
                    // The file vanished between the event and now; nothing
                    // left to generate for it.
                    let _ = err;
                    self.pending.remove(&file);
                }
                Err(err) => failures.push(err),
            }
        }

        if let Some(spec) = self.generators.get("").cloned() {
            if let Err(err) = run_command(&self.project_dir, &spec, None).await {
                failures.push(err);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProjectError::Generator(failures.join("\n\n")))
        }
    }
}

/// Execute one generator command with `$file` substituted.
async fn run_command(
    project_dir: &Path,
    spec: &CommandSpec,
    file: Option<&Path>,
) -> Result<(), String> {
    let args: Vec<String> = spec
        .args
        .iter()
        .map(|arg| {
            if arg == "$file" {
                file.map(|f| f.display().to_string()).unwrap_or_default()
            } else {
                arg.clone()
            }
        })
        .collect();

    let output = Command::new(&spec.program)
        .args(&args)
        .current_dir(project_dir)
        .output()
        .await
        .map_err(|err| format!("{} {}: {err}", spec.program, args.join(" ")))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "{} {}: exit status {:?}\n\n{}{}",
            spec.program,
            args.join(" "),
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        ))
    }
}

fn expand_home(program: &str) -> String {
    if let Some(rest) = program.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).display().to_string();
        }
    }
    program.to_string()
}
