//! Bootstrap generation.
//!
//! For each distinct import path that contains at least one devcard, the
//! fork gets one generated entry-point source: a `main` that dispatches
//! from devcard name to producer function and hands control to
//! `devcards::runtime::run`. The fork's `Cargo.toml` is rewritten to
//! declare each bootstrap as a `[[bin]]` target.

use devcards::meta::group_by_import_path;
use devcards::DevcardMeta;
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

use crate::error::{CliError, Result};
use crate::project::analyzer::package_of;

/// File name of every generated bootstrap source.
pub const BOOTSTRAP_FILE: &str = "gen_devcard_main.rs";

/// Marker opening the generated section of the fork manifest.
const MANIFEST_MARKER: &str = "# --- generated by devcards; do not edit ---";

/// Directory of the bootstrap for a devcard group, relative to the fork
/// root.
///
/// Binary-target devcards (defined in `src/main.rs` or under `src/bin`)
/// get their bootstrap next to them, where it can include the rewritten
/// sources directly. Devcards under a directory named `internal` keep
/// their bootstrap under that directory. Everything else goes to a fresh
/// directory at the fork root. The name carries a hash of the import path
/// so distinct packages never collide.
pub fn bootstrap_dir(meta: &DevcardMeta) -> PathBuf {
    if is_binary_target(&meta.path) {
        return Path::new(&meta.path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
    }

    let dir = format!(
        "gen_main_{}_{}",
        package_of(&meta.import_path),
        fnv1a(&meta.import_path)
    );

    let parts: Vec<Component> = Path::new(&meta.path).components().collect();
    if let Some(i) = parts
        .iter()
        .rposition(|c| c.as_os_str() == "internal")
    {
        let mut path: PathBuf = parts[..=i].iter().collect();
        path.push(dir);
        return path;
    }

    PathBuf::from(dir)
}

/// Name of the bootstrap's `[[bin]]` target.
pub fn bin_name(meta: &DevcardMeta) -> String {
    format!(
        "gen_main_{}_{}",
        package_of(&meta.import_path),
        fnv1a(&meta.import_path)
    )
}

fn is_binary_target(path: &str) -> bool {
    path == "src/main.rs" || path.starts_with("src/bin/")
}

/// FNV-1a, 64-bit. Stable across runs, unlike the std hasher.
fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Generate all bootstrap sources and rewrite the fork manifest.
pub fn generate(fork_dir: &Path, cards: &[DevcardMeta]) -> Result<()> {
    let mut bins = Vec::new();
    for group in group_by_import_path(cards) {
        let dir = bootstrap_dir(&group[0]);
        let abs_dir = fork_dir.join(&dir);
        let _ = std::fs::create_dir_all(&abs_dir);
        std::fs::write(abs_dir.join(BOOTSTRAP_FILE), bootstrap_source(&group))
            .map_err(|err| CliError::Custom(format!("generate bootstrap: {err}")))?;
        bins.push((bin_name(&group[0]), dir.join(BOOTSTRAP_FILE)));
    }
    rewrite_manifest(fork_dir, &bins)
}

/// The source of one bootstrap binary.
fn bootstrap_source(group: &[DevcardMeta]) -> String {
    let mut out = String::from("// Generated by devcards. Do not edit.\n\n");

    if is_binary_target(&group[0].path) {
        // The devcards live in a binary target; its sources can't be
        // imported through the library, so they're included as modules.
        // Their original `main` was renamed out of the way by the rewrite.
        let mut files: Vec<&str> = group.iter().map(|m| m.path.as_str()).collect();
        files.dedup();
        for file in &files {
            let stem = mod_name(file);
            let file_name = Path::new(file).file_name().unwrap_or_default();
            let _ = writeln!(out, "#[path = {:?}]", file_name);
            let _ = writeln!(out, "mod {stem};");
        }
        out.push('\n');
        out.push_str("fn main() {\n    devcards::runtime::run(&[\n");
        for meta in group {
            let _ = writeln!(
                out,
                "        ({:?}, {}::{} as devcards::DevcardProducer),",
                meta.name,
                mod_name(&meta.path),
                meta.name
            );
        }
        out.push_str("    ]);\n}\n");
        return out;
    }

    let _ = writeln!(out, "use {} as dc;", group[0].import_path);
    out.push('\n');
    out.push_str("fn main() {\n    devcards::runtime::run(&[\n");
    for meta in group {
        let _ = writeln!(
            out,
            "        ({:?}, dc::{} as devcards::DevcardProducer),",
            meta.name, meta.name
        );
    }
    out.push_str("    ]);\n}\n");
    out
}

fn mod_name(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("user_{}", stem.replace(|c: char| !c.is_alphanumeric(), "_"))
}

/// Replace the generated section of the fork's `Cargo.toml` with `[[bin]]`
/// entries for the current bootstrap set.
fn rewrite_manifest(fork_dir: &Path, bins: &[(String, PathBuf)]) -> Result<()> {
    let manifest_path = fork_dir.join("Cargo.toml");
    let manifest = std::fs::read_to_string(&manifest_path).unwrap_or_default();
    let mut manifest = match manifest.find(MANIFEST_MARKER) {
        Some(i) => manifest[..i].to_string(),
        None => manifest,
    };

    if !bins.is_empty() {
        if !manifest.is_empty() && !manifest.ends_with('\n') {
            manifest.push('\n');
        }
        manifest.push_str(MANIFEST_MARKER);
        manifest.push('\n');
        for (name, path) in bins {
            let _ = writeln!(manifest, "\n[[bin]]\nname = {:?}\npath = {:?}", name, path.display().to_string());
        }
    }

    std::fs::write(&manifest_path, manifest)
        .map_err(|err| CliError::Custom(format!("rewrite fork manifest: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, import_path: &str, path: &str) -> DevcardMeta {
        DevcardMeta {
            import_path: import_path.into(),
            package: package_of(import_path),
            path: path.into(),
            line: 1,
            name: name.into(),
            title: String::new(),
        }
    }

    #[test]
    fn test_bootstrap_dir_for_library_package() {
        let dir = bootstrap_dir(&meta("devcard_a", "demo::widgets", "src/widgets/mod.rs"));
        let name = dir.display().to_string();
        assert!(name.starts_with("gen_main_widgets_"), "{name}");
        assert!(!name.contains('/'));
    }

    #[test]
    fn test_bootstrap_dir_for_binary_target() {
        let dir = bootstrap_dir(&meta("devcard_a", "demo", "src/main.rs"));
        assert_eq!(dir, PathBuf::from("src"));
    }

    #[test]
    fn test_bootstrap_dir_under_internal() {
        let dir = bootstrap_dir(&meta(
            "devcard_a",
            "demo::internal::util",
            "src/internal/util/mod.rs",
        ));
        let name = dir.display().to_string();
        assert!(name.starts_with("src/internal/gen_main_util_"), "{name}");
    }

    #[test]
    fn test_dir_hash_is_stable() {
        let a = bootstrap_dir(&meta("x", "demo::widgets", "src/widgets/a.rs"));
        let b = bootstrap_dir(&meta("y", "demo::widgets", "src/widgets/b.rs"));
        assert_eq!(a, b);
        let other = bootstrap_dir(&meta("z", "demo::other", "src/other/a.rs"));
        assert_ne!(a, other);
    }

    #[test]
    fn test_library_bootstrap_source() {
        let group = vec![
            meta("devcard_a", "demo::widgets", "src/widgets/mod.rs"),
            meta("devcard_b", "demo::widgets", "src/widgets/mod.rs"),
        ];
        let src = bootstrap_source(&group);
        assert!(src.contains("use demo::widgets as dc;"));
        assert!(src.contains(r#"("devcard_a", dc::devcard_a as devcards::DevcardProducer)"#));
        assert!(src.contains(r#"("devcard_b", dc::devcard_b as devcards::DevcardProducer)"#));
        syn::parse_file(&src).expect("generated bootstrap must parse");
    }

    #[test]
    fn test_crate_root_bootstrap_source() {
        let group = vec![meta("devcard_a", "demo", "src/lib.rs")];
        let src = bootstrap_source(&group);
        assert!(src.contains("use demo as dc;"));
        syn::parse_file(&src).expect("generated bootstrap must parse");
    }

    #[test]
    fn test_binary_target_bootstrap_includes_sources() {
        let group = vec![meta("devcard_a", "demo", "src/main.rs")];
        let src = bootstrap_source(&group);
        assert!(src.contains("#[path = \"main.rs\"]"));
        assert!(src.contains("mod user_main;"));
        assert!(src.contains("user_main::devcard_a"));
        syn::parse_file(&src).expect("generated bootstrap must parse");
    }

    #[test]
    fn test_generate_writes_files_and_manifest() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("Cargo.toml"),
            "[package]\nname = \"demo\"\n",
        )
        .unwrap();
        let cards = vec![
            meta("devcard_a", "demo::widgets", "src/widgets/mod.rs"),
            meta("devcard_b", "demo", "src/lib.rs"),
        ];
        generate(tmp.path(), &cards).unwrap();

        let manifest = std::fs::read_to_string(tmp.path().join("Cargo.toml")).unwrap();
        assert!(manifest.starts_with("[package]"));
        assert_eq!(manifest.matches("[[bin]]").count(), 2);

        // Regeneration replaces the generated section instead of stacking.
        generate(tmp.path(), &cards).unwrap();
        let manifest = std::fs::read_to_string(tmp.path().join("Cargo.toml")).unwrap();
        assert_eq!(manifest.matches("[[bin]]").count(), 2);
        assert_eq!(manifest.matches(MANIFEST_MARKER).count(), 1);
    }

    #[test]
    fn test_generate_with_no_cards_strips_generated_section() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("Cargo.toml"),
            format!("[package]\nname = \"demo\"\n{MANIFEST_MARKER}\n[[bin]]\nname = \"stale\"\n"),
        )
        .unwrap();
        generate(tmp.path(), &[]).unwrap();
        let manifest = std::fs::read_to_string(tmp.path().join("Cargo.toml")).unwrap();
        assert!(!manifest.contains("[[bin]]"));
    }
}
