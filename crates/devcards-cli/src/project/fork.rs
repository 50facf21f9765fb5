//! The fork: a temporary mirror of the project tree used for builds.
//!
//! The fork isolates the instrumented build from the user's workspace. At
//! rest it contains, for every project source file, either a rewritten copy
//! (Rust sources) or a hard-linked/copied duplicate (everything else), plus
//! the generated injection files and bootstrap binaries. The fork owns its
//! directory; dropping it removes the tree.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ProjectConfig;
use crate::error::{CliError, ProjectError, Result};
use crate::project::analyzer::Analyzer;
use crate::project::bootstrap;

/// Directories never mirrored into the fork (and never watched).
pub const SKIPPED_DIRS: [&str; 2] = [".git", "target"];

/// Name of the generated per-package injection file.
pub const INJECTION_FILE: &str = "gen_devcard_injection.rs";

pub struct Fork {
    // Owns the directory; dropped last.
    tempdir: tempfile::TempDir,
}

impl Fork {
    /// Allocate an empty fork directory under the system temp root.
    pub fn new(project_name: &str) -> Result<Fork> {
        let tempdir = tempfile::Builder::new()
            .prefix(&format!("devcards-{project_name}-"))
            .tempdir()
            .map_err(|err| CliError::Custom(format!("new fork: {err}")))?;
        Ok(Fork { tempdir })
    }

    pub fn dir(&self) -> &Path {
        self.tempdir.path()
    }

    /// The fork-side path mirroring `path` from the project tree.
    pub fn mirror_path(&self, project_dir: &Path, path: &Path) -> PathBuf {
        let rel = path.strip_prefix(project_dir).unwrap_or(path);
        self.dir().join(rel)
    }

    /// Establish the fork invariant from scratch: clear the directory, walk
    /// the project, rewrite or link every file, then generate injections
    /// and bootstraps.
    pub fn sync_all(&self, cfg: &ProjectConfig, analyzer: &mut Analyzer) -> Result<()> {
        self.clear()?;

        for entry in WalkDir::new(&cfg.dir)
            .into_iter()
            .filter_entry(|e| !SKIPPED_DIRS.iter().any(|d| e.file_name() == *d))
        {
            let entry = entry.map_err(|err| CliError::Custom(format!("syncing {}: {err}", self.dir().display())))?;
            if entry.file_type().is_dir() {
                let _ = std::fs::create_dir(self.mirror_path(&cfg.dir, entry.path()));
            } else {
                self.sync_file(cfg, analyzer, entry.path(), true)?;
            }
        }

        self.generate_injections(cfg, analyzer)?;
        bootstrap::generate(self.dir(), &analyzer.cards)?;
        Ok(())
    }

    /// Mirror one file into the fork.
    ///
    /// Rust sources are re-analyzed and written rewritten; other files are
    /// hard-linked or copied. When the file's devcard set changed (and
    /// `defer_bootstraps` is false), bootstraps are regenerated.
    pub fn sync_file(
        &self,
        cfg: &ProjectConfig,
        analyzer: &mut Analyzer,
        path: &Path,
        defer_bootstraps: bool,
    ) -> Result<()> {
        let cards_before = card_names(analyzer);
        let dst = self.mirror_path(&cfg.dir, path);

        let sync_err = |source: std::io::Error| {
            CliError::Project(ProjectError::Sync {
                path: path.to_path_buf(),
                source,
            })
        };

        match analyzer.update_file(path) {
            Ok(Some(rewritten)) => {
                write_atomic(&dst, rewritten.as_bytes()).map_err(sync_err)?;
            }
            Ok(None) if path.file_name().is_some_and(|n| n == "Cargo.toml") => {
                // The manifest gains generated [[bin]] sections later; a
                // hard link would leak them into the user's file.
                copy(path, &dst).map_err(sync_err)?;
            }
            Ok(None) => {
                if let Err(err) = link_or_copy(path, &dst) {
                    // Editors sometimes create a scratch file and delete it
                    // before we get to copy it. Not an error.
                    if !deleted_already(path) {
                        return Err(sync_err(err));
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(sync_err(err)),
        }

        if !defer_bootstraps && cards_before != card_names(analyzer) {
            bootstrap::generate(self.dir(), &analyzer.cards)?;
        }
        Ok(())
    }

    /// Drop a removed file's mirror and metadata.
    pub fn remove_file(&self, cfg: &ProjectConfig, analyzer: &mut Analyzer, path: &Path) {
        analyzer.remove_file(path);
        let _ = std::fs::remove_file(self.mirror_path(&cfg.dir, path));
    }

    /// Write the configured injection snippet into every known package
    /// directory.
    fn generate_injections(&self, cfg: &ProjectConfig, analyzer: &Analyzer) -> Result<()> {
        if cfg.injection.is_empty() {
            return Ok(());
        }
        let mut failed = Vec::new();
        for dir in analyzer.packages.keys() {
            let path = self.dir().join(dir).join(INJECTION_FILE);
            if std::fs::write(&path, &cfg.injection).is_err() {
                failed.push(format!("cannot write code injection into {dir:?}"));
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(CliError::Custom(failed.join("\n")))
        }
    }

    fn clear(&self) -> Result<()> {
        std::fs::remove_dir_all(self.dir())
            .map_err(|err| CliError::Custom(format!("clear fork: {err}")))?;
        std::fs::create_dir(self.dir())
            .map_err(|err| CliError::Custom(format!("clear fork: {err}")))?;
        Ok(())
    }

    /// Remove the fork tree, reporting any error.
    pub fn delete(self) -> Result<()> {
        self.tempdir
            .close()
            .map_err(|err| CliError::Custom(format!("delete fork: {err}")))
    }
}

fn card_names(analyzer: &Analyzer) -> String {
    analyzer
        .cards
        .iter()
        .map(|m| m.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn deleted_already(path: &Path) -> bool {
    matches!(std::fs::metadata(path), Err(err) if err.kind() == ErrorKind::NotFound)
}

/// Hard-link `src` to `dst`, falling back to a byte copy (hard links fail
/// across devices and on some filesystems). Any existing destination is
/// removed first, making the operation idempotent.
pub fn link_or_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    let _ = std::fs::remove_file(dst);
    if std::fs::hard_link(src, dst).is_ok() {
        return Ok(());
    }
    copy(src, dst)
}

fn copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    let _ = std::fs::remove_file(dst);
    std::fs::copy(src, dst).map(|_| ())
}

/// Write via a sibling temp file and rename, so a concurrently running
/// build never sees a half-written source.
fn write_atomic(dst: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = dst.with_extension("devcards-tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, dst)
}
