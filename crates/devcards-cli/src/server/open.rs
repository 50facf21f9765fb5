//! Opening devcard sources in the user's editor.

use std::path::Path;
use tokio::process::Command;

use crate::config::Config;

/// Open `path:line` in the configured editor.
///
/// A custom opener takes precedence and is invoked as `<opener> <path>
/// <line>`. Otherwise `emacs` and `vscode` are recognized by name.
pub async fn open_in_editor(cfg: &Config, path: &Path, line: usize) -> Result<(), String> {
    let result = if !cfg.opener.is_empty() {
        Command::new(&cfg.opener)
            .arg(path)
            .arg(line.to_string())
            .status()
            .await
    } else {
        match cfg.editor.to_lowercase().as_str() {
            "emacs" => {
                let eval = format!(
                    "(progn\n(find-file \"{}\")\n(goto-line {})\n(recenter-top-bottom 5))",
                    path.display(),
                    line
                );
                Command::new("emacsclient").arg("--eval").arg(eval).status().await
            }
            "vscode" => {
                Command::new("code")
                    .arg("-g")
                    .arg(format!("{}:{line}", path.display()))
                    .status()
                    .await
            }
            other => return Err(format!("unsupported editor: {other:?}")),
        }
    };

    match result {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(format!("editor exited with {status}")),
        Err(err) => Err(err.to_string()),
    }
}
