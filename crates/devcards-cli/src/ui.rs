//! Terminal status messages.

use owo_colors::OwoColorize;

/// Print a success message to stderr.
pub fn success(message: &str) {
    eprintln!("{} {}", "✓".green().bold(), message);
}

/// Print an info message to stderr.
pub fn info(message: &str) {
    eprintln!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a warning message to stderr.
pub fn warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message to stderr.
pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Check if color output should be enabled.
///
/// Respects `NO_COLOR` and `FORCE_COLOR`, falls back to terminal detection.
pub fn should_use_colors() -> bool {
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }
    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }
    console::user_attended_stderr()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_messages_do_not_panic() {
        success("ok");
        info("fyi");
        warning("careful");
        error("bad");
    }
}
