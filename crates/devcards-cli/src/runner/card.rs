//! Update types flowing from a runner to its session, and the cache card
//! that batches the warm-up window.

use devcards::Cell;
use std::collections::HashSet;

/// One rendered cell, carrying both the HTML fragment for the page and the
/// raw cell so the session can recognize jump and wait cells.
#[derive(Debug, Clone)]
pub struct RenderedCell {
    pub id: String,
    pub html: String,
    pub cell: Cell,
}

/// The rolling batch a runner accumulates during its warm-up window, so the
/// initial burst of output reaches the browser as one atomic update.
#[derive(Debug, Default)]
pub struct Card {
    pub cells: Vec<RenderedCell>,
    pub stdout: String,
    pub stderr: String,
    ids: HashSet<String>,
}

impl Card {
    pub fn new() -> Card {
        Card::default()
    }

    /// Add a cell unless one with the same id is already batched.
    pub fn add_cell(&mut self, cell: RenderedCell) {
        if self.ids.insert(cell.id.clone()) {
            self.cells.push(cell);
        }
    }
}

/// An update emitted by a runner.
#[derive(Debug)]
pub enum Update {
    /// The flushed warm-up batch.
    Card(Card),
    /// One rendered cell, after warm-up.
    Cell(RenderedCell),
    /// Build/run timing report for the status bar.
    Meta {
        build_time: Option<String>,
        run_time: Option<String>,
    },
    /// The run completed. Carries the final run time and the directory the
    /// session's one-shot test pass should execute in.
    Finished {
        run_time: String,
        test_dir: std::path::PathBuf,
    },
    /// Devcard title change.
    Title(String),
    /// An execution or infrastructure error.
    Error { title: String, body: String },
    /// One line of the child's stdout.
    Stdout(String),
    /// One line of the child's stderr.
    Stderr(String),
    /// Keep-alive for otherwise idle streams.
    Heartbeat,
}

/// Format a duration in milliseconds the way the status bar shows it.
pub fn format_time(ms: i64) -> String {
    match ms {
        _ if ms < 1000 => format!("{ms}ms"),
        _ if ms < 90_000 => format!("{:.1}s", ms as f64 / 1000.0),
        _ => {
            let h = ms / (60 * 60 * 1000);
            let m = (ms - h * 60 * 60 * 1000) / (60 * 1000);
            let s = (ms - h * 60 * 60 * 1000 - m * 60 * 1000) / 1000;
            if h > 0 {
                format!("{h}:{m:02}:{s:02}")
            } else {
                format!("{m}:{s:02}")
            }
        }
    }
}
