//! The [`Devcard`] handle passed to producer functions.
//!
//! Every cell-producing method appends a cell to the card and immediately
//! streams it to the supervising runner as a `cell` frame, so the browser
//! sees output as it is produced rather than when the producer returns.

use crate::cell::{pprint, AnnotatedImage, AnnotatedValue, Cell};
use crate::message::Message;
use std::fmt::Debug;
use std::io::Write;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

/// A function that fills an empty devcard with content.
pub type DevcardProducer = fn(&mut Devcard);

/// Where produced frames go.
pub(crate) enum Output {
    /// The TCP control connection to the runner.
    Tcp(Arc<Mutex<TcpStream>>),
    /// Standard output; used when no address is given (debugging mode).
    Echo,
}

/// A devcard under construction.
pub struct Devcard {
    /// Current title.
    pub title: String,
    /// Cells appended so far.
    pub cells: Vec<Cell>,

    temp_dir: PathBuf,
    out: Output,
    control: Option<Receiver<String>>,
    image_counter: usize,
    wait_counter: usize,
}

impl Devcard {
    pub(crate) fn new(title: &str, temp_dir: &Path, out: Output, control: Option<Receiver<String>>) -> Self {
        Devcard {
            title: title.to_string(),
            cells: Vec::new(),
            temp_dir: temp_dir.to_path_buf(),
            out,
            control,
            image_counter: 0,
            wait_counter: 0,
        }
    }

    fn send(&self, msg: &Message) {
        let line = match serde_json::to_string(msg) {
            Ok(s) => s,
            Err(err) => {
                eprintln!("can't marshal devcard message: {err}");
                return;
            }
        };
        match &self.out {
            Output::Tcp(stream) => {
                let mut stream = match stream.lock() {
                    Ok(stream) => stream,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Err(err) = writeln!(stream, "{line}") {
                    eprintln!("failed to write to the TCP connection: {err}\nmessage: {line}");
                }
            }
            Output::Echo => println!("{line}"),
        }
    }

    fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
        self.send_cell(self.cells.len() - 1);
    }

    fn send_cell(&self, index: usize) {
        self.send(&Message::Cell {
            id: format!("cell-{index}"),
            cell: self.cells[index].clone(),
        });
    }

    /// Set the devcard's title. The title also becomes the browser tab title.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.send(&Message::Title {
            title: self.title.clone(),
        });
    }

    /// Append a markdown cell.
    pub fn md(&mut self, text: impl Into<String>) {
        self.push(Cell::Markdown { text: text.into() });
    }

    /// Append a raw-HTML cell.
    pub fn html(&mut self, html: impl Into<String>) {
        self.push(Cell::Html { html: html.into() });
    }

    /// Append an error cell.
    pub fn error(&mut self, title: impl Into<String>, body: impl Into<String>) {
        self.push(Cell::error(title, body));
    }

    /// Append a monospace cell.
    pub fn mono(&mut self, text: impl Into<String>) {
        self.push(Cell::Monospace {
            text: text.into(),
            highlighting: None,
        });
    }

    /// Append a monospace cell highlighted as `lang`.
    pub fn mono_highlighted(&mut self, text: impl Into<String>, lang: impl Into<String>) {
        self.push(Cell::Monospace {
            text: text.into(),
            highlighting: Some(lang.into()),
        });
    }

    /// Append a pretty-printed value cell.
    pub fn val<T: Debug>(&mut self, value: &T) {
        self.push(Cell::Value {
            values: vec![pprint(value)],
        });
    }

    /// Append an annotated pretty-printed value cell.
    pub fn ann<T: Debug>(&mut self, annotation: impl Into<String>, value: &T) {
        self.push(Cell::AnnotatedValue {
            values: vec![AnnotatedValue {
                annotation: annotation.into(),
                value: pprint(value),
            }],
        });
    }

    /// Append an image cell.
    ///
    /// The image file is copied into the devcard's transient directory so it
    /// survives the producer's exit; the server serves it back through the
    /// `/file` route.
    pub fn image(&mut self, annotation: impl Into<String>, path: impl AsRef<Path>) {
        let src = path.as_ref();
        match self.stash_image(src) {
            Ok(stashed) => self.push(Cell::Image {
                images: vec![AnnotatedImage {
                    annotation: annotation.into(),
                    path: stashed.display().to_string(),
                }],
            }),
            Err(err) => self.error(
                "ImageCell error: unable to copy the image",
                format!("{}: {err}", src.display()),
            ),
        }
    }

    fn stash_image(&mut self, src: &Path) -> std::io::Result<PathBuf> {
        let ext = src
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        self.image_counter += 1;
        let dst = self.temp_dir.join(format!("temp-image-{}{ext}", self.image_counter));
        std::fs::copy(src, &dst)?;
        Ok(dst)
    }

    /// Append a source cell for the named declarations (`package.function`).
    pub fn source(&mut self, decls: &[&str]) {
        self.push(Cell::Source {
            decls: decls.iter().map(|d| d.to_string()).collect(),
        });
    }

    /// Append a jump cell: the browser scrolls here once it's rendered.
    pub fn jump(&mut self) {
        self.push(Cell::jump());
    }

    /// Append a wait cell and block until the user releases it in the
    /// browser.
    ///
    /// In echo mode (no TCP connection) this returns immediately.
    pub fn wait(&mut self) {
        self.wait_counter += 1;
        let id = format!("wait-{}", self.wait_counter);
        self.push(Cell::Wait { id: id.clone() });

        let Some(control) = &self.control else { return };
        // Unblock ids for other (stale) wait cells are discarded.
        while let Ok(unblocked) = control.recv() {
            if unblocked == id {
                return;
            }
        }
    }

    /// Append text to the bottom cell, or open a markdown cell when the card
    /// is empty. See [`Cell::append_text`] for per-variant behavior.
    pub fn append(&mut self, text: impl AsRef<str>) {
        match self.cells.last_mut() {
            Some(cell) => {
                cell.append_text(text.as_ref());
                self.send_cell(self.cells.len() - 1);
            }
            None => self.md(text.as_ref().to_string()),
        }
    }
}
