//! Cell types: the building blocks of a devcard.
//!
//! A devcard is an ordered list of cells. Each cell is one closed variant of
//! [`Cell`], serialized as a tagged JSON object whose `type` field names the
//! variant. The server treats cells as opaque tagged records; only the
//! renderer at the session boundary looks inside.

use serde::{Deserialize, Serialize};

/// Default delay before the browser scrolls to a jump cell, in milliseconds.
pub const DEFAULT_JUMP_DELAY_MS: u64 = 50;

/// A single devcard cell.
///
/// The `type` discriminator is part of the wire contract between the producer
/// runtime, the runner, and the browser. Adding a variant is backwards
/// compatible; renaming one is not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Cell {
    /// Markdown-formatted text.
    #[serde(rename = "MarkdownCell")]
    Markdown { text: String },

    /// Raw HTML, passed through to the browser unescaped.
    #[serde(rename = "HtmlCell")]
    Html { html: String },

    /// An error report with a short title and a preformatted body.
    #[serde(rename = "ErrorCell")]
    Error { title: String, body: String },

    /// A block of monospace text, optionally tagged with a language for
    /// syntax highlighting.
    #[serde(rename = "MonospaceCell")]
    Monospace {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        highlighting: Option<String>,
    },

    /// Pretty-printed values.
    #[serde(rename = "ValueCell")]
    Value { values: Vec<String> },

    /// Pretty-printed values, each with a short annotation.
    #[serde(rename = "AnnotatedValueCell")]
    AnnotatedValue { values: Vec<AnnotatedValue> },

    /// Images referenced by filesystem path, served back to the browser via
    /// the `/file` route.
    #[serde(rename = "ImageCell")]
    Image { images: Vec<AnnotatedImage> },

    /// Source code of named declarations, resolved by the server.
    #[serde(rename = "SourceCell")]
    Source { decls: Vec<String> },

    /// Scroll-to-here marker. The browser jumps to this cell after `delay`
    /// milliseconds.
    #[serde(rename = "JumpCell")]
    Jump { delay: u64 },

    /// Interactive wait point. The producer blocks until the user releases
    /// it through `/unblock/{id}`.
    #[serde(rename = "WaitCell")]
    Wait { id: String },
}

/// A pretty-printed value paired with its annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedValue {
    pub annotation: String,
    pub value: String,
}

/// An image path paired with its annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedImage {
    pub annotation: String,
    pub path: String,
}

impl Cell {
    /// The wire discriminator of this cell.
    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Markdown { .. } => "MarkdownCell",
            Cell::Html { .. } => "HtmlCell",
            Cell::Error { .. } => "ErrorCell",
            Cell::Monospace { .. } => "MonospaceCell",
            Cell::Value { .. } => "ValueCell",
            Cell::AnnotatedValue { .. } => "AnnotatedValueCell",
            Cell::Image { .. } => "ImageCell",
            Cell::Source { .. } => "SourceCell",
            Cell::Jump { .. } => "JumpCell",
            Cell::Wait { .. } => "WaitCell",
        }
    }

    /// Create an error cell. The body lines are joined with newlines.
    pub fn error(title: impl Into<String>, body: impl Into<String>) -> Cell {
        Cell::Error {
            title: title.into(),
            body: body.into(),
        }
    }

    /// Create a jump cell with the default delay.
    pub fn jump() -> Cell {
        Cell::Jump {
            delay: DEFAULT_JUMP_DELAY_MS,
        }
    }

    /// Append text to a text-bearing cell.
    ///
    /// Markdown cells get a separating space, monospace cells a separating
    /// newline, error cells grow their body. Other variants ignore the call.
    pub fn append_text(&mut self, s: &str) {
        match self {
            Cell::Markdown { text } => {
                if !text.is_empty() && !s.is_empty() {
                    text.push(' ');
                }
                text.push_str(s);
            }
            Cell::Html { html } => html.push_str(s),
            Cell::Monospace { text, .. } => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(s);
            }
            Cell::Error { title, body } => {
                if title.is_empty() {
                    *title = s.to_string();
                } else {
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    body.push_str(s);
                }
            }
            Cell::Value { values } => values.push(s.to_string()),
            _ => {}
        }
    }
}

/// Pretty-print a value for a [`Cell::Value`] or [`Cell::AnnotatedValue`].
pub fn pprint<T: std::fmt::Debug>(value: &T) -> String {
    format!("{value:#?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_json_tag_round_trip() {
        let cells = vec![
            Cell::Markdown {
                text: "hello".into(),
            },
            Cell::Monospace {
                text: "let x = 1;".into(),
                highlighting: Some("rust".into()),
            },
            Cell::Wait { id: "w1".into() },
            Cell::Jump { delay: 50 },
        ];
        for cell in cells {
            let json = serde_json::to_string(&cell).unwrap();
            assert!(json.contains(&format!("\"type\":\"{}\"", cell.type_name())));
            let back: Cell = serde_json::from_str(&json).unwrap();
            assert_eq!(back, cell);
        }
    }

    #[test]
    fn test_monospace_highlighting_omitted_when_absent() {
        let cell = Cell::Monospace {
            text: "x".into(),
            highlighting: None,
        };
        let json = serde_json::to_string(&cell).unwrap();
        assert!(!json.contains("highlighting"));
    }

    #[test]
    fn test_unknown_cell_type_is_an_error() {
        let err = serde_json::from_str::<Cell>(r#"{"type":"MysteryCell"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_append_text_markdown_spacing() {
        let mut cell = Cell::Markdown { text: String::new() };
        cell.append_text("hello");
        cell.append_text("world");
        assert_eq!(
            cell,
            Cell::Markdown {
                text: "hello world".into()
            }
        );
    }

    #[test]
    fn test_append_text_error_title_then_body() {
        let mut cell = Cell::Error {
            title: String::new(),
            body: String::new(),
        };
        cell.append_text("Panic!");
        cell.append_text("line one");
        cell.append_text("line two");
        assert_eq!(
            cell,
            Cell::Error {
                title: "Panic!".into(),
                body: "line one\nline two".into()
            }
        );
    }

    #[test]
    fn test_pprint_uses_alternate_debug() {
        #[derive(Debug)]
        #[allow(dead_code)]
        struct Point {
            x: i32,
            y: i32,
        }
        let s = pprint(&Point { x: 1, y: 2 });
        assert!(s.contains("Point"));
        assert!(s.contains("x: 1"));
    }
}
