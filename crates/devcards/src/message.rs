//! Wire messages exchanged between a running devcard and its supervising
//! runner.
//!
//! The child writes newline-delimited JSON frames on its TCP connection; the
//! runner parses each line into a [`Message`]. In the other direction the
//! runner writes plain-text control lines: `exit` to ask the child to shut
//! down, and `unblock <id>` to release a wait cell.

use crate::cell::Cell;
use serde::{Deserialize, Serialize};

/// One frame of the child-to-runner protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum Message {
    /// A cell was appended or updated.
    Cell { id: String, cell: Cell },

    /// The devcard's title changed.
    Title { title: String },

    /// Extra stylesheets requested by the producer.
    Css { css: Vec<String> },

    /// An error inside the producer runtime.
    Error { title: String, body: String },

    /// Free-form informational message.
    Info { title: String },
}

/// Control line asking the child to exit.
pub const CONTROL_EXIT: &str = "exit";

/// Control line prefix releasing a wait cell.
pub const CONTROL_UNBLOCK: &str = "unblock";

/// Parse one control line received by the child.
///
/// Returns `None` for unrecognized lines; those are logged and ignored.
pub fn parse_control(line: &str) -> Option<Control> {
    let line = line.trim();
    let mut parts = line.splitn(2, ' ');
    match parts.next() {
        Some(CONTROL_EXIT) => Some(Control::Exit),
        Some(CONTROL_UNBLOCK) => parts.next().map(|id| Control::Unblock(id.to_string())),
        _ => None,
    }
}

/// A control command sent from the runner to the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Exit,
    Unblock(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_round_trip() {
        let msg = Message::Cell {
            id: "cell-0".into(),
            cell: Cell::Markdown {
                text: "hello".into(),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"msg_type\":\"cell\""));
        assert_eq!(serde_json::from_str::<Message>(&json).unwrap(), msg);
    }

    #[test]
    fn test_title_frame() {
        let json = r#"{"msg_type":"title","title":"Hi"}"#;
        assert_eq!(
            serde_json::from_str::<Message>(json).unwrap(),
            Message::Title { title: "Hi".into() }
        );
    }

    #[test]
    fn test_parse_control() {
        assert_eq!(parse_control("exit\n"), Some(Control::Exit));
        assert_eq!(
            parse_control("unblock w1\n"),
            Some(Control::Unblock("w1".into()))
        );
        assert_eq!(parse_control("unblock"), None);
        assert_eq!(parse_control("frobnicate"), None);
    }
}
