//! Browser-facing frames.
//!
//! Every frame is one JSON document tagged by `msgType`; the page script
//! dispatches on the tag. Frames are built as raw byte vectors so the
//! batcher can treat them uniformly.

use serde_json::json;

pub fn msg_clear() -> Vec<u8> {
    frame(json!({ "msgType": "clear" }))
}

pub fn msg_set_title(title: &str) -> Vec<u8> {
    frame(json!({ "msgType": "setTitle", "title": title }))
}

pub fn msg_append_cell(id: &str, html: &str) -> Vec<u8> {
    frame(json!({ "msgType": "appendCell", "cellId": id, "html": html }))
}

pub fn msg_set_cell_content(id: &str, html: &str) -> Vec<u8> {
    frame(json!({ "msgType": "setCellContent", "cellId": id, "html": html }))
}

pub fn msg_append_to_cell(id: &str, html: &str) -> Vec<u8> {
    frame(json!({ "msgType": "appendToCell", "cellId": id, "html": html }))
}

pub fn msg_set_status_bar_content(items: &[String]) -> Vec<u8> {
    frame(json!({ "msgType": "setStatusBarContent", "html": items.join(" ") }))
}

pub fn msg_jump(id: &str) -> Vec<u8> {
    frame(json!({ "msgType": "jump", "id": id }))
}

pub fn msg_save_scroll_position() -> Vec<u8> {
    frame(json!({ "msgType": "saveScrollPosition" }))
}

pub fn msg_restore_scroll_position() -> Vec<u8> {
    frame(json!({ "msgType": "restoreScrollPosition" }))
}

pub fn msg_batch(messages: &[Vec<u8>]) -> Vec<u8> {
    let parsed: Vec<serde_json::Value> = messages
        .iter()
        .filter_map(|m| serde_json::from_slice(m).ok())
        .collect();
    frame(json!({ "msgType": "batch", "messages": parsed }))
}

pub fn msg_nop() -> Vec<u8> {
    frame(json!({ "msgType": "nop" }))
}

fn frame(value: serde_json::Value) -> Vec<u8> {
    value.to_string().into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(frame: &[u8]) -> String {
        let v: serde_json::Value = serde_json::from_slice(frame).unwrap();
        v["msgType"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_frames_carry_their_tags() {
        assert_eq!(tag(&msg_clear()), "clear");
        assert_eq!(tag(&msg_set_title("x")), "setTitle");
        assert_eq!(tag(&msg_append_cell("a", "<p>")), "appendCell");
        assert_eq!(tag(&msg_nop()), "nop");
        assert_eq!(tag(&msg_save_scroll_position()), "saveScrollPosition");
        assert_eq!(tag(&msg_restore_scroll_position()), "restoreScrollPosition");
    }

    #[test]
    fn test_batch_embeds_messages_in_order() {
        let batch = msg_batch(&[msg_clear(), msg_set_title("Hi")]);
        let v: serde_json::Value = serde_json::from_slice(&batch).unwrap();
        assert_eq!(v["msgType"], "batch");
        assert_eq!(v["messages"][0]["msgType"], "clear");
        assert_eq!(v["messages"][1]["msgType"], "setTitle");
        assert_eq!(v["messages"][1]["title"], "Hi");
    }

    #[test]
    fn test_status_bar_joins_items() {
        let frame = msg_set_status_bar_content(&["<code>a</code>".into(), "<code>b</code>".into()]);
        let v: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(v["html"], "<code>a</code> <code>b</code>");
    }
}
