//! Session-level frame batching.
//!
//! For the first second after a session opens, every outgoing frame is
//! accumulated; when the warm-up timer fires (or a break-batching sentinel
//! arrives, as wait cells require), the accumulated frames are emitted as
//! one `batch` frame and batching ends for good. The batcher runs as its
//! own task so the warm-up delay never stalls the producer.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::messages::{msg_batch, msg_nop};

/// Batching warm-up window.
pub const WARMUP: Duration = Duration::from_millis(1000);

/// Sentinel frame that ends batching immediately (never reaches the wire).
pub const BREAK_BATCHING: &[u8] = b"break batching";

/// Spawn a batcher in front of `out`.
///
/// Frames sent to the returned sender are batched during warm-up and
/// forwarded individually afterwards. Closing the sender flushes any
/// pending batch and ends the task.
pub fn batcher(out: mpsc::Sender<Vec<u8>>) -> (mpsc::Sender<Vec<u8>>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);

    let handle = tokio::spawn(async move {
        let mut batching = true;
        let mut batch: Vec<Vec<u8>> = Vec::new();
        let warmup = tokio::time::sleep(WARMUP);
        tokio::pin!(warmup);

        loop {
            let msg = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) if msg == BREAK_BATCHING => {
                        batching = false;
                        msg_nop()
                    }
                    Some(msg) => msg,
                    None => break,
                },
                _ = &mut warmup, if batching => {
                    batching = false;
                    msg_nop()
                }
            };

            if batching {
                batch.push(msg);
            } else if !batch.is_empty() {
                batch.push(msg);
                if out.send(msg_batch(&batch)).await.is_err() {
                    return;
                }
                batch.clear();
            } else if out.send(msg).await.is_err() {
                return;
            }
        }

        if !batch.is_empty() {
            let _ = out.send(msg_batch(&batch)).await;
        }
    });

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::messages::msg_set_title;

    fn tag(frame: &[u8]) -> String {
        let v: serde_json::Value = serde_json::from_slice(frame).unwrap();
        v["msgType"].as_str().unwrap().to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_warmup_frames_arrive_as_one_batch() {
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let (tx, _handle) = batcher(out_tx);

        tx.send(msg_set_title("a")).await.unwrap();
        tx.send(msg_set_title("b")).await.unwrap();
        tokio::time::sleep(WARMUP * 2).await;

        let first = out_rx.recv().await.unwrap();
        assert_eq!(tag(&first), "batch");
        let v: serde_json::Value = serde_json::from_slice(&first).unwrap();
        // Two titles plus the warm-up nop.
        assert_eq!(v["messages"].as_array().unwrap().len(), 3);

        // After warm-up, frames are forwarded individually.
        tx.send(msg_set_title("c")).await.unwrap();
        let next = out_rx.recv().await.unwrap();
        assert_eq!(tag(&next), "setTitle");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_warmup_emits_nop() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (_tx, _handle) = batcher(out_tx);

        tokio::time::sleep(WARMUP * 2).await;
        let first = out_rx.recv().await.unwrap();
        assert_eq!(tag(&first), "nop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_break_batching_flushes_immediately() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (tx, _handle) = batcher(out_tx);

        tx.send(msg_set_title("a")).await.unwrap();
        tx.send(BREAK_BATCHING.to_vec()).await.unwrap();

        let first = out_rx.recv().await.unwrap();
        assert_eq!(tag(&first), "batch");
    }

    #[tokio::test]
    async fn test_input_closure_flushes_pending_batch() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (tx, handle) = batcher(out_tx);

        tx.send(msg_set_title("a")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        let first = out_rx.recv().await.unwrap();
        assert_eq!(tag(&first), "batch");
        assert_eq!(out_rx.recv().await, None);
    }
}
