//! Debounced coalescer.
//!
//! Collapses bursts on a channel: after each maximal quiescent interval of
//! at least `delay` with no new input, exactly one token (the last one
//! received) is emitted. Used to fold storms of filesystem events and
//! runner-restart requests into single actions.

use std::time::Duration;
use tokio::sync::mpsc;

/// Spawn a coalescing task between `input` and `output`.
///
/// Every input schedules a deferred emit tagged with a monotonically
/// increasing sequence number; when a deferred emit fires it is dropped
/// unless its tag still matches the latest input. Closing `input` ends the
/// task (and drops `output`, closing it).
pub fn coalesce<T: Send + 'static>(
    delay: Duration,
    mut input: mpsc::Receiver<T>,
    output: mpsc::Sender<T>,
) {
    tokio::spawn(async move {
        let (timer_tx, mut timer_rx) = mpsc::channel::<(u64, T)>(1024);
        let mut latest: u64 = 0;
        loop {
            tokio::select! {
                token = input.recv() => {
                    let Some(token) = token else { return };
                    latest += 1;
                    let id = latest;
                    let timer_tx = timer_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = timer_tx.send((id, token)).await;
                    });
                }
                fired = timer_rx.recv() => {
                    // timer_tx lives in this scope, so the channel can't close.
                    let Some((id, token)) = fired else { return };
                    if id == latest {
                        if output.send(token).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });
}
