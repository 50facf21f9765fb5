//! Child-process driver.
//!
//! Owns one run of a devcard subprocess: the ephemeral TCP listener, the
//! `cargo run` child, and the stdout/stderr pipe readers. Everything the
//! child says is normalized into [`RunnerEvent`]s for the supervisor.
//!
//! The child is never killed outright on cancellation: the driver writes
//! `exit` on the control connection first, so subprocesses the devcard may
//! have spawned get a chance to unwind, and only kills after a grace
//! window.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::RunnerEvent;
use devcards::message::Message;

/// Lines accepted per pipe before the overflow notice.
const MAX_PIPE_LINES: usize = 10_000;

/// How long a cancelled child gets to exit on its own.
const EXIT_GRACE: Duration = Duration::from_secs(3);

/// Everything one run needs to know.
pub(super) struct ChildSpec {
    pub fork_dir: PathBuf,
    /// Absolute directory of the generated bootstrap; the child's cwd.
    pub bootstrap_dir: PathBuf,
    /// Name of the generated `[[bin]]` target.
    pub bin_name: String,
    pub transient_dir: PathBuf,
    pub devcard_name: String,
}

/// Run one devcard subprocess to completion.
///
/// Emits `Built` once the child phones home (or produces its first output
/// line), the parsed frames and pipe lines as they arrive, then `Flush` and
/// `Finish`.
pub(super) async fn drive(
    spec: ChildSpec,
    cancel: CancellationToken,
    events: mpsc::Sender<RunnerEvent>,
    control: mpsc::Receiver<String>,
) {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(err) => {
            fail(&events, "Failed to create TCP listener", &err.to_string()).await;
            return;
        }
    };
    let address = match listener.local_addr() {
        Ok(addr) => addr.to_string(),
        Err(err) => {
            fail(&events, "Failed to create TCP listener", &err.to_string()).await;
            return;
        }
    };

    let frames_done = serve_connection(listener, cancel.clone(), events.clone(), control);

    let mut child = match Command::new("cargo")
        .args(["run", "--quiet", "--bin", &spec.bin_name, "--"])
        .arg(&spec.fork_dir)
        .arg(&spec.transient_dir)
        .arg(&spec.devcard_name)
        .arg(&address)
        .current_dir(&spec.bootstrap_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            fail(&events, "Execution failure", &format!("cargo run: {err}")).await;
            let _ = events.send(RunnerEvent::Flush).await;
            let _ = events.send(RunnerEvent::Finish).await;
            return;
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut readers = Vec::new();
    if let Some(stdout) = stdout {
        readers.push(spawn_pipe_reader(stdout, false, events.clone()));
    }
    if let Some(stderr) = stderr {
        readers.push(spawn_pipe_reader(stderr, true, events.clone()));
    }

    let status = tokio::select! {
        status = child.wait() => status.ok(),
        _ = cancel.cancelled() => {
            // The connection task has written `exit`; wait, then force.
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(status) => status.ok(),
                Err(_) => {
                    let _ = child.kill().await;
                    child.wait().await.ok()
                }
            }
        }
    };

    if let Some(status) = status {
        if !status.success() && !cancel.is_cancelled() {
            fail(&events, "Execution failure", &format!("cargo run: {status}")).await;
        }
    }

    for reader in readers {
        let _ = reader.await;
    }
    // The child is gone: release the accept task (it may still be waiting
    // for a connection that will never come), then wait for the frame
    // reader to drain so `finish` follows the last cell.
    cancel.cancel();
    let _ = frames_done.await;
    let _ = events.send(RunnerEvent::Flush).await;
    let _ = events.send(RunnerEvent::Finish).await;
}

/// Accept exactly one connection from the child, then pump frames in and
/// control lines out until the run is cancelled or the child hangs up.
///
/// The returned receiver resolves once the inbound frame stream is fully
/// drained (or was never established).
fn serve_connection(
    listener: TcpListener,
    cancel: CancellationToken,
    events: mpsc::Sender<RunnerEvent>,
    mut control: mpsc::Receiver<String>,
) -> tokio::sync::oneshot::Receiver<()> {
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let conn = tokio::select! {
            res = listener.accept() => match res {
                Ok((conn, _)) => conn,
                Err(err) => {
                    fail(&events, "Failed to accept TCP connection from the devcard", &err.to_string()).await;
                    cancel.cancel();
                    return;
                }
            },
            _ = cancel.cancelled() => return,
        };
        let _ = events.send(RunnerEvent::Built).await;

        let (read_half, mut write_half) = conn.into_split();

        let frame_events = events.clone();
        let frame_cancel = cancel.clone();
        tokio::spawn(async move {
            // Dropped when the frame stream is drained.
            let _done_tx = done_tx;
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let event = match serde_json::from_str::<Message>(&line) {
                            Ok(msg) => RunnerEvent::Msg(msg),
                            Err(err) => RunnerEvent::Failed {
                                title: "Failed to decode message from the devcard".into(),
                                body: format!("error: {err}\n\nmessage: {line}"),
                            },
                        };
                        if frame_events.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(err) => {
                        fail(
                            &frame_events,
                            "Failed to read from the devcard's TCP connection",
                            &err.to_string(),
                        )
                        .await;
                        frame_cancel.cancel();
                        return;
                    }
                }
            }
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write_half.write_all(b"exit\n").await;
                    return;
                }
                line = control.recv() => {
                    let Some(line) = line else { return };
                    if write_half.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        cancel.cancel();
                        return;
                    }
                }
            }
        }
    });
    done_rx
}

/// Forward one pipe line-by-line, capping runaway output.
///
/// The first line also reports `Built`: compiler diagnostics arrive on
/// stderr before the child ever connects, and they mean the build phase is
/// over.
fn spawn_pipe_reader(
    pipe: impl AsyncRead + Unpin + Send + 'static,
    stderr: bool,
    events: mpsc::Sender<RunnerEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let wrap = |line: String| {
            if stderr {
                RunnerEvent::Stderr(line)
            } else {
                RunnerEvent::Stdout(line)
            }
        };

        let mut lines = BufReader::new(pipe).lines();
        let mut seen: usize = 0;
        while let Ok(Some(line)) = lines.next_line().await {
            if seen == 0 {
                let _ = events.send(RunnerEvent::Built).await;
            }
            seen += 1;
            if seen > MAX_PIPE_LINES {
                if seen == MAX_PIPE_LINES + 1 {
                    let _ = events.send(wrap("... output limit exceeded".into())).await;
                }
                continue;
            }
            if events.send(wrap(line)).await.is_err() {
                return;
            }
        }
    })
}

async fn fail(events: &mpsc::Sender<RunnerEvent>, title: &str, body: &str) {
    let _ = events.send(RunnerEvent::Built).await;
    let _ = events
        .send(RunnerEvent::Failed {
            title: title.to_string(),
            body: body.to_string(),
        })
        .await;
}
