//! Runner: one devcard subprocess lifecycle and its update stream.
//!
//! A runner has two halves. The *supervisor loop* (this module) owns the
//! run's timers, the warm-up cache card, and the restart-in-place protocol.
//! The *child-process driver* ([`child`]) owns the TCP listener, the
//! subprocess, and the pipe readers. They talk over a per-run channel that
//! is replaced on every restart, so no stale update from an old run can
//! reach the new one.

pub mod card;
mod child;

pub use card::{format_time, Card, RenderedCell, Update};

use devcards::message::Message;
use devcards::{Cell, DevcardMeta};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::project::bootstrap;
use crate::project::SourceLookup;
use crate::render::{render_cell, Highlighter};

/// Warm-up window during which output is cached into one card.
const WARMUP: Duration = Duration::from_millis(1000);

/// Heartbeat period while a run is active.
const HEARTBEAT_FAST: Duration = Duration::from_millis(100);

/// Heartbeat period once the run finished (or went on for 90 s).
const HEARTBEAT_SLOW: Duration = Duration::from_millis(500);

/// Events flowing from the child-process driver to the supervisor.
#[derive(Debug)]
pub(crate) enum RunnerEvent {
    /// The child connected (or produced its first output line).
    Built,
    /// The child exited and its pipes are drained.
    Finish,
    /// One parsed frame from the control connection.
    Msg(Message),
    Stdout(String),
    Stderr(String),
    /// Flush the cache card now.
    Flush,
    /// A driver-side failure; flushes the cache and surfaces an error.
    Failed { title: String, body: String },
}

enum Ctrl {
    Restart(Option<String>),
    Unblock(String),
    Close,
}

/// Handle to a running runner, owned by the project.
pub struct Runner {
    pub id: String,
    pub devcard_name: String,
    updates: Option<mpsc::Receiver<Update>>,
    ctrl: mpsc::UnboundedSender<Ctrl>,
}

impl Runner {
    /// Start a runner for `meta`, building and executing in `fork_dir`.
    pub fn start(
        highlighting: &str,
        fork_dir: &Path,
        meta: DevcardMeta,
        sources: SourceLookup,
    ) -> Runner {
        let id = new_runner_id();
        let transient_dir = fork_dir.join(format!("_transient_{id}"));
        let spec = RunSpec {
            fork_dir: fork_dir.to_path_buf(),
            bootstrap_dir: fork_dir.join(bootstrap::bootstrap_dir(&meta)),
            bin_name: bootstrap::bin_name(&meta),
            transient_dir,
            meta: meta.clone(),
        };
        Runner::spawn(highlighting, meta.name, Some(spec), None, Some(sources), id)
    }

    /// Start a runner that only reports `err` and waits for a restart.
    ///
    /// Used when the devcard can't be located or the project carries a
    /// fatal error; the session still gets a live update stream.
    pub fn start_fake(highlighting: &str, err: String) -> Runner {
        Runner::spawn(
            highlighting,
            String::new(),
            None,
            Some(err),
            None,
            new_runner_id(),
        )
    }

    fn spawn(
        highlighting: &str,
        devcard_name: String,
        spec: Option<RunSpec>,
        error: Option<String>,
        sources: Option<SourceLookup>,
        id: String,
    ) -> Runner {
        let (updates_tx, updates_rx) = mpsc::channel(1024);
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();

        let supervisor = Supervisor {
            highlighter: Highlighter::new(highlighting),
            spec,
            error,
            sources,
            updates: updates_tx,
            ctrl: ctrl_rx,
        };
        tokio::spawn(supervisor.run());

        Runner {
            id,
            devcard_name,
            updates: Some(updates_rx),
            ctrl: ctrl_tx,
        }
    }

    /// Restart in place: the current child is cancelled, the cache card
    /// reset, and a fresh run started (or `err` reported instead).
    pub fn restart(&self, err: Option<String>) {
        let _ = self.ctrl.send(Ctrl::Restart(err));
    }

    /// Release the wait cell `id` in the current run.
    pub fn unblock(&self, id: &str) {
        let _ = self.ctrl.send(Ctrl::Unblock(id.to_string()));
    }

    /// Cancel the child and close the update stream.
    pub fn shutdown(&self) {
        let _ = self.ctrl.send(Ctrl::Close);
    }

    /// The update stream. Single-consumer: the first caller takes it.
    pub fn take_updates(&mut self) -> Option<mpsc::Receiver<Update>> {
        self.updates.take()
    }
}

fn new_runner_id() -> String {
    format!("r{}", uuid::Uuid::new_v4().simple())
}

struct RunSpec {
    fork_dir: PathBuf,
    bootstrap_dir: PathBuf,
    bin_name: String,
    transient_dir: PathBuf,
    meta: DevcardMeta,
}

struct Supervisor {
    highlighter: Highlighter,
    spec: Option<RunSpec>,
    error: Option<String>,
    sources: Option<SourceLookup>,
    updates: mpsc::Sender<Update>,
    ctrl: mpsc::UnboundedReceiver<Ctrl>,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            let cancel = CancellationToken::new();
            let (run_tx, mut run_rx) = mpsc::channel::<RunnerEvent>(1024);
            let (control_tx, control_rx) = mpsc::channel::<String>(64);

            let started = Instant::now();
            let mut built: Option<Instant> = None;
            let mut finished: Option<Instant> = None;
            let mut cache: Option<Card> = Some(Card::new());

            match (&self.error, &self.spec) {
                (None, Some(spec)) => {
                    let _ = std::fs::remove_dir_all(&spec.transient_dir);
                    let _ = std::fs::create_dir_all(&spec.transient_dir);
                    let child_spec = child::ChildSpec {
                        fork_dir: spec.fork_dir.clone(),
                        bootstrap_dir: spec.bootstrap_dir.clone(),
                        bin_name: spec.bin_name.clone(),
                        transient_dir: spec.transient_dir.clone(),
                        devcard_name: spec.meta.name.clone(),
                    };
                    tokio::spawn(child::drive(
                        child_spec,
                        cancel.clone(),
                        run_tx.clone(),
                        control_rx,
                    ));
                    let warmup_tx = run_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(WARMUP).await;
                        let _ = warmup_tx.send(RunnerEvent::Flush).await;
                    });
                }
                _ => {
                    let err = self.error.clone().unwrap_or_else(|| "runner failure".into());
                    let _ = run_tx
                        .send(RunnerEvent::Failed {
                            title: "Fatal error".into(),
                            body: err,
                        })
                        .await;
                }
            }

            let mut next_heartbeat = Instant::now() + HEARTBEAT_FAST;
            let restart = loop {
                tokio::select! {
                    ctrl = self.ctrl.recv() => match ctrl {
                        Some(Ctrl::Restart(err)) => {
                            self.error = err;
                            break true;
                        }
                        Some(Ctrl::Unblock(id)) => {
                            let _ = control_tx.send(format!("unblock {id}")).await;
                        }
                        Some(Ctrl::Close) | None => {
                            cancel.cancel();
                            return;
                        }
                    },
                    event = run_rx.recv() => {
                        let Some(event) = event else { break false };
                        self.handle_event(event, &mut built, &mut finished, started, &mut cache)
                            .await;
                    }
                    _ = tokio::time::sleep_until(next_heartbeat.into()) => {
                        self.heartbeat(started, built, finished).await;
                        let slow = finished.is_some() || started.elapsed() > Duration::from_secs(90);
                        next_heartbeat = Instant::now()
                            + if slow { HEARTBEAT_SLOW } else { HEARTBEAT_FAST };
                    }
                }
            };
            cancel.cancel();
            if !restart {
                return;
            }
        }
    }

    async fn handle_event(
        &mut self,
        event: RunnerEvent,
        built: &mut Option<Instant>,
        finished: &mut Option<Instant>,
        started: Instant,
        cache: &mut Option<Card>,
    ) {
        match event {
            RunnerEvent::Built => {
                if built.is_none() {
                    let now = Instant::now();
                    *built = Some(now);
                    self.send_meta(Some((now - started).as_millis() as i64), None).await;
                }
            }
            RunnerEvent::Finish => {
                let now = Instant::now();
                *finished = Some(now);
                let since_build = built.map(|b| now - b).unwrap_or_default();
                if let Some(spec) = &self.spec {
                    let _ = self
                        .updates
                        .send(Update::Finished {
                            run_time: format_time(since_build.as_millis() as i64),
                            test_dir: spec.fork_dir.clone(),
                        })
                        .await;
                } else {
                    self.send_meta(None, Some(since_build.as_millis() as i64)).await;
                }
            }
            RunnerEvent::Msg(Message::Cell { id, cell }) => {
                let cell = self.resolve_source_cell(cell).await;
                let rendered = RenderedCell {
                    html: render_cell(&self.highlighter, &cell),
                    id,
                    cell,
                };
                match cache {
                    Some(card) => card.add_cell(rendered),
                    None => {
                        let _ = self.updates.send(Update::Cell(rendered)).await;
                    }
                }
            }
            RunnerEvent::Msg(Message::Title { title }) | RunnerEvent::Msg(Message::Info { title }) => {
                let _ = self.updates.send(Update::Title(title)).await;
            }
            RunnerEvent::Msg(Message::Css { .. }) => {
                // Stylesheet handling lives in the appearance pipeline.
                tracing::debug!("ignoring css frame from devcard");
            }
            RunnerEvent::Msg(Message::Error { title, body })
            | RunnerEvent::Failed { title, body } => {
                self.flush(cache).await;
                let _ = self.updates.send(Update::Error { title, body }).await;
            }
            RunnerEvent::Stdout(line) => match cache {
                Some(card) => {
                    card.stdout.push_str(&line);
                    card.stdout.push('\n');
                }
                None => {
                    let _ = self.updates.send(Update::Stdout(line)).await;
                }
            },
            RunnerEvent::Stderr(line) => match cache {
                Some(card) => {
                    card.stderr.push_str(&line);
                    card.stderr.push('\n');
                }
                None => {
                    let _ = self.updates.send(Update::Stderr(line)).await;
                }
            },
            RunnerEvent::Flush => self.flush(cache).await,
        }
    }

    /// Emit the flushed warm-up card, once.
    async fn flush(&mut self, cache: &mut Option<Card>) {
        if let Some(card) = cache.take() {
            let _ = self.updates.send(Update::Card(card)).await;
        }
    }

    async fn heartbeat(
        &mut self,
        started: Instant,
        built: Option<Instant>,
        finished: Option<Instant>,
    ) {
        match (built, finished) {
            (None, _) => {
                self.send_meta(Some(started.elapsed().as_millis() as i64), None)
                    .await;
            }
            (Some(built), None) => {
                self.send_meta(None, Some(built.elapsed().as_millis() as i64))
                    .await;
            }
            _ => {
                let _ = self.updates.send(Update::Heartbeat).await;
            }
        }
    }

    async fn send_meta(&mut self, build_ms: Option<i64>, run_ms: Option<i64>) {
        let _ = self
            .updates
            .send(Update::Meta {
                build_time: build_ms.map(format_time),
                run_time: run_ms.map(format_time),
            })
            .await;
    }

    /// Source cells are resolved against the project's declaration table
    /// before rendering.
    async fn resolve_source_cell(&self, cell: Cell) -> Cell {
        let Cell::Source { decls } = &cell else {
            return cell;
        };
        let Some(sources) = &self.sources else {
            return cell;
        };
        let mut texts = Vec::new();
        for decl in decls {
            match sources.source(decl).await {
                Some(text) => texts.push(text),
                None => texts.push(format!("// can't locate the source for {decl}")),
            }
        }
        Cell::Monospace {
            text: texts.join("\n\n"),
            highlighting: Some("rust".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn next_update(rx: &mut mpsc::Receiver<Update>) -> Update {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("update timed out")
            .expect("update stream closed")
    }

    #[tokio::test]
    async fn test_fake_runner_reports_fatal_error() {
        let mut runner = Runner::start_fake("rust", "module manifest missing".into());
        let mut updates = runner.take_updates().unwrap();

        // The warm-up card flushes (empty), then the fatal error follows.
        let mut saw_card = false;
        let mut saw_error = false;
        for _ in 0..8 {
            match next_update(&mut updates).await {
                Update::Card(card) => {
                    assert!(card.cells.is_empty());
                    saw_card = true;
                }
                Update::Error { title, body } => {
                    assert_eq!(title, "Fatal error");
                    assert!(body.contains("module manifest missing"));
                    saw_error = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_card && saw_error);

        runner.shutdown();
    }

    #[tokio::test]
    async fn test_take_updates_is_single_consumer() {
        let mut runner = Runner::start_fake("rust", "x".into());
        assert!(runner.take_updates().is_some());
        assert!(runner.take_updates().is_none());
        runner.shutdown();
    }

    #[tokio::test]
    async fn test_restart_replaces_error() {
        let mut runner = Runner::start_fake("rust", "first".into());
        let mut updates = runner.take_updates().unwrap();

        runner.restart(Some("second".into()));

        // Eventually an error mentioning the new failure arrives.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut saw_second = false;
        while Instant::now() < deadline {
            match timeout(Duration::from_secs(5), updates.recv()).await {
                Ok(Some(Update::Error { body, .. })) if body.contains("second") => {
                    saw_second = true;
                    break;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_second);
        runner.shutdown();
    }
}
