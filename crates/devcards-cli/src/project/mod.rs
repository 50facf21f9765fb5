//! Project supervision.
//!
//! A [`ProjectHandle`] fronts one supervised user project. All project
//! state (analyzer tables, fork, watcher, runner set) is owned by a single
//! event-loop task and mutated only inside its handlers; everyone else
//! talks to it through [`ProjectEvent`] commands on a bounded channel.
//!
//! Filesystem events stream in from the watcher; runner restarts are folded
//! through a debounced coalescer so a burst of saves triggers one rebuild.

pub mod analyzer;
pub mod bootstrap;
pub mod fork;
pub mod watcher;

use devcards::meta::lookup;
use devcards::DevcardMeta;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::coalesce::coalesce;
use crate::codegen::Generator;
use crate::config::ProjectConfig;
use crate::error::{CliError, ProjectError};
use crate::project::analyzer::Analyzer;
use crate::project::fork::Fork;
use crate::project::watcher::{ProjectWatcher, WatchEvent};
use crate::runner::{Runner, Update};

/// Quiescence window folding bursts of file events into one runner restart.
const RESTART_COALESCE: Duration = Duration::from_millis(30);

/// Bound on consecutive full-restart retries.
const MAX_RETRIES: u32 = 5;

/// Commands accepted by the project event loop.
pub enum ProjectEvent {
    UpdateFile(PathBuf),
    RemoveFile(PathBuf),
    /// Full teardown and rebuild. `attempt` counts prior consecutive
    /// failures; a failed restart schedules another with linear backoff.
    Restart {
        attempt: u32,
    },
    /// Re-signal every active runner (after running the code generators).
    RestartRunners,
    StartRunner {
        devcard_name: String,
        reply: oneshot::Sender<String>,
    },
    TakeRunnerUpdates {
        runner_id: String,
        reply: oneshot::Sender<Option<mpsc::Receiver<Update>>>,
    },
    UnblockRunner {
        runner_id: String,
        unblock_id: String,
    },
    StopRunner {
        runner_id: String,
    },
    GetDevcards {
        reply: oneshot::Sender<Vec<DevcardMeta>>,
    },
    GetSource {
        decl: String,
        reply: oneshot::Sender<Option<String>>,
    },
    Fail(String),
    Shutdown {
        reply: oneshot::Sender<Option<String>>,
    },
}

/// Cloneable front to one project's event loop.
#[derive(Clone)]
pub struct ProjectHandle {
    pub name: String,
    pub dir: PathBuf,
    events: mpsc::Sender<ProjectEvent>,
}

/// Declaration-source lookup handed to runners for source cells.
#[derive(Clone)]
pub struct SourceLookup {
    events: mpsc::Sender<ProjectEvent>,
}

impl SourceLookup {
    pub async fn source(&self, decl: &str) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(ProjectEvent::GetSource {
                decl: decl.to_string(),
                reply: tx,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }
}

impl ProjectHandle {
    /// Spawn the project's event loop and kick off its first full sync.
    ///
    /// Initialization is asynchronous: the handle is usable immediately,
    /// and any initialization failure lands in the project's fatal-error
    /// slot, to be broadcast to every runner.
    pub fn start(cfg: ProjectConfig, highlighting: String) -> ProjectHandle {
        let (events_tx, events_rx) = mpsc::channel(256);

        // File events fold into one RestartRunners per quiescent window.
        let (restarts_tx, restarts_in_rx) = mpsc::channel(256);
        let (coalesced_tx, mut coalesced_rx) = mpsc::channel(16);
        coalesce(RESTART_COALESCE, restarts_in_rx, coalesced_tx);
        let forward = events_tx.clone();
        tokio::spawn(async move {
            while coalesced_rx.recv().await.is_some() {
                if forward.send(ProjectEvent::RestartRunners).await.is_err() {
                    return;
                }
            }
        });

        let handle = ProjectHandle {
            name: cfg.name.clone(),
            dir: cfg.dir.clone(),
            events: events_tx.clone(),
        };

        let actor = ProjectActor {
            generator: Generator::new(&cfg),
            analyzer: Analyzer::new(&cfg.dir, ""),
            cfg,
            highlighting,
            module: String::new(),
            fork: None,
            watcher: None,
            runners: Vec::new(),
            fatal_error: None,
            events_tx,
            restarts_tx,
        };
        tokio::spawn(actor.run(events_rx));

        let kickoff = handle.events.clone();
        tokio::spawn(async move {
            let _ = kickoff.send(ProjectEvent::Restart { attempt: 0 }).await;
        });
        handle
    }

    pub fn source_lookup(&self) -> SourceLookup {
        SourceLookup {
            events: self.events.clone(),
        }
    }

    /// The ordered devcard metadata list.
    pub async fn devcards(&self) -> Vec<DevcardMeta> {
        let (tx, rx) = oneshot::channel();
        if self
            .events
            .send(ProjectEvent::GetDevcards { reply: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Metadata of one devcard.
    pub async fn devcard(&self, name: &str) -> Option<DevcardMeta> {
        let cards = self.devcards().await;
        lookup(&cards, name).cloned()
    }

    /// Start a runner for `devcard_name`; returns its id.
    pub async fn start_runner(&self, devcard_name: &str) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(ProjectEvent::StartRunner {
                devcard_name: devcard_name.to_string(),
                reply: tx,
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Take a runner's update stream. Single-consumer.
    pub async fn take_runner_updates(&self, runner_id: &str) -> Option<mpsc::Receiver<Update>> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(ProjectEvent::TakeRunnerUpdates {
                runner_id: runner_id.to_string(),
                reply: tx,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Release a wait cell in one of this project's runners.
    pub async fn unblock(&self, runner_id: &str, unblock_id: &str) {
        let _ = self
            .events
            .send(ProjectEvent::UnblockRunner {
                runner_id: runner_id.to_string(),
                unblock_id: unblock_id.to_string(),
            })
            .await;
    }

    pub async fn stop_runner(&self, runner_id: &str) {
        let _ = self
            .events
            .send(ProjectEvent::StopRunner {
                runner_id: runner_id.to_string(),
            })
            .await;
    }

    pub async fn source(&self, decl: &str) -> Option<String> {
        self.source_lookup().source(decl).await
    }

    /// Schedule a full teardown and rebuild.
    pub async fn restart(&self) {
        let _ = self.events.send(ProjectEvent::Restart { attempt: 0 }).await;
    }

    /// Stop all runners, close the watcher, delete the fork. Returns the
    /// joined error report, if anything went wrong.
    pub async fn shutdown(&self) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        if self
            .events
            .send(ProjectEvent::Shutdown { reply: tx })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }
}

enum Flow {
    Continue,
    Shutdown,
}

struct ProjectActor {
    cfg: ProjectConfig,
    highlighting: String,
    module: String,
    analyzer: Analyzer,
    generator: Generator,
    fork: Option<Fork>,
    watcher: Option<ProjectWatcher>,
    runners: Vec<Runner>,
    fatal_error: Option<String>,
    events_tx: mpsc::Sender<ProjectEvent>,
    restarts_tx: mpsc::Sender<()>,
}

impl ProjectActor {
    async fn run(mut self, mut events: mpsc::Receiver<ProjectEvent>) {
        while let Some(event) = events.recv().await {
            match self.handle(event).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Shutdown) => return,
                Err(err) => {
                    if let CliError::Project(ProjectError::Retry { attempt, .. }) = &err {
                        let attempt = *attempt;
                        if attempt <= MAX_RETRIES {
                            let events = self.events_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(Duration::from_millis(500) * attempt).await;
                                let _ = events.send(ProjectEvent::Restart { attempt }).await;
                            });
                        }
                    }
                    self.post(ProjectEvent::Fail(err.to_string()));
                }
            }
        }
    }

    /// Post an event from inside a handler without risking a deadlock on a
    /// full channel.
    fn post(&self, event: ProjectEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events_tx.try_send(event) {
            let events = self.events_tx.clone();
            tokio::spawn(async move {
                let _ = events.send(event).await;
            });
        }
    }

    async fn handle(&mut self, event: ProjectEvent) -> Result<Flow, CliError> {
        match event {
            ProjectEvent::UpdateFile(path) => {
                let result = match &self.fork {
                    Some(fork) => fork.sync_file(&self.cfg, &mut self.analyzer, &path, false),
                    None => Ok(()),
                };
                self.generator.add_file(&path);
                let _ = self.restarts_tx.send(()).await;
                result.map(|_| Flow::Continue)
            }

            ProjectEvent::RemoveFile(path) => {
                if let Some(fork) = &self.fork {
                    fork.remove_file(&self.cfg, &mut self.analyzer, &path);
                }
                let _ = self.restarts_tx.send(()).await;
                Ok(Flow::Continue)
            }

            ProjectEvent::Restart { attempt } => self.restart(attempt).await,

            ProjectEvent::RestartRunners => {
                // Must not fail: failures are delivered to the runners.
                let mut base_error = self.fatal_error.clone();
                if base_error.is_none() {
                    if let Err(err) = self.generator.run().await {
                        base_error = Some(err.to_string());
                    }
                }
                let cards = self.analyzer.cards.clone();
                for runner in &self.runners {
                    let err = base_error.clone().or_else(|| {
                        if lookup(&cards, &runner.devcard_name).is_none() {
                            Some(
                                ProjectError::NoSuchDevcard {
                                    project: self.cfg.name.clone(),
                                    devcard: runner.devcard_name.clone(),
                                }
                                .to_string(),
                            )
                        } else {
                            None
                        }
                    });
                    runner.restart(err);
                }
                Ok(Flow::Continue)
            }

            ProjectEvent::StartRunner {
                devcard_name,
                reply,
            } => {
                let runner = self.start_runner(&devcard_name).await;
                let id = runner.id.clone();
                self.runners.push(runner);
                let _ = reply.send(id);
                Ok(Flow::Continue)
            }

            ProjectEvent::TakeRunnerUpdates { runner_id, reply } => {
                let updates = self
                    .runners
                    .iter_mut()
                    .find(|r| r.id == runner_id)
                    .and_then(|r| r.take_updates());
                let _ = reply.send(updates);
                Ok(Flow::Continue)
            }

            ProjectEvent::UnblockRunner {
                runner_id,
                unblock_id,
            } => {
                if let Some(runner) = self.runners.iter().find(|r| r.id == runner_id) {
                    runner.unblock(&unblock_id);
                }
                Ok(Flow::Continue)
            }

            ProjectEvent::StopRunner { runner_id } => {
                if let Some(i) = self.runners.iter().position(|r| r.id == runner_id) {
                    self.runners[i].shutdown();
                    self.runners.remove(i);
                }
                Ok(Flow::Continue)
            }

            ProjectEvent::GetDevcards { reply } => {
                let _ = reply.send(self.analyzer.cards.clone());
                Ok(Flow::Continue)
            }

            ProjectEvent::GetSource { decl, reply } => {
                let _ = reply.send(self.analyzer.source(&decl).map(str::to_string));
                Ok(Flow::Continue)
            }

            ProjectEvent::Fail(err) => {
                // Must not fail either, or failures would loop forever.
                tracing::warn!(project = %self.cfg.name, "project failure: {err}");
                self.fatal_error = Some(err);
                self.post(ProjectEvent::RestartRunners);
                Ok(Flow::Continue)
            }

            ProjectEvent::Shutdown { reply } => {
                let mut errors = Vec::new();
                for runner in self.runners.drain(..) {
                    runner.shutdown();
                }
                self.watcher = None;
                if let Some(fork) = self.fork.take() {
                    if let Err(err) = fork.delete() {
                        errors.push(err.to_string());
                    }
                }
                let report = if errors.is_empty() {
                    None
                } else {
                    Some(format!(
                        "shutting down project {}: {}",
                        self.cfg.dir.display(),
                        errors.join("; ")
                    ))
                };
                let _ = reply.send(report);
                Ok(Flow::Shutdown)
            }
        }
    }

    /// Full teardown and rebuild: fresh module name, fresh analyzer state,
    /// full fork sync, fresh watcher.
    async fn restart(&mut self, attempt: u32) -> Result<Flow, CliError> {
        self.watcher = None;

        let retry = |err: CliError| {
            CliError::Project(ProjectError::Retry {
                attempt: attempt + 1,
                source: Box::new(err),
            })
        };

        self.module = read_module_name(&self.cfg.dir).map_err(|err| retry(err.into()))?;

        if self.fork.is_none() {
            self.fork = Some(Fork::new(&self.cfg.name)?);
        }
        self.analyzer = Analyzer::new(&self.cfg.dir, &self.module);
        if let Some(fork) = &self.fork {
            fork.sync_all(&self.cfg, &mut self.analyzer)
                .map_err(&retry)?;
        }

        let (watcher, watch_rx) = ProjectWatcher::start(&self.cfg.dir).map_err(&retry)?;
        self.watcher = Some(watcher);
        self.spawn_watch_forwarder(watch_rx);

        self.fatal_error = None;
        self.post(ProjectEvent::RestartRunners);
        Ok(Flow::Continue)
    }

    /// Translate watch events into project events until the watcher is
    /// dropped.
    fn spawn_watch_forwarder(&self, mut watch_rx: mpsc::Receiver<WatchEvent>) {
        let events = self.events_tx.clone();
        let name = self.cfg.name.clone();
        tokio::spawn(async move {
            while let Some(ev) = watch_rx.recv().await {
                let event = match ev {
                    WatchEvent::Update(path) => ProjectEvent::UpdateFile(path),
                    WatchEvent::Remove(path) => ProjectEvent::RemoveFile(path),
                    WatchEvent::Restart => ProjectEvent::Restart { attempt: 0 },
                    WatchEvent::Fail(err) => ProjectEvent::Fail(format!("{name} watcher error: {err}")),
                };
                let restart = matches!(event, ProjectEvent::Restart { .. });
                if events.send(event).await.is_err() || restart {
                    // A restart tears this watcher down; stop translating
                    // stale events for it.
                    return;
                }
            }
        });
    }

    async fn start_runner(&mut self, devcard_name: &str) -> Runner {
        let mut error = self.fatal_error.clone();
        let meta = lookup(&self.analyzer.cards, devcard_name).cloned();
        if error.is_none() && meta.is_none() {
            error = Some(
                ProjectError::NoSuchDevcard {
                    project: self.cfg.name.clone(),
                    devcard: devcard_name.to_string(),
                }
                .to_string(),
            );
        }
        if error.is_none() {
            if let Err(err) = self.generator.run().await {
                error = Some(err.to_string());
            }
        }

        match (error, meta, &self.fork) {
            (None, Some(meta), Some(fork)) => Runner::start(
                &self.highlighting,
                fork.dir(),
                meta,
                SourceLookup {
                    events: self.events_tx.clone(),
                },
            ),
            (error, _, _) => Runner::start_fake(
                &self.highlighting,
                error.unwrap_or_else(|| "project is not initialized".into()),
            ),
        }
    }
}

/// The crate name from the project's `Cargo.toml`, as a module identifier.
fn read_module_name(dir: &Path) -> Result<String, ProjectError> {
    let manifest = dir.join("Cargo.toml");
    let data = std::fs::read_to_string(&manifest)
        .map_err(|_| ProjectError::ManifestMissing(dir.to_path_buf()))?;
    let table: toml::Table = toml::from_str(&data).map_err(|err| ProjectError::ManifestUnreadable {
        manifest: manifest.clone(),
        reason: err.to_string(),
    })?;
    table
        .get("package")
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str())
        .map(|n| n.replace('-', "_"))
        .ok_or(ProjectError::ManifestUnreadable {
            manifest,
            reason: "no package.name".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn write_demo_project(dir: &Path) {
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(
            dir.join("Cargo.toml"),
            "[package]\nname = \"demo-project\"\nversion = \"0.1.0\"\nedition = \"2021\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("src/lib.rs"),
            "use devcards::Devcard;\n\npub fn devcard_hello(card: &mut Devcard) {\n    card.set_title(\"Hi\");\n}\n",
        )
        .unwrap();
    }

    fn demo_config(dir: &Path) -> ProjectConfig {
        ProjectConfig {
            name: "demo".into(),
            dir: dir.to_path_buf(),
            injection: String::new(),
            generators: BTreeMap::new(),
        }
    }

    async fn wait_for_cards(handle: &ProjectHandle) -> Vec<DevcardMeta> {
        for _ in 0..100 {
            let cards = handle.devcards().await;
            if !cards.is_empty() {
                return cards;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Vec::new()
    }

    #[tokio::test]
    async fn test_project_discovers_devcards() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_demo_project(tmp.path());
        let handle = ProjectHandle::start(demo_config(tmp.path()), "rust".into());

        let cards = wait_for_cards(&handle).await;
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].name, "devcard_hello");
        assert_eq!(cards[0].import_path, "demo_project");
        assert_eq!(cards[0].title, "Hi");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_file_change_updates_metadata() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_demo_project(tmp.path());
        let handle = ProjectHandle::start(demo_config(tmp.path()), "rust".into());
        wait_for_cards(&handle).await;

        std::fs::write(
            tmp.path().join("src/lib.rs"),
            "use devcards::Devcard;\n\npub fn devcard_hello(card: &mut Devcard) {}\n\npub fn devcard_more(card: &mut Devcard) {}\n",
        )
        .unwrap();

        let mut names = Vec::new();
        for _ in 0..100 {
            names = handle
                .devcards()
                .await
                .into_iter()
                .map(|m| m.name)
                .collect();
            if names.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(names, vec!["devcard_hello", "devcard_more"]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_manifest_sets_fatal_error_runner() {
        let tmp = tempfile::TempDir::new().unwrap();
        // No Cargo.toml at all.
        let handle = ProjectHandle::start(demo_config(tmp.path()), "rust".into());
        tokio::time::sleep(Duration::from_millis(300)).await;

        let id = handle.start_runner("devcard_hello").await.unwrap();
        let mut updates = handle.take_runner_updates(&id).await.unwrap();

        let mut saw_error = false;
        for _ in 0..16 {
            match tokio::time::timeout(Duration::from_secs(5), updates.recv()).await {
                Ok(Some(Update::Error { body, .. })) => {
                    assert!(body.contains("Cargo.toml"), "{body}");
                    saw_error = true;
                    break;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_error);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_source_lookup_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_demo_project(tmp.path());
        let handle = ProjectHandle::start(demo_config(tmp.path()), "rust".into());
        wait_for_cards(&handle).await;

        let source = handle.source("demo_project.devcard_hello").await.unwrap();
        assert!(source.contains("set_title"));
        assert!(handle.source("demo_project.nope").await.is_none());

        handle.shutdown().await;
    }

    #[test]
    fn test_read_module_name_normalizes_dashes() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("Cargo.toml"),
            "[package]\nname = \"my-neat-crate\"\n",
        )
        .unwrap();
        assert_eq!(read_module_name(tmp.path()).unwrap(), "my_neat_crate");
    }

    #[test]
    fn test_read_module_name_missing_manifest() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            read_module_name(tmp.path()),
            Err(ProjectError::ManifestMissing(_))
        ));
    }
}
