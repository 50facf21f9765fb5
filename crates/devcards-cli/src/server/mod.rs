//! HTTP front end and server lifecycle.
//!
//! The server owns one [`ProjectHandle`] per configured project plus the
//! registry of armed wait-cell unblocks. Restarting from the browser tears
//! everything down and rebuilds it from a freshly loaded config.

pub mod batcher;
pub mod messages;
pub mod open;
pub mod pages;
pub mod routes;
pub mod session;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::config::{self, Config};
use crate::error::{CliError, Result};
use crate::project::ProjectHandle;
use crate::ui;

/// Grace period for project shutdown before the process exits hard.
const PROJECT_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Grace period for draining HTTP connections.
const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

struct UnblockTarget {
    project: ProjectHandle,
    runner_id: String,
}

/// Shared state behind every route handler.
pub struct ServerState {
    pub cfg: Config,
    projects: HashMap<String, ProjectHandle>,
    unblocks: Mutex<HashMap<String, UnblockTarget>>,
    restart: mpsc::Sender<()>,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    pub fn project(&self, name: &str) -> Option<ProjectHandle> {
        self.projects.get(name).cloned()
    }

    /// Remember which runner is waiting on `unblock_id`.
    pub fn arm_unblock(&self, unblock_id: &str, project: &ProjectHandle, runner_id: &str) {
        self.unblocks.lock().insert(
            unblock_id.to_string(),
            UnblockTarget {
                project: project.clone(),
                runner_id: runner_id.to_string(),
            },
        );
    }

    /// Release a wait cell, if anyone is waiting on it.
    pub async fn unblock(&self, unblock_id: &str) {
        let target = self.unblocks.lock().remove(unblock_id);
        if let Some(target) = target {
            target.project.unblock(&target.runner_id, unblock_id).await;
        }
    }

    /// Forget armed unblocks of a closed runner.
    pub fn drop_unblocks_of(&self, runner_id: &str) {
        self.unblocks
            .lock()
            .retain(|_, target| target.runner_id != runner_id);
    }

    /// Ask the outer loop for a config reload and full restart.
    pub fn request_restart(&self) {
        let _ = self.restart.try_send(());
    }
}

/// Run the server until interrupted.
///
/// Browser-requested restarts reload the config and rebuild everything;
/// the loop only exits on interrupt or a fatal listener error.
pub async fn run(port_override: Option<u16>) -> Result<()> {
    loop {
        let mut cfg = config::load();
        if let Some(port) = port_override {
            cfg.port = port;
        }
        if !run_once(cfg).await? {
            return Ok(());
        }
        ui::info("Restarting the server...");
    }
}

/// One server incarnation. Returns whether a restart was requested.
async fn run_once(cfg: Config) -> Result<bool> {
    let (restart_tx, mut restart_rx) = mpsc::channel(1);

    let highlighting = cfg.appearance.code_highlighting.clone();
    let mut projects = HashMap::new();
    for project_cfg in &cfg.projects {
        let handle = ProjectHandle::start(project_cfg.clone(), highlighting.clone());
        projects.insert(project_cfg.name.clone(), handle);
    }

    let state: SharedState = Arc::new(ServerState {
        cfg,
        projects,
        unblocks: Mutex::new(HashMap::new()),
        restart: restart_tx,
    });

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", state.cfg.port))
        .await
        .map_err(|err| CliError::Server(format!("failed to bind to port {}: {err}", state.cfg.port)))?;

    ui::info("Starting devcards...");
    ui::info(&format!(
        "Access the app via the following URL: http://127.0.0.1:{}",
        state.cfg.port
    ));

    let app = routes::router(state.clone());
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let restart = tokio::select! {
        _ = tokio::signal::ctrl_c() => false,
        requested = restart_rx.recv() => requested.is_some(),
    };

    ui::info("Shutting down the server...");
    shutdown_projects(&state).await;

    let _ = shutdown_tx.send(());
    match tokio::time::timeout(HTTP_SHUTDOWN_GRACE, &mut server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => tracing::warn!("error shutting down the HTTP server: {err}"),
        Ok(Err(join_err)) => tracing::warn!("HTTP server task failed: {join_err}"),
        Err(_) => {
            server.abort();
            tracing::warn!("HTTP shutdown deadline exceeded");
        }
    }

    Ok(restart)
}

/// Shut down every project, hard-exiting if the grace period is blown.
async fn shutdown_projects(state: &ServerState) {
    let all = async {
        for (name, project) in &state.projects {
            tracing::info!("shutting down {name}");
            if let Some(report) = project.shutdown().await {
                ui::warning(&report);
            }
        }
    };
    if tokio::time::timeout(PROJECT_SHUTDOWN_GRACE, all).await.is_err() {
        ui::error("Unable to shut down gracefully");
        std::process::exit(1);
    }
}
