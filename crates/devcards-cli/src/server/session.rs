//! Per-browser-page sessions.
//!
//! A client is created for each WebSocket connection. Devcard clients own
//! a runner and translate its updates into browser frames, routed through
//! the warm-up batcher; list clients render the project's devcard index;
//! error clients report why neither was possible.

use devcards::meta::{filter_by_import_path, group_by_import_path};
use devcards::{Cell, DevcardMeta};
use futures::{SinkExt, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::batcher::{batcher, BREAK_BATCHING};
use super::messages::*;
use super::ServerState;
use crate::project::ProjectHandle;
use crate::render::{escape_html, md_to_html, render_error};
use crate::runner::{RenderedCell, Update};

/// Client kinds, as sent in the `clientKind` query parameter.
pub const CLIENT_DEVCARD: &str = "ClientDevcard";
pub const CLIENT_LIST: &str = "ClientList";

type WsSender = futures::stream::SplitSink<axum::extract::ws::WebSocket, axum::extract::ws::Message>;
type WsReceiver = futures::stream::SplitStream<axum::extract::ws::WebSocket>;

/// Pump frames from a channel onto the socket until either side closes.
fn spawn_frame_pump(mut ws_tx: WsSender, mut frames: mpsc::Receiver<Vec<u8>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let text = String::from_utf8_lossy(&frame).to_string();
            if ws_tx
                .send(axum::extract::ws::Message::Text(text.into()))
                .await
                .is_err()
            {
                return;
            }
        }
    })
}

/// Block until the browser hangs up.
async fn wait_for_disconnect(ws_rx: &mut WsReceiver) {
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(axum::extract::ws::Message::Close(_)) | Err(_) => return,
            _ => {}
        }
    }
}

/// A client whose project or kind could not be resolved.
pub async fn run_error_client(socket: axum::extract::ws::WebSocket, err: String) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (frames_tx, frames_rx) = mpsc::channel(16);
    let pump = spawn_frame_pump(ws_tx, frames_rx);

    let _ = frames_tx.send(msg_clear()).await;
    let _ = frames_tx.send(msg_set_title("Error")).await;
    let _ = frames_tx
        .send(msg_append_cell(
            "error",
            &format!("<code>{}</code>", escape_html(&err)),
        ))
        .await;

    wait_for_disconnect(&mut ws_rx).await;
    drop(frames_tx);
    let _ = pump.await;
}

/// The devcard index of one project, grouped by import path.
pub async fn run_list_client(
    socket: axum::extract::ws::WebSocket,
    url: String,
    project: ProjectHandle,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (frames_tx, frames_rx) = mpsc::channel(64);
    let pump = spawn_frame_pump(ws_tx, frames_rx);

    let jump = url
        .split_once("jump=")
        .map(|(_, rest)| rest.split('&').next().unwrap_or("").to_string())
        .filter(|j| !j.is_empty());

    let cards = project.devcards().await;
    let mut md = String::new();
    for group in group_by_import_path(&cards) {
        let first = &group[0];
        md.push_str(&format!(
            "\n<h4 id=\"{}\">{} <span class=\"import-path\">{}</span></h4>\n",
            pkg_id(first),
            first.package,
            first.import_path
        ));
        for card in &group {
            md.push_str(&format!(
                "* [{}](/dc/{}/{})\n",
                card.caption(),
                project.name,
                card.name
            ));
        }
    }
    if cards.is_empty() {
        md.push_str("No devcards found in this project.\n");
    }

    let _ = frames_tx.send(msg_append_cell("list", &md_to_html(&md))).await;
    if let Some(jump) = jump {
        let _ = frames_tx.send(msg_jump(&jump)).await;
    }

    wait_for_disconnect(&mut ws_rx).await;
    drop(frames_tx);
    let _ = pump.await;
}

/// Anchor id of a package section on the list page.
fn pkg_id(meta: &DevcardMeta) -> String {
    let mut parts = meta.import_path.rsplit("::");
    let last = parts.next().unwrap_or("");
    match parts.next() {
        Some(parent) => format!("{parent}-{last}"),
        None => last.to_string(),
    }
}

/// A live devcard view.
pub async fn run_devcard_client(
    state: Arc<ServerState>,
    socket: axum::extract::ws::WebSocket,
    project: ProjectHandle,
    devcard_name: String,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (frames_tx, frames_rx) = mpsc::channel(256);
    let pump = spawn_frame_pump(ws_tx, frames_rx);
    let (batch_tx, batch_handle) = batcher(frames_tx.clone());

    let meta = project.devcard(&devcard_name).await;
    let caption = meta
        .as_ref()
        .map(|m| m.caption().to_string())
        .unwrap_or_else(|| devcard_name.clone());

    let _ = batch_tx.send(msg_clear()).await;
    let _ = batch_tx.send(msg_set_title(&caption)).await;
    let nav = navigation_block(&project, meta.as_ref()).await;
    let _ = batch_tx
        .send(msg_set_cell_content("-devcard-navigation", &nav))
        .await;

    let Some(runner_id) = project.start_runner(&devcard_name).await else {
        drop(batch_tx);
        let _ = batch_handle.await;
        drop(frames_tx);
        let _ = pump.await;
        return;
    };
    let Some(mut updates) = project.take_runner_updates(&runner_id).await else {
        drop(batch_tx);
        let _ = batch_handle.await;
        drop(frames_tx);
        let _ = pump.await;
        return;
    };

    let (tests_tx, mut tests_rx) = mpsc::channel::<usize>(4);
    let mut session = DevcardSession {
        state: state.clone(),
        project: project.clone(),
        runner_id: runner_id.clone(),
        batch: batch_tx.clone(),
        build_time: None,
        run_time: None,
        failed_tests: 0,
        stdout_created: false,
        stderr_created: false,
        error_counter: 0,
        tests_tx,
    };

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(update) => session.apply(update).await,
                None => break,
            },
            failed = tests_rx.recv() => {
                if let Some(failed) = failed {
                    session.failed_tests = failed;
                    session.send_badges().await;
                }
            }
            msg = ws_rx.next() => match msg {
                None | Some(Err(_)) | Some(Ok(axum::extract::ws::Message::Close(_))) => break,
                _ => {}
            },
        }
    }

    project.stop_runner(&runner_id).await;
    state.drop_unblocks_of(&runner_id);
    drop(session);
    drop(batch_tx);
    let _ = batch_handle.await;
    drop(frames_tx);
    let _ = pump.await;
}

/// Navigation between the devcards of one package, in stable metadata
/// order with wrap-around.
async fn navigation_block(project: &ProjectHandle, meta: Option<&DevcardMeta>) -> String {
    let Some(meta) = meta else {
        return md_to_html(&format!("❬ [top](/dc/{}) ❭", project.name));
    };
    let up = format!(
        "[top: {}](/dc/{}?jump={})",
        meta.package,
        project.name,
        pkg_id(meta)
    );

    let siblings = filter_by_import_path(&project.devcards().await, &meta.import_path);
    if siblings.len() < 2 {
        return md_to_html(&format!("❬ {up} ❭"));
    }

    let pos = siblings
        .iter()
        .position(|m| m.name == meta.name)
        .unwrap_or(0);
    let prev = &siblings[(pos + siblings.len() - 1) % siblings.len()];
    let next = &siblings[(pos + 1) % siblings.len()];
    let prev = format!("[prev: {}]({})", prev.caption(), prev.name);
    let next = format!("[next: {}]({})", next.caption(), next.name);
    md_to_html(&format!("❬ {prev} | {up} | {next} ❭"))
}

struct DevcardSession {
    state: Arc<ServerState>,
    project: ProjectHandle,
    runner_id: String,
    batch: mpsc::Sender<Vec<u8>>,
    build_time: Option<String>,
    run_time: Option<String>,
    failed_tests: usize,
    stdout_created: bool,
    stderr_created: bool,
    error_counter: usize,
    tests_tx: mpsc::Sender<usize>,
}

impl DevcardSession {
    async fn apply(&mut self, update: Update) {
        match update {
            Update::Card(card) => {
                // A fresh (re)run: reset the page, replay the batch, and
                // put the viewport back where the user had it.
                let _ = self.batch.send(msg_save_scroll_position()).await;
                let _ = self.batch.send(msg_clear()).await;
                self.stdout_created = false;
                self.stderr_created = false;
                self.run_time = None;
                self.failed_tests = 0;
                for cell in card.cells {
                    self.append_cell(cell).await;
                }
                if !card.stdout.is_empty() {
                    self.pipe_out(false, &card.stdout).await;
                }
                if !card.stderr.is_empty() {
                    self.pipe_out(true, &card.stderr).await;
                }
                let _ = self.batch.send(msg_restore_scroll_position()).await;
            }

            Update::Cell(cell) => self.append_cell(cell).await,

            Update::Title(title) => {
                let _ = self.batch.send(msg_set_title(&title)).await;
            }

            Update::Meta {
                build_time,
                run_time,
            } => {
                if build_time.is_some() {
                    self.build_time = build_time;
                }
                if run_time.is_some() {
                    self.run_time = run_time;
                }
                self.send_badges().await;
            }

            Update::Finished { run_time, test_dir } => {
                self.run_time = Some(run_time);
                self.send_badges().await;
                let tests_tx = self.tests_tx.clone();
                tokio::spawn(async move {
                    let failed = count_failed_tests(&test_dir).await;
                    let _ = tests_tx.send(failed).await;
                });
            }

            Update::Error { title, body } => {
                self.error_counter += 1;
                let id = format!("-dc-error-{}", self.error_counter);
                let _ = self
                    .batch
                    .send(msg_append_cell(&id, &render_error(&title, &body)))
                    .await;
                if title == "Fatal error" {
                    let md =
                        "Server cannot recover from this error. [Restart the server](/restart).";
                    let _ = self
                        .batch
                        .send(msg_append_cell("-dc-restart", &md_to_html(md)))
                        .await;
                }
            }

            Update::Stdout(line) => self.pipe_out(false, &format!("{line}\n")).await,
            Update::Stderr(line) => self.pipe_out(true, &format!("{line}\n")).await,

            Update::Heartbeat => {}
        }
    }

    async fn append_cell(&mut self, cell: RenderedCell) {
        let _ = self.batch.send(msg_append_cell(&cell.id, &cell.html)).await;

        match &cell.cell {
            Cell::Jump { delay } => {
                let batch = self.batch.clone();
                let id = cell.id.clone();
                let delay = Duration::from_millis(*delay);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = batch.send(msg_jump(&id)).await;
                });
            }
            Cell::Wait { id } => {
                let _ = self.batch.send(BREAK_BATCHING.to_vec()).await;
                self.state
                    .arm_unblock(id, &self.project, &self.runner_id);
            }
            _ => {}
        }
    }

    async fn pipe_out(&mut self, stderr: bool, text: &str) {
        if stderr {
            if !self.stderr_created {
                self.stderr_created = true;
                let s = "<h3 class=\"err\">Stderr:</h3><pre id=\"-devcard-stderr-cell\"></pre>";
                let _ = self.batch.send(msg_set_cell_content("-devcard-stderr", s)).await;
            }
            let _ = self
                .batch
                .send(msg_append_to_cell("-devcard-stderr-cell", &escape_html(text)))
                .await;
        } else {
            if !self.stdout_created {
                self.stdout_created = true;
                let s = "<h3>Stdout:</h3><pre id=\"-devcard-stdout-cell\"></pre>";
                let _ = self.batch.send(msg_set_cell_content("-devcard-stdout", s)).await;
            }
            let _ = self
                .batch
                .send(msg_append_to_cell("-devcard-stdout-cell", &escape_html(text)))
                .await;
        }
    }

    async fn send_badges(&mut self) {
        let mut badges = Vec::new();
        badges.push(format!(
            "<code>build: {}</code>",
            self.build_time.as_deref().unwrap_or("0ms")
        ));
        if let Some(run_time) = &self.run_time {
            badges.push(format!("<code>run: {run_time}</code>"));
        }
        match self.failed_tests {
            0 => {}
            1 => badges.push("<code class=\"err\">1 test failed</code>".to_string()),
            n => badges.push(format!("<code class=\"err\">{n} tests failed</code>")),
        }
        let _ = self.batch.send(msg_set_status_bar_content(&badges)).await;
    }
}

/// Run the project's tests once and count failures.
///
/// Failures are summed from cargo's `… passed; N failed;` result lines.
async fn count_failed_tests(dir: &Path) -> usize {
    let output = tokio::process::Command::new("cargo")
        .args(["test", "--quiet"])
        .current_dir(dir)
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => 0,
        Ok(out) => {
            let text = format!(
                "{}{}",
                String::from_utf8_lossy(&out.stdout),
                String::from_utf8_lossy(&out.stderr)
            );
            parse_failed_count(&text)
        }
        Err(_) => 0,
    }
}

fn parse_failed_count(output: &str) -> usize {
    let mut failed = 0;
    for line in output.lines() {
        let Some(rest) = line.split("; ").find_map(|part| part.strip_suffix(" failed")) else {
            continue;
        };
        if let Ok(n) = rest.trim().parse::<usize>() {
            failed += n;
        }
    }
    failed
}
