//! Route handlers.

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use tower_http::cors::{Any, CorsLayer};

use super::open::open_in_editor;
use super::pages::Page;
use super::session;
use super::SharedState;
use crate::render::md_to_html;

const DEVCARDS_CSS: &str = include_str!("../../assets/devcards.css");
const LIGHT_CSS: &str = include_str!("../../assets/light.css");
const DARK_CSS: &str = include_str!("../../assets/dark.css");
const FAVICON: &[u8] = include_bytes!("../../assets/favicon.png");

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(handle_home))
        .route("/dc/{project}", get(handle_project_devcards))
        .route("/dc/{project}/{devcard}", get(handle_devcard))
        .route("/ws", get(handle_ws))
        .route("/file", get(handle_file))
        .route("/unblock/{id}", get(handle_unblock))
        .route("/open/{project}/{devcard}", get(handle_open))
        .route("/restart", get(handle_restart))
        .route("/init-config", get(handle_init_config))
        .route("/stylesheet/css", get(handle_css))
        .route("/favicon.png", get(handle_favicon))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

fn new_client_id() -> String {
    format!("cl-{}", uuid::Uuid::new_v4().simple())
}

/// Home: the project list and the config status.
async fn handle_home(State(state): State<SharedState>) -> Html<String> {
    let cfg = &state.cfg;
    let mut md = String::from("#### Projects\n\n");
    for project in &cfg.projects {
        md.push_str(&format!(
            "* [{name}](/dc/{name}): {dir}\n",
            name = project.name,
            dir = project.dir.display()
        ));
    }
    if cfg.projects.is_empty() {
        md.push_str("No projects configured.\n");
    }

    md.push_str("\n#### Config\n\n");
    match (&cfg.err, &cfg.data) {
        (Some(err), None) => {
            md.push_str(&format!("Config file doesn't exist at `{}`\n\n", cfg.path.display()));
            md.push_str(&format!("({err})\n\n"));
            md.push_str(r#"<form action="/init-config"><input type="submit" value="Create initial config" /></form>"#);
        }
        (Some(err), Some(data)) => {
            md.push_str(&format!("Unable to load the config: `{err}`\n\n"));
            md.push_str(&format!("Content:\n```\n{data}\n```\n"));
        }
        (None, data) => {
            md.push_str(&format!("Location: `{}`\n\n", cfg.path.display()));
            if let Some(data) = data {
                md.push_str(&format!("Content:\n```\n{data}\n```\n"));
            }
        }
    }

    md.push_str("\n#### Server\n\n");
    md.push_str(r#"<form action="/restart"><input type="submit" value="Restart the server" /></form>"#);

    Html(
        Page {
            title: "Devcards",
            body: &md_to_html(&md),
            ..Page::default()
        }
        .generate(),
    )
}

/// List of devcards in a project.
async fn handle_project_devcards(
    Path(project): Path<String>,
    uri: axum::http::Uri,
) -> Html<String> {
    Html(
        Page {
            title: &format!("Devcards: {project}"),
            client_id: &new_client_id(),
            client_kind: session::CLIENT_LIST,
            url: &uri.to_string(),
            project_name: &project,
            ..Page::default()
        }
        .generate(),
    )
}

/// Devcard view page.
async fn handle_devcard(
    State(state): State<SharedState>,
    Path((project_name, devcard_name)): Path<(String, String)>,
    uri: axum::http::Uri,
) -> Html<String> {
    let title = match state.project(&project_name) {
        Some(project) => project
            .devcard(&devcard_name)
            .await
            .map(|m| m.caption().to_string())
            .unwrap_or_else(|| devcard_name.clone()),
        None => devcard_name.clone(),
    };
    Html(
        Page {
            title: &title,
            client_id: &new_client_id(),
            client_kind: session::CLIENT_DEVCARD,
            url: &uri.to_string(),
            project_name: &project_name,
            devcard_name: &devcard_name,
            ..Page::default()
        }
        .generate(),
    )
}

/// The streaming update channel.
async fn handle_ws(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let kind = params.get("clientKind").cloned().unwrap_or_default();
    let url = params.get("url").cloned().unwrap_or_default();
    let project_name = params.get("projectName").cloned().unwrap_or_default();
    let devcard_name = params.get("devcardName").cloned().unwrap_or_default();

    ws.on_upgrade(move |socket| async move {
        let project = state.project(&project_name);
        match (project, kind.as_str()) {
            (Some(project), session::CLIENT_DEVCARD) => {
                session::run_devcard_client(state, socket, project, devcard_name).await;
            }
            (Some(project), session::CLIENT_LIST) => {
                session::run_list_client(socket, url, project).await;
            }
            (None, _) => {
                session::run_error_client(socket, format!("project {project_name:?} doesn't exist"))
                    .await;
            }
            (_, kind) => {
                session::run_error_client(socket, format!("unknown client kind {kind:?}")).await;
            }
        }
    })
}

/// Serve an absolute file path (rendered images live in transient dirs).
async fn handle_file(Query(params): Query<HashMap<String, String>>) -> Response {
    let Some(path) = params.get("path") else {
        return (StatusCode::BAD_REQUEST, "missing path").into_response();
    };
    match tokio::fs::read(path).await {
        Ok(content) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type_of(path))
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from(content))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(_) => (StatusCode::NOT_FOUND, format!("File not found: {path}")).into_response(),
    }
}

async fn handle_unblock(State(state): State<SharedState>, Path(id): Path<String>) -> StatusCode {
    state.unblock(&id).await;
    StatusCode::NO_CONTENT
}

/// Open a devcard's source in the configured editor.
async fn handle_open(
    State(state): State<SharedState>,
    Path((project_name, devcard_name)): Path<(String, String)>,
) -> String {
    const ERROR_HEADER: &str = "Unable to open devcard for editing\n\n";

    let Some(project) = state.project(&project_name) else {
        return format!("{ERROR_HEADER}Project {project_name} not found.");
    };
    let Some(meta) = project.devcard(&devcard_name).await else {
        return format!("{ERROR_HEADER}Devcard {devcard_name} not found in {project_name}.");
    };

    let path = project.dir.join(&meta.path);
    match open_in_editor(&state.cfg, &path, meta.line).await {
        Ok(()) => String::new(),
        Err(err) => format!("{ERROR_HEADER}{err}"),
    }
}

/// Graceful restart, redirecting the browser back afterwards.
async fn handle_restart(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<String> {
    let redirect = params
        .get("redirect")
        .filter(|r| !r.is_empty())
        .cloned()
        .unwrap_or_else(|| "/".to_string());

    let body = format!(
        r#"Server is being restarted...
<script type="text/javascript">
    setTimeout(function () {{ window.location = {redirect:?}; }}, 1000);
</script>"#
    );
    let html = Page {
        title: "Devcards",
        body: &body,
        ..Page::default()
    }
    .generate();

    let state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        state.request_restart();
    });

    Html(html)
}

/// Write a default config file, then restart.
async fn handle_init_config(
    State(state): State<SharedState>,
    query: Query<HashMap<String, String>>,
) -> Response {
    match state.cfg.create() {
        Ok(()) => handle_restart(State(state), query).await.into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(
                Page {
                    title: "Devcards",
                    body: &format!("failed to create config: {err}"),
                    ..Page::default()
                }
                .generate(),
            ),
        )
            .into_response(),
    }
}

/// The configured stylesheet stack, concatenated.
async fn handle_css(State(state): State<SharedState>) -> Response {
    let mut css = String::new();
    for stylesheet in &state.cfg.appearance.stylesheets {
        match stylesheet.as_str() {
            "builtin" => css.push_str(DEVCARDS_CSS),
            "builtin/light" | "" => css.push_str(LIGHT_CSS),
            "builtin/dark" => css.push_str(DARK_CSS),
            path => match std::fs::read_to_string(path) {
                Ok(data) => css.push_str(&data),
                Err(err) => tracing::warn!("can't read CSS file {path}: {err}"),
            },
        }
        css.push('\n');
    }
    ([(header::CONTENT_TYPE, "text/css")], css).into_response()
}

async fn handle_favicon() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], FAVICON)
}

/// MIME type from a path's extension.
fn content_type_of(path: &str) -> &'static str {
    let extension = std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");
    match extension {
        "html" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
