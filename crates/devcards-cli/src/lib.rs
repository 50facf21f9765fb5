//! Devcards server library.
//!
//! A live-reloading devcard server: the browser opens a page bound to one
//! devcard-producing function in a user project; on every file change the
//! project is re-analyzed, mirrored into an isolated fork, rebuilt, and
//! re-executed, with the structured output streamed back to the page.
//!
//! The crate is organized around the five collaborating cores:
//!
//! - [`coalesce`] and [`project::watcher`]: debounced filesystem events
//! - [`project::fork`]: the rewritten mirror used for builds
//! - [`project::analyzer`]: devcard discovery and source rewriting
//! - [`runner`]: per-session subprocess supervision
//! - [`server`]: the HTTP/WebSocket session layer

pub mod cli;
pub mod coalesce;
pub mod codegen;
pub mod config;
pub mod error;
pub mod logger;
pub mod project;
pub mod render;
pub mod runner;
pub mod server;
pub mod ui;
