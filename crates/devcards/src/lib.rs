//! Devcard API crate.
//!
//! A *devcard* is a live-reloading rendered view of one function's output.
//! User projects define producer functions:
//!
//! ```no_run
//! use devcards::Devcard;
//!
//! pub fn devcard_hello(card: &mut Devcard) {
//!     card.set_title("Hi");
//!     card.md("hello");
//! }
//! ```
//!
//! The devcards server discovers these functions, builds the project in an
//! isolated fork, and runs them in a subprocess through a generated
//! bootstrap binary. This crate holds everything both sides share: the
//! [`Cell`] tagged union, [`DevcardMeta`], the wire [`message`] types, and
//! the producer-side [`runtime`].

pub mod cell;
mod devcard;
pub mod message;
pub mod meta;
pub mod runtime;

pub use cell::{AnnotatedImage, AnnotatedValue, Cell};
pub use devcard::{Devcard, DevcardProducer};
pub use meta::DevcardMeta;
