//! The line-delimited JSON protocol the roster UI speaks to this daemon.

mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use router::handle_request;
pub use types::{AppState, Request};
