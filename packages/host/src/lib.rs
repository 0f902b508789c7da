//! Command-line host for Pocket.
//!
//! Replays a scripted [`Session`] against a real engine: in-process render
//! surfaces, channel-backed logic realms, and the built-in modules. What
//! crosses the bridge is written out as JSON lines.

mod error;
mod host;
mod session;

pub use error::{HostError, Result};
pub use host::{run_session, Host};
pub use session::{AppRef, Session, Step};
