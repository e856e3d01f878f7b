//! # achew client core (achew-ui)
//!
//! Keeps one authoritative view of the backend's chapter-generation
//! session and drives segment previews.
//!
//! **Architecture:**
//! - `api`: request/response contract (`SessionApi`, reqwest `ApiClient`)
//! - `channel`: WebSocket push events and handler registry
//! - `session`: `SessionManager` merging pulls and pushes into `SessionState`
//! - `debounce`: settle timers for title edits
//! - `app`: wiring between session, channel and the preview arbiter

pub mod api;
pub mod app;
pub mod channel;
pub mod debounce;
pub mod session;

pub use api::{ApiClient, SessionApi};
pub use app::App;
pub use channel::{ChannelStatus, EventChannel, EventSource, HandlerRegistry};
pub use session::{SessionManager, SessionState};
