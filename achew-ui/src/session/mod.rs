//! Session state synchronizer and its merge rules

pub mod manager;
pub mod reconcile;
pub mod state;

pub use manager::{SessionManager, EDIT_DEBOUNCE};
pub use reconcile::PushOutcome;
pub use state::{SessionError, SessionState};
