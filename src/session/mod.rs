//! Session state and progress delivery.
//!
//! `SessionStore` owns every session and enforces the stage state machine;
//! `EventChannel` carries the ordered progress events for each session.

pub mod events;
pub mod models;
pub mod store;

pub use events::{EventChannel, Subscription};
pub use models::{Event, EventKind, Session, SessionId, Stage, is_valid_transition};
pub use store::{SessionGuard, SessionStore};
