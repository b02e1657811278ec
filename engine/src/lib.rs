//! Nodvote engine: turns per-frame face and hand landmarks into debounced
//! yes/no voting gestures.
//!
//! The [`SessionRegistry`] is the entry point. Feed it one [`Frame`] per
//! detector output; it returns the gestures recognized in that frame.

pub mod config;
pub mod gesture;
pub mod ipc;

pub use config::EngineConfig;
pub use gesture::{Frame, GestureEvent, SessionRegistry};
