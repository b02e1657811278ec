//! S-expression message protocol for driving a registry from a stream.

pub mod dispatch;

pub use dispatch::handle_message;
