//! Log tail accumulator.
//!
//! A session runs one remote command, keeps its stdout frames, and publishes
//! the accumulated text through a debounced [`tokio::sync::watch`] channel.
//! Frames on any other channel are dropped.

mod debounce;
mod frame;
mod session;

pub use debounce::{Debouncer, DEFAULT_MAX_WAIT, DEFAULT_WAIT};
pub use frame::{decode_frame, Frame, STDOUT_CHANNEL};
pub use session::{LogBuffer, LogFollower, LogSnapshot, LogTailSession};
