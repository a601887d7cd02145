//! Conversation
//!
//! The half-duplex listen/transcribe/respond/speak loop that runs while a
//! call is ready, along with the per-call context it maintains and the
//! transcript it leaves behind.

pub mod context;
pub mod extract;
pub mod runner;
pub mod transcript;

pub use context::*;
pub use extract::*;
pub use runner::*;
pub use transcript::*;
