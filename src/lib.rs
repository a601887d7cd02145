//! callkeeper library
//!
//! Auto-answers voice calls and holds a half-duplex spoken conversation:
//! the call-session state machine, the per-call conversation loop, and the
//! gateway, speech and responder capabilities they drive.

pub mod ai;
pub mod app;
pub mod calls;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod gateway;
pub mod logging;
pub mod speech;
