//! Core types for hookrelay.

pub mod agent;
pub mod session;

pub use agent::*;
pub use session::*;
