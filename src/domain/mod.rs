//! Domain models for Identity Core

pub mod event;
pub mod identity;

pub use event::*;
pub use identity::*;
