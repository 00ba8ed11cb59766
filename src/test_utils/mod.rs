//! Shared helpers for unit tests: logger setup, endpoint fixtures, polling
//! helpers and a recording import provider.
mod common;
mod recording_provider;

pub use common::*;
pub use recording_provider::*;
