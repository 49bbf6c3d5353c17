//! Process wiring: configuration, logging, startup gates and the follow loop.

#[allow(clippy::module_inception)]
pub mod runtime;
