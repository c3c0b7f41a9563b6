// ABOUTME: Switchyard gateway library root -- plugin subsystem plus gateway assembly.
// ABOUTME: Core primitives live in switchyard-core; the agent loop in switchyard-agent.

pub mod bootstrap;
pub mod plugin;

pub use bootstrap::{Gateway, DEFAULT_AGENT};
