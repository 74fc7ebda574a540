//! # chatrelay_core
//!
//! Request validation, prompt assembly and model dispatch for Chatrelay.

pub mod classify;
pub mod config;
pub mod cost;
pub mod credentials;
pub mod guard;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod sanitize;
pub mod session;

#[cfg(test)]
mod test_support;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
