//! Route configuration.

pub mod api;
pub mod ws;
