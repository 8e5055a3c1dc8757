//! Core types for sessionvault
//!
//! This crate contains the domain types shared by the storage layer and its
//! in-process consumers: the session record, its partial-update form, and
//! the default tunables.

mod constants;
mod env_config;
mod session;

pub use constants::*;
pub use env_config::env_parse_with_default;
pub use session::*;
