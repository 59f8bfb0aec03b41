//! Configuration loading and validation.
//!
//! - [`settings`] - JSON settings file loading with env overrides
//! - [`validation`] - comprehensive startup validation with errors and
//!   warnings

pub mod settings;
pub mod validation;
