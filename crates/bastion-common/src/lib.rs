//! # Bastion Common
//!
//! Shared types, errors, and constants used across Bastion components.
//!
//! ## Modules
//! - `types` - Cache entry record, challenge DTOs, validation errors
//! - `error` - Service-wide error taxonomy
//! - `constants` - Documented defaults and header names

pub mod constants;
pub mod error;
pub mod types;

pub use error::BastionError;
pub use types::*;
