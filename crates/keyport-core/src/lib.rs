//! Keyport Core - Domain types and traits for external identity providers

pub mod callback;
pub mod config;
pub mod error;
pub mod identity;
pub mod ids;
pub mod traits;

#[cfg(test)]
mod tests;

pub use callback::*;
pub use config::*;
pub use error::*;
pub use identity::*;
pub use ids::*;
pub use traits::*;
