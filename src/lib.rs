//! Face clustering and person identity resolution for a personal photo library.
//!
//! Faces arrive with embeddings computed elsewhere. [`core::HierarchicalClusterer`]
//! groups them into people, [`core::IdentityResolver`] keeps that set current as
//! new faces and user corrections come in, and [`services::PersonIdentityStore`]
//! owns the names people are given.

pub mod config;
pub mod core;
pub mod services;

pub use config::{ConfigError, EngineConfig};
