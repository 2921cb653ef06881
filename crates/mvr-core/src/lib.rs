//! mvr-core - Core types and traits for multi-strategy retrieval
//!
//! This crate provides the domain types, collaborator traits, configuration
//! and error handling shared by the rest of the mvr workspace.
//!
//! Features:
//! - Strategy registry types (roles, transforms, metadata filters)
//! - Fusion and rerank provenance carried on every returned document
//! - Collaborator seams: document index, relevance model, query intelligence
//! - TOML configuration with per-field defaults

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{Result, RetrievalError};
pub use traits::*;
pub use types::*;
