//! Core types for the opmarshal operation marshalling engine.
//!
//! This crate holds the immutable, externally produced description of an API
//! operation and the small pure building blocks shared by the client crate
//! (`opmarshal-client`).
//!
//! ## Modules
//!
//! - `plan`: Operation, parameter, body and response plans with validated construction
//! - `error`: Plan errors and the engine-wide error taxonomy
//! - `media`: Media type normalization and classification
//! - `rule`: Declarative encoding rules and the named transform registry
//! - `compression`: Compression codecs used by compression rules
//! - `record`: Record-stream framing (JSON Lines, JSON text sequences)

mod compression;
mod error;
mod media;
mod plan;
mod record;
mod rule;

pub use compression::*;
pub use error::*;
pub use media::*;
pub use plan::*;
pub use record::*;
pub use rule::*;
