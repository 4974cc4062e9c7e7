//! Agentmesh Core - Types, errors, configuration, and process-wide utilities

pub mod config;
pub mod error;
pub mod ids;
pub mod ports;
pub mod schema;
pub mod types;

pub use config::MeshConfig;
pub use error::{Error, ErrorKind, Result};
pub use ports::PortAllocator;
pub use schema::{FieldSpec, FieldType, IoSchema};
pub use types::*;
