//! Configuration module: the declarative pipeline description and the
//! loader that materialises it through the module registry.

pub mod loader;
pub mod types;

pub use loader::{build_pipelines, load_config};
pub use types::{Config, PipelineConfig, StageEntry};
