//! Configuration type definitions.
//!
//! These types are deserialised from TOML documents describing the
//! pipelines to run. Each stage entry maps a generic id to a
//! string→string parameter table whose `name` key becomes the stage's
//! specific id:
//!
//! ```toml
//! [[pipeline]]
//! name = "docs"
//!
//! [[pipeline.producer]]
//! directory = { name = "texts", path = "/srv/docs", recursive = "true" }
//!
//! [[pipeline.processor]]
//! extension = { name = "txt-only", extension = ".txt" }
//!
//! [[pipeline.consumer]]
//! print = { name = "stdout" }
//! ```

use serde::Deserialize;
use std::collections::HashMap;

/// One declared stage: generic id → configuration parameters,
/// including the mandatory `name`.
pub type StageEntry = HashMap<String, HashMap<String, String>>;

/// Root configuration: a list of pipeline declarations.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default, rename = "pipeline")]
    pub pipelines: Vec<PipelineConfig>,
}

/// A single pipeline declaration. Processors are optional; producers
/// and consumers are not.
#[derive(Clone, Debug, Deserialize)]
pub struct PipelineConfig {
    pub name: String,

    #[serde(default)]
    pub producer: Vec<StageEntry>,

    #[serde(default)]
    pub processor: Vec<StageEntry>,

    #[serde(default)]
    pub consumer: Vec<StageEntry>,
}
