//! Turns a declarative description into configured pipelines.
//!
//! For every stage entry the loader looks up the default template for
//! the generic id, duplicates it under the entry's `name`, merges the
//! remaining keys over the template's defaults (unknown keys are
//! rejected), configures the instance and hands it to the pipeline via
//! the role-appropriate add operation.

use crate::config::types::{Config, PipelineConfig, StageEntry};
use crate::core::error::StageError;
use crate::core::pipeline::Pipeline;
use crate::core::registry::{self, ModuleHandle};
use anyhow::Context;
use std::collections::HashMap;
use std::path::Path;

/// Read and parse a configuration document.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading configuration file {}", path.display()))?;
    let config: Config =
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

/// Materialise every declared pipeline. Fails on the first
/// misdeclaration; setup errors abort startup rather than surfacing at
/// runtime.
pub fn build_pipelines(config: &Config) -> anyhow::Result<Vec<Pipeline>> {
    config.pipelines.iter().map(build_pipeline).collect()
}

fn build_pipeline(config: &PipelineConfig) -> anyhow::Result<Pipeline> {
    if config.producer.is_empty() {
        anyhow::bail!("pipeline '{}' declares no producers", config.name);
    }
    if config.consumer.is_empty() {
        anyhow::bail!("pipeline '{}' declares no consumers", config.name);
    }

    let mut pipeline = Pipeline::new(&config.name);

    for_each_stage(&config.producer, |generic_id, params| {
        let handle = setup_module(generic_id, params)
            .with_context(|| format!("pipeline '{}'", config.name))?;
        pipeline.add_producer(handle)?;
        Ok(())
    })?;

    for_each_stage(&config.processor, |generic_id, params| {
        let handle = setup_module(generic_id, params)
            .with_context(|| format!("pipeline '{}'", config.name))?;
        pipeline.add_processor(handle)?;
        Ok(())
    })?;

    for_each_stage(&config.consumer, |generic_id, params| {
        let handle = setup_module(generic_id, params)
            .with_context(|| format!("pipeline '{}'", config.name))?;
        pipeline.add_consumer(handle)?;
        Ok(())
    })?;

    Ok(pipeline)
}

fn for_each_stage(
    entries: &[StageEntry],
    mut apply: impl FnMut(&str, &HashMap<String, String>) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    for entry in entries {
        for (generic_id, params) in entry {
            apply(generic_id, params)?;
        }
    }
    Ok(())
}

fn setup_module(
    generic_id: &str,
    params: &HashMap<String, String>,
) -> anyhow::Result<ModuleHandle> {
    let specific_id = params
        .get("name")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow::anyhow!("entry for '{generic_id}' has no name field"))?;

    if registry::lookup_instance(generic_id, specific_id).is_some() {
        anyhow::bail!("module '{generic_id}/{specific_id}' already exists");
    }

    let handle = registry::duplicate(generic_id, specific_id)?;

    let mut merged = handle.parameters();
    for (key, value) in params {
        if key == "name" {
            continue;
        }
        if !merged.contains_key(key) {
            return Err(StageError::UnknownParameter {
                parameter: key.clone(),
            })
            .with_context(|| format!("configuring '{generic_id}/{specific_id}'"));
        }
        merged.insert(key.clone(), value.clone());
    }

    handle
        .configure(&merged)
        .with_context(|| format!("configuring '{generic_id}/{specific_id}'"))?;

    if !handle.is_ready() {
        anyhow::bail!("module '{generic_id}/{specific_id}' not ready after configuration");
    }

    Ok(handle)
}
