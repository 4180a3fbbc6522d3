use crate::core::consumer::{ConsumerStage, Sink};
use crate::core::diagnostics::StageReporter;
use crate::core::error::StageError;
use crate::core::item::PipelineItem;
use crate::core::stage::ParameterMap;
use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;

pub const GENERIC_ID: &str = "copy";

/// Copies each item's first `file://` locator into a destination
/// directory. Locators with any other scheme are ignored with a
/// diagnostic.
#[derive(Debug, Clone, Default)]
pub struct CopySink {
    destination: PathBuf,
    destination_exists: bool,
}

pub fn template() -> ConsumerStage<CopySink> {
    ConsumerStage::new("Copy Consumer", "1.0.0", GENERIC_ID, "", CopySink::default())
}

#[async_trait]
impl Sink for CopySink {
    fn parameters(&self) -> ParameterMap {
        ParameterMap::from([("destination".to_string(), String::new())])
    }

    fn configure(&mut self, params: &ParameterMap) -> Result<(), StageError> {
        let destination = params
            .get("destination")
            .filter(|destination| !destination.is_empty())
            .ok_or_else(|| StageError::Config {
                parameter: "destination".to_string(),
                reason: "required parameter not found".to_string(),
            })?;

        self.destination = PathBuf::from(destination);
        Ok(())
    }

    async fn deliver(
        &mut self,
        item: PipelineItem,
        _reporter: &StageReporter,
    ) -> anyhow::Result<()> {
        let locator = item
            .locator(0)
            .ok_or_else(|| anyhow::anyhow!("item '{}' has no locators", item.name()))?;

        if locator.scheme() != "file" {
            anyhow::bail!(
                "ignoring locator with scheme '{}' on item '{}'",
                locator.scheme(),
                item.name()
            );
        }

        let source = locator
            .to_file_path()
            .map_err(|_| anyhow::anyhow!("locator '{locator}' is not a local path"))?;
        let file_name = source
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("locator '{locator}' has no file name"))?;

        if !self.destination_exists {
            tokio::fs::create_dir_all(&self.destination)
                .await
                .with_context(|| format!("creating {}", self.destination.display()))?;
            self.destination_exists = true;
        }

        let target = self.destination.join(file_name);
        tokio::fs::copy(&source, &target)
            .await
            .with_context(|| format!("copying {} to {}", source.display(), target.display()))?;

        Ok(())
    }
}
