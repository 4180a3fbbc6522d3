use crate::core::diagnostics::StageReporter;
use crate::core::error::StageError;
use crate::core::item::PipelineItem;
use crate::core::processor::{Predicate, ProcessorStage};
use crate::core::stage::ParameterMap;

pub const GENERIC_ID: &str = "extension";

/// Drops items whose first locator path does not end with the
/// configured extension. Items without any locator are dropped too,
/// with a diagnostic.
#[derive(Debug, Clone, Default)]
pub struct ExtensionPredicate {
    extension: String,
}

pub fn template() -> ProcessorStage<ExtensionPredicate> {
    ProcessorStage::new(
        "Extension Filter",
        "1.0.0",
        GENERIC_ID,
        "",
        ExtensionPredicate::default(),
    )
}

impl Predicate for ExtensionPredicate {
    fn parameters(&self) -> ParameterMap {
        ParameterMap::from([("extension".to_string(), String::new())])
    }

    fn configure(&mut self, params: &ParameterMap) -> Result<(), StageError> {
        let extension = params
            .get("extension")
            .filter(|extension| !extension.is_empty())
            .ok_or_else(|| StageError::Config {
                parameter: "extension".to_string(),
                reason: "required parameter not found".to_string(),
            })?;

        if !extension.starts_with('.') {
            return Err(StageError::Config {
                parameter: "extension".to_string(),
                reason: "must start with a dot (.)".to_string(),
            });
        }

        self.extension = extension.clone();
        Ok(())
    }

    fn exclude(&mut self, item: &PipelineItem, reporter: &StageReporter) -> bool {
        let Some(locator) = item.locator(0) else {
            reporter.report(anyhow::anyhow!("item '{}' has no locators", item.name()));
            return true;
        };

        !locator.path().ends_with(&self.extension)
    }
}
