use crate::core::consumer::{ConsumerStage, Sink};
use crate::core::diagnostics::StageReporter;
use crate::core::error::StageError;
use crate::core::item::PipelineItem;
use crate::core::stage::ParameterMap;
use async_trait::async_trait;

pub const GENERIC_ID: &str = "print";

/// Writes each item's display form to stdout. No configuration.
#[derive(Debug, Clone, Default)]
pub struct PrintSink;

pub fn template() -> ConsumerStage<PrintSink> {
    ConsumerStage::new("Print Consumer", "1.0.0", GENERIC_ID, "", PrintSink)
}

#[async_trait]
impl Sink for PrintSink {
    fn parameters(&self) -> ParameterMap {
        ParameterMap::new()
    }

    fn configure(&mut self, _params: &ParameterMap) -> Result<(), StageError> {
        Ok(())
    }

    async fn deliver(
        &mut self,
        item: PipelineItem,
        _reporter: &StageReporter,
    ) -> anyhow::Result<()> {
        println!("{item}");
        Ok(())
    }
}
