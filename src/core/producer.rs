use crate::core::channel::ItemSender;
use crate::core::diagnostics::{DiagnosticSender, StageReporter};
use crate::core::error::StageError;
use crate::core::stage::{ModuleInfo, ParameterMap, Producer, Stage, StageCore, StageRole};
use crate::core::wait::WaitGuard;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// The body of a producer stage: emits items into `output` until the
/// source is exhausted or `cancel` fires. The stream closes when the
/// sender is dropped, which [`ProducerStage`] arranges as soon as
/// `generate` returns.
///
/// Bodies are `Clone` because a configured copy is moved into the stage
/// task, and because duplicating a template is a plain clone.
#[async_trait]
pub trait Generator: Clone + Send + Sync + 'static {
    fn parameters(&self) -> ParameterMap;

    fn configure(&mut self, params: &ParameterMap) -> Result<(), StageError>;

    async fn generate(
        &mut self,
        output: ItemSender,
        cancel: CancellationToken,
        reporter: StageReporter,
    ) -> anyhow::Result<()>;
}

/// Generic producer shape wrapping a [`Generator`] body.
pub struct ProducerStage<G> {
    core: StageCore,
    output: Option<ItemSender>,
    generator: G,
}

impl<G: Generator> ProducerStage<G> {
    pub fn new(
        name: &str,
        version: &str,
        generic_id: &str,
        specific_id: &str,
        generator: G,
    ) -> Self {
        Self {
            core: StageCore::new(ModuleInfo::new(
                name,
                version,
                generic_id,
                specific_id,
                StageRole::Producer,
            )),
            output: None,
            generator,
        }
    }
}

impl<G: Generator> Stage for ProducerStage<G> {
    fn info(&self) -> &ModuleInfo {
        self.core.info()
    }

    fn parameters(&self) -> ParameterMap {
        self.generator.parameters()
    }

    fn configure(&mut self, params: &ParameterMap) -> Result<(), StageError> {
        self.generator.configure(params)?;
        self.core.set_ready(true);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.core.is_ready()
    }

    fn set_diagnostic_sink(&mut self, sink: DiagnosticSender) {
        self.core.set_diagnostic_sink(sink);
    }

    fn start(&mut self, guard: WaitGuard) -> Result<(), StageError> {
        // The guard is dropped on every early return, so a failed start
        // still decrements the wait counter. The output is released on
        // failure too, so the downstream stage observes closure instead
        // of waiting on a producer that will never run.
        if let Err(error) = self.core.check_ready() {
            self.output = None;
            return Err(error);
        }
        let output = self.output.take().ok_or_else(|| self.core.unwired("output"))?;

        let cancel = self.core.cancel_token();
        let reporter = self.core.reporter();
        let mut generator = self.generator.clone();
        let info = self.core.info().clone();

        tokio::spawn(async move {
            let _guard = guard;
            tracing::debug!("producer {} running", info);

            if let Err(error) = generator.generate(output, cancel, reporter.clone()).await {
                reporter.report(error);
            }

            // `output` was consumed by the generator, so the stream is
            // closed by now regardless of how it exited.
            tracing::debug!("producer {} finished", info);
        });

        Ok(())
    }

    fn stop(&mut self) {
        self.core.stop();
    }
}

impl<G: Generator> Producer for ProducerStage<G> {
    fn set_output(&mut self, output: ItemSender) {
        self.output = Some(output);
    }

    fn duplicate(&self, specific_id: &str) -> Box<dyn Producer> {
        let info = self.core.info();
        Box::new(ProducerStage::new(
            &info.name,
            &info.version,
            &info.generic_id,
            specific_id,
            self.generator.clone(),
        ))
    }
}
