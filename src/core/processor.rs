use crate::core::channel::{ItemReceiver, ItemSender, item_stream, send_item};
use crate::core::diagnostics::{DiagnosticSender, StageReporter};
use crate::core::error::StageError;
use crate::core::item::PipelineItem;
use crate::core::stage::{ModuleInfo, ParameterMap, Processor, Stage, StageCore, StageRole};
use crate::core::wait::WaitGuard;

/// The body of a processor stage: a predicate deciding, per item,
/// whether it is dropped. Items it does not exclude are forwarded
/// untouched.
pub trait Predicate: Clone + Send + Sync + 'static {
    fn parameters(&self) -> ParameterMap;

    fn configure(&mut self, params: &ParameterMap) -> Result<(), StageError>;

    /// Return true to drop the item. Inspection only; items are
    /// read-only once published.
    fn exclude(&mut self, item: &PipelineItem, reporter: &StageReporter) -> bool;
}

/// Generic processor shape wrapping a [`Predicate`] body.
///
/// Owns its input stream; the send half is handed to the upstream stage
/// through `take_input` and never retained here, so upstream exit is
/// the one thing that closes the stream.
pub struct ProcessorStage<P> {
    core: StageCore,
    input_tx: Option<ItemSender>,
    input_rx: Option<ItemReceiver>,
    output: Option<ItemSender>,
    predicate: P,
}

impl<P: Predicate> ProcessorStage<P> {
    pub fn new(
        name: &str,
        version: &str,
        generic_id: &str,
        specific_id: &str,
        predicate: P,
    ) -> Self {
        let (input_tx, input_rx) = item_stream();
        Self {
            core: StageCore::new(ModuleInfo::new(
                name,
                version,
                generic_id,
                specific_id,
                StageRole::Processor,
            )),
            input_tx: Some(input_tx),
            input_rx: Some(input_rx),
            output: None,
            predicate,
        }
    }
}

impl<P: Predicate> Stage for ProcessorStage<P> {
    fn info(&self) -> &ModuleInfo {
        self.core.info()
    }

    fn parameters(&self) -> ParameterMap {
        self.predicate.parameters()
    }

    fn configure(&mut self, params: &ParameterMap) -> Result<(), StageError> {
        self.predicate.configure(params)?;
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
        let wired = self.core.check_ready().and_then(|_| {
            if self.input_tx.is_some() {
                // Nobody took our input stream; there is no upstream.
                return Err(self.core.unwired("input"));
            }
            if self.input_rx.is_none() {
                return Err(self.core.unwired("input"));
            }
            if self.output.is_none() {
                return Err(self.core.unwired("output"));
            }
            Ok(())
        });
        if let Err(error) = wired {
            // Release both stream ends so the neighbours observe
            // closure rather than blocking on a stage that never runs.
            self.input_tx = None;
            self.input_rx = None;
            self.output = None;
            return Err(error);
        }

        let Some(input) = self.input_rx.take() else {
            return Err(self.core.unwired("input"));
        };
        let Some(output) = self.output.take() else {
            return Err(self.core.unwired("output"));
        };

        let cancel = self.core.cancel_token();
        let reporter = self.core.reporter();
        let mut predicate = self.predicate.clone();
        let info = self.core.info().clone();

        tokio::spawn(async move {
            let _guard = guard;
            tracing::debug!("processor {} running", info);

            loop {
                tokio::select! {
                    received = input.recv_async() => match received {
                        Ok(item) => {
                            if predicate.exclude(&item, &reporter) {
                                continue;
                            }
                            match send_item(&output, &cancel, item).await {
                                Ok(true) => {}
                                Ok(false) => break,
                                Err(error) => {
                                    reporter.report(error.into());
                                    break;
                                }
                            }
                        }
                        Err(flume::RecvError::Disconnected) => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }

            // Dropping `output` here propagates closure downstream.
            tracing::debug!("processor {} finished", info);
        });

        Ok(())
    }

    fn stop(&mut self) {
        self.core.stop();
    }
}

impl<P: Predicate> Processor for ProcessorStage<P> {
    fn take_input(&mut self) -> Result<ItemSender, StageError> {
        self.input_tx.take().ok_or(StageError::StreamTaken)
    }

    fn set_output(&mut self, output: ItemSender) {
        self.output = Some(output);
    }

    fn duplicate(&self, specific_id: &str) -> Box<dyn Processor> {
        let info = self.core.info();
        Box::new(ProcessorStage::new(
            &info.name,
            &info.version,
            &info.generic_id,
            specific_id,
            self.predicate.clone(),
        ))
    }
}
