use crate::core::channel::{ItemReceiver, ItemSender, item_stream};
use crate::core::diagnostics::{DiagnosticSender, StageReporter};
use crate::core::error::StageError;
use crate::core::item::PipelineItem;
use crate::core::stage::{Consumer, ModuleInfo, ParameterMap, Stage, StageCore, StageRole};
use crate::core::wait::WaitGuard;
use async_trait::async_trait;

/// The body of a consumer stage. `deliver` is called once per item; an
/// error skips that item and is published as a diagnostic, the stage
/// keeps draining. `finish` runs once the input has closed or the stage
/// was cancelled.
#[async_trait]
pub trait Sink: Clone + Send + Sync + 'static {
    fn parameters(&self) -> ParameterMap;

    fn configure(&mut self, params: &ParameterMap) -> Result<(), StageError>;

    async fn deliver(
        &mut self,
        item: PipelineItem,
        reporter: &StageReporter,
    ) -> anyhow::Result<()>;

    async fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Generic consumer shape wrapping a [`Sink`] body.
pub struct ConsumerStage<S> {
    core: StageCore,
    input_tx: Option<ItemSender>,
    input_rx: Option<ItemReceiver>,
    sink: S,
}

impl<S: Sink> ConsumerStage<S> {
    pub fn new(name: &str, version: &str, generic_id: &str, specific_id: &str, sink: S) -> Self {
        let (input_tx, input_rx) = item_stream();
        Self {
            core: StageCore::new(ModuleInfo::new(
                name,
                version,
                generic_id,
                specific_id,
                StageRole::Consumer,
            )),
            input_tx: Some(input_tx),
            input_rx: Some(input_rx),
            sink,
        }
    }
}

impl<S: Sink> Stage for ConsumerStage<S> {
    fn info(&self) -> &ModuleInfo {
        self.core.info()
    }

    fn parameters(&self) -> ParameterMap {
        self.sink.parameters()
    }

    fn configure(&mut self, params: &ParameterMap) -> Result<(), StageError> {
        self.sink.configure(params)?;
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
            if self.input_tx.is_some() || self.input_rx.is_none() {
                return Err(self.core.unwired("input"));
            }
            Ok(())
        });
        if let Err(error) = wired {
            // Release the input stream so the upstream stage observes
            // closure rather than blocking on a consumer that never
            // runs.
            self.input_tx = None;
            self.input_rx = None;
            return Err(error);
        }

        let Some(input) = self.input_rx.take() else {
            return Err(self.core.unwired("input"));
        };

        let cancel = self.core.cancel_token();
        let reporter = self.core.reporter();
        let mut sink = self.sink.clone();
        let info = self.core.info().clone();

        tokio::spawn(async move {
            let _guard = guard;
            tracing::debug!("consumer {} running", info);

            loop {
                tokio::select! {
                    received = input.recv_async() => match received {
                        Ok(item) => {
                            if let Err(error) = sink.deliver(item, &reporter).await {
                                reporter.report(error);
                            }
                        }
                        Err(flume::RecvError::Disconnected) => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }

            if let Err(error) = sink.finish().await {
                reporter.report(error);
            }

            tracing::debug!("consumer {} finished", info);
        });

        Ok(())
    }

    fn stop(&mut self) {
        self.core.stop();
    }
}

impl<S: Sink> Consumer for ConsumerStage<S> {
    fn take_input(&mut self) -> Result<ItemSender, StageError> {
        self.input_tx.take().ok_or(StageError::StreamTaken)
    }

    fn duplicate(&self, specific_id: &str) -> Box<dyn Consumer> {
        let info = self.core.info();
        Box::new(ConsumerStage::new(
            &info.name,
            &info.version,
            &info.generic_id,
            specific_id,
            self.sink.clone(),
        ))
    }
}
