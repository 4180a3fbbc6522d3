use crate::core::channel::{ItemReceiver, ItemSender, item_stream, send_item};
use crate::core::diagnostics::DiagnosticSender;
use crate::core::error::StageError;
use crate::core::stage::{ModuleInfo, ParameterMap, Stage, StageCore, StageRole};
use crate::core::wait::WaitGuard;

/// Fan-out stage: replicates each incoming item to every registered
/// output, in declared order. All outputs must accept an item before
/// the next one is read, so one slow consumer back-pressures the whole
/// pipeline. An output whose consumer is gone is dropped on its own,
/// with a diagnostic; the remaining outputs keep receiving. On input
/// closure or cancellation every output is dropped, closing each
/// downstream stream exactly once.
pub struct Demultiplexer {
    core: StageCore,
    input_tx: Option<ItemSender>,
    input_rx: Option<ItemReceiver>,
    outputs: Vec<ItemSender>,
}

impl Demultiplexer {
    pub const GENERIC_ID: &'static str = "demultiplexer";

    pub fn new(specific_id: &str) -> Self {
        let mut core = StageCore::new(ModuleInfo::new(
            "Demultiplexer",
            "1.0.0",
            Self::GENERIC_ID,
            specific_id,
            StageRole::FanOut,
        ));
        core.set_ready(true);

        let (input_tx, input_rx) = item_stream();
        Self {
            core,
            input_tx: Some(input_tx),
            input_rx: Some(input_rx),
            outputs: Vec::new(),
        }
    }

    pub fn take_input(&mut self) -> Result<ItemSender, StageError> {
        self.input_tx.take().ok_or(StageError::StreamTaken)
    }

    /// Register one more output. Order of registration is the order
    /// items are replicated in.
    pub fn add_output(&mut self, output: ItemSender) {
        self.outputs.push(output);
    }

    pub fn duplicate(&self, specific_id: &str) -> Demultiplexer {
        Demultiplexer::new(specific_id)
    }
}

impl Stage for Demultiplexer {
    fn info(&self) -> &ModuleInfo {
        self.core.info()
    }

    fn parameters(&self) -> ParameterMap {
        ParameterMap::new()
    }

    fn configure(&mut self, _params: &ParameterMap) -> Result<(), StageError> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.core.is_ready()
    }

    fn set_diagnostic_sink(&mut self, sink: DiagnosticSender) {
        self.core.set_diagnostic_sink(sink);
    }

    fn start(&mut self, guard: WaitGuard) -> Result<(), StageError> {
        if self.input_tx.is_some() || self.input_rx.is_none() || self.outputs.is_empty() {
            let stream = if self.outputs.is_empty() { "output" } else { "input" };
            // Release every stream end so neighbours observe closure.
            self.input_tx = None;
            self.input_rx = None;
            self.outputs.clear();
            return Err(self.core.unwired(stream));
        }
        let Some(input) = self.input_rx.take() else {
            return Err(self.core.unwired("input"));
        };
        let mut outputs = std::mem::take(&mut self.outputs);

        let cancel = self.core.cancel_token();
        let reporter = self.core.reporter();
        let info = self.core.info().clone();

        tokio::spawn(async move {
            let _guard = guard;
            tracing::debug!("fan-out {} running with {} outputs", info, outputs.len());

            'main: loop {
                tokio::select! {
                    received = input.recv_async() => match received {
                        Ok(item) => {
                            let mut closed = Vec::new();
                            for (index, output) in outputs.iter().enumerate() {
                                match send_item(output, &cancel, item.clone()).await {
                                    Ok(true) => {}
                                    Ok(false) => break 'main,
                                    Err(error) => {
                                        reporter.report(error.into());
                                        closed.push(index);
                                    }
                                }
                            }
                            // A closed output only severs that
                            // consumer; its siblings keep receiving.
                            for index in closed.into_iter().rev() {
                                outputs.remove(index);
                            }
                            if outputs.is_empty() {
                                break;
                            }
                        }
                        Err(flume::RecvError::Disconnected) => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }

            // Dropping `outputs` closes every downstream stream once.
            tracing::debug!("fan-out {} finished", info);
        });

        Ok(())
    }

    fn stop(&mut self) {
        self.core.stop();
    }
}
