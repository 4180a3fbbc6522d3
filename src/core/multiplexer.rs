use crate::core::channel::{ItemReceiver, ItemSender, item_stream, send_item};
use crate::core::diagnostics::DiagnosticSender;
use crate::core::error::StageError;
use crate::core::stage::{ModuleInfo, ParameterMap, Stage, StageCore, StageRole};
use crate::core::wait::WaitGuard;

/// Fan-in stage: merges any number of input streams into one output.
///
/// Each `allocate_input` call mints a fresh stream and hands back its
/// send half. On start, one forwarder task per input copies items to a
/// shared clone of the output sender; the output closes exactly once,
/// when the last forwarder drops its clone. That happens either because
/// every input closed or because cancellation made the forwarders exit,
/// and a cancelled forwarder never attempts another send.
///
/// Ordering between inputs is unspecified; within one input it is
/// preserved.
pub struct Multiplexer {
    core: StageCore,
    inputs: Vec<ItemReceiver>,
    output: Option<ItemSender>,
}

impl Multiplexer {
    pub const GENERIC_ID: &'static str = "multiplexer";

    pub fn new(specific_id: &str) -> Self {
        let mut core = StageCore::new(ModuleInfo::new(
            "Multiplexer",
            "1.0.0",
            Self::GENERIC_ID,
            specific_id,
            StageRole::FanIn,
        ));
        // Engine-inserted stages take no configuration.
        core.set_ready(true);

        Self {
            core,
            inputs: Vec::new(),
            output: None,
        }
    }

    /// Allocate a fresh input stream and return its send half.
    pub fn allocate_input(&mut self) -> ItemSender {
        let (sender, receiver) = item_stream();
        self.inputs.push(receiver);
        sender
    }

    pub fn set_output(&mut self, output: ItemSender) {
        self.output = Some(output);
    }

    pub fn duplicate(&self, specific_id: &str) -> Multiplexer {
        Multiplexer::new(specific_id)
    }
}

impl Stage for Multiplexer {
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
        if self.output.is_none() || self.inputs.is_empty() {
            let stream = if self.output.is_none() { "output" } else { "input" };
            // Release every stream end so neighbours observe closure.
            self.inputs.clear();
            self.output = None;
            return Err(self.core.unwired(stream));
        }
        let Some(output) = self.output.take() else {
            return Err(self.core.unwired("output"));
        };
        let inputs = std::mem::take(&mut self.inputs);

        let cancel = self.core.cancel_token();
        let reporter = self.core.reporter();
        let info = self.core.info().clone();

        tokio::spawn(async move {
            let _guard = guard;
            tracing::debug!("fan-in {} running with {} inputs", info, inputs.len());

            let forwarders: Vec<_> = inputs
                .into_iter()
                .map(|input| {
                    let output = output.clone();
                    let cancel = cancel.clone();
                    let reporter = reporter.clone();
                    tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                received = input.recv_async() => match received {
                                    Ok(item) => match send_item(&output, &cancel, item).await {
                                        Ok(true) => {}
                                        Ok(false) => break,
                                        Err(error) => {
                                            reporter.report(error.into());
                                            break;
                                        }
                                    },
                                    Err(flume::RecvError::Disconnected) => break,
                                },
                                _ = cancel.cancelled() => break,
                            }
                        }
                    })
                })
                .collect();

            // Forwarders hold the remaining output clones; once the last
            // one exits the stream closes.
            drop(output);
            let _ = futures::future::join_all(forwarders).await;

            tracing::debug!("fan-in {} finished", info);
        });

        Ok(())
    }

    fn stop(&mut self) {
        self.core.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::item::PipelineItem;
    use crate::core::wait::WaitGroup;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn named_item(name: &str) -> PipelineItem {
        let mut item = PipelineItem::new("test");
        item.set_name(name);
        item
    }

    #[tokio::test]
    async fn merges_inputs_and_closes_output_once() {
        let mut mux = Multiplexer::new("test");
        let first = mux.allocate_input();
        let second = mux.allocate_input();
        let (out_tx, out_rx) = item_stream();
        mux.set_output(out_tx);

        let group = WaitGroup::new();
        mux.start(group.guard()).unwrap();

        tokio::spawn(async move {
            first.send_async(named_item("a")).await.unwrap();
            first.send_async(named_item("b")).await.unwrap();
        });
        tokio::spawn(async move {
            second.send_async(named_item("c")).await.unwrap();
        });

        let mut seen = BTreeSet::new();
        while let Ok(item) = out_rx.recv_async().await {
            seen.insert(item.name().to_string());
        }

        assert_eq!(
            seen,
            BTreeSet::from(["a".to_string(), "b".to_string(), "c".to_string()])
        );
        tokio::time::timeout(Duration::from_secs(1), group.wait())
            .await
            .expect("fan-in should exit after all inputs close");
    }

    #[tokio::test]
    async fn cancellation_closes_output() {
        let mut mux = Multiplexer::new("cancelled");
        let _input = mux.allocate_input();
        let (out_tx, out_rx) = item_stream();
        mux.set_output(out_tx);

        let group = WaitGroup::new();
        mux.start(group.guard()).unwrap();
        mux.stop();

        // The input never closes; only cancellation can end the stream.
        let end = tokio::time::timeout(Duration::from_secs(1), out_rx.recv_async())
            .await
            .expect("output should close after stop");
        assert!(end.is_err());

        tokio::time::timeout(Duration::from_secs(1), group.wait())
            .await
            .expect("forwarders should exit on cancellation");
    }

    #[tokio::test]
    async fn start_without_output_fails_and_releases_guard() {
        let mut mux = Multiplexer::new("unwired");
        let _input = mux.allocate_input();

        let group = WaitGroup::new();
        let err = mux.start(group.guard()).unwrap_err();
        assert!(matches!(err, StageError::Unwired { stream: "output", .. }));

        tokio::time::timeout(Duration::from_secs(1), group.wait())
            .await
            .expect("failed start must still release its guard");
    }
}
