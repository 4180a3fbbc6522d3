use crate::core::wait::WaitGuard;
use tokio_util::sync::CancellationToken;

/// A per-stage error report, delivered outside the item path.
#[derive(Debug)]
pub struct Diagnostic {
    pub generic_id: String,
    pub specific_id: String,
    pub error: anyhow::Error,
}

/// Handle stages publish diagnostics through. Publishing never blocks
/// and never fails: the channel is unbounded and a report sent after
/// the collector is gone is silently dropped.
#[derive(Clone)]
pub struct DiagnosticSender {
    sender: flume::Sender<Diagnostic>,
}

impl DiagnosticSender {
    pub fn publish(&self, generic_id: &str, specific_id: &str, error: anyhow::Error) {
        let _ = self.sender.try_send(Diagnostic {
            generic_id: generic_id.to_string(),
            specific_id: specific_id.to_string(),
            error,
        });
    }
}

/// A stage's view of the diagnostic channel: its own identity plus an
/// optional sink. Reporting with no sink installed drops the record;
/// diagnostics are advisory and never gate a stage's exit.
#[derive(Clone)]
pub struct StageReporter {
    generic_id: String,
    specific_id: String,
    sink: Option<DiagnosticSender>,
}

impl StageReporter {
    pub fn new(generic_id: &str, specific_id: &str, sink: Option<DiagnosticSender>) -> Self {
        Self {
            generic_id: generic_id.to_string(),
            specific_id: specific_id.to_string(),
            sink,
        }
    }

    pub fn generic_id(&self) -> &str {
        &self.generic_id
    }

    pub fn specific_id(&self) -> &str {
        &self.specific_id
    }

    pub fn report(&self, error: anyhow::Error) {
        if let Some(sink) = &self.sink {
            sink.publish(&self.generic_id, &self.specific_id, error);
        }
    }
}

/// The single diagnostic stream owned by a pipeline, with the collector
/// task that drains it.
pub struct DiagnosticChannel {
    sender: flume::Sender<Diagnostic>,
    receiver: Option<flume::Receiver<Diagnostic>>,
    closed: CancellationToken,
}

impl DiagnosticChannel {
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender,
            receiver: Some(receiver),
            closed: CancellationToken::new(),
        }
    }

    pub fn sender(&self) -> DiagnosticSender {
        DiagnosticSender {
            sender: self.sender.clone(),
        }
    }

    /// Close the stream. Idempotent; the collector drains whatever is
    /// still queued and then exits.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Launch the collector task. Records are formatted as
    /// `<gid>/<sid> : <error>` until the stream closes.
    pub fn spawn_collector(&mut self, guard: WaitGuard) {
        let receiver = match self.receiver.take() {
            Some(receiver) => receiver,
            None => return,
        };
        let closed = self.closed.clone();

        tokio::spawn(async move {
            let _guard = guard;
            loop {
                tokio::select! {
                    received = receiver.recv_async() => match received {
                        Ok(diagnostic) => log_diagnostic(&diagnostic),
                        Err(flume::RecvError::Disconnected) => break,
                    },
                    _ = closed.cancelled() => {
                        while let Ok(diagnostic) = receiver.try_recv() {
                            log_diagnostic(&diagnostic);
                        }
                        break;
                    }
                }
            }
        });
    }
}

impl Default for DiagnosticChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn log_diagnostic(diagnostic: &Diagnostic) {
    tracing::warn!(
        "{}/{} : {}",
        diagnostic.generic_id,
        diagnostic.specific_id,
        diagnostic.error
    );
}
