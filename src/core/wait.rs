/// Completion counter for a running pipeline.
///
/// The supervisor takes one [`WaitGuard`] per stage it starts; each
/// stage drops its guard exactly once when its task ends, whether it
/// finished naturally, was cancelled, or failed to start at all.
/// [`WaitGroup::wait`] resolves once every guard is gone, so a stage
/// that errors out of `start` can never deadlock the pipeline.
///
/// Built on a flume channel nobody sends on: guards hold sender clones
/// and the waiter observes disconnection once the last clone drops.
pub struct WaitGroup {
    sender: flume::Sender<()>,
    receiver: flume::Receiver<()>,
}

pub struct WaitGuard {
    _sender: flume::Sender<()>,
}

impl WaitGroup {
    pub fn new() -> Self {
        let (sender, receiver) = flume::bounded(0);
        Self { sender, receiver }
    }

    /// Take a guard for one stage task.
    pub fn guard(&self) -> WaitGuard {
        WaitGuard {
            _sender: self.sender.clone(),
        }
    }

    /// Wait until every guard has been dropped. Consumes the group so
    /// its own sender is gone too.
    pub async fn wait(self) {
        drop(self.sender);
        while self.receiver.recv_async().await.is_ok() {}
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}
