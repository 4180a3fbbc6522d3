use crate::core::channel::ItemSender;
use crate::core::demultiplexer::Demultiplexer;
use crate::core::diagnostics::{DiagnosticChannel, DiagnosticSender};
use crate::core::error::StageError;
use crate::core::multiplexer::Multiplexer;
use crate::core::registry::{self, ModuleHandle, SharedConsumer, SharedProcessor, SharedProducer};
use crate::core::stage::{Stage, StageRole};
use crate::core::wait::{WaitGroup, WaitGuard};
use std::sync::{Arc, Mutex, MutexGuard};

/// Supervisor states. A pipeline moves `Unconnected → Connected →
/// Running → Draining → Done`, with `Cancelling` replacing `Draining`
/// when the user stops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Unconnected,
    Connected,
    Running,
    Draining,
    Cancelling,
    Done,
}

/// A named stage graph plus the machinery that runs it: ordered
/// producer/processor/consumer lists, engine-inserted fan-in/fan-out,
/// the wait counters and the diagnostic stream.
pub struct Pipeline {
    name: String,

    producers: Vec<SharedProducer>,
    processors: Vec<SharedProcessor>,
    consumers: Vec<SharedConsumer>,

    multiplexer: Option<Arc<Mutex<Multiplexer>>>,
    demultiplexer: Option<Arc<Mutex<Demultiplexer>>>,

    diagnostics: DiagnosticChannel,

    wait: Option<WaitGroup>,
    collector_wait: Option<WaitGroup>,

    state: PipelineState,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}

fn lock<T: ?Sized>(cell: &Mutex<T>) -> MutexGuard<'_, T> {
    cell.lock().expect("poisoned module lock")
}

impl Pipeline {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            producers: Vec::new(),
            processors: Vec::new(),
            consumers: Vec::new(),
            multiplexer: None,
            demultiplexer: None,
            diagnostics: DiagnosticChannel::new(),
            wait: None,
            collector_wait: None,
            state: PipelineState::Unconnected,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// True once the assembler inserted a fan-in stage.
    pub fn has_fan_in(&self) -> bool {
        self.multiplexer.is_some()
    }

    /// True once the assembler inserted a fan-out stage.
    pub fn has_fan_out(&self) -> bool {
        self.demultiplexer.is_some()
    }

    /// Append a producer stage. Installs the pipeline's diagnostic sink
    /// and rejects handles carrying any other role.
    pub fn add_producer(&mut self, handle: ModuleHandle) -> Result<(), StageError> {
        self.check_mutable()?;
        match handle {
            ModuleHandle::Producer(cell) => {
                lock(&cell).set_diagnostic_sink(self.diagnostics.sender());
                tracing::info!(
                    "pipeline '{}': producer {} added",
                    self.name,
                    lock(&cell).info()
                );
                self.producers.push(cell);
                Ok(())
            }
            other => Err(StageError::RoleMismatch {
                expected: StageRole::Producer,
                actual: other.role(),
            }),
        }
    }

    pub fn add_processor(&mut self, handle: ModuleHandle) -> Result<(), StageError> {
        self.check_mutable()?;
        match handle {
            ModuleHandle::Processor(cell) => {
                lock(&cell).set_diagnostic_sink(self.diagnostics.sender());
                tracing::info!(
                    "pipeline '{}': processor {} added",
                    self.name,
                    lock(&cell).info()
                );
                self.processors.push(cell);
                Ok(())
            }
            other => Err(StageError::RoleMismatch {
                expected: StageRole::Processor,
                actual: other.role(),
            }),
        }
    }

    pub fn add_consumer(&mut self, handle: ModuleHandle) -> Result<(), StageError> {
        self.check_mutable()?;
        match handle {
            ModuleHandle::Consumer(cell) => {
                lock(&cell).set_diagnostic_sink(self.diagnostics.sender());
                tracing::info!(
                    "pipeline '{}': consumer {} added",
                    self.name,
                    lock(&cell).info()
                );
                self.consumers.push(cell);
                Ok(())
            }
            other => Err(StageError::RoleMismatch {
                expected: StageRole::Consumer,
                actual: other.role(),
            }),
        }
    }

    fn check_mutable(&self) -> Result<(), StageError> {
        if self.state == PipelineState::Unconnected {
            Ok(())
        } else {
            Err(StageError::AlreadyStarted {
                name: self.name.clone(),
            })
        }
    }

    /// Validate the graph and wire every stream, inserting fan-in and
    /// fan-out only where two or more endpoints exist on that side.
    fn connect(&mut self) -> Result<(), StageError> {
        if self.producers.is_empty() {
            return Err(StageError::Underspecified { role: "producer" });
        }
        if self.consumers.is_empty() {
            return Err(StageError::Underspecified { role: "consumer" });
        }

        // Tail wiring: with several consumers a fan-out becomes the
        // tail, otherwise the single consumer is.
        let mut tail_input: ItemSender = if self.consumers.len() > 1 {
            let demux = match registry::duplicate(Demultiplexer::GENERIC_ID, &self.name)? {
                ModuleHandle::FanOut(demux) => demux,
                other => {
                    return Err(StageError::RoleMismatch {
                        expected: StageRole::FanOut,
                        actual: other.role(),
                    });
                }
            };

            {
                let mut demux = lock(&demux);
                demux.set_diagnostic_sink(self.diagnostics.sender());
                for consumer in &self.consumers {
                    demux.add_output(lock(consumer).take_input()?);
                }
            }

            let tail = lock(&demux).take_input()?;
            self.demultiplexer = Some(demux);
            tail
        } else {
            lock(&self.consumers[0]).take_input()?
        };

        // Middle wiring: chain processors in declared order, then point
        // the chain at the tail. The head of the chain is the new tail.
        if !self.processors.is_empty() {
            for i in 1..self.processors.len() {
                let next_input = lock(&self.processors[i]).take_input()?;
                lock(&self.processors[i - 1]).set_output(next_input);
            }
            if let Some(last) = self.processors.last() {
                lock(last).set_output(tail_input);
            }
            tail_input = lock(&self.processors[0]).take_input()?;
        }

        // Head wiring: several producers feed a fan-in, a single one
        // connects straight to the tail.
        if self.producers.len() > 1 {
            let mux = match registry::duplicate(Multiplexer::GENERIC_ID, &self.name)? {
                ModuleHandle::FanIn(mux) => mux,
                other => {
                    return Err(StageError::RoleMismatch {
                        expected: StageRole::FanIn,
                        actual: other.role(),
                    });
                }
            };

            {
                let mut mux = lock(&mux);
                mux.set_diagnostic_sink(self.diagnostics.sender());
                mux.set_output(tail_input);
                for producer in &self.producers {
                    lock(producer).set_output(mux.allocate_input());
                }
            }

            self.multiplexer = Some(mux);
        } else {
            lock(&self.producers[0]).set_output(tail_input);
        }

        self.state = PipelineState::Connected;
        tracing::info!(
            "pipeline '{}' connected: {} producer(s), {} processor(s), {} consumer(s)",
            self.name,
            self.producers.len(),
            self.processors.len(),
            self.consumers.len()
        );

        Ok(())
    }

    /// Connect the graph and launch every stage task plus the
    /// diagnostic collector. Assembly errors surface synchronously and
    /// the pipeline refuses to run; a stage whose own start fails is
    /// recorded as a diagnostic and the rest of the graph still runs
    /// and terminates, since failed starts release their wait guard.
    pub fn start(&mut self) -> Result<(), StageError> {
        if self.state != PipelineState::Unconnected {
            return Err(StageError::AlreadyStarted {
                name: self.name.clone(),
            });
        }

        self.connect()?;

        let wait = WaitGroup::new();
        let collector_wait = WaitGroup::new();
        self.diagnostics.spawn_collector(collector_wait.guard());

        let sender = self.diagnostics.sender();

        for producer in &self.producers {
            start_stage(&sender, &mut **lock(producer), wait.guard());
        }
        if let Some(mux) = &self.multiplexer {
            start_stage(&sender, &mut *lock(mux), wait.guard());
        }
        for processor in &self.processors {
            start_stage(&sender, &mut **lock(processor), wait.guard());
        }
        if let Some(demux) = &self.demultiplexer {
            start_stage(&sender, &mut *lock(demux), wait.guard());
        }
        for consumer in &self.consumers {
            start_stage(&sender, &mut **lock(consumer), wait.guard());
        }

        self.wait = Some(wait);
        self.collector_wait = Some(collector_wait);
        self.state = PipelineState::Running;

        Ok(())
    }

    /// Block until every stage task has ended, then close the
    /// diagnostic stream and wait for the collector to drain it.
    pub async fn wait(&mut self) {
        if self.state == PipelineState::Running {
            self.state = PipelineState::Draining;
        }

        if let Some(wait) = self.wait.take() {
            wait.wait().await;
        }

        self.diagnostics.close();
        if let Some(collector_wait) = self.collector_wait.take() {
            collector_wait.wait().await;
        }

        self.state = PipelineState::Done;
        tracing::info!("pipeline '{}' done", self.name);
    }

    /// Request cooperative cancellation of every stage, in
    /// producer → processor → consumer order. Idempotent; stages
    /// exiting naturally tolerate a late stop. Items still in flight
    /// may be discarded.
    ///
    /// Cancelled stages may still publish diagnostics on their way
    /// out, so the stream stays open here; `wait` closes it once the
    /// main wait group has drained. A pipeline that never started has
    /// no stage tasks and no `wait` coming, so that case closes the
    /// stream directly.
    pub fn stop(&mut self) {
        for producer in &self.producers {
            lock(producer).stop();
        }
        if let Some(mux) = &self.multiplexer {
            lock(mux).stop();
        }
        for processor in &self.processors {
            lock(processor).stop();
        }
        if let Some(demux) = &self.demultiplexer {
            lock(demux).stop();
        }
        for consumer in &self.consumers {
            lock(consumer).stop();
        }

        if self.state == PipelineState::Unconnected {
            self.diagnostics.close();
        }

        if matches!(
            self.state,
            PipelineState::Running | PipelineState::Draining
        ) {
            self.state = PipelineState::Cancelling;
        }
    }
}

fn start_stage<S: Stage + ?Sized>(sender: &DiagnosticSender, stage: &mut S, guard: WaitGuard) {
    if let Err(error) = stage.start(guard) {
        let info = stage.info().clone();
        tracing::error!("failed to start {}: {}", info, error);
        sender.publish(&info.generic_id, &info.specific_id, error.into());
    }
}
