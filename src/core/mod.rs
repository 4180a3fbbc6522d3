//! The pipeline execution engine: items, streams, the stage contract,
//! fan-in/fan-out, the module registry and the pipeline supervisor.

pub mod channel;
pub mod consumer;
pub mod demultiplexer;
pub mod diagnostics;
pub mod error;
pub mod item;
pub mod multiplexer;
pub mod pipeline;
pub mod processor;
pub mod producer;
pub mod registry;
pub mod stage;
pub mod wait;

pub use channel::{ItemReceiver, ItemSender, item_stream};
pub use consumer::{ConsumerStage, Sink};
pub use demultiplexer::Demultiplexer;
pub use diagnostics::{Diagnostic, DiagnosticSender, StageReporter};
pub use error::StageError;
pub use item::{PayloadMap, PipelineItem};
pub use multiplexer::Multiplexer;
pub use pipeline::{Pipeline, PipelineState};
pub use processor::{Predicate, ProcessorStage};
pub use producer::{Generator, ProducerStage};
pub use registry::ModuleHandle;
pub use stage::{Consumer, ModuleInfo, ParameterMap, Processor, Producer, Stage, StageRole};
