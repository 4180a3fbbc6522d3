//! Sluice: a configurable dataflow engine.
//!
//! Pipelines move discrete items from producers, through optional
//! filtering processors, to consumers. The engine wires a declared
//! stage graph into a running set of concurrent tasks, inserting
//! fan-in and fan-out where several endpoints meet one stream, and
//! drains everything cleanly when the producers are exhausted or the
//! pipeline is stopped.

pub mod config;
pub mod core;
pub mod logging;
pub mod modules;

pub use crate::core::{
    ConsumerStage, Generator, ModuleHandle, ModuleInfo, ParameterMap, Pipeline, PipelineItem,
    PipelineState, Predicate, ProcessorStage, ProducerStage, Sink, StageError, StageReporter,
    StageRole,
};
