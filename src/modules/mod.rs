//! Built-in stage implementations and their registration.

pub mod consumer;
pub mod processor;
pub mod producer;

use crate::core::demultiplexer::Demultiplexer;
use crate::core::error::StageError;
use crate::core::multiplexer::Multiplexer;
use crate::core::registry::{self, ModuleHandle};
use std::sync::{Arc, Mutex, OnceLock};

/// Register the default template for every built-in module, including
/// the engine's own fan-in/fan-out stages. Idempotent; safe to call
/// from multiple entry points.
pub fn register_builtin_modules() {
    static REGISTERED: OnceLock<()> = OnceLock::new();
    REGISTERED.get_or_init(|| {
        let registered: Result<(), StageError> = (|| {
            registry::register_template(ModuleHandle::FanIn(Arc::new(Mutex::new(
                Multiplexer::new(""),
            ))))?;
            registry::register_template(ModuleHandle::FanOut(Arc::new(Mutex::new(
                Demultiplexer::new(""),
            ))))?;

            registry::register_template(ModuleHandle::producer(Box::new(
                producer::directory::template(),
            )))?;
            registry::register_template(ModuleHandle::producer(Box::new(
                producer::simulated::template(),
            )))?;
            registry::register_template(ModuleHandle::processor(Box::new(
                processor::extension::template(),
            )))?;
            registry::register_template(ModuleHandle::consumer(Box::new(
                consumer::print::template(),
            )))?;
            registry::register_template(ModuleHandle::consumer(Box::new(
                consumer::file::template(),
            )))?;
            registry::register_template(ModuleHandle::consumer(Box::new(
                consumer::copy::template(),
            )))?;

            Ok(())
        })();

        match registered {
            Ok(()) => tracing::info!("built-in modules registered"),
            Err(error) => tracing::error!("registering built-in modules: {error}"),
        }
    });
}
