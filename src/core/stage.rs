use crate::core::channel::ItemSender;
use crate::core::diagnostics::{DiagnosticSender, StageReporter};
use crate::core::error::StageError;
use crate::core::wait::WaitGuard;
use std::collections::HashMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Recognised configuration options with their default values.
pub type ParameterMap = HashMap<String, String>;

/// The role a stage plays inside a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRole {
    Producer,
    Processor,
    Consumer,
    FanIn,
    FanOut,
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageRole::Producer => "producer",
            StageRole::Processor => "processor",
            StageRole::Consumer => "consumer",
            StageRole::FanIn => "fan-in",
            StageRole::FanOut => "fan-out",
        };
        f.write_str(label)
    }
}

/// Identity carried by every stage: a display name, a version, the kind
/// (generic id), the instance name (specific id) and the role tag.
/// (generic id, specific id) is unique across the process.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: String,
    pub version: String,
    pub generic_id: String,
    pub specific_id: String,
    pub role: StageRole,
}

impl ModuleInfo {
    pub fn new(
        name: &str,
        version: &str,
        generic_id: &str,
        specific_id: &str,
        role: StageRole,
    ) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            generic_id: generic_id.to_string(),
            specific_id: specific_id.to_string(),
            role,
        }
    }
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{} ({}/{})",
            self.name, self.version, self.generic_id, self.specific_id
        )
    }
}

/// Shared plumbing owned by every stage: identity, readiness, the
/// single-shot cancellation signal and the diagnostic sink.
///
/// `stop` cancels the token and nothing ever re-arms it, so a second
/// stop cannot race an in-flight exit.
pub struct StageCore {
    info: ModuleInfo,
    ready: bool,
    cancel: CancellationToken,
    diagnostics: Option<DiagnosticSender>,
}

impl StageCore {
    pub fn new(info: ModuleInfo) -> Self {
        Self {
            info,
            ready: false,
            cancel: CancellationToken::new(),
            diagnostics: None,
        }
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn set_diagnostic_sink(&mut self, sink: DiagnosticSender) {
        self.diagnostics = Some(sink);
    }

    pub fn reporter(&self) -> StageReporter {
        StageReporter::new(
            &self.info.generic_id,
            &self.info.specific_id,
            self.diagnostics.clone(),
        )
    }

    /// Readiness gate shared by every `start` implementation.
    pub fn check_ready(&self) -> Result<(), StageError> {
        if self.ready {
            Ok(())
        } else {
            Err(StageError::NotReady {
                specific_id: self.info.specific_id.clone(),
            })
        }
    }

    pub fn unwired(&self, stream: &'static str) -> StageError {
        StageError::Unwired {
            specific_id: self.info.specific_id.clone(),
            stream,
        }
    }
}

/// Capabilities every stage satisfies, whatever its role.
///
/// `start` launches the stage's task and hands it the wait guard; the
/// guard is dropped exactly once when the task ends, including when
/// `start` itself fails, so the supervisor's counter always drains.
pub trait Stage: Send {
    fn info(&self) -> &ModuleInfo;

    fn parameters(&self) -> ParameterMap;

    /// Validate and absorb configuration. Readiness is set on success.
    fn configure(&mut self, params: &ParameterMap) -> Result<(), StageError>;

    fn is_ready(&self) -> bool;

    fn set_diagnostic_sink(&mut self, sink: DiagnosticSender);

    fn start(&mut self, guard: WaitGuard) -> Result<(), StageError>;

    /// Request cooperative cancellation. Idempotent and non-blocking.
    fn stop(&mut self);
}

pub trait Producer: Stage {
    fn set_output(&mut self, output: ItemSender);

    fn duplicate(&self, specific_id: &str) -> Box<dyn Producer>;
}

pub trait Processor: Stage {
    /// Hand out the send half of this stage's input stream. A stream
    /// connects exactly two stages, so a second take fails.
    fn take_input(&mut self) -> Result<ItemSender, StageError>;

    fn set_output(&mut self, output: ItemSender);

    fn duplicate(&self, specific_id: &str) -> Box<dyn Processor>;
}

pub trait Consumer: Stage {
    fn take_input(&mut self) -> Result<ItemSender, StageError>;

    fn duplicate(&self, specific_id: &str) -> Box<dyn Consumer>;
}
