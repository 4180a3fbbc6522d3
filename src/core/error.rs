use crate::core::stage::StageRole;
use thiserror::Error;

/// Setup-time errors raised by stages, the registry and the pipeline
/// assembler. Runtime errors inside a stage body travel through the
/// diagnostic channel as `anyhow::Error` instead.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("missing or invalid parameter '{parameter}': {reason}")]
    Config { parameter: String, reason: String },

    #[error("unknown parameter '{parameter}'")]
    UnknownParameter { parameter: String },

    #[error("module '{generic_id}/{specific_id}' already exists")]
    Duplicate {
        generic_id: String,
        specific_id: String,
    },

    #[error("no module with generic id '{generic_id}'")]
    UnknownModule { generic_id: String },

    #[error("stage '{specific_id}' started before it was configured")]
    NotReady { specific_id: String },

    #[error("stage '{specific_id}' has no {stream} stream connected")]
    Unwired {
        specific_id: String,
        stream: &'static str,
    },

    #[error("input stream already connected")]
    StreamTaken,

    #[error("send on a closed stream")]
    StreamClosed,

    #[error("pipeline has no {role} stages")]
    Underspecified { role: &'static str },

    #[error("pipeline '{name}' already started")]
    AlreadyStarted { name: String },

    #[error("tried to add a {actual} stage to the {expected} list")]
    RoleMismatch {
        expected: StageRole,
        actual: StageRole,
    },

    #[error("payload with id '{key}' already exists")]
    DuplicatePayload { key: String },
}
