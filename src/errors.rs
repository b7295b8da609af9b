use crate::indices::FuncIndex;
use crate::trap::Trap;
use alloc::string::String;

/// Everything that can go wrong between raw bytes and a finished call.
///
/// Decode and validation errors carry the byte offset of the fault; runtime
/// faults are carried as a [`Trap`] with a captured guest call stack.
#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// The input is not a structurally well-formed WebAssembly module.
    #[error("malformed module at offset {offset}: {message}")]
    MalformedModule {
        /// A string describing the structural violation.
        message: String,
        /// The byte offset where the violation was detected.
        offset: usize,
    },
    /// The module is well-formed but breaks the type discipline.
    #[error("validation error: {message}")]
    Validation {
        message: String,
        /// Bytecode offset of the faulting operator, when known.
        offset: Option<usize>,
        /// The function being validated, when the error is function-local.
        func: Option<FuncIndex>,
    },
    /// An import could not be resolved or did not match its declared type.
    #[error("link error: {0}")]
    Link(String),
    /// Instantiation failed after linking (segment out of bounds, start trap).
    #[error("instantiation error: {0}")]
    Instantiation(String),
    /// Guest code faulted at runtime.
    #[error("trap: {0}")]
    Trap(#[from] Trap),
    /// A host resource limit was exceeded.
    #[error("out of memory")]
    OutOfMemory,
    /// Invariant violation. Never reachable from untrusted input.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl Error {
    pub(crate) fn malformed(offset: usize, message: impl Into<String>) -> Self {
        Self::MalformedModule {
            message: message.into(),
            offset,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            offset: None,
            func: None,
        }
    }

    pub(crate) fn validation_at(offset: usize, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            offset: Some(offset),
            func: None,
        }
    }

    pub(crate) fn in_func(self, func: FuncIndex) -> Self {
        match self {
            Self::Validation {
                message, offset, ..
            } => Self::Validation {
                message,
                offset,
                func: Some(func),
            },
            other => other,
        }
    }

    /// Returns the trap this error carries, if it is a runtime fault.
    pub fn as_trap(&self) -> Option<&Trap> {
        match self {
            Self::Trap(trap) => Some(trap),
            _ => None,
        }
    }

    /// The byte offset this error points at, for decode/validation errors.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::MalformedModule { offset, .. } => Some(*offset),
            Self::Validation { offset, .. } => *offset,
            _ => None,
        }
    }
}
