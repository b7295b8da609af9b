use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// The kinds of runtime fault guest code can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    /// Out-of-bounds (or misaligned atomic) access to a memory or table.
    AccessViolation,
    /// `call_indirect` hit a null or signature-mismatched table slot.
    InvalidIndirectCall,
    IntegerDivideByZero,
    IntegerOverflow,
    /// A float-to-int truncation of NaN.
    InvalidFloatConversion,
    /// An `unreachable` operator was executed.
    Unreachable,
    /// The call or operand stack was exhausted.
    StackOverflow,
    /// A host resource limit was exceeded at runtime.
    OutOfMemory,
    /// A thrown exception crossed the host frame without being caught.
    UncaughtException,
    /// The owning compartment was asked to terminate.
    Terminated,
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let message = match self {
            TrapKind::AccessViolation => "out of bounds access",
            TrapKind::InvalidIndirectCall => "invalid indirect call",
            TrapKind::IntegerDivideByZero => "integer division by zero",
            TrapKind::IntegerOverflow => "integer overflow",
            TrapKind::InvalidFloatConversion => "invalid conversion to integer",
            TrapKind::Unreachable => "unreachable code executed",
            TrapKind::StackOverflow => "call stack exhausted",
            TrapKind::OutOfMemory => "out of memory",
            TrapKind::UncaughtException => "uncaught exception",
            TrapKind::Terminated => "compartment terminated",
        };
        f.write_str(message)
    }
}

/// One guest frame captured when a trap unwound.
#[derive(Debug, Clone)]
pub struct TrapFrame {
    pub func_index: u32,
    pub func_name: Option<String>,
}

/// A runtime fault: a kind, a human-readable message and the guest call
/// stack at the faulting operator, innermost frame first.
///
/// Traps unwind every guest frame up to the host caller; they never cross a
/// compartment boundary and never leave instance state corrupted.
#[derive(Debug)]
pub struct Trap {
    kind: TrapKind,
    message: String,
    stack: Vec<TrapFrame>,
}

impl Trap {
    pub fn new(kind: TrapKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: Vec::new(),
        }
    }

    /// A trap raised by a host function; it surfaces to the guest's caller
    /// like an exception that crossed the host frame.
    pub fn from_host(message: impl Into<String>) -> Self {
        Self::new(TrapKind::UncaughtException, message)
    }

    pub(crate) fn with_stack(mut self, stack: Vec<TrapFrame>) -> Self {
        self.stack = stack;
        self
    }

    pub fn kind(&self) -> TrapKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The captured guest call stack, innermost frame first.
    pub fn frames(&self) -> &[TrapFrame] {
        &self.stack
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        for (i, frame) in self.stack.iter().enumerate() {
            writeln!(f)?;
            match &frame.func_name {
                Some(name) => write!(f, "  {i:>3}: {name} (function {})", frame.func_index)?,
                None => write!(f, "  {i:>3}: <wasm function {}>", frame.func_index)?,
            }
        }
        Ok(())
    }
}

impl core::error::Error for Trap {}
