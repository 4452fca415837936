use std::fmt;

use crate::location::Location;

/// Raised when a construct is recognized but cannot be lowered yet.
///
/// These are ordinary failures, not violations. Callers convert them into
/// diagnostics at the driver boundary instead of aborting the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unimplemented {
    pub message: String,
    pub location: Option<Location>,
}

impl Unimplemented {
    pub fn new(message: impl Into<String>, location: Option<Location>) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }
}

impl fmt::Display for Unimplemented {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "unimplemented feature at {}: {}", loc, self.message),
            None => write!(f, "unimplemented feature: {}", self.message),
        }
    }
}

impl std::error::Error for Unimplemented {}

/// Errors surfaced while lowering a unit tree to assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// Construct the lowering does not support yet.
    Unimplemented(Unimplemented),
    /// A function needed more than the frame's local slots.
    FrameTooDeep { function: String, needed: usize },
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodegenError::Unimplemented(u) => write!(f, "{}", u),
            CodegenError::FrameTooDeep { function, needed } => write!(
                f,
                "function \"{}\" needs {} local slots, frame holds {}",
                function,
                needed,
                crate::codegen::FRAME_SLOTS
            ),
        }
    }
}

impl std::error::Error for CodegenError {}

impl From<Unimplemented> for CodegenError {
    fn from(u: Unimplemented) -> Self {
        CodegenError::Unimplemented(u)
    }
}
