//! Error types for selector parsing

use thiserror::Error;

/// Error that occurred while parsing or assembling a selector
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Selector parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the selector text
    pub position: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: 0,
        }
    }

    pub fn with_position(mut self, pos: usize) -> Self {
        self.position = pos;
        self
    }
}
