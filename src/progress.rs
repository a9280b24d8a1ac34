// src/progress.rs

//! Progress reporting for transactions
//!
//! The transaction engine reports each state transition through a
//! [`ProgressTracker`]. Implementations:
//! - `SilentProgress`: No-op for scripted/quiet modes
//! - `LogProgress`: Logs transitions to tracing
//! - `CallbackProgress`: Forwards [`ProgressEvent`]s to a closure
//!
//! Terminal animation lives in the binary; nothing here draws to the terminal.

use tracing::info;

/// Receives transaction progress
pub trait ProgressTracker {
    /// Set the current status message
    fn set_message(&self, message: &str);

    /// Finish progress successfully with a message
    fn finish_with_message(&self, message: &str);

    /// Finish progress with an error message
    fn finish_with_error(&self, message: &str);
}

/// Silent progress tracker (no-op)
#[derive(Debug, Default)]
pub struct SilentProgress;

impl SilentProgress {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressTracker for SilentProgress {
    fn set_message(&self, _message: &str) {}

    fn finish_with_message(&self, _message: &str) {}

    fn finish_with_error(&self, _message: &str) {}
}

/// Logging progress tracker
///
/// Logs progress updates to tracing at info level.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ProgressTracker for LogProgress {
    fn set_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn finish_with_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn finish_with_error(&self, message: &str) {
        info!("{}: ERROR - {}", self.name, message);
    }
}

/// Events emitted by callback progress tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Message updated
    Message(String),
    /// Progress finished successfully
    Finished(String),
    /// Progress finished with error
    Error(String),
}

/// Callback-based progress tracker
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent),
{
    callback: F,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent),
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressTracker for CallbackProgress<F>
where
    F: Fn(ProgressEvent),
{
    fn set_message(&self, message: &str) {
        (self.callback)(ProgressEvent::Message(message.to_string()));
    }

    fn finish_with_message(&self, message: &str) {
        (self.callback)(ProgressEvent::Finished(message.to_string()));
    }

    fn finish_with_error(&self, message: &str) {
        (self.callback)(ProgressEvent::Error(message.to_string()));
    }
}
