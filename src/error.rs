//! Driver lifecycle error taxonomy and the error handler seam.
//!
//! The buffer layer keeps its own small [`BufferError`](crate::util::BufferError)
//! kind so that buffer operations stay `Copy`/`PartialEq`; everything above it
//! reports through [`DriverError`].

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::util::BufferError;

/// Errors surfaced while bootstrapping, running, or closing the driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// A configuration value (or combination of values) failed validation
    /// during conclude. The message names the offending values.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Another driver is live in the state directory: the CnC file is marked
    /// ready and its consumer heartbeat is fresher than the driver timeout.
    #[error("active driver detected in {}", .dir.display())]
    ActiveDriver {
        /// State directory the live peer owns
        dir: PathBuf,
    },

    /// Filesystem or memory-mapping failure, wrapped with what was being done.
    #[error("{context}: {source}")]
    Io {
        /// What the driver was doing when the operation failed
        context: String,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// An operation on the raw buffer layer failed.
    #[error("buffer operation failed: {0}")]
    Buffer(#[from] BufferError),

    /// An agent's duty cycle panicked; the payload is preserved as text.
    #[error("agent panicked: {0}")]
    AgentPanic(String),

    /// A client wrote a command type this driver does not understand.
    #[error("unsupported client command type {0}")]
    UnsupportedCommand(i32),
}

impl DriverError {
    /// Wrap an I/O error with a short description of the failed operation.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        DriverError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type for driver lifecycle operations
pub type Result<T> = ::std::result::Result<T, DriverError>;

/// Callback invoked for every error observed by an agent or runner.
///
/// Handlers must be cheap and non-blocking; they run on the hot duty-cycle
/// thread of whichever agent observed the error.
pub type ErrorHandler = Arc<dyn Fn(&DriverError) + Send + Sync>;
