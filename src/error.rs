use thiserror::Error;

use crate::emulation::EmulationError;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all possible error conditions that can occur while parsing module images,
/// building the synthetic process environment and dispatching structured exceptions. Each
/// variant provides specific context about the failure mode to enable appropriate error handling.
///
/// # Error Categories
///
/// ## File Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid image structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond buffer boundaries
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE parsing errors from goblin crate
///
/// ## Emulation Errors
/// - [`Error::Emulation`] - Guest memory, context marshalling and SEH dispatch failures
///
/// Configuration inconsistencies (a missing main module, missing core system modules, an
/// unresolved module name) are deliberately *not* errors. They are reported through the
/// `log` facade and the environment is built on a best-effort basis.
///
/// # Examples
///
/// ```rust,no_run
/// use ntscope::{Error, emulation::EmulationError};
///
/// fn report(result: ntscope::Result<u32>) {
///     match result {
///         Ok(eip) => println!("resume at {:#x}", eip),
///         Err(Error::Emulation(EmulationError::UnsupportedDisposition { value, .. })) => {
///             eprintln!("handler returned unsupported disposition {:#x}", value);
///         }
///         Err(e) => eprintln!("other error: {}", e),
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading a buffer.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while reading module images from disk.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// Error raised by the emulation layer.
    ///
    /// See [`EmulationError`] for the individual failure modes.
    #[error(transparent)]
    Emulation(#[from] EmulationError),
}
