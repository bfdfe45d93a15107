//! Error types for the vst3-bridge library

use thiserror::Error;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A caller-supplied value was out of range or malformed
    InvalidArgument,
    /// The instance (or the host context) is not in an initialized state
    NotInitialized,
    /// A real-time call was made while the instance was not active
    NotActive,
    /// The plugin refused a call, returned a failure code or panicked
    PluginRejected,
    /// A plugin, class, parameter or interface could not be found
    NotFound,
    /// A file, bundle or stream operation failed
    IoFailure,
    /// The operation is not supported in the current state or platform
    Unsupported,
}

/// Main error type for vst3-bridge operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Frame count larger than the block size negotiated at initialize
    #[error("Invalid argument: {requested} frames exceeds the maximum block size of {max}")]
    BlockTooLarge {
        /// Frames requested by the caller
        requested: usize,
        /// Negotiated maximum block size
        max: usize,
    },

    /// A host buffer holds fewer samples than the frame count
    #[error("Invalid argument: buffer for channel {channel} holds {len} samples, {required} required")]
    BufferTooShort {
        /// Flat host channel index
        channel: usize,
        /// Length of the supplied buffer
        len: usize,
        /// Frames requested
        required: usize,
    },

    /// Only one side of a stereo input pair was supplied
    #[error("Invalid argument: stereo input channel {channel} is missing")]
    MissingInputChannel {
        /// Index of the missing channel
        channel: usize,
    },

    /// Instance or host context not initialized
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Real-time call outside the active state
    #[error("Plugin is not active")]
    NotActive,

    /// The plugin returned a failure code or panicked
    #[error("Plugin rejected {0}")]
    PluginRejected(String),

    /// The plugin's process call returned a failure code
    #[error("Plugin rejected process call (result {0})")]
    ProcessRejected(i32),

    /// The plugin panicked inside its process call
    #[error("Plugin panicked inside its process call")]
    ProcessPanicked,

    /// Something could not be found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bundle, library or stream failure
    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// Unsupported operation
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// The coarse kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_)
            | Error::BlockTooLarge { .. }
            | Error::BufferTooShort { .. }
            | Error::MissingInputChannel { .. }
            | Error::Config(_) => ErrorKind::InvalidArgument,
            Error::NotInitialized(_) => ErrorKind::NotInitialized,
            Error::NotActive => ErrorKind::NotActive,
            Error::PluginRejected(_) | Error::ProcessRejected(_) | Error::ProcessPanicked => {
                ErrorKind::PluginRejected
            }
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::IoFailure(_) | Error::Io(_) => ErrorKind::IoFailure,
            Error::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    pub(crate) fn rejected(what: impl Into<String>) -> Self {
        Error::PluginRejected(what.into())
    }
}

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, Error>;
