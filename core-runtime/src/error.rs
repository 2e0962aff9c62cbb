use thiserror::Error;

/// Failures while assembling the runtime: configuration, bridges, logging.
#[derive(Error, Debug)]
pub enum Error {
    /// A setting or path is missing or out of range.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No bridge was injected and no desktop default is compiled in.
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    /// A desktop default bridge exists but could not be constructed.
    #[error("Failed to initialize {bridge}: {message}")]
    BridgeInit { bridge: &'static str, message: String },

    #[error("Logging error: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
