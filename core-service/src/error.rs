use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Unknown sync plugin: {0}")]
    UnknownPlugin(String),

    #[error("Sync plugin already registered: {0}")]
    DuplicatePlugin(String),

    /// The request names a provider or data type the plugin does not serve.
    #[error("Plugin {plugin} cannot handle {provider}/{data_type}")]
    PluginMismatch {
        plugin: String,
        provider: String,
        data_type: String,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] core_auth::AuthError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Image cache error: {0}")]
    Image(#[from] core_images::ImageCacheError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
