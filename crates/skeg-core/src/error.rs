//! Error types for skeg-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] skeg_config::ConfigError),

    #[error("Runtime error: {0}")]
    Provider(#[from] skeg_provider::ProviderError),

    #[error("Invalid port '{0}'")]
    InvalidPort(String),

    #[error("Port 22/tcp is reserved for ssh: '{0}'")]
    ReservedPort(String),

    #[error("Port ranges are not supported for host bindings: '{0}'")]
    UnsupportedRange(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Environment '{0}' does not exist")]
    EnvironmentNotFound(String),

    #[error("Environment '{0}' already has a container")]
    AlreadyExists(String),

    #[error("Environment '{0}' has no container")]
    NoContainer(String),

    #[error("Environment '{0}' has no ssh port bound")]
    NoSshPort(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("SSH on {0} never became ready")]
    SshNotReady(String),

    #[error("SSH key generation failed: {0}")]
    SshKeygenError(String),

    #[error("Refusing to build image: {0}")]
    InvalidRecipe(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad category of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Unsupported,
    ExternalFailure,
    Unreachable,
    InvalidInput,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::EnvironmentNotFound(_)
            | CoreError::NoContainer(_)
            | CoreError::NoSshPort(_)
            | CoreError::ImageNotFound(_) => ErrorKind::NotFound,
            CoreError::AlreadyExists(_) | CoreError::ReservedPort(_) => ErrorKind::Conflict,
            CoreError::UnsupportedRange(_) => ErrorKind::Unsupported,
            CoreError::SshNotReady(_) => ErrorKind::Unreachable,
            CoreError::InvalidPort(_) | CoreError::InvalidName(_) | CoreError::InvalidRecipe(_) => {
                ErrorKind::InvalidInput
            }
            CoreError::Provider(e) if e.is_not_found() => ErrorKind::NotFound,
            CoreError::Config(_)
            | CoreError::Provider(_)
            | CoreError::SshKeygenError(_)
            | CoreError::Io(_) => ErrorKind::ExternalFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
