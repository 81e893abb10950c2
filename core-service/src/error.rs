use bridge_traits::BridgeError;
use core_serial::SerialError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error(transparent)]
    Serial(#[from] SerialError),
}

impl From<BridgeError> for ServiceError {
    fn from(err: BridgeError) -> Self {
        ServiceError::Serial(SerialError::from(err))
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
