use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(u32),

    #[error("No USB device found")]
    NoDeviceAvailable,

    #[error("Permission denied for device {0}")]
    PermissionDenied(u32),

    #[error("Invalid serial options: {0}")]
    InvalidOptions(String),

    #[error("Port is not open")]
    PortClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
