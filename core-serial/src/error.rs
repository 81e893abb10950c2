use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerialError {
    #[error("Not connected to a device")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(BridgeError),

    #[error("Serial access is not supported here: {0}")]
    Unsupported(String),

    #[error("Serial stream closed by the device")]
    StreamClosed,

    #[error("Reads are owned by the active listener; stop listening first")]
    ListenerActive,

    #[error("Device not found: {0}")]
    DeviceNotFound(u32),

    #[error("No USB device found")]
    NoDeviceAvailable,
}

impl From<BridgeError> for SerialError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::NotAvailable(message) => SerialError::Unsupported(message),
            BridgeError::DeviceNotFound(id) => SerialError::DeviceNotFound(id),
            BridgeError::NoDeviceAvailable => SerialError::NoDeviceAvailable,
            other => SerialError::Transport(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SerialError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_error_mapping() {
        assert!(matches!(
            SerialError::from(BridgeError::NotAvailable("no Web Serial".into())),
            SerialError::Unsupported(_)
        ));
        assert!(matches!(
            SerialError::from(BridgeError::DeviceNotFound(7)),
            SerialError::DeviceNotFound(7)
        ));
        assert!(matches!(
            SerialError::from(BridgeError::PortClosed),
            SerialError::Transport(BridgeError::PortClosed)
        ));
    }
}
