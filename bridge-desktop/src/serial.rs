//! Serial Transport Implementation
//!
//! Each open port gets one reader pump on Tokio's blocking pool. The pump
//! owns the read handle and forwards chunks over a bounded channel;
//! [`SerialTransport::read`] only receives from that channel. Dropping a
//! pending `read` therefore never loses data: the chunk stays queued for the
//! next caller.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    serial::{Parity, SerialOptions, SerialTransport},
};
use bytes::Bytes;
use serialport::{DataBits, FlowControl, Parity as SpParity, SerialPort, StopBits};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::PortRegistry;

/// Per-read poll timeout. Bounds how long a closed port takes to stop its pump.
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(50);

const READ_CHUNK_SIZE: usize = 4096;

/// Chunks buffered between the pump and the reader.
const CHUNK_QUEUE_DEPTH: usize = 32;

type Chunk = io::Result<Bytes>;

/// Desktop serial transport backed by the `serialport` crate
///
/// Reads and writes use separate cloned handles so a write never waits
/// behind a parked read.
pub struct SerialPortTransport {
    registry: Arc<PortRegistry>,
    port: Mutex<Option<Arc<OpenPort>>>,
}

struct OpenPort {
    device_id: u32,
    chunks: tokio::sync::Mutex<mpsc::Receiver<Chunk>>,
    writer: Mutex<Box<dyn Write + Send>>,
    stop: Arc<AtomicBool>,
}

impl OpenPort {
    /// Start the reader pump for `reader`. Must be called within a runtime.
    fn start<R, W>(device_id: u32, reader: R, writer: W) -> Arc<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));

        let pump_stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || pump_reads(device_id, reader, tx, pump_stop));

        Arc::new(Self {
            device_id,
            chunks: tokio::sync::Mutex::new(rx),
            writer: Mutex::new(Box::new(writer)),
            stop,
        })
    }

    fn shut(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Blocking read loop. Ends on stop, end of stream, a hard error, or when
/// the port's receiver is gone.
fn pump_reads<R: Read>(device_id: u32, mut reader: R, tx: mpsc::Sender<Chunk>, stop: Arc<AtomicBool>) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    while !stop.load(Ordering::SeqCst) {
        let chunk = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => continue,
            Err(_) if stop.load(Ordering::SeqCst) => break,
            Err(e) => Err(e),
        };

        let failed = chunk.is_err();
        if tx.blocking_send(chunk).is_err() || failed {
            break;
        }
    }

    debug!(device_id, "Serial reader pump stopped");
}

impl SerialPortTransport {
    pub fn new(registry: Arc<PortRegistry>) -> Self {
        Self {
            registry,
            port: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<OpenPort>> {
        self.port
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, open: Arc<OpenPort>) {
        let previous = self
            .port
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(open);
        if let Some(previous) = previous {
            previous.shut();
            warn!(device_id = previous.device_id, "Replaced a port that was still open");
        }
    }

    fn take(&self) -> Option<Arc<OpenPort>> {
        self.port
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

pub(crate) fn to_serialport_parity(parity: Parity) -> Result<SpParity> {
    match parity {
        Parity::None => Ok(SpParity::None),
        Parity::Odd => Ok(SpParity::Odd),
        Parity::Even => Ok(SpParity::Even),
        Parity::Mark | Parity::Space => Err(BridgeError::InvalidOptions(format!(
            "{:?} parity is not supported by the desktop serial driver",
            parity
        ))),
    }
}

pub(crate) fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

pub(crate) fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

fn open_blocking(port_name: &str, options: &SerialOptions) -> Result<OpenPortHandles> {
    let mut port = serialport::new(port_name, options.baud_rate)
        .data_bits(to_serialport_data_bits(options.data_bits))
        .stop_bits(to_serialport_stop_bits(options.stop_bits))
        .parity(to_serialport_parity(options.parity)?)
        .flow_control(FlowControl::None)
        .timeout(READ_POLL_TIMEOUT)
        .open()
        .map_err(|e| BridgeError::OperationFailed(format!("Failed to open {}: {}", port_name, e)))?;

    if let Some(dtr) = options.dtr {
        port.write_data_terminal_ready(dtr)
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to set DTR: {}", e)))?;
    }
    if let Some(rts) = options.rts {
        port.write_request_to_send(rts)
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to set RTS: {}", e)))?;
    }

    let writer = port.try_clone().map_err(|e| {
        BridgeError::OperationFailed(format!("Failed to clone handle for {}: {}", port_name, e))
    })?;

    Ok(OpenPortHandles {
        reader: port,
        writer,
    })
}

struct OpenPortHandles {
    reader: Box<dyn SerialPort>,
    writer: Box<dyn SerialPort>,
}

fn join_error(e: tokio::task::JoinError) -> BridgeError {
    BridgeError::OperationFailed(format!("Serial I/O task failed: {}", e))
}

#[async_trait]
impl SerialTransport for SerialPortTransport {
    async fn open(&self, device_id: u32, options: &SerialOptions) -> Result<()> {
        options.validate()?;

        let port_name = self
            .registry
            .port_name(device_id)
            .ok_or(BridgeError::DeviceNotFound(device_id))?;

        if let Some(previous) = self.take() {
            previous.shut();
            debug!(device_id = previous.device_id, "Closed previous port before reopening");
        }

        let opts = options.clone();
        let name = port_name.clone();
        let handles = tokio::task::spawn_blocking(move || open_blocking(&name, &opts))
            .await
            .map_err(join_error)??;

        self.install(OpenPort::start(device_id, handles.reader, handles.writer));

        info!(
            device_id,
            port = %port_name,
            baud_rate = options.baud_rate,
            "Serial port opened"
        );
        Ok(())
    }

    async fn read(&self) -> Result<Option<Bytes>> {
        let port = self.current().ok_or(BridgeError::PortClosed)?;
        let mut chunks = port.chunks.lock().await;

        match chunks.recv().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(BridgeError::Io(e)),
            None => Ok(None),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        let port = self.current().ok_or(BridgeError::PortClosed)?;
        let payload = data.to_vec();

        tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut writer = port.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.write_all(&payload)?;
            writer.flush()?;
            Ok(payload.len())
        })
        .await
        .map_err(join_error)?
    }

    async fn close(&self) -> Result<()> {
        if let Some(port) = self.take() {
            port.shut();
            info!(device_id = port.device_id, "Serial port closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    /// Read side fed by the test; times out like a real port when idle.
    struct FakeLine {
        incoming: std_mpsc::Receiver<Vec<u8>>,
    }

    impl Read for FakeLine {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.incoming.recv_timeout(Duration::from_millis(10)) {
                Ok(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Err(std_mpsc::RecvTimeoutError::Timeout) => Err(ErrorKind::TimedOut.into()),
                Err(std_mpsc::RecvTimeoutError::Disconnected) => Ok(0),
            }
        }
    }

    fn fake_transport() -> (Arc<SerialPortTransport>, std_mpsc::Sender<Vec<u8>>) {
        let (line_tx, line_rx) = std_mpsc::channel();
        let transport = Arc::new(SerialPortTransport::new(Arc::new(PortRegistry::new())));
        transport.install(OpenPort::start(1, FakeLine { incoming: line_rx }, io::sink()));
        (transport, line_tx)
    }

    #[test]
    fn test_to_serialport_parity() {
        assert!(matches!(to_serialport_parity(Parity::None), Ok(SpParity::None)));
        assert!(matches!(to_serialport_parity(Parity::Odd), Ok(SpParity::Odd)));
        assert!(matches!(to_serialport_parity(Parity::Even), Ok(SpParity::Even)));
        assert!(matches!(
            to_serialport_parity(Parity::Mark),
            Err(BridgeError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_to_serialport_data_bits() {
        assert!(matches!(to_serialport_data_bits(5), DataBits::Five));
        assert!(matches!(to_serialport_data_bits(7), DataBits::Seven));
        assert!(matches!(to_serialport_data_bits(8), DataBits::Eight));
    }

    #[test]
    fn test_to_serialport_stop_bits() {
        assert!(matches!(to_serialport_stop_bits(1), StopBits::One));
        assert!(matches!(to_serialport_stop_bits(2), StopBits::Two));
    }

    #[tokio::test]
    async fn test_io_before_open_is_rejected() {
        let transport = SerialPortTransport::new(Arc::new(PortRegistry::new()));
        assert!(!transport.is_open());
        assert!(matches!(transport.read().await, Err(BridgeError::PortClosed)));
        assert!(matches!(
            transport.write(b"hi").await,
            Err(BridgeError::PortClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = SerialPortTransport::new(Arc::new(PortRegistry::new()));
        assert!(transport.close().await.is_ok());
        assert!(transport.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_open_unknown_device() {
        let transport = SerialPortTransport::new(Arc::new(PortRegistry::new()));
        let result = transport.open(99, &SerialOptions::default()).await;
        assert!(matches!(result, Err(BridgeError::DeviceNotFound(99))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_aborted_read_does_not_lose_next_chunk() {
        let (transport, line) = fake_transport();

        let parked = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.read().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        parked.abort();
        assert!(parked.await.unwrap_err().is_cancelled());

        line.send(b"first".to_vec()).unwrap();

        let chunk = tokio::time::timeout(Duration::from_secs(1), transport.read())
            .await
            .expect("read timed out")
            .unwrap();
        assert_eq!(chunk.as_deref(), Some(&b"first"[..]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_ends_pump() {
        let (transport, _line) = fake_transport();
        let port = transport.current().unwrap();

        transport.close().await.unwrap();
        assert!(!transport.is_open());

        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            port.chunks.lock().await.recv().await
        })
        .await
        .expect("pump did not stop");
        assert!(drained.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_end_of_stream() {
        let (transport, line) = fake_transport();
        drop(line);

        let chunk = tokio::time::timeout(Duration::from_secs(1), transport.read())
            .await
            .expect("read timed out")
            .unwrap();
        assert!(chunk.is_none());
    }
}
