// src/io/serial/link.rs
//
// One physical serial connection to the dongle.
//
// The read half is owned by the link's decoding thread. The write half sits
// behind a mutex shared through LinkControl, so commands from any thread are
// serialised and never interleave on the wire.
//
// Reads use a short port timeout. Timeouts are absorbed here and used to poll
// the close flag, which bounds how long close() takes to release a blocked reader.

use std::io::{ErrorKind, Read, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use crate::error::{DongleError, Result};
use crate::io::LinkId;
use crate::protocol::READ_CHUNK_SIZE;
use crate::settings::LinkSettings;

type Reader = Box<dyn Read + Send>;
type Writer = Box<dyn Write + Send>;

// ============================================================================
// Link Control (shared)
// ============================================================================

/// Cloneable control surface of a link: write, close, and closed-state queries.
/// Safe to use from any thread while the decoding thread owns the `Link`.
#[derive(Clone)]
pub struct LinkControl {
    id: LinkId,
    name: Arc<str>,
    writer: Arc<Mutex<Option<Writer>>>,
    closed: Arc<AtomicBool>,
}

impl LinkControl {
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Port name or other transport description.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write bytes to the link. At most one writer proceeds at a time.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(DongleError::NotConnected);
        }

        let mut guard = self
            .writer
            .lock()
            .map_err(|e| DongleError::transport(self.name(), format!("Port mutex poisoned: {}", e)))?;
        let port = guard.as_mut().ok_or(DongleError::NotConnected)?;

        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| DongleError::transport(self.name(), format!("Serial write error: {}", e)))
    }

    /// Close the link. Idempotent. Releases the write handle now; a reader blocked
    /// in `read_chunk` returns empty within one read timeout.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.writer.lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
        tlog!("[link:{}] Closed {}", self.id, self.name);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Link
// ============================================================================

/// One serial connection: a blocking byte source plus a serialised byte sink.
pub struct Link {
    control: LinkControl,
    reader: Option<Reader>,
    buf: [u8; READ_CHUNK_SIZE],
}

impl Link {
    /// Open and configure a serial port.
    pub fn open(id: LinkId, port: &str, settings: &LinkSettings) -> Result<Link> {
        let serial = serialport::new(port, settings.baud_rate)
            .data_bits(settings.serial_data_bits())
            .stop_bits(settings.serial_stop_bits())
            .parity(settings.parity.into())
            .timeout(settings.read_timeout())
            .open()
            .map_err(|e| DongleError::transport(port, format!("Failed to open: {}", e)))?;

        // Separate OS handle for the write path so commands never wait on a read
        let writer = serial
            .try_clone()
            .map_err(|e| DongleError::transport(port, format!("Failed to clone port: {}", e)))?;

        tlog!(
            "[link:{}] Opened {} at {} (read timeout {} ms)",
            id,
            port,
            settings.describe(),
            settings.read_timeout_ms
        );

        Ok(Link::from_parts(id, port, serial, writer))
    }

    /// Build a link over any byte transport (captured files, test doubles).
    ///
    /// The reader may return `TimedOut`/`WouldBlock` to signal "no data yet";
    /// `Ok(0)` is treated as end of stream.
    pub fn from_parts(
        id: LinkId,
        name: impl Into<String>,
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
    ) -> Link {
        let name: String = name.into();
        let reader: Reader = Box::new(reader);
        let writer: Writer = Box::new(writer);
        Link {
            control: LinkControl {
                id,
                name: Arc::from(name),
                writer: Arc::new(Mutex::new(Some(writer))),
                closed: Arc::new(AtomicBool::new(false)),
            },
            reader: Some(reader),
            buf: [0u8; READ_CHUNK_SIZE],
        }
    }

    pub fn id(&self) -> LinkId {
        self.control.id
    }

    pub fn name(&self) -> &str {
        self.control.name()
    }

    /// Shared control handle for threads other than the reader.
    pub fn control(&self) -> LinkControl {
        self.control.clone()
    }

    /// Read the next chunk of up to `READ_CHUNK_SIZE` bytes.
    ///
    /// Blocks until data arrives. Returns an empty slice once the link is closed
    /// or the transport reports end of stream.
    pub fn read_chunk(&mut self) -> Result<&[u8]> {
        loop {
            if self.control.is_closed() {
                self.reader.take();
                return Ok(&[]);
            }
            let reader = match self.reader.as_mut() {
                Some(r) => r,
                None => return Ok(&[]),
            };

            match reader.read(&mut self.buf) {
                Ok(0) => {
                    self.reader.take();
                    return Ok(&[]);
                }
                Ok(n) => return Ok(&self.buf[..n]),
                Err(ref e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    // Expected between bursts; loop to re-check the close flag
                }
                Err(e) => {
                    self.reader.take();
                    return Err(DongleError::transport(
                        self.control.name(),
                        format!("Read error: {}", e),
                    ));
                }
            }
        }
    }

    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        self.control.write(bytes)
    }

    pub fn close(&self) {
        self.control.close()
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::time::{Duration, Instant};

    fn channel_link() -> (std::sync::mpsc::Sender<Vec<u8>>, SharedWriter, Link) {
        let (tx, reader) = ChannelReader::new(Duration::from_millis(5));
        let writer = SharedWriter::default();
        let link = Link::from_parts(LinkId::A, "test", reader, writer.clone());
        (tx, writer, link)
    }

    #[test]
    fn test_read_chunk_returns_available_bytes() {
        let (tx, _writer, mut link) = channel_link();
        tx.send(vec![1, 2, 3]).unwrap();
        assert_eq!(link.read_chunk().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_read_chunk_caps_at_read_unit() {
        let (tx, _writer, mut link) = channel_link();
        tx.send(vec![0xEE; 100]).unwrap();
        assert_eq!(link.read_chunk().unwrap().len(), READ_CHUNK_SIZE);
        assert_eq!(link.read_chunk().unwrap().len(), 100 - READ_CHUNK_SIZE);
    }

    #[test]
    fn test_end_of_stream_is_empty_chunk() {
        let (tx, _writer, mut link) = channel_link();
        drop(tx);
        assert!(link.read_chunk().unwrap().is_empty());
        assert!(link.read_chunk().unwrap().is_empty());
    }

    #[test]
    fn test_read_error_is_transport_error() {
        let mut link = Link::from_parts(LinkId::B, "flaky", FailingReader, std::io::sink());
        let err = link.read_chunk().unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("flaky"));
    }

    #[test]
    fn test_close_unblocks_reader() {
        let (_tx, _writer, mut link) = channel_link();
        let control = link.control();

        let reader = std::thread::spawn(move || {
            let started = Instant::now();
            let chunk_len = link.read_chunk().unwrap().len();
            (chunk_len, started.elapsed())
        });

        std::thread::sleep(Duration::from_millis(30));
        control.close();

        let (len, elapsed) = reader.join().unwrap();
        assert_eq!(len, 0);
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_write_reaches_transport() {
        let (_tx, writer, link) = channel_link();
        link.write(&[0xAB; 16]).unwrap();
        link.control().write(&[0xCD; 16]).unwrap();

        let written = writer.contents();
        assert_eq!(written.len(), 32);
        assert_eq!(&written[..16], &[0xAB; 16]);
        assert_eq!(&written[16..], &[0xCD; 16]);
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_writes() {
        let (_tx, _writer, link) = channel_link();
        link.close();
        link.close();
        assert!(link.is_closed());
        assert!(matches!(link.write(&[0; 16]), Err(DongleError::NotConnected)));
    }

    #[test]
    fn test_concurrent_writers_do_not_interleave() {
        let (_tx, writer, link) = channel_link();
        let control = link.control();

        let handles: Vec<_> = (0u8..4)
            .map(|n| {
                let control = control.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        control.write(&[n; 16]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let written = writer.contents();
        assert_eq!(written.len(), 4 * 50 * 16);
        for command in written.chunks(16) {
            assert!(command.iter().all(|b| *b == command[0]));
        }
    }

    #[test]
    fn test_open_missing_port_fails() {
        let err = Link::open(LinkId::A, "/dev/capnolink-does-not-exist", &LinkSettings::default())
            .err()
            .unwrap();
        assert!(err.is_transport());
    }
}
