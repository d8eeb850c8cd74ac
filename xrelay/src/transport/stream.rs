//! Message transport over a tokio byte stream.
//!
//! Stands in for the wireless session layer when the relay is hosted on a
//! socket: each accepted stream is one peer session.
//!
//! Inbound framing is a big-endian `u16` length followed by that many
//! bytes. The length [`CONTROL_TRANSFER_UNIT`] introduces a control record
//! carrying a big-endian `u16` requested transfer unit instead of a
//! message. Outbound fragments are written as-is.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info, warn};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::sync::{Mutex, watch};

use super::{Transport, clamp_transfer_unit};
use crate::MIN_TRANSFER_UNIT;

/// Length prefix announcing a transfer unit control record.
pub const CONTROL_TRANSFER_UNIT: u16 = 0xFFFF;

type BoxedStream = Box<dyn AsyncReadWrite>;

trait AsyncReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncReadWrite for T {}

/// A [`Transport`] over whichever stream is currently attached.
pub struct StreamLink {
    /// Read half of the attached stream.
    reader: Mutex<Option<BufReader<ReadHalf<BoxedStream>>>>,

    /// Write half of the attached stream.
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,

    /// Session state, observed by `wait_for_connection`.
    connected: watch::Sender<bool>,

    /// Transfer unit requested by the current peer.
    transfer_unit: AtomicUsize,
}

impl StreamLink {
    /// Creates a link with no peer attached.
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected,
            transfer_unit: AtomicUsize::new(MIN_TRANSFER_UNIT),
        }
    }

    /// Starts a session over `stream`, replacing any previous one.
    pub async fn attach<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: BoxedStream = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(boxed);

        let mut reader = self.reader.lock().await;
        *self.writer.lock().await = Some(write_half);
        *reader = Some(BufReader::new(read_half));
        self.transfer_unit.store(MIN_TRANSFER_UNIT, Ordering::Release);
        self.connected.send_replace(true);
        drop(reader);
        info!("Peer attached, transfer unit {}", MIN_TRANSFER_UNIT);
    }

    /// Ends the current session, if any. A pending `read_message` returns
    /// `None` and drops the read half.
    pub async fn detach(&self) {
        self.connected.send_replace(false);
        self.writer.lock().await.take();
        info!("Peer detached");
    }

    /// Suspends until the current session ends.
    pub async fn wait_for_disconnect(&self) {
        let mut rx = self.connected.subscribe();
        loop {
            let connected = *rx.borrow_and_update();
            if !connected {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for StreamLink {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for StreamLink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StreamLink")
            .field("connected", &*self.connected.borrow())
            .field("transfer_unit", &self.current_transfer_unit())
            .finish_non_exhaustive()
    }
}

/// Reads frames until one carries a message, applying control records on
/// the way. `None` on EOF or any read error.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, transfer_unit: &AtomicUsize) -> Option<usize>
where
    R: AsyncRead + Unpin,
{
    loop {
        let len = match reader.read_u16().await {
            Ok(len) => len,
            Err(err) => {
                debug!("Read failed: {}", err);
                return None;
            }
        };

        if len == CONTROL_TRANSFER_UNIT {
            let requested = match reader.read_u16().await {
                Ok(requested) => requested,
                Err(err) => {
                    debug!("Read failed: {}", err);
                    return None;
                }
            };
            let unit = clamp_transfer_unit(requested as usize);
            transfer_unit.store(unit, Ordering::Release);
            info!("Transfer unit set to {} (requested {})", unit, requested);
            continue;
        }

        buf.clear();
        buf.resize(len as usize, 0);
        if let Err(err) = reader.read_exact(&mut buf[..]).await {
            debug!("Read failed mid-message: {}", err);
            return None;
        }
        return Some(len as usize);
    }
}

async fn write_fragment<W>(writer: &mut W, fragment: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(fragment).await?;
    writer.flush().await
}

impl Transport for StreamLink {
    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn current_transfer_unit(&self) -> usize {
        self.transfer_unit.load(Ordering::Acquire)
    }

    async fn wait_for_connection(&self) {
        let mut rx = self.connected.subscribe();
        loop {
            let connected = *rx.borrow_and_update();
            if connected {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn read_message(&self, buf: &mut Vec<u8>) -> Option<usize> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut()?;

        let len = tokio::select! {
            biased;
            _ = self.wait_for_disconnect() => None,
            len = read_frame(reader, buf, &self.transfer_unit) => len,
        };
        if len.is_some() {
            return len;
        }

        // Held until the session is torn down so `attach` cannot slip in.
        guard.take();
        self.connected.send_replace(false);
        self.writer.lock().await.take();
        drop(guard);
        info!("Peer disconnected");
        None
    }

    async fn send(&self, fragment: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return false;
        };

        // A peer that stops reading must not pin the writer past `detach`.
        let result = tokio::select! {
            biased;
            _ = self.wait_for_disconnect() => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "peer detached during write",
            )),
            result = write_fragment(writer, fragment) => result,
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                // The reader sees EOF and finishes the teardown.
                warn!("Write failed: {}", err);
                guard.take();
                self.connected.send_replace(false);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_reads_framed_messages() {
        let link = StreamLink::new();
        let (mut peer, local) = tokio::io::duplex(1024);
        link.attach(local).await;
        assert!(link.is_connected());

        peer.write_all(&frame(b"Hello")).await.unwrap();
        peer.write_all(&frame(b"")).await.unwrap();

        let mut buf = Vec::new();
        assert_eq!(link.read_message(&mut buf).await, Some(5));
        assert_eq!(buf, b"Hello");
        assert_eq!(link.read_message(&mut buf).await, Some(0));
    }

    #[tokio::test]
    async fn test_control_record_sets_transfer_unit() {
        let link = StreamLink::new();
        let (mut peer, local) = tokio::io::duplex(1024);
        link.attach(local).await;
        assert_eq!(link.current_transfer_unit(), MIN_TRANSFER_UNIT);

        let mut record = CONTROL_TRANSFER_UNIT.to_be_bytes().to_vec();
        record.extend_from_slice(&247u16.to_be_bytes());
        peer.write_all(&record).await.unwrap();
        peer.write_all(&frame(b"x")).await.unwrap();

        let mut buf = Vec::new();
        assert_eq!(link.read_message(&mut buf).await, Some(1));
        assert_eq!(link.current_transfer_unit(), 247);
    }

    #[tokio::test]
    async fn test_send_writes_raw_fragment() {
        let link = StreamLink::new();
        let (mut peer, local) = tokio::io::duplex(1024);
        link.attach(local).await;

        assert!(link.send(b"abc\0").await);

        let mut out = [0u8; 4];
        peer.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"abc\0");
    }

    #[tokio::test]
    async fn test_eof_disconnects() {
        let link = StreamLink::new();
        let (peer, local) = tokio::io::duplex(64);
        link.attach(local).await;
        drop(peer);

        let mut buf = Vec::new();
        assert_eq!(link.read_message(&mut buf).await, None);
        assert!(!link.is_connected());
        assert!(!link.send(b"late\0").await);
        link.wait_for_disconnect().await;
    }

    #[tokio::test]
    async fn test_detach_wakes_pending_reader() {
        let link = std::sync::Arc::new(StreamLink::new());
        let (_peer, local) = tokio::io::duplex(64);
        link.attach(local).await;

        let reader = {
            let link = link.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                link.read_message(&mut buf).await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        link.detach().await;
        assert_eq!(reader.await.unwrap(), None);
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_detach_releases_stalled_writer() {
        let link = std::sync::Arc::new(StreamLink::new());
        // The peer never reads, so a large write fills the pipe and parks.
        let (_peer, local) = tokio::io::duplex(16);
        link.attach(local).await;

        let sender = {
            let link = link.clone();
            tokio::spawn(async move { link.send(&[0xAA; 512]).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!sender.is_finished());

        let limit = std::time::Duration::from_millis(500);
        assert!(tokio::time::timeout(limit, link.detach()).await.is_ok());

        let sent = tokio::time::timeout(limit, sender).await;
        assert!(!sent.unwrap().unwrap());
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_reattach_while_reader_tears_down() {
        let link = std::sync::Arc::new(StreamLink::new());
        let (_old_peer, old_local) = tokio::io::duplex(64);
        link.attach(old_local).await;

        let reader = {
            let link = link.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                link.read_message(&mut buf).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let (mut peer, local) = tokio::io::duplex(1024);
        tokio::join!(link.detach(), link.attach(local));
        assert_eq!(reader.await.unwrap(), None);

        // The new session survives the old reader's teardown.
        assert!(link.is_connected());
        assert!(link.send(b"new\0").await);
        let mut out = [0u8; 4];
        peer.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"new\0");

        peer.write_all(&frame(b"ping")).await.unwrap();
        let mut buf = Vec::new();
        assert_eq!(link.read_message(&mut buf).await, Some(4));
        assert_eq!(buf, b"ping");
    }

    #[tokio::test]
    async fn test_send_without_peer() {
        let link = StreamLink::default();
        assert!(!link.send(b"x\0").await);

        let mut buf = Vec::new();
        assert_eq!(link.read_message(&mut buf).await, None);
    }
}
