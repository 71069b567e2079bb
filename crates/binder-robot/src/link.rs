//! TCP link to the controller's script interface.

use std::{
    io::ErrorKind,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use binder_core::{ConnectionError, Connector, LinkError, RobotEndpoint, RobotLink};
use bytes::{BufMut, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    task::JoinHandle,
};

/// Opens [`TcpRobotLink`]s.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        endpoint: &RobotEndpoint,
    ) -> Result<Box<dyn RobotLink>, ConnectionError> {
        let addr = endpoint.to_string();
        let stream = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        {
            Err(_) => return Err(ConnectionError::Timeout(addr)),
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                return Err(ConnectionError::Refused(addr));
            }
            Ok(Err(source)) => {
                return Err(ConnectionError::Unreachable {
                    endpoint: addr,
                    source,
                });
            }
            Ok(Ok(stream)) => stream,
        };

        stream
            .set_nodelay(true)
            .map_err(|source| ConnectionError::Unreachable {
                endpoint: addr.clone(),
                source,
            })?;

        tracing::info!(endpoint = %addr, "Connected to robot controller");
        Ok(Box::new(TcpRobotLink::new(stream, addr)))
    }
}

/// Newline-delimited command link over TCP.
///
/// The controller streams state packets back on the same socket; they are
/// drained in the background so its send buffer never stalls. End of stream
/// from the controller marks the link closed.
///
/// A send abandoned mid-write (its future dropped on a timeout) can leave a
/// partial line on the wire. The next send starts with a newline so the
/// controller drops the fragment instead of gluing it to the new command.
pub struct TcpRobotLink {
    writer: OwnedWriteHalf,
    closed: Arc<AtomicBool>,
    drain: JoinHandle<()>,
    buf: BytesMut,
    /// Set while a line is being written, cleared once it is flushed.
    line_open: bool,
    endpoint: String,
}

impl TcpRobotLink {
    #[must_use]
    pub fn new(stream: TcpStream, endpoint: String) -> Self {
        let (reader, writer) = stream.into_split();
        let closed = Arc::new(AtomicBool::new(false));
        let drain = tokio::spawn(drain_incoming(reader, Arc::clone(&closed)));
        Self {
            writer,
            closed,
            drain,
            buf: BytesMut::with_capacity(256),
            line_open: false,
            endpoint,
        }
    }
}

async fn drain_incoming(mut reader: OwnedReadHalf, closed: Arc<AtomicBool>) {
    let mut scratch = [0u8; 4096];
    loop {
        match reader.read(&mut scratch).await {
            Ok(0) => break,
            Ok(n) => tracing::trace!(bytes = n, "Discarded controller state data"),
            Err(e) => {
                tracing::debug!("Controller read error: {e}");
                break;
            }
        }
    }
    closed.store(true, Ordering::Release);
}

#[async_trait]
impl RobotLink for TcpRobotLink {
    async fn send(&mut self, command: &str) -> Result<(), LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        self.buf.clear();
        if self.line_open {
            tracing::debug!(endpoint = %self.endpoint, "Terminating partially written line");
            self.buf.put_u8(b'\n');
        }
        self.buf.put_slice(command.trim_end().as_bytes());
        self.buf.put_u8(b'\n');
        self.line_open = true;
        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await?;
        self.line_open = false;
        tracing::trace!(endpoint = %self.endpoint, command, "Sent");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.drain.abort();
        match self.writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for TcpRobotLink {
    fn drop(&mut self) {
        self.drain.abort();
    }
}
