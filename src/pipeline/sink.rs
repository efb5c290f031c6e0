//! Where streamed fragments go while a step runs
//!
//! Sinks are best effort: a write error disables the sink for the rest of the
//! step and is logged, the step itself carries on.

use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Banner written before the first fragment of every step
pub const MESSAGE_HEADER: &str = "\n========== Ai Message ==========\n";

/// Configured destination for streamed output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkTarget {
    /// Discard fragments
    #[default]
    Null,
    /// Print to stdout
    Console,
    /// Write to a local TCP listener (e.g. `nc -l <port>`)
    Tcp(u16),
}

/// Output shared by every step of a run
///
/// A TCP target keeps one connection for the whole run. After the peer goes
/// away, the next step to open the sink connects again.
#[derive(Clone)]
pub struct StreamOutput {
    target: SinkTarget,
    connection: Arc<Mutex<Option<TcpStream>>>,
}

impl StreamOutput {
    pub fn new(target: SinkTarget) -> Self {
        Self {
            target,
            connection: Arc::new(Mutex::new(None)),
        }
    }

    /// Open a sink for one step; connection failures yield a disabled sink
    pub async fn open(&self, label: &str) -> OutputSink {
        match self.target {
            SinkTarget::Null => OutputSink::disabled(label),
            SinkTarget::Console => OutputSink::from_writer(label, tokio::io::stdout()),
            SinkTarget::Tcp(port) => {
                let mut connection = self.connection.lock().await;
                if connection.is_none() {
                    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
                    match TcpStream::connect(addr).await {
                        Ok(stream) => {
                            debug!(step = %label, %addr, "Output sink connected");
                            *connection = Some(stream);
                        }
                        Err(e) => {
                            warn!(step = %label, %addr, error = %e, "Output sink unavailable");
                            return OutputSink::disabled(label);
                        }
                    }
                }
                OutputSink {
                    label: label.to_string(),
                    writer: Some(SinkWriter::Shared(self.connection.clone())),
                    header_written: false,
                }
            }
        }
    }
}

enum SinkWriter {
    /// Owned by the step and shut down when it finishes
    Owned(Box<dyn AsyncWrite + Unpin + Send>),
    /// Run-wide connection; dropped on error so the next step reconnects
    Shared(Arc<Mutex<Option<TcpStream>>>),
}

/// An open sink for a single step
pub struct OutputSink {
    label: String,
    writer: Option<SinkWriter>,
    header_written: bool,
}

impl OutputSink {
    pub fn disabled(label: &str) -> Self {
        Self {
            label: label.to_string(),
            writer: None,
            header_written: false,
        }
    }

    pub fn from_writer<W>(label: &str, writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            label: label.to_string(),
            writer: Some(SinkWriter::Owned(Box::new(writer))),
            header_written: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Forward one fragment, preceded by the banner on first use
    pub async fn emit(&mut self, piece: &str) {
        if piece.is_empty() {
            return;
        }
        if !self.header_written {
            self.header_written = true;
            self.write(MESSAGE_HEADER).await;
        }
        self.write(piece).await;
    }

    /// Terminate the step's output
    pub async fn finish(&mut self) {
        if self.header_written {
            self.write("\n").await;
        }
        if let Some(SinkWriter::Owned(mut writer)) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    async fn write(&mut self, text: &str) {
        let result = match self.writer.as_mut() {
            None => return,
            Some(SinkWriter::Owned(writer)) => write_flush(writer, text).await,
            Some(SinkWriter::Shared(connection)) => {
                let mut guard = connection.lock().await;
                match guard.as_mut() {
                    // Another step already lost the connection
                    None => Err(io::Error::from(ErrorKind::NotConnected)),
                    Some(stream) => {
                        let result = write_flush(stream, text).await;
                        if result.is_err() {
                            *guard = None;
                        }
                        result
                    }
                }
            }
        };

        if let Err(e) = result {
            match e.kind() {
                ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::NotConnected => {
                    debug!(step = %self.label, "Output sink closed by peer");
                }
                _ => warn!(step = %self.label, error = %e, "Output sink write failed"),
            }
            self.writer = None;
        }
    }
}

async fn write_flush<W>(writer: &mut W, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await
}
