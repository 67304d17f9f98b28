//! Per-connection send queue and receive loop over one duplex stream
//!
//! Every `Pipe` owns exactly two tasks:
//! - **Sender**: drains an unbounded FIFO queue and writes one frame per
//!   envelope, strictly in enqueue order.
//! - **Receiver**: reads frames and hands decoded envelopes to the owner's
//!   `PipeReceiver`, in arrival order.
//!
//! Both tasks share a `PipeStatus` cell. The first failure (write error,
//! read error, framing error, clean close by the peer) or a local `close()`
//! flips it to `Closed` exactly once; the other task observes the flip and
//! stops, which drops its half of the stream. Whatever is still queued for
//! sending at that point is discarded.

use crate::codec::{read_frame, write_frame};
use crate::error::{CodecError, TransportError};
use crate::Envelope;
use log::{debug, warn};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

/// Why a pipe stopped.
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// The remote end closed the stream on a frame boundary
    PeerClosed,
    /// The local owner closed the pipe or dropped its handles
    Shutdown,
    /// A read, write or framing error
    Failed(Arc<CodecError>),
}

#[derive(Debug, Clone)]
enum PipeStatus {
    Open,
    Closed(CloseReason),
}

impl PipeStatus {
    fn is_closed(&self) -> bool {
        matches!(self, PipeStatus::Closed(_))
    }
}

type StatusCell = Arc<watch::Sender<PipeStatus>>;

/// Records the first close reason. Returns false if the pipe was already closed.
fn mark_closed(status: &watch::Sender<PipeStatus>, reason: CloseReason) -> bool {
    status.send_if_modified(|current| match current {
        PipeStatus::Open => {
            *current = PipeStatus::Closed(reason);
            true
        }
        PipeStatus::Closed(_) => false,
    })
}

async fn wait_closed(status: &mut watch::Receiver<PipeStatus>) -> CloseReason {
    loop {
        let current = status.borrow_and_update().clone();
        if let PipeStatus::Closed(reason) = current {
            return reason;
        }
        if status.changed().await.is_err() {
            return CloseReason::Shutdown;
        }
    }
}

/// A live connection: the sending handle and the inbound sequence.
pub struct Pipe {
    pub sender: PipeSender,
    pub receiver: PipeReceiver,
}

impl Pipe {
    /// Spawns the sender and receiver tasks over the two halves of a stream.
    /// Must be called from within a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (status, _) = watch::channel(PipeStatus::Open);
        let status: StatusCell = Arc::new(status);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_sender(writer, outbound_rx, Arc::clone(&status)));
        tokio::spawn(run_receiver(reader, inbound_tx, Arc::clone(&status)));

        Pipe {
            sender: PipeSender {
                outbound: outbound_tx,
                status: Arc::clone(&status),
            },
            receiver: PipeReceiver {
                inbound: inbound_rx,
                status,
            },
        }
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }

    pub fn from_tcp(stream: TcpStream) -> Self {
        // Deltas are tiny and latency matters more than packet count.
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle: {}", e);
        }
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }

    pub fn into_split(self) -> (PipeSender, PipeReceiver) {
        (self.sender, self.receiver)
    }
}

/// Cloneable handle that enqueues envelopes for sending.
#[derive(Debug, Clone)]
pub struct PipeSender {
    outbound: mpsc::UnboundedSender<Envelope>,
    status: StatusCell,
}

impl PipeSender {
    /// Enqueues an envelope without waiting for it to be written.
    /// Fails immediately once the pipe has been torn down.
    pub fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(envelope)
            .map_err(|_| TransportError::Closed)
    }

    /// Tears the pipe down from the local side.
    pub fn close(&self) {
        if mark_closed(&self.status, CloseReason::Shutdown) {
            debug!("Pipe closed locally");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status.borrow().is_closed()
    }

    /// Resolves once the pipe is torn down, with the reason.
    pub async fn closed(&self) -> CloseReason {
        let mut status = self.status.subscribe();
        wait_closed(&mut status).await
    }
}

/// The inbound side of a pipe: a lazy sequence of received envelopes.
#[derive(Debug)]
pub struct PipeReceiver {
    inbound: mpsc::UnboundedReceiver<Envelope>,
    status: StatusCell,
}

impl PipeReceiver {
    /// Next envelope in arrival order. Returns `None` once the stream has
    /// closed or failed and every envelope received before that was yielded,
    /// and keeps returning `None` afterwards.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbound.recv().await
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        match &*self.status.borrow() {
            PipeStatus::Closed(reason) => Some(reason.clone()),
            PipeStatus::Open => None,
        }
    }
}

async fn run_sender<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    status: StatusCell,
) where
    W: AsyncWrite + Unpin,
{
    let mut shutdown = status.subscribe();

    loop {
        let envelope = tokio::select! {
            biased;
            _ = wait_closed(&mut shutdown) => break,
            next = outbound.recv() => match next {
                Some(envelope) => envelope,
                None => {
                    mark_closed(&status, CloseReason::Shutdown);
                    break;
                }
            },
        };

        let written = tokio::select! {
            biased;
            _ = wait_closed(&mut shutdown) => break,
            written = write_frame(&mut writer, &envelope) => written,
        };

        if let Err(e) = written {
            warn!("Pipe write failed: {}", e);
            mark_closed(&status, CloseReason::Failed(Arc::new(e)));
            break;
        }
    }

    // Anything still queued is dropped with the receiver; later sends fail.
    outbound.close();
    let _ = writer.shutdown().await;
}

async fn run_receiver<R>(
    mut reader: R,
    inbound: mpsc::UnboundedSender<Envelope>,
    status: StatusCell,
) where
    R: AsyncRead + Unpin,
{
    let mut shutdown = status.subscribe();

    loop {
        let frame = tokio::select! {
            biased;
            _ = wait_closed(&mut shutdown) => break,
            frame = read_frame(&mut reader) => frame,
        };

        match frame {
            Ok(Some(envelope)) => {
                if inbound.send(envelope).is_err() {
                    mark_closed(&status, CloseReason::Shutdown);
                    break;
                }
            }
            Ok(None) => {
                debug!("Peer closed the stream");
                mark_closed(&status, CloseReason::PeerClosed);
                break;
            }
            Err(e) => {
                if e.is_framing() {
                    warn!("Dropping connection after framing error: {}", e);
                } else {
                    debug!("Pipe read failed: {}", e);
                }
                mark_closed(&status, CloseReason::Failed(Arc::new(e)));
                break;
            }
        }
    }
}
