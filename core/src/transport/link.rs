//! Links — framed, message-oriented connections to a peer
//!
//! A [`Transport`] moves text messages. [`spawn`] hands one to a pump task
//! and returns a cloneable [`Link`] handle for sending plus a receiver of
//! [`LinkEvent`]s. Only the pump touches the transport, so callers never
//! hold a lock while link I/O is in flight.

use super::TransportError;
use crate::message::Frame;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// A bidirectional text channel
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send {
    /// Send one text message
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next incoming text message. `None` once the peer has closed.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the channel
    async fn close(&mut self);
}

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique link identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    pub fn next() -> Self {
        Self(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Commands accepted by a link pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Send(String),
    Close,
}

/// What a link pump reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The transport is up; queued frames are being flushed
    Opened,
    /// A decoded frame from the peer
    Frame(Frame),
    /// The link is gone. Always the last event.
    Closed,
}

pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

/// Handle to a running link
#[derive(Debug, Clone)]
pub struct Link {
    id: LinkId,
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl Link {
    pub(crate) fn new(commands: mpsc::UnboundedSender<LinkCommand>) -> Self {
        Self {
            id: LinkId::next(),
            commands,
        }
    }

    /// A link with no pump behind it. Commands land in the returned receiver.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<LinkCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Queue a frame. Fails only once the pump has stopped.
    pub fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        self.commands
            .send(LinkCommand::Send(frame.encode()))
            .map_err(|_| TransportError::Closed)
    }

    pub fn close(&self) {
        let _ = self.commands.send(LinkCommand::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Run `transport` behind a new link
pub fn spawn<T>(transport: T) -> (Link, LinkEvents)
where
    T: Transport + 'static,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let link = Link::new(command_tx);
    let id = link.id();

    tokio::spawn(async move {
        let _ = event_tx.send(LinkEvent::Opened);
        pump(id, transport, command_rx, &event_tx).await;
        let _ = event_tx.send(LinkEvent::Closed);
    });

    (link, event_rx)
}

/// Drive a transport until either side closes it
pub(crate) async fn pump<T>(
    id: LinkId,
    mut transport: T,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: &mpsc::UnboundedSender<LinkEvent>,
) where
    T: Transport,
{
    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(LinkCommand::Send(text)) => {
                    if let Err(e) = transport.send_text(text).await {
                        tracing::debug!("{} send failed: {}", id, e);
                        break;
                    }
                }
                Some(LinkCommand::Close) | None => {
                    transport.close().await;
                    break;
                }
            },
            incoming = transport.next_text() => match incoming {
                Some(Ok(text)) => match Frame::decode(&text) {
                    Ok(frame) => {
                        let _ = events.send(LinkEvent::Frame(frame));
                    }
                    Err(e) => tracing::warn!("{} dropped frame: {}", id, e),
                },
                Some(Err(e)) => {
                    tracing::debug!("{} receive failed: {}", id, e);
                    break;
                }
                None => break,
            },
        }
    }

    tracing::debug!("{} closed", id);
}
