//! WebSocket channels.
//!
//! Each channel runs as its own task and reports into the shared inbox.
//! Dropping a handle closes the channel: the task sends a close frame and
//! exits without reporting anything further.

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use super::{Inbound, TransportEvent};
use crate::error::TransportError;
use crate::stream::{EvaluationEvent, Notification, SessionId};

/// Owner of one main or resume stream.
#[derive(Debug)]
pub struct StreamHandle {
    generation: u64,
    url: String,
    _cancel: oneshot::Sender<()>,
}

impl StreamHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Owner of the notification channel.
#[derive(Debug)]
pub struct NotificationHandle {
    _cancel: oneshot::Sender<()>,
}

/// Opens a stream channel and sends `initial` once connected.
///
/// Every message the channel produces is tagged with `generation`.
pub fn open_stream(
    url: String,
    initial: Option<String>,
    generation: u64,
    inbox: mpsc::UnboundedSender<Inbound>,
) -> StreamHandle {
    let (cancel_tx, cancel_rx) = oneshot::channel();
    debug!("Opening stream #{} to {}", generation, url);
    tokio::spawn(run_stream(url.clone(), initial, generation, inbox, cancel_rx));

    StreamHandle {
        generation,
        url,
        _cancel: cancel_tx,
    }
}

async fn run_stream(
    url: String,
    initial: Option<String>,
    generation: u64,
    inbox: mpsc::UnboundedSender<Inbound>,
    mut cancel: oneshot::Receiver<()>,
) {
    let report = |event: TransportEvent| {
        let _ = inbox.send(Inbound::Stream { generation, event });
    };

    let connected = tokio::select! {
        _ = &mut cancel => return,
        result = connect_async(url.as_str()) => result,
    };

    let ws = match connected {
        Ok((ws, _)) => ws,
        Err(source) => {
            let err = TransportError::Connect { url, source };
            warn!("{}", err);
            report(TransportEvent::Failed(err.to_string()));
            return;
        }
    };

    let (mut sink, mut source) = ws.split();

    if let Some(text) = initial {
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            report(TransportEvent::Failed(TransportError::from(e).to_string()));
            return;
        }
    }
    report(TransportEvent::Opened);

    loop {
        tokio::select! {
            _ = &mut cancel => {
                debug!("Abandoning stream #{}", generation);
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            next = source.next() => match next {
                Some(Ok(Message::Text(text))) => match EvaluationEvent::decode(text.as_str()) {
                    Ok(event) => report(TransportEvent::Frame(event)),
                    Err(e) => warn!("Discarding undecodable frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Stream #{} closed by server", generation);
                    report(TransportEvent::Closed);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) if is_disconnect(&e) => {
                    debug!("Stream #{} dropped: {}", generation, e);
                    report(TransportEvent::Closed);
                    return;
                }
                Some(Err(e)) => {
                    report(TransportEvent::Failed(TransportError::from(e).to_string()));
                    return;
                }
            },
        }
    }
}

/// Errors that mean the peer went away rather than misbehaved.
fn is_disconnect(error: &WsError) -> bool {
    matches!(
        error,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Io(_)
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

/// Opens the notification channel and subscribes with `session_id`.
///
/// Sends [`Inbound::NotificationsClosed`] when the channel ends for any
/// reason other than the handle being dropped.
pub fn open_notifications(
    url: String,
    session_id: SessionId,
    inbox: mpsc::UnboundedSender<Inbound>,
) -> NotificationHandle {
    let (cancel_tx, cancel_rx) = oneshot::channel();
    tokio::spawn(run_notifications(url, session_id, inbox, cancel_rx));
    NotificationHandle { _cancel: cancel_tx }
}

async fn run_notifications(
    url: String,
    session_id: SessionId,
    inbox: mpsc::UnboundedSender<Inbound>,
    mut cancel: oneshot::Receiver<()>,
) {
    let connected = tokio::select! {
        _ = &mut cancel => return,
        result = connect_async(url.as_str()) => result,
    };

    let ws = match connected {
        Ok((ws, _)) => ws,
        Err(source) => {
            warn!("{}", TransportError::Connect { url, source });
            let _ = inbox.send(Inbound::NotificationsClosed);
            return;
        }
    };

    let (mut sink, mut source) = ws.split();
    if let Err(e) = sink.send(Message::Text(session_id.to_string().into())).await {
        warn!("Could not subscribe to notifications: {}", e);
        let _ = inbox.send(Inbound::NotificationsClosed);
        return;
    }
    info!("Subscribed to reconnect notifications as {}", session_id);

    loop {
        tokio::select! {
            _ = &mut cancel => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            next = source.next() => match next {
                Some(Ok(Message::Text(text))) => match Notification::decode(text.as_str()) {
                    Ok(Notification::Reconnect(id)) => {
                        info!("Reconnect notification for {}", id);
                        let _ = inbox.send(Inbound::Reconnect(id));
                    }
                    Ok(Notification::Other) => debug!("Ignoring notification: {}", text.as_str()),
                    Err(e) => warn!("Discarding undecodable notification: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Notification channel error: {}", e);
                    break;
                }
            },
        }
    }

    info!("Notification channel closed");
    let _ = inbox.send(Inbound::NotificationsClosed);
}
