// file: src/transport.rs
// description: Abstract duplex transport and the WebSocket implementation

use crate::{error::TickwireError, types::Envelope};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use tracing::{debug, trace, warn};
use url::Url;

/// Inbound happening on an open transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A payload arrived, already routed to its topic.
    Message { topic: String, payload: Value },
    /// The peer closed the connection or the stream ended.
    Closed,
    /// The connection dropped with an error.
    Errored(TickwireError),
}

/// A duplex connection to one push-update endpoint. The channel drives it
/// through the full lifecycle: `open`, then interleaved `send`/`next_event`
/// until a `Closed`/`Errored` event, then `open` again on reconnect.
///
/// `next_event` must be cancel-safe: the channel polls it inside a `select!`
/// alongside its command queue.
pub trait Transport: Send + 'static {
    fn open(&mut self) -> impl Future<Output = Result<(), TickwireError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;

    fn send(
        &mut self,
        topic: &str,
        payload: &Value,
    ) -> impl Future<Output = Result<(), TickwireError>> + Send;

    fn next_event(&mut self) -> impl Future<Output = TransportEvent> + Send;
}

/// WebSocket transport speaking the JSON envelope protocol
/// (`{"channel": topic, "data": payload}` in both directions).
pub struct WsTransport {
    url: Url,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl WsTransport {
    pub fn new(url: Url) -> Self {
        Self { url, stream: None }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Transport for WsTransport {
    async fn open(&mut self) -> Result<(), TickwireError> {
        let (stream, _response) = connect_async(self.url.as_str()).await?;
        debug!("WebSocket connection established to {}", self.url);
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }

    async fn send(&mut self, topic: &str, payload: &Value) -> Result<(), TickwireError> {
        let stream = self.stream.as_mut().ok_or(TickwireError::NotConnected)?;
        let frame = serde_json::to_string(&Envelope::new(topic, payload.clone()))?;
        stream.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        let Some(stream) = self.stream.as_mut() else {
            return TransportEvent::Closed;
        };

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<Envelope>(text.as_str()) {
                        Ok(envelope) => {
                            trace!(topic = %envelope.channel, "inbound frame");
                            return TransportEvent::Message {
                                topic: envelope.channel,
                                payload: envelope.data,
                            };
                        }
                        Err(e) => {
                            // Unparseable frames are dropped, not fatal.
                            warn!(
                                "ignoring malformed frame: {} ({})",
                                text.chars().take(100).collect::<String>(),
                                e
                            );
                        }
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!("ignoring {}-byte binary frame", data.len());
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Keepalive traffic; tungstenite answers pings itself.
                    trace!("keepalive frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("received close frame: {:?}", frame);
                    self.stream = None;
                    return TransportEvent::Closed;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    self.stream = None;
                    return TransportEvent::Errored(e.into());
                }
                None => {
                    self.stream = None;
                    return TransportEvent::Closed;
                }
            }
        }
    }
}
