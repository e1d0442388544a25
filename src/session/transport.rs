//! Duplex text-frame transports
//!
//! A [`Transport`] opens an endpoint and hands back a [`Link`]: a pair of
//! channels carrying whole text frames. Dropping the outbound sender closes the
//! link; the inbound receiver ends when the peer goes away.

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{AnalyticsError, Result};

/// An open duplex link
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

impl Link {
    /// Build a link and the peer's end of it
    ///
    /// The returned pair is what the other side reads from and writes to.
    #[must_use]
    pub fn pair() -> (Self, (mpsc::UnboundedReceiver<String>, mpsc::UnboundedSender<String>)) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (Self { outbound: out_tx, inbound: in_rx }, (out_rx, in_tx))
    }
}

/// Opens links to an endpoint
pub trait Transport: Send + Sync + 'static {
    /// Open a link that keeps itself alive every `ping_interval`; zero disables keep-alive
    fn open(&self, endpoint: &str, ping_interval: Duration) -> impl Future<Output = Result<Link>> + Send;
}

/// WebSocket transport with keep-alive pings
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    async fn open(&self, endpoint: &str, ping_interval: Duration) -> Result<Link> {
        let (ws, _) = connect_async(endpoint)
            .await
            .map_err(|e| AnalyticsError::connection(format!("{endpoint}: {e}")))?;
        tracing::debug!(endpoint, "websocket connected");

        let (mut sink, mut stream) = ws.split();
        let (link, (mut outbound, inbound)) = Link::pair();

        let pings = !ping_interval.is_zero();
        let period = ping_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    frame = outbound.recv() => match frame {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                tracing::debug!(error = %e, "websocket write failed");
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    _ = ticker.tick(), if pings => {
                        if sink.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if inbound.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(link)
    }
}
