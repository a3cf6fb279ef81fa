//! WebSocket client with automatic reconnection

use super::types::{WsConfig, WsError, WsMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// How a single connection ended
enum SessionEnd {
    /// Server closed, receiver dropped or shutdown requested
    Stop,
    /// Transport failure, eligible for reconnect
    Lost(WsError),
}

/// Reusable WebSocket client with automatic reconnection and ping/pong handling
pub struct WsClient {
    config: WsConfig,
}

impl WsClient {
    /// Create a new WebSocket client with the given configuration
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    /// Get the configured URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Connect and return a receiver for messages plus the connection task.
    ///
    /// The task reconnects with exponential backoff until the attempt cap, then
    /// emits [`WsMessage::Failed`] and returns [`WsError::MaxReconnectsExceeded`].
    /// Flipping `shutdown` to `true` ends the loop after the current message.
    pub fn connect(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> (mpsc::Receiver<WsMessage>, JoinHandle<Result<(), WsError>>) {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let result = Self::run_connection_loop(config, tx, shutdown).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "WebSocket connection loop failed");
            }
            result
        });

        (rx, handle)
    }

    /// Run the connection loop with automatic reconnection
    async fn run_connection_loop(
        config: WsConfig,
        tx: mpsc::Sender<WsMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WsError> {
        let mut reconnect_attempts = 0;
        let mut reconnect_delay = config.initial_reconnect_delay;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match Self::connect_and_stream(&config, &tx, &mut shutdown).await {
                SessionEnd::Stop => break,
                SessionEnd::Lost(e) => {
                    reconnect_attempts += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = reconnect_attempts,
                        "WebSocket connection error, reconnecting..."
                    );

                    // 0 = infinite
                    if config.max_reconnect_attempts > 0
                        && reconnect_attempts >= config.max_reconnect_attempts
                    {
                        let err = WsError::MaxReconnectsExceeded(reconnect_attempts);
                        let _ = tx.send(WsMessage::Failed(err.clone())).await;
                        return Err(err);
                    }

                    if tx.is_closed() {
                        tracing::info!("Receiver dropped, stopping reconnection");
                        break;
                    }

                    let _ = tx
                        .send(WsMessage::Reconnecting {
                            attempt: reconnect_attempts,
                        })
                        .await;

                    tokio::select! {
                        _ = tokio::time::sleep(reconnect_delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
                }
            }
        }

        let _ = tx.send(WsMessage::Closed).await;
        Ok(())
    }

    /// Connect to WebSocket and stream messages
    async fn connect_and_stream(
        config: &WsConfig,
        tx: &mpsc::Sender<WsMessage>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        tracing::info!(url = %config.url, "Connecting to WebSocket");

        let ws_stream = match connect_async(&config.url).await {
            Ok((stream, _response)) => stream,
            Err(e) => return SessionEnd::Lost(WsError::ConnectionFailed(e.to_string())),
        };
        let (mut write, mut read) = ws_stream.split();

        tracing::info!("WebSocket connected");
        if tx.send(WsMessage::Connected).await.is_err() {
            return SessionEnd::Stop;
        }

        let mut ping_interval = tokio::time::interval(config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately
        ping_interval.tick().await;
        let mut waiting_for_pong = false;

        loop {
            tokio::select! {
                msg = read.next() => {
                    let forwarded = match msg {
                        Some(Ok(Message::Text(text))) => Some(WsMessage::Text(text)),
                        Some(Ok(Message::Binary(data))) => Some(WsMessage::Binary(data)),
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                return SessionEnd::Lost(WsError::SendFailed(e.to_string()));
                            }
                            None
                        }
                        Some(Ok(Message::Pong(_))) => {
                            waiting_for_pong = false;
                            None
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Received close frame");
                            return SessionEnd::Stop;
                        }
                        Some(Ok(_)) => None,
                        Some(Err(e)) => {
                            return SessionEnd::Lost(WsError::ConnectionFailed(e.to_string()));
                        }
                        None => {
                            return SessionEnd::Lost(WsError::ConnectionFailed(
                                "Stream ended unexpectedly".into(),
                            ));
                        }
                    };

                    if let Some(message) = forwarded {
                        if tx.send(message).await.is_err() {
                            tracing::debug!("Receiver dropped, closing connection");
                            return SessionEnd::Stop;
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    if waiting_for_pong {
                        return SessionEnd::Lost(WsError::ConnectionFailed("Pong timeout".into()));
                    }
                    if let Err(e) = write.send(Message::Ping(vec![])).await {
                        return SessionEnd::Lost(WsError::SendFailed(e.to_string()));
                    }
                    waiting_for_pong = true;
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutdown requested, closing WebSocket");
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Stop;
                    }
                }
            }
        }
    }
}
