//! Control-channel client.
//!
//! Maintains the WebSocket to the orchestration server: registers on every
//! (re)connect, forwards `config_update` pushes to the wall manager, and
//! heartbeats on a fixed interval. A lost connection is retried forever on
//! a fixed interval; missed heartbeats are not queued.

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::protocol::{Capabilities, ClientEvent, ConfigUpdate, RegisterScreen, ServerEvent};
use crate::{Result, WallError};

#[derive(Debug, Clone)]
pub struct ControlChannelConfig {
    pub server_url: String,
    pub name: String,
    pub ip: String,
    pub reconnect_interval: Duration,
    pub heartbeat_interval: Duration,
    /// How long to wait for the server's initial config push after
    /// registering. Exceeding it is logged and recoverable.
    pub register_reply_window: Duration,
    pub connect_timeout: Duration,
}

/// Derive the control-channel endpoint from the server's HTTP base URL.
pub fn control_url(server_url: &str) -> Result<Url> {
    let mut url = Url::parse(server_url)
        .map_err(|e| WallError::Config(format!("invalid server url '{}': {}", server_url, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(WallError::Config(format!(
                "unsupported server url scheme '{}'",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| WallError::Config("cannot derive websocket url".to_string()))?;
    url.set_path("/ws");
    url.set_query(None);
    Ok(url)
}

/// Run the control channel until the process exits. Config pushes land on
/// `updates`; connection loss is never fatal.
pub async fn run(config: ControlChannelConfig, updates: mpsc::UnboundedSender<ConfigUpdate>) {
    let url = match control_url(&config.server_url) {
        Ok(url) => url,
        Err(e) => {
            warn!("Control channel disabled: {}", e);
            return;
        }
    };

    let mut attempts: u64 = 0;
    loop {
        attempts += 1;
        debug!("Connecting to {} (attempt {})", url, attempts);

        match timeout(config.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((socket, _response))) => {
                info!("Connected to control server {}", url);
                if let Err(e) = session(socket, &config, &updates).await {
                    warn!("Control channel dropped: {}", e);
                }
            }
            Ok(Err(e)) => warn!("Cannot reach control server: {}", e),
            Err(_) => warn!("Connection to {} timed out", url),
        }

        tokio::time::sleep(config.reconnect_interval).await;
    }
}

async fn session<S>(
    socket: S,
    config: &ControlChannelConfig,
    updates: &mpsc::UnboundedSender<ConfigUpdate>,
) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let mut socket = socket;

    let register = ClientEvent::RegisterScreen(RegisterScreen {
        ip: config.ip.clone(),
        name: Some(config.name.clone()),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
        capabilities: Some(Capabilities::default()),
        position: None,
    });
    socket
        .send(Message::Text(serde_json::to_string(&register)?))
        .await
        .map_err(|e| WallError::Network(e.to_string()))?;

    // The server answers registration with an initial config push.
    match timeout(config.register_reply_window, socket.next()).await {
        Ok(Some(Ok(message))) => handle_message(message, updates),
        Ok(Some(Err(e))) => return Err(WallError::Network(e.to_string())),
        Ok(None) => return Err(WallError::Network("server closed the channel".to_string())),
        Err(_) => warn!(
            "No registration reply within {:?}, carrying on",
            config.register_reply_window
        ),
    }

    let start = tokio::time::Instant::now() + config.heartbeat_interval;
    let mut heartbeat = interval_at(start, config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let text = serde_json::to_string(&ClientEvent::Heartbeat)?;
                socket
                    .send(Message::Text(text))
                    .await
                    .map_err(|e| WallError::Network(e.to_string()))?;
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(message)) => handle_message(message, updates),
                    Some(Err(e)) => return Err(WallError::Network(e.to_string())),
                    None => return Err(WallError::Network("server closed the channel".to_string())),
                }
            }
        }
    }
}

fn handle_message(message: Message, updates: &mpsc::UnboundedSender<ConfigUpdate>) {
    let Message::Text(text) = message else {
        return;
    };
    match serde_json::from_str::<ServerEvent>(&text) {
        Ok(ServerEvent::ConfigUpdate(update)) => {
            info!(
                "Configuration received: layout {}, {} active camera(s)",
                update.layout,
                update.cameras.iter().flatten().count()
            );
            let _ = updates.send(update);
        }
        Err(e) => warn!("Unrecognized server event: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_url_rewrites_scheme_and_path() {
        let url = control_url("http://10.0.0.1:1982").unwrap();
        assert_eq!(url.as_str(), "ws://10.0.0.1:1982/ws");

        let url = control_url("https://wall.example.com").unwrap();
        assert_eq!(url.as_str(), "wss://wall.example.com/ws");

        assert!(control_url("ftp://nope").is_err());
        assert!(control_url("not a url").is_err());
    }

    #[test]
    fn config_updates_are_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let text = r#"{"event":"config_update","layout":"1x1","cameras":[4]}"#;
        handle_message(Message::Text(text.to_string()), &tx);

        let update = rx.try_recv().unwrap();
        assert_eq!(update.cameras, vec![Some(4)]);

        // Garbage is logged and skipped, never fatal.
        handle_message(Message::Text("not json".to_string()), &tx);
        assert!(rx.try_recv().is_err());
    }
}
