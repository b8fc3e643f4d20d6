//! Live feed TCP transport.
//!
//! Every accepted connection becomes one [`Subscription`] on the shared
//! [`LiveChannel`]. Messages are written as newline-delimited JSON, one
//! `{ "type", "data", "timestamp" }` object per line. Clients are not
//! expected to send anything; EOF from the client closes the connection.
//!
//! A connection ends (and its subscription is dropped) when:
//! - a write fails or times out
//! - the channel removes the subscriber because its queue overflowed
//! - the client disconnects
//! - the feed is stopped

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use trapwire_core::config::LiveConfig;
use trapwire_core::pipeline::HealthStatus;
use trapwire_ingest::{LiveChannel, LiveMessage, Subscription};

/// Upper bound on a single line write to a subscriber socket.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Back-off after a failed `accept()` (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// TCP listener that streams live messages to connected clients.
pub struct LiveFeed {
    bind: String,
    max_connections: usize,
    channel: LiveChannel,
    connections: Arc<Semaphore>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl LiveFeed {
    pub fn new(config: &LiveConfig, channel: LiveChannel) -> Self {
        let max_connections = config.max_connections.max(1);
        Self {
            bind: config.bind.clone(),
            max_connections,
            channel,
            connections: Arc::new(Semaphore::new(max_connections)),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            accept_task: None,
            local_addr: None,
        }
    }

    /// Bind the listener and start accepting subscribers.
    ///
    /// Returns the bound address (useful when binding to port 0).
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.accept_task.is_some() {
            return Err(anyhow::anyhow!("live feed already running"));
        }

        let listener = TcpListener::bind(&self.bind)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind live feed to {}: {}", self.bind, e))?;
        let local_addr = listener.local_addr()?;

        // A previous stop() leaves the old token cancelled.
        self.cancel = CancellationToken::new();
        self.tracker = TaskTracker::new();

        let accept_loop = AcceptLoop {
            listener,
            channel: self.channel.clone(),
            connections: Arc::clone(&self.connections),
            cancel: self.cancel.clone(),
            tracker: self.tracker.clone(),
        };
        self.accept_task = Some(tokio::spawn(accept_loop.run()));
        self.local_addr = Some(local_addr);

        info!(
            listen_addr = %local_addr,
            max_connections = self.max_connections,
            "live feed listening"
        );
        Ok(local_addr)
    }

    /// Stop accepting, close every connection, and wait for the handlers.
    pub async fn stop(&mut self) {
        let Some(task) = self.accept_task.take() else {
            return;
        };

        self.cancel.cancel();
        if let Err(e) = task.await {
            warn!(error = %e, "live feed accept task ended abnormally");
        }

        self.tracker.close();
        self.tracker.wait().await;
        self.local_addr = None;
        info!("live feed stopped");
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of currently connected subscribers.
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.connections.available_permits()
    }

    pub fn is_running(&self) -> bool {
        self.accept_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn health(&self) -> HealthStatus {
        if self.is_running() {
            HealthStatus::Healthy
        } else if self.accept_task.is_some() {
            HealthStatus::Unhealthy("accept loop exited".to_owned())
        } else {
            HealthStatus::Unhealthy("not running".to_owned())
        }
    }
}

struct AcceptLoop {
    listener: TcpListener,
    channel: LiveChannel,
    connections: Arc<Semaphore>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl AcceptLoop {
    async fn run(self) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "live feed accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let permit = match Arc::clone(&self.connections).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(peer = %peer, "live feed connection limit reached, rejecting");
                    continue;
                }
            };

            // Subscribe at accept time so nothing published afterwards is missed.
            let subscription = self.channel.subscribe();
            let cancel = self.cancel.clone();
            self.tracker.spawn(async move {
                serve_subscriber(stream, peer, subscription, cancel).await;
                drop(permit);
            });
        }
        debug!("live feed accept loop exiting");
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    mut subscription: Subscription,
    cancel: CancellationToken,
) {
    let subscriber = subscription.id();
    debug!(peer = %peer, subscriber, "live feed client connected");

    let (mut reader, mut writer) = stream.into_split();
    let mut scratch = [0u8; 256];

    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break "shutdown",
            read = reader.read(&mut scratch) => match read {
                Ok(0) | Err(_) => break "client disconnected",
                // Client input is ignored.
                Ok(_) => {}
            },
            message = subscription.recv() => match message {
                Some(message) => {
                    if let Err(reason) = write_message(&mut writer, &message).await {
                        break reason;
                    }
                }
                None => break "dropped by live channel",
            },
        }
    };

    let _ = writer.shutdown().await;
    debug!(peer = %peer, subscriber, reason, "live feed client closed");
}

async fn write_message(
    writer: &mut OwnedWriteHalf,
    message: &LiveMessage,
) -> Result<(), &'static str> {
    let mut line = match serde_json::to_vec(message) {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, event_type = %message.event_type, "failed to encode live message");
            return Ok(());
        }
    };
    line.push(b'\n');

    match timeout(WRITE_TIMEOUT, writer.write_all(&line)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err("write failed"),
        Err(_) => Err("write timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn test_config(max_connections: usize) -> LiveConfig {
        LiveConfig {
            enabled: true,
            bind: "127.0.0.1:0".to_owned(),
            subscriber_capacity: 16,
            max_connections,
        }
    }

    async fn wait_for_subscribers(channel: &LiveChannel, n: usize) {
        for _ in 0..200 {
            if channel.subscriber_count() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} subscribers, have {}", channel.subscriber_count());
    }

    #[tokio::test]
    async fn streams_messages_as_json_lines() {
        let channel = LiveChannel::new(16);
        let mut feed = LiveFeed::new(&test_config(4), channel.clone());
        let addr = feed.start().await.unwrap();
        assert!(feed.health().is_healthy());

        let stream = TcpStream::connect(addr).await.unwrap();
        wait_for_subscribers(&channel, 1).await;

        channel.publish("new_event", json!({"id": "a"}));
        channel.publish("new_event", json!({"id": "b"}));

        let mut lines = BufReader::new(stream).lines();
        let first: LiveMessage =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        let second: LiveMessage =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.event_type, "new_event");
        assert_eq!(first.data["id"], "a");
        assert_eq!(second.data["id"], "b");

        feed.stop().await;
    }

    #[tokio::test]
    async fn client_disconnect_drops_subscription() {
        let channel = LiveChannel::new(16);
        let mut feed = LiveFeed::new(&test_config(4), channel.clone());
        let addr = feed.start().await.unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        wait_for_subscribers(&channel, 1).await;
        assert_eq!(feed.active_connections(), 1);

        drop(stream);
        wait_for_subscribers(&channel, 0).await;

        feed.stop().await;
    }

    #[tokio::test]
    async fn connection_limit_rejects_extra_clients() {
        let channel = LiveChannel::new(16);
        let mut feed = LiveFeed::new(&test_config(1), channel.clone());
        let addr = feed.start().await.unwrap();

        let _first = TcpStream::connect(addr).await.unwrap();
        wait_for_subscribers(&channel, 1).await;

        let second = TcpStream::connect(addr).await.unwrap();
        let mut lines = BufReader::new(second).lines();
        // A rejected connection is closed immediately.
        let next = timeout(Duration::from_secs(2), lines.next_line()).await.unwrap();
        assert!(matches!(next, Ok(None) | Err(_)));
        assert_eq!(channel.subscriber_count(), 1);

        feed.stop().await;
    }

    #[tokio::test]
    async fn stop_closes_connections_and_releases_subscribers() {
        let channel = LiveChannel::new(16);
        let mut feed = LiveFeed::new(&test_config(4), channel.clone());
        let addr = feed.start().await.unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        wait_for_subscribers(&channel, 1).await;

        feed.stop().await;
        assert_eq!(channel.subscriber_count(), 0);
        assert!(feed.local_addr().is_none());
        assert!(!feed.health().is_healthy());

        let mut lines = BufReader::new(stream).lines();
        let next = timeout(Duration::from_secs(2), lines.next_line()).await.unwrap();
        assert!(matches!(next, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config(1);
        config.bind = taken.local_addr().unwrap().to_string();

        let mut feed = LiveFeed::new(&config, LiveChannel::new(1));
        let err = feed.start().await.unwrap_err();
        assert!(err.to_string().contains("failed to bind live feed"));
        assert!(!feed.is_running());
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let mut feed = LiveFeed::new(&test_config(1), LiveChannel::new(1));
        feed.stop().await;
        assert!(matches!(feed.health(), HealthStatus::Unhealthy(_)));
    }
}
