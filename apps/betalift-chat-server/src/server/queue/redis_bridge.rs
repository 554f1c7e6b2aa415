use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, RedisError};
use tokio::sync::RwLock;

use super::NotificationQueue;
use crate::server::metrics::record_queue_publish;

/// Redis-list backed queue. Jobs are appended with `RPUSH`; workers consume
/// them from the other end.
pub struct RedisQueueBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    client: redis::Client,
    queues: Vec<String>,
    reconnect_delay: Duration,
    connection: RwLock<Option<MultiplexedConnection>>,
    connected: AtomicBool,
    reconnect_scheduled: AtomicBool,
    /// Bumped on every successful connect; a supervisor exits once it is stale.
    generation: AtomicU64,
}

impl RedisQueueBridge {
    /// # Errors
    /// Returns an error if `url` is not a valid redis url.
    pub fn new(url: &str, queues: Vec<String>, reconnect_delay: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            inner: Arc::new(BridgeInner {
                client,
                queues,
                reconnect_delay,
                connection: RwLock::new(None),
                connected: AtomicBool::new(false),
                reconnect_scheduled: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        })
    }
}

impl BridgeInner {
    async fn try_connect(self: &Arc<Self>) -> Result<(), RedisError> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut connection)
            .await?;
        // Lists need no declaration; report which ones this bridge feeds.
        for queue in &self.queues {
            let depth: i64 = connection.llen(queue).await?;
            tracing::info!(event = "queue.declared", queue = %queue, depth);
        }
        *self.connection.write().await = Some(connection);
        self.connected.store(true, Ordering::Release);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(event = "queue.connected", generation);
        Arc::clone(self).spawn_supervisor(generation);
        Ok(())
    }

    async fn mark_lost(&self) {
        *self.connection.write().await = None;
        self.connected.store(false, Ordering::Release);
    }

    /// Pings the held connection every `reconnect_delay`; a failed ping counts
    /// as a dropped connection.
    fn spawn_supervisor(self: Arc<Self>, generation: u64) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.reconnect_delay).await;
                if self.generation.load(Ordering::Acquire) != generation {
                    return;
                }
                let Some(mut connection) = self.connection.read().await.clone() else {
                    return;
                };
                let ping = redis::cmd("PING")
                    .query_async::<_, String>(&mut connection)
                    .await;
                if let Err(error) = ping {
                    if self.generation.load(Ordering::Acquire) != generation {
                        return;
                    }
                    tracing::warn!(event = "queue.connection_lost", error = %error);
                    self.mark_lost().await;
                    self.schedule_reconnect();
                    return;
                }
            }
        });
    }

    /// Single retry loop; a second caller while one is running is a no-op.
    fn schedule_reconnect(self: Arc<Self>) {
        if self.reconnect_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.reconnect_delay).await;
                match self.try_connect().await {
                    Ok(()) => break,
                    Err(error) => {
                        tracing::warn!(event = "queue.reconnect_failed", error = %error);
                    }
                }
            }
            self.reconnect_scheduled.store(false, Ordering::Release);
        });
    }
}

fn is_connection_error(error: &RedisError) -> bool {
    error.is_io_error()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || error.is_timeout()
}

#[async_trait]
impl NotificationQueue for RedisQueueBridge {
    async fn connect(&self) {
        if self.inner.connection.read().await.is_some() {
            return;
        }
        if let Err(error) = self.inner.try_connect().await {
            tracing::warn!(
                event = "queue.connect_failed",
                error = %error,
                retry_in_secs = self.inner.reconnect_delay.as_secs()
            );
            Arc::clone(&self.inner).schedule_reconnect();
        }
    }

    async fn publish(&self, queue: &str, payload: &serde_json::Value) -> bool {
        let Some(mut connection) = self.inner.connection.read().await.clone() else {
            record_queue_publish("unavailable");
            tracing::warn!(event = "queue.publish_skipped", queue = %queue, reason = "not_connected");
            return false;
        };
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(error) => {
                record_queue_publish("failed");
                tracing::error!(event = "queue.publish_serialize_failed", error = %error);
                return false;
            }
        };
        match connection.rpush::<_, _, i64>(queue, body).await {
            Ok(_) => {
                record_queue_publish("published");
                true
            }
            Err(error) => {
                record_queue_publish("failed");
                tracing::warn!(event = "queue.publish_failed", queue = %queue, error = %error);
                if is_connection_error(&error) {
                    self.inner.mark_lost().await;
                    Arc::clone(&self.inner).schedule_reconnect();
                }
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, time::Duration};

    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::{TcpListener, TcpStream},
        sync::oneshot,
    };

    use super::RedisQueueBridge;
    use crate::server::queue::NotificationQueue;

    async fn read_line(reader: &mut BufReader<TcpStream>) -> Option<String> {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end().to_owned()),
        }
    }

    /// Reads one RESP array command, returning its arguments.
    async fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Vec<String>> {
        let count: usize = read_line(reader).await?.strip_prefix('*')?.parse().ok()?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            read_line(reader).await?;
            args.push(read_line(reader).await?);
        }
        Some(args)
    }

    fn reply(args: &[String]) -> &'static [u8] {
        match args.first().map(|name| name.to_ascii_uppercase()).as_deref() {
            Some("PING") => b"+PONG\r\n",
            Some("LLEN") => b":0\r\n",
            Some("RPUSH") => b":1\r\n",
            _ => b"+OK\r\n",
        }
    }

    /// Minimal broker: serves one client until `shutdown` fires, then closes
    /// both the socket and the listener.
    async fn serve_one(listener: TcpListener, shutdown: oneshot::Receiver<()>) {
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        let mut reader = BufReader::new(socket);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => return,
                command = read_command(&mut reader) => {
                    let Some(args) = command else { return };
                    if reader.get_mut().write_all(reply(&args)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn wait_for(bridge: &RedisQueueBridge, connected: bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while bridge.is_connected() != connected {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("bridge should report connected={connected}"));
    }

    #[test]
    fn rejects_malformed_url() {
        assert!(RedisQueueBridge::new("not a url", Vec::new(), Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn unreachable_broker_leaves_bridge_disconnected_and_publish_false() {
        let bridge = RedisQueueBridge::new(
            "redis://127.0.0.1:1/",
            vec![String::from("notification_queue")],
            Duration::from_secs(5),
        )
        .unwrap();

        bridge.connect().await;
        assert!(!bridge.is_connected());
        assert!(
            !bridge
                .publish("notification_queue", &serde_json::json!({"userId":"bob"}))
                .await
        );
    }

    #[tokio::test]
    async fn bridge_notices_a_dropped_broker_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let (stop_first, first_stopped) = oneshot::channel();
        let first = tokio::spawn(serve_one(listener, first_stopped));

        let bridge = RedisQueueBridge::new(
            &format!("redis://{addr}/"),
            vec![String::from("notification_queue")],
            Duration::from_millis(100),
        )
        .unwrap();
        bridge.connect().await;
        assert!(bridge.is_connected());
        let job = serde_json::json!({"userId": "bob"});
        assert!(bridge.publish("notification_queue", &job).await);

        stop_first.send(()).unwrap();
        first.await.unwrap();
        wait_for(&bridge, false).await;
        assert!(!bridge.publish("notification_queue", &job).await);

        let listener = TcpListener::bind(addr).await.unwrap();
        let (_keep_running, never) = oneshot::channel();
        tokio::spawn(serve_one(listener, never));
        wait_for(&bridge, true).await;
        assert!(bridge.publish("notification_queue", &job).await);
    }
}
