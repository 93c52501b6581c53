use std::sync::Arc;

use async_trait::async_trait;
use lapin::{
    options::*, types::FieldTable, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::{oneshot, watch, RwLock};
use tracing::{debug, info, warn};

use crate::options::RabbitMqOptions;
use subshop_messaging_core::{
    ChannelPool, ChannelSource, ConnectionLost, ConnectionState, ConnectionStatus, Connector,
    ConsumerHandle, ConsumerRegistry, MessagingError, PooledChannel, Shutdown, Supervisor,
};

fn connection_err(e: lapin::Error) -> MessagingError {
    MessagingError::Connection(e.to_string())
}

/// The single broker connection plus everything tied to its lifetime: the
/// channel pool, the consumer registry and the reconnect supervisor.
pub struct RabbitConnection {
    opts: RabbitMqOptions,
    conn: RwLock<Option<Arc<Connection>>>,
    pool: ChannelPool<Channel>,
    registry: ConsumerRegistry,
    shutdown: Shutdown,
    status: ConnectionStatus,
}

impl RabbitConnection {
    /// Connects and declares the exchange. Failing here is fatal for the caller;
    /// once connected, losses are handled by the background supervisor.
    pub async fn connect(opts: RabbitMqOptions) -> Result<Arc<Self>, MessagingError> {
        let this = Arc::new(Self {
            pool: ChannelPool::new(opts.max_channels),
            opts,
            conn: RwLock::new(None),
            registry: ConsumerRegistry::new(),
            shutdown: Shutdown::new(),
            status: ConnectionStatus::new(),
        });

        this.status.set(ConnectionState::Connecting);
        let lost = match Connector::connect(this.as_ref()).await {
            Ok(lost) => lost,
            Err(e) => {
                this.status.set(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        this.status.set(ConnectionState::Connected);

        let supervisor = Supervisor::new(
            Arc::clone(&this),
            this.registry.clone(),
            this.opts.backoff(),
            this.shutdown.clone(),
            this.status.clone(),
        );
        tokio::spawn(supervisor.run(lost));

        Ok(this)
    }

    pub fn options(&self) -> &RabbitMqOptions {
        &self.opts
    }

    pub fn state(&self) -> ConnectionState {
        self.status.get()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.status.subscribe()
    }

    pub fn registry(&self) -> &ConsumerRegistry {
        &self.registry
    }

    pub fn register_consumer(&self, name: &str, handle: Arc<dyn ConsumerHandle>) {
        self.registry.register(name, handle);
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Generation of the current connection; bumps on every reconnect.
    pub fn generation(&self) -> u64 {
        self.pool.generation()
    }

    pub fn idle_channels(&self) -> usize {
        self.pool.len()
    }

    /// Borrows a channel (prefetch already set). It goes back to the pool when dropped.
    pub async fn borrow_channel(self: &Arc<Self>) -> Result<PooledChannel<Self>, MessagingError> {
        if self.shutdown.is_triggered() {
            return Err(MessagingError::Closed);
        }
        self.pool.borrow(self).await
    }

    /// Stops consumers and closes the connection. No reconnects happen afterwards.
    /// Calling it again is a no-op.
    pub async fn close(&self) -> Result<(), MessagingError> {
        if !self.shutdown.trigger() {
            return Ok(());
        }
        info!("closing RabbitMQ connection");

        self.registry.stop_all().await;
        self.pool.reset(self);
        let conn = self.conn.write().await.take();
        self.status.set(ConnectionState::Closed);

        if let Some(conn) = conn {
            conn.close(200, "shutdown").await.map_err(connection_err)?;
        }
        Ok(())
    }

    async fn declare_exchange(&self, conn: &Connection) -> Result<(), MessagingError> {
        let ch = conn.create_channel().await.map_err(connection_err)?;
        ch.exchange_declare(
            &self.opts.exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: self.opts.durable,
                auto_delete: false,
                internal: false,
                nowait: false,
                passive: false,
            },
            FieldTable::default(),
        )
        .await
        .map_err(connection_err)?;
        let _ = ch.close(200, "exchange declared").await;
        Ok(())
    }
}

#[async_trait]
impl Connector for RabbitConnection {
    async fn connect(&self) -> Result<ConnectionLost, MessagingError> {
        let props = ConnectionProperties::default().with_connection_name(self.opts.service.clone().into());
        let conn = Connection::connect(&self.opts.uri, props)
            .await
            .map_err(connection_err)?;

        let (tx, lost) = oneshot::channel();
        let mut tx = Some(tx);
        conn.on_error(move |err| {
            if let Some(tx) = tx.take() {
                let _ = tx.send(err.to_string());
            }
        });

        if let Err(e) = self.declare_exchange(&conn).await {
            let _ = conn.close(200, "exchange declaration failed").await;
            return Err(e);
        }

        if self.shutdown.is_triggered() {
            let _ = conn.close(200, "shutdown").await;
            return Err(MessagingError::Closed);
        }

        *self.conn.write().await = Some(Arc::new(conn));
        info!(exchange = %self.opts.exchange, "RabbitMQ connected");
        Ok(lost)
    }

    async fn invalidate(&self) {
        let old = self.conn.write().await.take();
        self.pool.reset(self);
        if let Some(conn) = old {
            if conn.status().connected() {
                let _ = conn.close(320, "reconnecting").await;
            }
        }
    }
}

#[async_trait]
impl ChannelSource for RabbitConnection {
    type Channel = Channel;

    async fn open_channel(&self) -> Result<Channel, MessagingError> {
        let conn = self
            .conn
            .read()
            .await
            .clone()
            .filter(|c| c.status().connected())
            .ok_or_else(|| MessagingError::Connection("not connected to broker".into()))?;

        let ch = conn.create_channel().await.map_err(connection_err)?;
        ch.basic_qos(self.opts.prefetch, BasicQosOptions { global: false })
            .await
            .map_err(connection_err)?;
        if self.opts.confirms {
            ch.confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(connection_err)?;
        }
        Ok(ch)
    }

    fn discard(&self, channel: Channel) {
        if !channel.status().connected() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    if let Err(e) = channel.close(200, "channel released").await {
                        debug!(error = %e, "closing released channel failed");
                    }
                });
            }
            Err(_) => warn!("no runtime to close released channel"),
        }
    }

    fn is_open(&self, channel: &Channel) -> bool {
        channel.status().connected()
    }
}
