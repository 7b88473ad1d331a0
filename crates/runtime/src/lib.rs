use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parley_chats::{
    ConnectionRegistry, EventBus, FanoutComponents, FanoutCoordinator, FanoutSettings,
    HttpIdentityLookup, IdentityLookup, MemoryEventBus, MemoryWindowCache, OpenDirectory,
    RecentWindowCache, RedisEventBus, RedisSequencer, RedisWindowCache, Sequencer,
    SqliteConversationStore, StoreSequencer,
};
use parley_config::{AppConfig, IdentityConfig, RedisConfig, SequencerKind};
use parley_database::initialize_database;
use redis::aio::ConnectionManager;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Upper bound on establishing the Redis connection before falling back to single-instance mode.
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// Local fan-out capacity of the event bus; slower consumers observe a lag.
const BUS_CAPACITY: usize = 1024;

pub mod telemetry {
    use anyhow::Result;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_env_filter(env_filter)
            .with_target(true)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

#[derive(Clone)]
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub coordinator: FanoutCoordinator,
    pub redis_conn: Option<ConnectionManager>,
    pub outbound_buffer: usize,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = initialize_database(&config.database)
            .await
            .context("failed to initialise database")?;

        let redis = connect_redis(&config.redis).await;
        let instance_id = resolve_instance_id(&config.fanout.instance_id);
        let store = Arc::new(SqliteConversationStore::new(db_pool.clone()));

        let sequencer: Arc<dyn Sequencer> = match (config.fanout.sequencer, &redis) {
            (SequencerKind::Redis, Some((_, conn))) => Arc::new(RedisSequencer::new(conn.clone())),
            (SequencerKind::Redis, None) => {
                warn!("redis sequencer requested but redis is unavailable, using the store sequencer");
                Arc::new(StoreSequencer::new(store.clone()))
            }
            (SequencerKind::Store, _) => Arc::new(StoreSequencer::new(store.clone())),
        };

        let cache: Arc<dyn RecentWindowCache> = match &redis {
            Some((_, conn)) => Arc::new(RedisWindowCache::new(
                conn.clone(),
                config.fanout.cache_window,
            )),
            None => Arc::new(MemoryWindowCache::new(config.fanout.cache_window)),
        };

        let bus: Arc<dyn EventBus> = match &redis {
            Some((client, _)) => match RedisEventBus::connect(client.clone(), BUS_CAPACITY).await {
                Ok(bus) => Arc::new(bus),
                Err(error) => {
                    warn!(%error, "failed to start redis event bus, using the in-process bus");
                    Arc::new(MemoryEventBus::new(BUS_CAPACITY))
                }
            },
            None => Arc::new(MemoryEventBus::new(BUS_CAPACITY)),
        };

        let identity = build_identity(&config.identity)?;

        let coordinator = FanoutCoordinator::new(
            FanoutComponents {
                store,
                sequencer,
                cache,
                bus,
                identity,
            },
            ConnectionRegistry::new(),
            FanoutSettings::from_config(&config.fanout, instance_id),
        );

        info!(
            instance_id = %coordinator.instance_id(),
            sequencer = coordinator.sequencer_name(),
            bus = coordinator.bus_name(),
            cache_window = config.fanout.cache_window,
            "fan-out coordinator ready"
        );

        Ok(Self {
            db_pool,
            coordinator,
            redis_conn: redis.map(|(_, conn)| conn),
            outbound_buffer: config.fanout.outbound_buffer,
        })
    }

    /// Start consuming the bus on this instance.
    pub fn spawn_broadcast_loop(&self) -> JoinHandle<()> {
        self.coordinator.spawn_broadcast_loop()
    }
}

fn resolve_instance_id(configured: &str) -> String {
    let configured = configured.trim();
    if configured.is_empty() {
        cuid2::create_id()
    } else {
        configured.to_string()
    }
}

/// Connect and ping. Any failure leaves the instance in single-instance mode.
async fn connect_redis(config: &RedisConfig) -> Option<(redis::Client, ConnectionManager)> {
    let url = config.endpoint()?;

    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(error) => {
            warn!(%error, "failed to create redis client, proceeding without redis");
            return None;
        }
    };

    let mut conn = match tokio::time::timeout(
        REDIS_CONNECT_TIMEOUT,
        ConnectionManager::new(client.clone()),
    )
    .await
    {
        Ok(Ok(conn)) => conn,
        Ok(Err(error)) => {
            warn!(%error, "failed to connect to redis, proceeding without redis");
            return None;
        }
        Err(_) => {
            warn!(timeout = ?REDIS_CONNECT_TIMEOUT, "redis connection timed out, proceeding without redis");
            return None;
        }
    };

    let ping = tokio::time::timeout(
        REDIS_CONNECT_TIMEOUT,
        redis::cmd("PING").query_async::<_, String>(&mut conn),
    )
    .await;
    match ping {
        Ok(Ok(_)) => {
            info!("redis connection established");
            Some((client, conn))
        }
        Ok(Err(error)) => {
            warn!(%error, "redis did not answer ping, proceeding without redis");
            None
        }
        Err(_) => {
            warn!("redis ping timed out, proceeding without redis");
            None
        }
    }
}

fn build_identity(config: &IdentityConfig) -> Result<Arc<dyn IdentityLookup>> {
    match config
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
    {
        Some(base_url) => {
            let lookup = HttpIdentityLookup::new(
                base_url,
                Duration::from_secs(config.request_timeout_seconds.max(1)),
            )
            .context("failed to build identity client")?;
            info!(base_url, "resolving users through the identity service");
            Ok(Arc::new(lookup))
        }
        None => {
            info!("no identity service configured, accepting any user id");
            Ok(Arc::new(OpenDirectory))
        }
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
