//! Keyed connection pools for the two sides of a run.
//!
//! Each [`PoolKey`] gets its own `bb8` pool of boxed driver connections.
//! Every connection is switched to manual commit before it is first lent,
//! and all pools share one cap derived from the configured limit and what
//! each server reports.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bb8::{ErrorSink, Pool, PooledConnection, RunError};
use tracing::{debug, info};

use crate::core::{Connector, DbConnection, PoolKey};
use crate::error::{MoverError, Result};

/// Idle connections are dropped after this long.
const IDLE_TIMEOUT: Duration = Duration::from_millis(100);
const REAPER_RATE: Duration = Duration::from_secs(1);
/// One lease attempt waits at most this long; callers retry on top.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// A leased connection; returned to its pool on drop.
pub type Lease = PooledConnection<'static, DriverManager>;

/// bb8 manager opening connections for one pool key.
pub struct DriverManager {
    key: PoolKey,
    connector: Arc<dyn Connector>,
}

#[async_trait]
impl bb8::ManageConnection for DriverManager {
    type Connection = Box<dyn DbConnection>;
    type Error = MoverError;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let mut conn = self.connector.connect(self.key).await?;
        conn.set_autocommit(false).await?;
        debug!("Opened {} connection ({})", self.key, conn.dialect());
        Ok(conn)
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.ping().await
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Keeps the last failed connect of a pool so a lease that times out can
/// report it.
#[derive(Debug, Clone, Default)]
struct LastConnectError(Arc<Mutex<Option<String>>>);

impl LastConnectError {
    fn take(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}

impl ErrorSink<MoverError> for LastConnectError {
    fn sink(&self, error: MoverError) {
        debug!("Connect failed: {}", error);
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = Some(error.to_string());
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<MoverError>> {
        Box::new(self.clone())
    }
}

struct KeyedPool {
    pool: Pool<DriverManager>,
    last_error: LastConnectError,
}

/// Lends pooled connections per key with bounded concurrency.
pub struct ConnectionBroker {
    source: Option<KeyedPool>,
    destination: Option<KeyedPool>,
    cap: u32,
}

impl ConnectionBroker {
    /// Connect once per key to read its limits, then build one pool per key.
    ///
    /// The cap is `min(configured, reported...)` where a reported limit of 0
    /// means unlimited. A failure of that first connect is returned as is.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        keys: &[PoolKey],
        configured_max: u32,
    ) -> Result<Self> {
        let mut cap = configured_max.max(1);
        for key in keys {
            let mut first = connector.connect(*key).await?;
            let reported = first.max_connections().await?;
            info!(
                "{}: connected to {} (server max connections: {})",
                key,
                first.dialect(),
                if reported == 0 {
                    "unlimited".to_string()
                } else {
                    reported.to_string()
                }
            );
            if reported > 0 {
                cap = cap.min(reported);
            }
        }

        let mut broker = Self {
            source: None,
            destination: None,
            cap,
        };
        for key in keys {
            let pool = build_pool(*key, Arc::clone(&connector), cap).await?;
            match key {
                PoolKey::Source => broker.source = Some(pool),
                PoolKey::Destination => broker.destination = Some(pool),
            }
        }

        info!("Connection pools ready (max {} leases per key)", cap);
        Ok(broker)
    }

    /// Effective per-key lease limit.
    pub fn cap(&self) -> u32 {
        self.cap
    }

    /// Lease a connection, waiting up to the pool timeout for a free slot.
    ///
    /// Connect failures are not retried inside the pool: a lease that timed
    /// out after one reports it as a connection error.
    pub async fn lease(&self, key: PoolKey) -> Result<Lease> {
        let keyed = self.pool(key)?;
        keyed.pool.get_owned().await.map_err(|e| match e {
            RunError::User(err) => err,
            RunError::TimedOut => match keyed.last_error.take() {
                Some(cause) => MoverError::connection(key, cause),
                None => MoverError::pool(
                    "timed out waiting for a free connection",
                    format!("{} pool (max {})", key, self.cap),
                ),
            },
        })
    }

    /// Connections currently checked out for `key`.
    pub fn leased(&self, key: PoolKey) -> u32 {
        self.pool(key)
            .map(|keyed| {
                let state = keyed.pool.state();
                state.connections - state.idle_connections
            })
            .unwrap_or(0)
    }

    fn pool(&self, key: PoolKey) -> Result<&KeyedPool> {
        let pool = match key {
            PoolKey::Source => self.source.as_ref(),
            PoolKey::Destination => self.destination.as_ref(),
        };
        pool.ok_or_else(|| MoverError::pool("no pool configured", key.to_string()))
    }
}

async fn build_pool(key: PoolKey, connector: Arc<dyn Connector>, cap: u32) -> Result<KeyedPool> {
    let manager = DriverManager { key, connector };
    let last_error = LastConnectError::default();
    let pool = Pool::builder()
        .max_size(cap)
        .min_idle(None)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .reaper_rate(REAPER_RATE)
        .connection_timeout(CONNECTION_TIMEOUT)
        .retry_connection(false)
        .error_sink(last_error.boxed_clone())
        .test_on_check_out(true)
        .build(manager)
        .await?;
    Ok(KeyedPool { pool, last_error })
}
