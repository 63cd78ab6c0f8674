//! Pool provider abstraction for read/write routing.
//!
//! The queue's hot path (insert, bounded select, delete by id) always runs on the
//! primary. Only the unfiltered maintenance scan may be served by a replica.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Trait for providing database pools with read/write routing.
pub trait PoolProvider: Clone + Send + Sync + 'static {
    /// Pool for reads that tolerate replica lag.
    fn read(&self) -> &PgPool;

    /// Pool for writes and for reads that must see the latest writes (the queue
    /// selection feeding a delete).
    fn write(&self) -> &PgPool;
}

impl PoolProvider for PgPool {
    fn read(&self) -> &PgPool {
        self
    }

    fn write(&self) -> &PgPool {
        self
    }
}

/// Primary pool plus an optional read replica.
#[derive(Clone, Debug)]
pub struct DbPools {
    primary: PgPool,
    replica: Option<PgPool>,
}

impl DbPools {
    pub fn new(primary: PgPool) -> Self {
        Self {
            primary,
            replica: None,
        }
    }

    pub fn with_replica(mut self, replica: PgPool) -> Self {
        self.replica = Some(replica);
        self
    }

    /// Pools where the replica is a read-only connection to the primary's database.
    ///
    /// Any write routed through [`PoolProvider::read`] fails with
    /// "cannot execute ... in a read-only transaction", which makes misrouting visible
    /// in tests.
    pub async fn read_only_replica_of(pool: PgPool) -> Result<Self, sqlx::Error> {
        let replica = PgPoolOptions::new()
            .max_connections(pool.options().get_max_connections())
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET default_transaction_read_only = on")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect_with(pool.connect_options().as_ref().clone())
            .await?;

        Ok(Self::new(pool).with_replica(replica))
    }
}

impl PoolProvider for DbPools {
    fn read(&self) -> &PgPool {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    fn write(&self) -> &PgPool {
        &self.primary
    }
}
