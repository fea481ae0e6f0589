//! Redis-backed charge ledger for deployments running more than one relay
//! instance. Claims are `SET key 1 NX EX ttl`, so expiry is native.

use crate::ledger::ChargeLedger;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use relay_core::{RelayError, RelayResult};
use tracing::info;

const KEY_PREFIX: &str = "relay:charge:";

pub struct RedisChargeLedger {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisChargeLedger {
    /// Connect and verify the server answers PING.
    pub async fn connect(url: &str, ttl_secs: u64) -> anyhow::Result<Self> {
        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(response = %pong, "Redis connection established");

        Ok(Self { conn, ttl_secs })
    }

    fn key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }
}

fn redis_error(e: redis::RedisError) -> RelayError {
    RelayError::integration("redis", e)
}

#[async_trait]
impl ChargeLedger for RedisChargeLedger {
    async fn claim(&self, key: &str) -> RelayResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(key))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;

        let claimed = reply.is_some();
        if !claimed {
            metrics::counter!("ledger.duplicate").increment(1);
        }
        Ok(claimed)
    }

    async fn release(&self, key: &str) -> RelayResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::key(key)).await.map_err(redis_error)
    }
}
