//! Redis-backed window store.
//!
//! Each record is a sorted set keyed `<prefix><identifier>`. A [`Batch`] is
//! sent as one `MULTI`/`EXEC` pipeline, so its commands run back to back on
//! the server with no other client's commands in between.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{from_redis_value, Script, Value};
use tracing::{debug, info};

use super::{AdmitOutcome, AdmitRequest, Batch, BatchOp, BatchReply, OpResult, Ttl, WindowStore};
use crate::config::StoreConfig;
use crate::error::{QuotaError, Result};

/// Trim, count, then add ARGV[4..] as (score, member) pairs only if they all
/// fit under the quota. Replies `{admitted, count_before, pttl}`.
const ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local window_start = tonumber(ARGV[1])
local max = tonumber(ARGV[2])
local window_ms = tonumber(ARGV[3])
local cost = (#ARGV - 3) / 2

redis.call('ZREMRANGEBYSCORE', key, '-inf', window_start)
local count = redis.call('ZCARD', key)

if count + cost > max then
  return {0, count, redis.call('PTTL', key)}
end

for i = 4, #ARGV, 2 do
  redis.call('ZADD', key, ARGV[i], ARGV[i + 1])
end
redis.call('PEXPIRE', key, window_ms)
return {1, count, redis.call('PTTL', key)}
"#;

/// A [`WindowStore`] backed by Redis sorted sets.
///
/// The underlying [`ConnectionManager`] multiplexes one connection and is
/// cloned per call, so a single store can be shared by any number of tasks.
#[derive(Clone)]
pub struct RedisWindowStore {
    conn: ConnectionManager,
    admit_script: Script,
}

impl std::fmt::Debug for RedisWindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisWindowStore").finish_non_exhaustive()
    }
}

impl RedisWindowStore {
    /// Connect using the URL and timeouts in `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to Redis window store");

        let client = redis::Client::open(config.url.as_str())?;
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .set_response_timeout(Duration::from_millis(config.response_timeout_ms));
        let conn = ConnectionManager::new_with_config(client, manager_config).await?;

        Ok(Self::from_connection(conn))
    }

    /// Wrap an already established connection manager.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            admit_script: Script::new(ADMIT_SCRIPT),
        }
    }
}

/// Convert one pipeline reply according to the operation that produced it.
fn decode(op: &BatchOp, value: &Value) -> Result<OpResult> {
    let int = || -> Result<i64> { Ok(from_redis_value::<i64>(value)?) };
    let result = match op {
        BatchOp::Trim { .. } => OpResult::Trimmed(int()?.max(0) as u64),
        BatchOp::Cardinality => OpResult::Cardinality(int()?.max(0) as u64),
        BatchOp::TimeToLive => OpResult::TimeToLive(Ttl::from_pttl(int()?)),
        BatchOp::Add { .. } => OpResult::Added(int()?.max(0) as u64),
        BatchOp::SetExpiry { .. } => OpResult::ExpirySet(int()? == 1),
        BatchOp::Delete => OpResult::Deleted(int()? > 0),
    };
    Ok(result)
}

fn millis_arg(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn execute(&self, batch: Batch) -> Result<BatchReply> {
        if batch.is_empty() {
            return Ok(BatchReply::new(Vec::new()));
        }

        let key = batch.key();
        let mut pipe = redis::pipe();
        pipe.atomic();

        for op in batch.ops() {
            match op {
                BatchOp::Trim { upper_bound } => {
                    pipe.zrembyscore(key, "-inf", *upper_bound);
                }
                BatchOp::Cardinality => {
                    pipe.zcard(key);
                }
                BatchOp::TimeToLive => {
                    pipe.pttl(key);
                }
                BatchOp::Add { score, token } => {
                    pipe.zadd(key, token, *score);
                }
                BatchOp::SetExpiry { duration_ms } => {
                    pipe.pexpire(key, millis_arg(*duration_ms));
                }
                BatchOp::Delete => {
                    pipe.del(key);
                }
            }
        }

        let mut conn = self.conn.clone();
        let values: Vec<Value> = pipe.query_async(&mut conn).await?;

        if values.len() != batch.len() {
            return Err(QuotaError::StoreUnavailable(format!(
                "expected {} replies for {}, got {}",
                batch.len(),
                key,
                values.len()
            )));
        }

        let results = batch
            .ops()
            .iter()
            .zip(values.iter())
            .map(|(op, value)| decode(op, value))
            .collect::<Result<Vec<_>>>()?;

        debug!(key = %key, ops = batch.len(), "Executed window batch");
        Ok(BatchReply::new(results))
    }

    fn supports_atomic_admit(&self) -> bool {
        true
    }

    async fn admit_atomic(&self, request: AdmitRequest) -> Result<AdmitOutcome> {
        let mut invocation = self.admit_script.key(&request.key);
        invocation
            .arg(request.window_start)
            .arg(request.max)
            .arg(millis_arg(request.window_ms));
        for (score, token) in &request.entries {
            invocation.arg(*score).arg(token.as_str());
        }

        let mut conn = self.conn.clone();
        let reply: Vec<i64> = invocation.invoke_async(&mut conn).await?;

        match reply.as_slice() {
            [admitted, count, pttl] => Ok(AdmitOutcome {
                admitted: *admitted == 1,
                count: (*count).max(0) as u64,
                ttl: Ttl::from_pttl(*pttl),
            }),
            other => Err(QuotaError::StoreUnavailable(format!(
                "unexpected admission reply for {}: {:?}",
                request.key, other
            ))),
        }
    }
}
