use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::sale::ProductId;
use super::{processed_key, stock_key, Claim, InventoryStore, MarkerPolicy, StoreError};

// ============================================================================
// Redis Inventory Store
// ============================================================================
//
// Stock values are plain integer strings; processed markers are either
// `applied` or `pending:<claimed_at_unix_ms>`, both with a PX expiry.
// Every multi-step operation runs as a Lua script so Redis executes it
// atomically. Scripts touching two keys assume a single node (or keys that
// hash to the same slot).
//
// ============================================================================

const CLAIM_SCRIPT: &str = r#"
local v = redis.call('GET', KEYS[1])
local now = tonumber(ARGV[1])
if not v then
  redis.call('SET', KEYS[1], 'pending:' .. ARGV[1], 'PX', ARGV[3])
  return 'acquired'
end
if v == 'applied' then
  return 'duplicate'
end
if string.sub(v, 1, 8) == 'pending:' then
  local claimed = tonumber(string.sub(v, 9))
  if claimed and now - claimed >= tonumber(ARGV[2]) then
    redis.call('SET', KEYS[1], 'pending:' .. ARGV[1], 'PX', ARGV[3])
    return 'acquired'
  end
  return 'in_flight'
end
return v
"#;

const CAS_STOCK_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if ARGV[1] == '' then
  if cur then return 0 end
elseif cur ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
if KEYS[2] then
  redis.call('SET', KEYS[2], 'applied', 'PX', ARGV[3])
end
return 1
"#;

const RELEASE_SCRIPT: &str = r#"
local v = redis.call('GET', KEYS[1])
if v and string.sub(v, 1, 8) == 'pending:' then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisInventoryStore {
    conn: ConnectionManager,
    claim_script: Script,
    cas_script: Script,
    release_script: Script,
}

impl RedisInventoryStore {
    /// Connect to Redis, e.g. `redis://127.0.0.1:6379`
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("invalid Redis URL: {e}")))?;

        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;

        tracing::info!("Redis inventory store connected");

        Ok(Self {
            conn,
            claim_script: Script::new(CLAIM_SCRIPT),
            cas_script: Script::new(CAS_STOCK_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }
}

#[async_trait]
impl InventoryStore for RedisInventoryStore {
    async fn load_stock(&self, product_id: &ProductId) -> Result<Option<i64>, StoreError> {
        let mut conn = self.conn.clone();
        let key = stock_key(product_id);

        let raw: Option<String> = conn.get(&key).await.map_err(unavailable)?;
        raw.map(|value| parse_stock(&key, &value)).transpose()
    }

    async fn compare_and_swap_stock(
        &self,
        product_id: &ProductId,
        expected: Option<i64>,
        new: i64,
        applied_event: Option<Uuid>,
        retention: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();

        let mut invocation = self.cas_script.key(stock_key(product_id));
        if let Some(event_id) = applied_event {
            invocation.key(processed_key(event_id));
        }
        invocation
            .arg(expected.map(|v| v.to_string()).unwrap_or_default())
            .arg(new.to_string())
            .arg(as_millis(retention));

        let swapped: i64 = invocation.invoke_async(&mut conn).await.map_err(unavailable)?;
        Ok(swapped == 1)
    }

    async fn claim_event(&self, event_id: Uuid, policy: MarkerPolicy) -> Result<Claim, StoreError> {
        let mut conn = self.conn.clone();
        let key = processed_key(event_id);

        let status: String = self
            .claim_script
            .key(&key)
            .arg(chrono::Utc::now().timestamp_millis())
            .arg(as_millis(policy.pending_lease))
            .arg(as_millis(policy.retention))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        parse_claim(&key, &status)
    }

    async fn complete_event(&self, event_id: Uuid, retention: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();

        redis::cmd("SET")
            .arg(processed_key(event_id))
            .arg("applied")
            .arg("PX")
            .arg(as_millis(retention))
            .query_async::<()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn release_event(&self, event_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();

        let _: i64 = self
            .release_script
            .key(processed_key(event_id))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn as_millis(duration: Duration) -> u64 {
    (duration.as_millis() as u64).max(1)
}

fn parse_stock(key: &str, raw: &str) -> Result<i64, StoreError> {
    let quantity: i64 = raw.parse().map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
        reason: format!("not an integer: {raw:?}"),
    })?;

    if quantity < 0 {
        return Err(StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("negative quantity {quantity}"),
        });
    }
    Ok(quantity)
}

fn parse_claim(key: &str, status: &str) -> Result<Claim, StoreError> {
    match status {
        "acquired" => Ok(Claim::Acquired),
        "duplicate" => Ok(Claim::Duplicate),
        "in_flight" => Ok(Claim::InFlight),
        other => Err(StoreError::Corrupt {
            key: key.to_string(),
            reason: format!("unexpected marker {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stock() {
        assert_eq!(parse_stock("k", "42").unwrap(), 42);
        assert!(matches!(parse_stock("k", "-1"), Err(StoreError::Corrupt { .. })));
        assert!(matches!(parse_stock("k", "ten"), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_parse_claim() {
        assert_eq!(parse_claim("k", "acquired").unwrap(), Claim::Acquired);
        assert_eq!(parse_claim("k", "duplicate").unwrap(), Claim::Duplicate);
        assert_eq!(parse_claim("k", "in_flight").unwrap(), Claim::InFlight);
        assert!(matches!(parse_claim("k", "garbage"), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_millis_never_zero() {
        assert_eq!(as_millis(Duration::ZERO), 1);
        assert_eq!(as_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_key_namespacing() {
        let product = ProductId::parse("SKU-1").unwrap();
        let event_id = Uuid::nil();
        assert_eq!(stock_key(&product), "inventory:stock:SKU-1");
        assert_eq!(
            processed_key(event_id),
            "inventory:processed:00000000-0000-0000-0000-000000000000"
        );
    }
}
