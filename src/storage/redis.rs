use crate::storage::LeaseStore;
use anyhow::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::str::FromStr;
use std::time::Duration;

// Compare-and-act must run server side; a GET followed by DEL/PEXPIRE from
// the client would reopen the race between two round trips.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const COMPARE_AND_EXTEND: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Redis-backed lease store. Keys hold the owner id as a plain string and
/// rely on Redis' own expiry.
pub struct RedisLeaseStore {
    client: ConnectionManager,
    prefix: String,
    compare_and_delete: Script,
    compare_and_extend: Script,
}

impl RedisLeaseStore {
    /// Connect through a `ConnectionManager`, which reconnects on its own.
    pub async fn new(
        redis_url: &str,
        username: Option<String>,
        password: Option<String>,
        db: Option<i64>,
    ) -> Result<Self> {
        let mut connection_info = redis::ConnectionInfo::from_str(redis_url)?;

        if let Some(pwd) = password {
            connection_info.redis.password = Some(pwd);
        }
        if let Some(user) = username {
            connection_info.redis.username = Some(user);
        }
        if let Some(database) = db {
            connection_info.redis.db = database;
        }

        let client = redis::Client::open(connection_info)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            client: connection,
            prefix: "lock:".to_string(),
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            compare_and_extend: Script::new(COMPARE_AND_EXTEND),
        })
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    fn lease_key(&self, key: &str) -> String {
        lease_key(&self.prefix, key)
    }
}

fn lease_key(prefix: &str, key: &str) -> String {
    format!("{}lease:{}", prefix, key)
}

/// Redis rejects `PX 0`; sub-millisecond TTLs round up.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn set_if_absent(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.client.clone();

        // SET NX PX creates the key and its expiry in one command
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.lease_key(key))
            .arg(owner_id)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, owner_id: &str) -> Result<bool> {
        let mut conn = self.client.clone();
        let deleted: i64 = self
            .compare_and_delete
            .key(self.lease_key(key))
            .arg(owner_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn compare_and_extend(&self, key: &str, owner_id: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.client.clone();
        let extended: i64 = self
            .compare_and_extend
            .key(self.lease_key(key))
            .arg(owner_id)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn current_owner(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.client.clone();
        let owner: Option<String> = conn.get(self.lease_key(key)).await?;
        Ok(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_keys_are_namespaced_by_prefix() {
        assert_eq!(lease_key("lock:", "res-1"), "lock:lease:res-1");
        assert_eq!(lease_key("app:", "a:b"), "app:lease:a:b");
    }

    #[test]
    fn ttl_never_rounds_down_to_zero() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }
}
