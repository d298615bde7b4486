//! Redis implementation of the payment lock: `SET key token NX EX ttl` to
//! acquire, a compare-and-delete script to release. TTL expiry guarantees a
//! crashed holder cannot keep a payment locked.

use async_trait::async_trait;
use redis::Script;
use std::time::Duration;
use uuid::Uuid;

use crate::ports::{LockToken, PaymentLock};

const LOCK_PREFIX: &str = "payment:lock:";

// Delete only if we still own the lock.
const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisPaymentLock {
    client: redis::Client,
}

impl RedisPaymentLock {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PaymentLock for RedisPaymentLock {
    async fn try_acquire(
        &self,
        payment_id: Uuid,
        ttl: Duration,
    ) -> anyhow::Result<Option<LockToken>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}", LOCK_PREFIX, payment_id);
        let token = Uuid::new_v4().to_string();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        Ok(acquired.map(|_| LockToken(token)))
    }

    async fn release(&self, payment_id: Uuid, token: &LockToken) -> anyhow::Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}", LOCK_PREFIX, payment_id);

        let _: i64 = Script::new(RELEASE_SCRIPT)
            .key(&key)
            .arg(&token.0)
            .invoke_async(&mut conn)
            .await?;

        Ok(())
    }
}
