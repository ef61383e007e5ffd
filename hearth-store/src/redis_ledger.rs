use async_trait::async_trait;
use hearth_core::ledger::{offer_key, tried_key};
use hearth_core::{BoxError, OfferLedger};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Deletes the offer key only if it still names the given order.
const CONSUME_OFFER_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

/// Redis-backed offer ledger shared by every API and worker process.
#[derive(Clone)]
pub struct RedisOfferLedger {
    client: redis::Client,
    consume: redis::Script,
}

impl RedisOfferLedger {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            consume: redis::Script::new(CONSUME_OFFER_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    /// Round-trip used by the startup health check.
    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// Redis rejects a zero expiry.
fn whole_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl OfferLedger for RedisOfferLedger {
    async fn claim_offer(
        &self,
        provider_id: Uuid,
        order_id: Uuid,
        ttl: Duration,
    ) -> Result<bool, BoxError> {
        let mut conn = self.connection().await?;
        // SET NX: only if the provider holds no live offer
        let result: Option<String> = redis::cmd("SET")
            .arg(offer_key(provider_id))
            .arg(order_id.to_string())
            .arg("NX")
            .arg("EX")
            .arg(whole_seconds(ttl))
            .query_async(&mut conn)
            .await?;
        debug!(provider_id = %provider_id, order_id = %order_id, claimed = result.is_some(), "Offer claim");
        Ok(result.is_some())
    }

    async fn current_offer(&self, provider_id: Uuid) -> Result<Option<Uuid>, BoxError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GET")
            .arg(offer_key(provider_id))
            .query_async(&mut conn)
            .await?;
        match value {
            Some(raw) => Ok(Some(Uuid::parse_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn consume_offer(&self, provider_id: Uuid, order_id: Uuid) -> Result<bool, BoxError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self
            .consume
            .key(offer_key(provider_id))
            .arg(order_id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn mark_tried(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        ttl: Duration,
    ) -> Result<(), BoxError> {
        let mut conn = self.connection().await?;
        let key = tried_key(order_id);
        redis::pipe()
            .atomic()
            .sadd(&key, provider_id.to_string())
            .ignore()
            .expire(&key, whole_seconds(ttl) as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn tried_providers(&self, order_id: Uuid) -> Result<HashSet<Uuid>, BoxError> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(tried_key(order_id))
            .query_async(&mut conn)
            .await?;
        let mut tried = HashSet::with_capacity(members.len());
        for member in members {
            tried.insert(Uuid::parse_str(&member)?);
        }
        Ok(tried)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_second_ttl_rounds_up_to_one() {
        assert_eq!(whole_seconds(Duration::from_millis(300)), 1);
        assert_eq!(whole_seconds(Duration::from_secs(65)), 65);
    }

    #[test]
    fn test_bad_url_is_rejected() {
        assert!(RedisOfferLedger::new("not a url").is_err());
    }
}
