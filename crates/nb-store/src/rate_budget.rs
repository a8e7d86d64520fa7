//! Atomic per-user, per-channel, per-window counters with TTL-based rollover
//! (§4.6). Socket bypasses budget logic entirely; callers should not invoke
//! this store for `Channel::Socket`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use nb_common::types::{BudgetDecision, BudgetLimits, Channel};
use redis::{aio::ConnectionManager, AsyncCommands, Script};

use crate::error::StoreError;

/// Single round-trip compare-and-increment: both hour and day counters must
/// be under cap for the attempt to be admitted; admission increments both
/// and (re)asserts their TTLs in the same script invocation.
const CONSUME_SCRIPT: &str = r#"
local hour_count = tonumber(redis.call('GET', KEYS[1]) or '0')
local day_count = tonumber(redis.call('GET', KEYS[2]) or '0')
local hour_cap = tonumber(ARGV[1])
local day_cap = tonumber(ARGV[2])

if hour_count >= hour_cap or day_count >= day_cap then
  local hour_ttl = redis.call('PTTL', KEYS[1])
  local day_ttl = redis.call('PTTL', KEYS[2])
  return {0, hour_cap - hour_count, day_cap - day_count, hour_ttl, day_ttl}
end

local new_hour = redis.call('INCR', KEYS[1])
if new_hour == 1 then redis.call('PEXPIRE', KEYS[1], ARGV[3]) end
local new_day = redis.call('INCR', KEYS[2])
if new_day == 1 then redis.call('PEXPIRE', KEYS[2], ARGV[4]) end

local hour_ttl = redis.call('PTTL', KEYS[1])
local day_ttl = redis.call('PTTL', KEYS[2])
return {1, hour_cap - new_hour, day_cap - new_day, hour_ttl, day_ttl}
"#;

#[async_trait]
pub trait RateBudgetStore: Send + Sync {
    async fn consume_budget(
        &self,
        user_id: &str,
        channel: Channel,
        limits: BudgetLimits,
    ) -> Result<BudgetDecision, StoreError>;

    /// Resets both counters for (user, channel), or for all channels if
    /// `channel` is `None` (admin `ResetBudget` operation, §6).
    async fn reset(&self, user_id: &str, channel: Option<Channel>) -> Result<(), StoreError>;
}

fn hour_key(channel: Channel, user_id: &str) -> String {
    format!("ratelimit:{channel}:hour:{user_id}")
}

fn day_key(channel: Channel, user_id: &str) -> String {
    format!("ratelimit:{channel}:day:{user_id}")
}

pub struct RedisRateBudgetStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisRateBudgetStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn, script: Script::new(CONSUME_SCRIPT) }
    }
}

#[async_trait]
impl RateBudgetStore for RedisRateBudgetStore {
    async fn consume_budget(
        &self,
        user_id: &str,
        channel: Channel,
        limits: BudgetLimits,
    ) -> Result<BudgetDecision, StoreError> {
        let mut conn = self.conn.clone();
        let (allowed, remaining_hour, remaining_day, hour_ttl_ms, day_ttl_ms): (i64, i64, i64, i64, i64) = self
            .script
            .key(hour_key(channel, user_id))
            .key(day_key(channel, user_id))
            .arg(limits.hourly_cap)
            .arg(limits.daily_cap)
            .arg(3_600_000i64)
            .arg(86_400_000i64)
            .invoke_async(&mut conn)
            .await?;

        let now = Utc::now();
        let binding_ttl_ms = if remaining_hour <= remaining_day { hour_ttl_ms } else { day_ttl_ms };
        let reset_at = if binding_ttl_ms > 0 {
            now + ChronoDuration::milliseconds(binding_ttl_ms)
        } else {
            now
        };

        Ok(BudgetDecision {
            allowed: allowed == 1,
            remaining: remaining_hour.min(remaining_day).max(0) as u32,
            reset_at,
        })
    }

    async fn reset(&self, user_id: &str, channel: Option<Channel>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let channels = match channel {
            Some(c) => vec![c],
            None => vec![Channel::Sms, Channel::Email, Channel::Push],
        };
        for c in channels {
            let _: () = conn.del(hour_key(c, user_id)).await?;
            let _: () = conn.del(day_key(c, user_id)).await?;
        }
        Ok(())
    }
}

/// In-memory fake. Not a faithful atomicity model (no script semantics
/// needed — a single mutex-free `DashMap::entry` critical section suffices
/// for single-process tests).
#[derive(Default)]
pub struct InMemoryRateBudgetStore {
    counters: DashMap<(String, Channel), (u32, u32, DateTime<Utc>, DateTime<Utc>)>,
}

impl InMemoryRateBudgetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateBudgetStore for InMemoryRateBudgetStore {
    async fn consume_budget(
        &self,
        user_id: &str,
        channel: Channel,
        limits: BudgetLimits,
    ) -> Result<BudgetDecision, StoreError> {
        let now = Utc::now();
        let mut entry = self
            .counters
            .entry((user_id.to_string(), channel))
            .or_insert((0, 0, now + ChronoDuration::hours(1), now + ChronoDuration::days(1)));

        if entry.2 <= now {
            entry.0 = 0;
            entry.2 = now + ChronoDuration::hours(1);
        }
        if entry.3 <= now {
            entry.1 = 0;
            entry.3 = now + ChronoDuration::days(1);
        }

        if entry.0 >= limits.hourly_cap || entry.1 >= limits.daily_cap {
            let reset_at = if entry.2 <= entry.3 { entry.2 } else { entry.3 };
            return Ok(BudgetDecision {
                allowed: false,
                remaining: (limits.hourly_cap.saturating_sub(entry.0)).min(limits.daily_cap.saturating_sub(entry.1)),
                reset_at,
            });
        }

        entry.0 += 1;
        entry.1 += 1;
        let reset_at = if entry.2 <= entry.3 { entry.2 } else { entry.3 };
        Ok(BudgetDecision {
            allowed: true,
            remaining: (limits.hourly_cap - entry.0).min(limits.daily_cap - entry.1),
            reset_at,
        })
    }

    async fn reset(&self, user_id: &str, channel: Option<Channel>) -> Result<(), StoreError> {
        match channel {
            Some(c) => {
                self.counters.remove(&(user_id.to_string(), c));
            }
            None => {
                for c in [Channel::Sms, Channel::Email, Channel::Push] {
                    self.counters.remove(&(user_id.to_string(), c));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_cap_then_refuses() {
        let store = InMemoryRateBudgetStore::new();
        let limits = BudgetLimits { hourly_cap: 2, daily_cap: 10 };
        for _ in 0..2 {
            let decision = store.consume_budget("u1", Channel::Sms, limits).await.unwrap();
            assert!(decision.allowed);
        }
        let decision = store.consume_budget("u1", Channel::Sms, limits).await.unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn reset_clears_counters() {
        let store = InMemoryRateBudgetStore::new();
        let limits = BudgetLimits { hourly_cap: 1, daily_cap: 1 };
        store.consume_budget("u1", Channel::Sms, limits).await.unwrap();
        store.reset("u1", Some(Channel::Sms)).await.unwrap();
        let decision = store.consume_budget("u1", Channel::Sms, limits).await.unwrap();
        assert!(decision.allowed);
    }
}
