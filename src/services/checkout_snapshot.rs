use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    cache::CacheBackend,
    errors::ServiceError,
    services::pricing::{CartLineItem, PricingResult},
};

const SESSION_KEY_PREFIX: &str = "checkout:session:";
const USER_INDEX_PREFIX: &str = "checkout:user:";

/// Time-bounded, immutable record of a validated cart + pricing state. It
/// bridges the gap between "user saw a price" and "gateway confirmed
/// payment". A new checkout attempt always creates a new snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutData {
    pub session_id: String,
    pub user_id: Uuid,
    pub items: Vec<CartLineItem>,
    pub shipping_details: serde_json::Value,
    pub billing_details: serde_json::Value,
    pub pricing: PricingResult,
    pub coupon_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Short-lived store of checkout snapshots over a TTL cache, plus a per-user
/// index of the most recent session keys for best-effort recovery when a
/// confirmation arrives without its correlation key.
pub struct CheckoutSnapshotStore {
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
    session_index_cap: usize,
    user_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl CheckoutSnapshotStore {
    pub fn new(cache: Arc<dyn CacheBackend>, ttl: Duration, session_index_cap: usize) -> Self {
        Self {
            cache,
            ttl,
            session_index_cap,
            user_locks: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn session_key(session_id: &str) -> String {
        format!("{}{}", SESSION_KEY_PREFIX, session_id)
    }

    fn user_index_key(user_id: Uuid) -> String {
        format!("{}{}:sessions", USER_INDEX_PREFIX, user_id)
    }

    fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persist a snapshot under its session key with the configured TTL and
    /// register the key in the owner's session index.
    #[instrument(skip(self, snapshot), fields(session_id = %snapshot.session_id))]
    pub async fn store(&self, snapshot: &CheckoutData) -> Result<String, ServiceError> {
        let key = snapshot.session_id.clone();
        let payload = serde_json::to_string(snapshot)?;
        self.cache
            .set(&Self::session_key(&key), &payload, Some(self.ttl))
            .await?;

        self.index_session(snapshot.user_id, &key).await?;

        debug!(user_id = %snapshot.user_id, "checkout snapshot stored");
        Ok(key)
    }

    /// Fetch a snapshot. Expired and never-existed sessions are
    /// indistinguishable: both read as `None`, and reads never extend the
    /// TTL.
    pub async fn retrieve(&self, session_id: &str) -> Result<Option<CheckoutData>, ServiceError> {
        let Some(payload) = self.cache.get(&Self::session_key(session_id)).await? else {
            return Ok(None);
        };

        let snapshot: CheckoutData = serde_json::from_str(&payload)?;
        // The wall-clock expiry also guards backends with coarser TTLs.
        if snapshot.expires_at <= Utc::now() {
            self.cache.delete(&Self::session_key(session_id)).await?;
            return Ok(None);
        }

        Ok(Some(snapshot))
    }

    pub async fn delete(&self, session_id: &str) -> Result<(), ServiceError> {
        self.cache.delete(&Self::session_key(session_id)).await?;
        Ok(())
    }

    /// Most recent session keys for a user, newest first, capped. Recovery
    /// path only: entries may point at sessions that already expired.
    pub async fn sessions_for_user(&self, user_id: Uuid) -> Result<Vec<String>, ServiceError> {
        let Some(payload) = self.cache.get(&Self::user_index_key(user_id)).await? else {
            return Ok(Vec::new());
        };
        Ok(serde_json::from_str(&payload)?)
    }

    /// Append a session key to the user's index and truncate to the cap.
    /// Serialized per user so concurrent checkouts never lose entries.
    async fn index_session(&self, user_id: Uuid, session_id: &str) -> Result<(), ServiceError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let mut sessions = self.sessions_for_user(user_id).await?;
        sessions.retain(|s| s != session_id);
        sessions.insert(0, session_id.to_string());
        sessions.truncate(self.session_index_cap);

        let payload = serde_json::to_string(&sessions)?;
        self.cache
            .set(&Self::user_index_key(user_id), &payload, Some(self.ttl))
            .await?;
        Ok(())
    }
}
