//! Cache-aside helpers over a Redis hash.

use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::{Command, Connector, ResilientClient, Result, TcpConnector};

/// Default lifetime of a miss marker.
pub const DEFAULT_MISSED_TTL: Duration = Duration::from_secs(600);

const MISSED_KEY_LABEL: &str = "MissedKey";
const MISSED_MEMBER_LABEL: &str = "MissedMember";

fn marker_key(prefix: &str, label: &str, key: &str) -> String {
    format!("{}{}:{}", prefix, label, key)
}

/// Short-lived "not found" markers for plain cache keys.
///
/// A marker for `key` lives at `{prefix}MissedKey:{key}` and expires after
/// the marker TTL, so a missing record is looked up at most once per TTL.
///
/// ```rust,ignore
/// let missed = MissedMarker::new(client, "user:");
/// if !missed.has("42").await? && load_user(42).await.is_none() {
///     missed.set("42").await?;
/// }
/// ```
pub struct MissedMarker<C: Connector = TcpConnector> {
    client: Arc<ResilientClient<C>>,
    prefix: String,
    label: &'static str,
    ttl: Duration,
}

impl<C: Connector> Clone for MissedMarker<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            prefix: self.prefix.clone(),
            label: self.label,
            ttl: self.ttl,
        }
    }
}

impl<C: Connector> MissedMarker<C> {
    /// Markers under `prefix`, kept for [`DEFAULT_MISSED_TTL`].
    pub fn new(client: Arc<ResilientClient<C>>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            label: MISSED_KEY_LABEL,
            ttl: DEFAULT_MISSED_TTL,
        }
    }

    fn for_hash(client: Arc<ResilientClient<C>>, key: &str, ttl: Duration) -> Self {
        Self {
            client,
            prefix: format!("{}:", key),
            label: MISSED_MEMBER_LABEL,
            ttl,
        }
    }

    /// Change the marker lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Marker lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Redis key of the marker for `key`.
    pub fn key(&self, key: &str) -> String {
        marker_key(&self.prefix, self.label, key)
    }

    /// Record a miss for `key`.
    pub async fn set(&self, key: &str) -> Result<()> {
        self.client.setex(&self.key(key), self.ttl, "1").await
    }

    /// Whether a live marker exists for `key`.
    pub async fn has(&self, key: &str) -> Result<bool> {
        self.client.exists(&self.key(key)).await
    }

    /// Remove the marker for `key`. Returns whether one existed.
    pub async fn clear(&self, key: &str) -> Result<bool> {
        Ok(self.client.del(&self.key(key)).await? > 0)
    }
}

/// A Redis hash used as a read-through cache.
///
/// Lookups that the source cannot satisfy leave a short-lived marker key
/// (`{key}:MissedMember:{member}`) so repeated misses do not hit the
/// source again until the marker expires. Writing a member clears its
/// marker.
pub struct CachedHash<C: Connector = TcpConnector> {
    client: Arc<ResilientClient<C>>,
    key: String,
    missed: Option<MissedMarker<C>>,
}

impl<C: Connector> Clone for CachedHash<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            key: self.key.clone(),
            missed: self.missed.clone(),
        }
    }
}

impl<C: Connector> CachedHash<C> {
    /// Cache backed by the hash at `key`, with miss markers enabled.
    pub fn new(client: Arc<ResilientClient<C>>, key: impl Into<String>) -> Self {
        let key = key.into();
        let missed = MissedMarker::for_hash(client.clone(), &key, DEFAULT_MISSED_TTL);
        Self {
            client,
            key,
            missed: Some(missed),
        }
    }

    /// Change the miss marker lifetime.
    pub fn with_missed_ttl(mut self, ttl: Duration) -> Self {
        self.missed = Some(MissedMarker::for_hash(self.client.clone(), &self.key, ttl));
        self
    }

    /// Disable miss markers.
    pub fn without_missed_cache(mut self) -> Self {
        self.missed = None;
        self
    }

    /// Hash key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Marker key for a member.
    pub fn missed_key(&self, member: &str) -> String {
        marker_key(&format!("{}:", self.key), MISSED_MEMBER_LABEL, member)
    }

    /// Whether a miss marker is present for `member`.
    pub async fn has_missed(&self, member: &str) -> Result<bool> {
        match &self.missed {
            Some(missed) => missed.has(member).await,
            None => Ok(false),
        }
    }

    async fn mark_missed(&self, member: &str) -> Result<()> {
        match &self.missed {
            Some(missed) => missed.set(member).await,
            None => Ok(()),
        }
    }

    async fn clear_missed(&self, member: &str) -> Result<()> {
        if let Some(missed) = &self.missed {
            missed.clear(member).await?;
        }
        Ok(())
    }

    /// Raw `HGET`. Empty strings read as absent.
    pub async fn get(&self, member: &str) -> Result<Option<String>> {
        Ok(self
            .client
            .hget(&self.key, member)
            .await?
            .filter(|v| !v.is_empty()))
    }

    /// Store a member and clear its miss marker.
    pub async fn set(&self, member: &str, value: &str) -> Result<()> {
        self.clear_missed(member).await?;
        self.client.hset(&self.key, member, value).await?;
        Ok(())
    }

    /// Remove a member.
    pub async fn delete(&self, member: &str) -> Result<bool> {
        Ok(self.client.hdel(&self.key, member).await? > 0)
    }

    /// `HEXISTS`.
    pub async fn contains(&self, member: &str) -> Result<bool> {
        Ok(self
            .client
            .execute(Command::new("HEXISTS").key(&self.key).arg(member))
            .await?
            .as_int()?
            > 0)
    }

    /// Read a member and decode it as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, member: &str) -> Result<Option<T>> {
        match self.client.hget(&self.key, member).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encode a value as JSON and store it.
    pub async fn set_json<T: Serialize>(&self, member: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(member, &raw).await
    }

    /// Read a member, filling it from `fetch` when absent.
    ///
    /// When the member exists and `refresh` returns `true` it is fetched
    /// again and overwritten. A fetch that yields nothing sets the miss
    /// marker; while the marker lives, absent members return `None`
    /// without calling `fetch`.
    pub async fn get_or_set<F, Fut, R>(
        &self,
        member: &str,
        fetch: F,
        refresh: Option<R>,
    ) -> Result<Option<String>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Option<String>>,
        R: FnOnce(&str) -> bool,
    {
        let cached = self.get(member).await?;

        let should_fetch = match (&cached, refresh) {
            (Some(_), Some(refresh)) => refresh(member),
            (Some(_), None) => false,
            (None, _) => !self.has_missed(member).await?,
        };

        if !should_fetch {
            return Ok(cached);
        }

        trace!(key = %self.key, member = %member, "Fetching cache member");
        self.store_fetched(member, fetch(member.to_string()).await)
            .await
    }

    async fn store_fetched(&self, member: &str, fetched: Option<String>) -> Result<Option<String>> {
        match fetched.filter(|v| !v.is_empty()) {
            Some(value) => {
                self.set(member, &value).await?;
                Ok(Some(value))
            }
            None => {
                self.mark_missed(member).await?;
                Ok(None)
            }
        }
    }

    /// Resolve many members at once.
    ///
    /// Returns the values found (cached or fetched) and the members that
    /// could not be resolved. Members with a live miss marker are skipped
    /// and appear in neither.
    pub async fn batch<F, Fut>(
        &self,
        members: &[&str],
        mut fetch: Option<F>,
    ) -> Result<(HashMap<String, String>, Vec<String>)>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Option<String>>,
    {
        let mut found = HashMap::new();
        let mut missed = Vec::new();

        if members.is_empty() {
            return Ok((found, missed));
        }

        let values = self.client.hmget(&self.key, members).await?;

        for (member, value) in members.iter().zip(values) {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                found.insert(member.to_string(), value);
                continue;
            }
            if self.has_missed(member).await? {
                continue;
            }
            let fetched = match fetch.as_mut() {
                Some(fetch) => fetch(member.to_string()).await,
                None => None,
            };
            match self.store_fetched(member, fetched).await? {
                Some(value) => {
                    found.insert(member.to_string(), value);
                }
                None => missed.push(member.to_string()),
            }
        }

        Ok((found, missed))
    }
}
