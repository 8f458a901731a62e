use crate::error::DataError;
use fnv::FnvHashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use std::{collections::VecDeque, time::Duration};
use tokio::time::Instant;

/// Thread safe key/value cache whose entries expire a fixed time after insertion.
///
/// An expired entry is evicted when its key is read, and every insert evicts all entries
/// that have expired since, so the cache only ever holds keys written within one TTL.
/// An entry read exactly at its expiry is still returned.
#[derive(Debug)]
pub struct ExpiringCache<V> {
    ttl: Duration,
    entries: Mutex<Entries<V>>,
}

#[derive(Debug)]
struct Entries<V> {
    values: FnvHashMap<String, (Instant, V)>,
    /// Insertion order, oldest first. Stale slots of replaced keys are skipped on eviction.
    order: VecDeque<(Instant, String)>,
}

impl<V> Entries<V> {
    fn evict_expired(&mut self, now: Instant, ttl: Duration) {
        while let Some((inserted, _)) = self.order.front() {
            if now.duration_since(*inserted) <= ttl {
                break;
            }

            let Some((inserted, key)) = self.order.pop_front() else {
                break;
            };
            if self
                .values
                .get(&key)
                .is_some_and(|(current, _)| *current == inserted)
            {
                self.values.remove(&key);
            }
        }
    }
}

impl<V> ExpiringCache<V>
where
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(Entries {
                values: FnvHashMap::default(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Clone of the live value under `key`, evicting it if expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();

        let expired = match entries.values.get(key) {
            Some((inserted, value)) if inserted.elapsed() <= self.ttl => return Some(value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.values.remove(key);
        }
        None
    }

    /// Insert or replace the value under `key`, restarting its expiry.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.entries.lock();

        entries.evict_expired(now, self.ttl);
        entries.order.push_back((now, key.clone()));
        entries.values.insert(key, (now, value));
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache key for a GET request, eg/ `GET:/api/v5/public/funding-rate:instId=BTC-USDT-SWAP`.
///
/// Parameters are sorted so the key is independent of their order.
pub fn request_key(path: &str, params: &[(&str, &str)]) -> Result<String, DataError> {
    let sorted = params.iter().sorted().collect::<Vec<_>>();
    let query = serde_urlencoded::to_string(&sorted)
        .map_err(|error| DataError::Http(format!("failed to encode query for {path}: {error}")))?;

    Ok(format!("GET:{path}:{query}"))
}
