use std::ops::Add;
use std::time::{Duration, SystemTime};

use kubedns_proto::packet::record::Record;
use kubedns_proto::packet::QueryType;
use moka::future::Cache;

#[derive(Debug, serde::Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_size")]
    size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self { size: 1000 }
    }
}

impl Config {
    pub fn default_size() -> u64 {
        1000
    }

    pub fn build(self) -> MessageCache {
        MessageCache::new(self.size)
    }
}

/// Per-key TTL cache of parsed messages, used in the standard
/// (non-killer) profile. The minimum TTL across a message's answers
/// is persisted; the remaining TTL is recomputed on every read.
pub struct MessageCache {
    inner: Cache<(String, QueryType), (SystemTime, Vec<Record>)>,
}

impl MessageCache {
    pub fn new(size: u64) -> Self {
        Self {
            inner: Cache::new(size),
        }
    }

    #[tracing::instrument(skip(self, records))]
    pub async fn persist(&self, qname: &str, qtype: QueryType, records: Vec<Record>) {
        if let Some(min_ttl) = records.iter().map(|item| item.ttl()).min() {
            tracing::debug!("persisting with a ttl of {min_ttl} seconds");
            let deadline = SystemTime::now().add(Duration::new(min_ttl as u64, 0));
            self.inner
                .insert((qname.to_string(), qtype), (deadline, records))
                .await;
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn request(&self, qname: &str, qtype: QueryType) -> Option<Vec<Record>> {
        let key = (qname.to_string(), qtype);
        let (until, records) = self.inner.get(&key)?;
        let now = SystemTime::now();
        match until.duration_since(now) {
            Ok(diff) => {
                tracing::debug!("found in cache with a ttl of {} seconds", diff.as_secs());
                Some(
                    records
                        .iter()
                        .map(|record| record.delayed_ttl(diff.as_secs() as u32))
                        .collect(),
                )
            }
            Err(_) => {
                tracing::debug!("found in cache but expired");
                self.inner.invalidate(&key).await;
                None
            }
        }
    }

    pub async fn clear(&self) {
        self.inner.invalidate_all();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            occupancy: self.inner.entry_count() as usize,
            capacity: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub occupancy: usize,
    pub capacity: Option<usize>,
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::ops::{Add, Sub};
    use std::time::{Duration, SystemTime};

    use super::MessageCache;
    use kubedns_proto::packet::{record::Record, QueryType};

    #[tokio::test]
    async fn should_persist_in_cache() {
        let cache = MessageCache::new(10);
        cache
            .persist(
                "perdu.com",
                QueryType::A,
                vec![Record::A {
                    domain: "perdu.com".into(),
                    addr: Ipv4Addr::new(1, 2, 3, 4),
                    ttl: 60,
                }],
            )
            .await;
        assert!(cache.inner.get(&("perdu.com".to_string(), QueryType::A)).is_some());
    }

    #[tokio::test]
    async fn should_not_return_if_outdated() {
        let cache = MessageCache::new(10);
        cache
            .inner
            .insert(
                ("perdu.com".to_string(), QueryType::A),
                (
                    SystemTime::now().sub(Duration::new(10, 0)),
                    vec![Record::A {
                        domain: "perdu.com".into(),
                        addr: Ipv4Addr::new(1, 2, 3, 4),
                        ttl: 5,
                    }],
                ),
            )
            .await;
        let found = cache.request("perdu.com", QueryType::A).await;
        assert!(found.is_none());
        assert!(cache
            .inner
            .get(&("perdu.com".to_string(), QueryType::A))
            .is_none());
    }

    #[tokio::test]
    async fn should_return_with_decayed_ttl() {
        let cache = MessageCache::new(10);
        cache
            .inner
            .insert(
                ("perdu.com".to_string(), QueryType::A),
                (
                    SystemTime::now().add(Duration::new(60, 0)),
                    vec![Record::A {
                        domain: "perdu.com".into(),
                        addr: Ipv4Addr::new(1, 2, 3, 4),
                        ttl: 180,
                    }],
                ),
            )
            .await;
        let found = cache.request("perdu.com", QueryType::A).await.unwrap();
        for item in found {
            assert_eq!(item.ttl(), 59);
        }
    }
}
