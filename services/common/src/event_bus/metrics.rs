//! Metrics collection for the bus

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-topic counter table
type CounterMap = RwLock<FxHashMap<String, AtomicU64>>;

/// Bus metrics collector
pub struct BusMetrics {
    /// Messages published by topic
    published: CounterMap,
    /// Receiver deliveries by topic, one per receiving channel
    delivered: CounterMap,
    /// Messages published while nobody listened, by topic
    no_subscribers: CounterMap,
    /// Messages skipped by lagging receivers, by pattern
    lagged: CounterMap,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl BusMetrics {
    /// Create new metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            published: RwLock::new(FxHashMap::default()),
            delivered: RwLock::new(FxHashMap::default()),
            no_subscribers: RwLock::new(FxHashMap::default()),
            lagged: RwLock::new(FxHashMap::default()),
            start_time: Instant::now(),
        }
    }

    fn add(map: &CounterMap, key: &str, amount: u64) {
        let counters = map.read();
        if let Some(counter) = counters.get(key) {
            counter.fetch_add(amount, Ordering::Relaxed);
        } else {
            drop(counters);
            map.write()
                .entry(key.to_string())
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(amount, Ordering::Relaxed);
        }
    }

    fn get(map: &CounterMap, key: &str) -> u64 {
        map.read()
            .get(key)
            .map_or(0, |counter| counter.load(Ordering::Relaxed))
    }

    /// Record a publish reaching `receivers` channels
    pub fn record_publish(&self, topic: &str, receivers: usize) {
        Self::add(&self.published, topic, 1);
        if receivers > 0 {
            Self::add(&self.delivered, topic, receivers as u64);
        }
    }

    /// Record a publish with no listener
    pub fn record_no_subscribers(&self, topic: &str) {
        Self::add(&self.no_subscribers, topic, 1);
    }

    /// Record messages skipped by a lagging receiver
    pub fn record_lagged(&self, pattern: &str, skipped: u64) {
        Self::add(&self.lagged, pattern, skipped);
    }

    /// Messages published on a topic
    #[must_use]
    pub fn get_publish_count(&self, topic: &str) -> u64 {
        Self::get(&self.published, topic)
    }

    /// Deliveries made for a topic
    #[must_use]
    pub fn get_delivered_count(&self, topic: &str) -> u64 {
        Self::get(&self.delivered, topic)
    }

    /// Publishes on a topic that nobody received
    #[must_use]
    pub fn get_no_subscriber_count(&self, topic: &str) -> u64 {
        Self::get(&self.no_subscribers, topic)
    }

    /// Messages skipped by receivers of a pattern
    #[must_use]
    pub fn get_lagged_count(&self, pattern: &str) -> u64 {
        Self::get(&self.lagged, pattern)
    }

    /// Get metrics snapshot
    #[must_use]
    pub fn snapshot(&self) -> EventBusMetrics {
        let mut topics: FxHashMap<String, TopicMetrics> = FxHashMap::default();

        for (topic, counter) in self.published.read().iter() {
            topics.entry(topic.clone()).or_default().published = counter.load(Ordering::Relaxed);
        }
        for (topic, counter) in self.delivered.read().iter() {
            topics.entry(topic.clone()).or_default().delivered = counter.load(Ordering::Relaxed);
        }
        for (topic, counter) in self.no_subscribers.read().iter() {
            topics.entry(topic.clone()).or_default().no_subscribers =
                counter.load(Ordering::Relaxed);
        }

        let lagged = self
            .lagged
            .read()
            .iter()
            .map(|(pattern, counter)| (pattern.clone(), counter.load(Ordering::Relaxed)))
            .collect();

        EventBusMetrics {
            topics,
            lagged,
            uptime: self.start_time.elapsed(),
        }
    }
}

impl Default for BusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time bus metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusMetrics {
    /// Counters by concrete topic
    pub topics: FxHashMap<String, TopicMetrics>,
    /// Skipped messages by subscription pattern
    pub lagged: FxHashMap<String, u64>,
    /// Time since the bus was created
    pub uptime: Duration,
}

/// Counters for one topic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMetrics {
    pub published: u64,
    pub delivered: u64,
    pub no_subscribers: u64,
}

impl EventBusMetrics {
    /// Total messages published
    #[must_use]
    pub fn total_published(&self) -> u64 {
        self.topics.values().map(|metrics| metrics.published).sum()
    }

    /// Topics ordered by publish count, busiest first
    #[must_use]
    pub fn busiest_topics(&self) -> Vec<(String, u64)> {
        let mut topics: Vec<(String, u64)> = self
            .topics
            .iter()
            .map(|(topic, metrics)| (topic.clone(), metrics.published))
            .collect();
        topics.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        topics
    }
}
