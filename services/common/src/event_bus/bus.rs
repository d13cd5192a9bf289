//! Core bus implementation
//!
//! Every exact topic and every wildcard pattern owns one broadcast channel.
//! Publishing is a synchronous `send` on each matching channel, so a slow
//! receiver only ever lags its own channel and never holds up the publisher.

use super::metrics::BusMetrics;
use super::router::TopicPattern;
use super::{BusMessage, BusResult, EventBusError, MessageEnvelope};
use crate::config::TickBusConfig;
use crate::types::CanonicalTick;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, trace, warn};

type Channel<T> = broadcast::Sender<MessageEnvelope<T>>;

/// Bus carrying normalized ticks
pub type TickBus = EventBus<CanonicalTick>;

/// Topic-keyed publish/subscribe bus
pub struct EventBus<T: BusMessage> {
    /// Configuration
    config: TickBusConfig,
    /// Exact-topic channels
    topics: RwLock<FxHashMap<String, Channel<T>>>,
    /// Wildcard channels
    patterns: RwLock<FxHashMap<TopicPattern, Channel<T>>>,
    /// Metrics collector
    metrics: Arc<BusMetrics>,
    /// Publish sequence
    sequence: AtomicU64,
}

impl<T: BusMessage> EventBus<T> {
    /// Create a new bus with configuration
    #[must_use]
    pub fn new(config: TickBusConfig) -> Self {
        Self {
            config,
            topics: RwLock::new(FxHashMap::default()),
            patterns: RwLock::new(FxHashMap::default()),
            metrics: Arc::new(BusMetrics::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Get bus capacity
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Metrics collector
    #[must_use]
    pub fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }

    /// Publish a message on its own topic
    pub fn publish(&self, message: T) -> usize {
        let topic = message.topic();
        self.publish_to(&topic, message)
    }

    /// Publish a message on `topic`
    ///
    /// Returns the number of channels that accepted the message. Never
    /// blocks and never fails; an unheard message is only counted.
    pub fn publish_to(&self, topic: &str, message: T) -> usize {
        let envelope = MessageEnvelope {
            topic: Arc::from(topic),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            published_at: now_nanos(),
            message,
        };

        let mut receivers = 0;
        let mut idle_topic = false;
        let mut idle_patterns = Vec::new();

        if let Some(channel) = self.topics.read().get(topic) {
            match channel.send(envelope.clone()) {
                Ok(_) => receivers += 1,
                Err(_) => idle_topic = true,
            }
        }

        for (pattern, channel) in self.patterns.read().iter() {
            if pattern.matches(topic) {
                match channel.send(envelope.clone()) {
                    Ok(_) => receivers += 1,
                    Err(_) => idle_patterns.push(pattern.clone()),
                }
            }
        }

        if idle_topic {
            self.prune_topic(topic);
        }
        for pattern in &idle_patterns {
            self.prune_pattern(pattern);
        }

        self.metrics.record_publish(topic, receivers);
        if receivers == 0 {
            self.metrics.record_no_subscribers(topic);
            trace!(topic = %topic, "No subscribers for topic");
        } else {
            trace!(topic = %topic, receivers, "Message published");
        }
        receivers
    }

    /// Subscribe to an exact topic or a wildcard pattern
    pub fn subscribe(&self, pattern: &str) -> BusResult<Subscription<T>> {
        let parsed = TopicPattern::parse(pattern)?;
        let receiver = match &parsed {
            TopicPattern::Exact(topic) => {
                let mut topics = self.topics.write();
                topics
                    .entry(topic.clone())
                    .or_insert_with(|| broadcast::channel(self.config.capacity).0)
                    .subscribe()
            }
            _ => {
                let mut patterns = self.patterns.write();
                patterns
                    .entry(parsed.clone())
                    .or_insert_with(|| broadcast::channel(self.config.capacity).0)
                    .subscribe()
            }
        };

        debug!(pattern = %parsed, "Subscribed to bus");
        Ok(Subscription {
            pattern: parsed.to_string(),
            receiver,
            metrics: Arc::clone(&self.metrics),
        })
    }

    /// Live receivers on an exact topic or pattern
    #[must_use]
    pub fn subscriber_count(&self, pattern: &str) -> usize {
        match TopicPattern::parse(pattern) {
            Ok(TopicPattern::Exact(topic)) => self
                .topics
                .read()
                .get(&topic)
                .map_or(0, broadcast::Sender::receiver_count),
            Ok(parsed) => self
                .patterns
                .read()
                .get(&parsed)
                .map_or(0, broadcast::Sender::receiver_count),
            Err(_) => 0,
        }
    }

    /// Exact topics and patterns that currently have receivers
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .topics
            .read()
            .iter()
            .filter(|(_, channel)| channel.receiver_count() > 0)
            .map(|(topic, _)| topic.clone())
            .collect();
        names.extend(
            self.patterns
                .read()
                .iter()
                .filter(|(_, channel)| channel.receiver_count() > 0)
                .map(|(pattern, _)| pattern.to_string()),
        );
        names.sort();
        names
    }

    fn prune_topic(&self, topic: &str) {
        let mut topics = self.topics.write();
        if topics.get(topic).is_some_and(|channel| channel.receiver_count() == 0) {
            topics.remove(topic);
        }
    }

    fn prune_pattern(&self, pattern: &TopicPattern) {
        let mut patterns = self.patterns.write();
        if patterns.get(pattern).is_some_and(|channel| channel.receiver_count() == 0) {
            patterns.remove(pattern);
        }
    }
}

impl<T: BusMessage> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(TickBusConfig::default())
    }
}

/// Receiving end of a bus subscription
pub struct Subscription<T: BusMessage> {
    pattern: String,
    receiver: broadcast::Receiver<MessageEnvelope<T>>,
    metrics: Arc<BusMetrics>,
}

impl<T: BusMessage> Subscription<T> {
    /// Pattern this subscription was created with
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Receive the next message
    ///
    /// A lagging receiver gets [`EventBusError::Lagged`] once and then
    /// continues with the oldest message still buffered.
    pub async fn recv(&mut self) -> BusResult<MessageEnvelope<T>> {
        match self.receiver.recv().await {
            Ok(envelope) => Ok(envelope),
            Err(RecvError::Lagged(skipped)) => Err(self.lagged(skipped)),
            Err(RecvError::Closed) => Err(EventBusError::Closed),
        }
    }

    /// Receive without waiting
    pub fn try_recv(&mut self) -> BusResult<Option<MessageEnvelope<T>>> {
        match self.receiver.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Lagged(skipped)) => Err(self.lagged(skipped)),
            Err(TryRecvError::Closed) => Err(EventBusError::Closed),
        }
    }

    fn lagged(&self, skipped: u64) -> EventBusError {
        warn!(pattern = %self.pattern, skipped, "Bus subscriber lagging");
        self.metrics.record_lagged(&self.pattern, skipped);
        EventBusError::Lagged(skipped)
    }
}

fn now_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstrumentKey, SubscriptionMode};

    fn tick(exchange: &str, symbol: &str, mode: SubscriptionMode, ltp: f64) -> CanonicalTick {
        let mut tick = CanonicalTick::new("test", &InstrumentKey::new(exchange, symbol), "1", mode);
        tick.ltp = ltp;
        tick
    }

    #[tokio::test]
    async fn test_exact_and_pattern_delivery() {
        let bus = TickBus::default();
        let mut exact = bus.subscribe("NSE_INFY_LTP").unwrap();
        let mut nse = bus.subscribe("NSE_*").unwrap();
        let mut depth = bus.subscribe("*_DEPTH").unwrap();

        assert_eq!(bus.publish(tick("NSE", "INFY", SubscriptionMode::Ltp, 1500.0)), 2);

        assert_eq!(exact.recv().await.unwrap().message.ltp, 1500.0);
        assert_eq!(&*nse.recv().await.unwrap().topic, "NSE_INFY_LTP");
        assert!(depth.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_publish_without_subscribers_is_counted() {
        let bus = TickBus::default();
        assert_eq!(bus.publish(tick("BSE", "SBIN", SubscriptionMode::Quote, 600.0)), 0);
        assert_eq!(bus.metrics().get_no_subscriber_count("BSE_SBIN_QUOTE"), 1);
    }

    #[test]
    fn test_slow_subscriber_lags_without_blocking() {
        let bus = TickBus::new(TickBusConfig { capacity: 2 });
        let mut slow = bus.subscribe("*").unwrap();

        for i in 0..5 {
            bus.publish(tick("NSE", "TCS", SubscriptionMode::Ltp, f64::from(i)));
        }

        assert!(matches!(slow.try_recv(), Err(EventBusError::Lagged(3))));
        assert_eq!(slow.try_recv().unwrap().map(|e| e.message.ltp), Some(3.0));
        assert_eq!(bus.metrics().get_lagged_count("*"), 3);
    }

    #[test]
    fn test_dropped_subscriptions_are_pruned() {
        let bus = TickBus::default();
        let subscription = bus.subscribe("NSE_*").unwrap();
        assert_eq!(bus.subscriber_count("NSE_*"), 1);
        drop(subscription);

        bus.publish(tick("NSE", "TCS", SubscriptionMode::Ltp, 1.0));
        assert!(bus.topics().is_empty());
    }
}
