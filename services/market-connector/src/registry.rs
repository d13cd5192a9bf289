//! Subscription reference counting
//!
//! Many logical subscriptions, possibly from different callers, share one
//! upstream subscription per `(scrip, mode)`. The registry tracks both and
//! reports exactly when a pair moves between zero and one reference, which
//! is when the upstream must be told.

use rustc_hash::FxHashMap;
use serde::Serialize;
use services_common::{InstrumentKey, Scrip, SubscriptionMode};
use uuid::Uuid;

/// One downstream subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalSubscription {
    /// Unique subscription id
    pub correlation_id: Uuid,
    /// Downstream instrument
    pub key: InstrumentKey,
    /// Upstream instrument
    pub scrip: Scrip,
    /// Subscribed mode
    pub mode: SubscriptionMode,
    /// Depth levels per side for depth mode, zero otherwise
    pub depth_level: u8,
    #[serde(skip)]
    sequence: u64,
}

impl LogicalSubscription {
    /// Create a subscription with a fresh correlation id
    pub fn new(key: InstrumentKey, scrip: Scrip, mode: SubscriptionMode, depth_level: u8) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            key,
            scrip,
            mode,
            depth_level,
            sequence: 0,
        }
    }
}

/// Where a tick for a scrip must be published
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    /// Downstream instrument
    pub key: InstrumentKey,
    /// Upstream instrument
    pub scrip: Scrip,
    /// Mode to publish for
    pub mode: SubscriptionMode,
    /// Deepest depth requested by any subscriber of this route
    pub depth_level: u8,
}

/// Outcome of registering a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registered {
    /// The `(scrip, mode)` pair went from zero to one reference
    pub first_ref: bool,
}

/// Outcome of removing a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    /// Removed subscription
    pub subscription: LogicalSubscription,
    /// The `(scrip, mode)` pair went from one to zero references
    pub last_ref: bool,
    /// No mode of the scrip is referenced any more
    pub scrip_released: bool,
}

/// Logical subscriptions, upstream reference counts and tick routes
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Logical subscriptions by correlation id
    subscriptions: FxHashMap<Uuid, LogicalSubscription>,
    /// Upstream references by `(scrip, mode)`
    ref_counts: FxHashMap<(Scrip, SubscriptionMode), usize>,
    /// Reverse index from broker token to the scrips carrying it
    by_token: FxHashMap<String, Vec<Scrip>>,
    next_sequence: u64,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference on `(scrip, mode)`, true when it is the first
    pub fn add_ref(&mut self, scrip: &Scrip, mode: SubscriptionMode) -> bool {
        let count = self.ref_counts.entry((scrip.clone(), mode)).or_insert(0);
        *count += 1;
        let first = *count == 1;

        if first {
            let scrips = self.by_token.entry(scrip.token.clone()).or_default();
            if !scrips.contains(scrip) {
                scrips.push(scrip.clone());
            }
        }
        first
    }

    /// Drop a reference on `(scrip, mode)`, true when it was the last
    ///
    /// Releasing an unreferenced pair is a no-op returning false.
    pub fn remove_ref(&mut self, scrip: &Scrip, mode: SubscriptionMode) -> bool {
        let pair = (scrip.clone(), mode);
        let Some(count) = self.ref_counts.get_mut(&pair) else {
            return false;
        };
        *count -= 1;
        if *count > 0 {
            return false;
        }

        self.ref_counts.remove(&pair);
        if self.effective_mode(scrip).is_none() {
            if let Some(scrips) = self.by_token.get_mut(&scrip.token) {
                scrips.retain(|s| s != scrip);
                if scrips.is_empty() {
                    self.by_token.remove(&scrip.token);
                }
            }
        }
        true
    }

    /// Register a logical subscription and take its upstream reference
    pub fn register(&mut self, mut subscription: LogicalSubscription) -> Registered {
        subscription.sequence = self.next_sequence;
        self.next_sequence += 1;

        let first_ref = self.add_ref(&subscription.scrip, subscription.mode);
        self.subscriptions
            .insert(subscription.correlation_id, subscription);
        Registered { first_ref }
    }

    /// Remove the oldest subscription for `(key, mode)`
    pub fn unregister(
        &mut self,
        key: &InstrumentKey,
        mode: SubscriptionMode,
    ) -> Option<Unregistered> {
        let correlation_id = self
            .subscriptions
            .values()
            .filter(|sub| sub.key == *key && sub.mode == mode)
            .min_by_key(|sub| sub.sequence)
            .map(|sub| sub.correlation_id)?;
        self.unregister_id(&correlation_id)
    }

    /// Remove one subscription by correlation id
    pub fn unregister_id(&mut self, correlation_id: &Uuid) -> Option<Unregistered> {
        let subscription = self.subscriptions.remove(correlation_id)?;
        let last_ref = self.remove_ref(&subscription.scrip, subscription.mode);
        let scrip_released = self.effective_mode(&subscription.scrip).is_none();
        Some(Unregistered {
            subscription,
            last_ref,
            scrip_released,
        })
    }

    /// References held on `(scrip, mode)`
    #[must_use]
    pub fn ref_count(&self, scrip: &Scrip, mode: SubscriptionMode) -> usize {
        self.ref_counts
            .get(&(scrip.clone(), mode))
            .copied()
            .unwrap_or(0)
    }

    /// Highest referenced mode of a scrip
    #[must_use]
    pub fn effective_mode(&self, scrip: &Scrip) -> Option<SubscriptionMode> {
        SubscriptionMode::ALL
            .into_iter()
            .rev()
            .find(|mode| self.ref_count(scrip, *mode) > 0)
    }

    /// Every `(scrip, mode)` with at least one reference, in stable order
    #[must_use]
    pub fn active_pairs(&self) -> Vec<(Scrip, SubscriptionMode)> {
        let mut pairs: Vec<_> = self.ref_counts.keys().cloned().collect();
        pairs.sort();
        pairs
    }

    /// Every scrip with its effective mode, in stable order
    #[must_use]
    pub fn active_scrips(&self) -> Vec<(Scrip, SubscriptionMode)> {
        let mut scrips: FxHashMap<Scrip, SubscriptionMode> = FxHashMap::default();
        for (scrip, mode) in self.ref_counts.keys() {
            let entry = scrips.entry(scrip.clone()).or_insert(*mode);
            if *mode > *entry {
                *entry = *mode;
            }
        }
        let mut scrips: Vec<_> = scrips.into_iter().collect();
        scrips.sort();
        scrips
    }

    /// Routes for a tick carrying `token`
    ///
    /// `exchange_code` narrows the match when the broker reports it; tokens
    /// of brokers that do not are globally unique.
    #[must_use]
    pub fn routes_for(&self, token: &str, exchange_code: Option<&str>) -> Vec<Route> {
        let Some(scrips) = self.by_token.get(token) else {
            return Vec::new();
        };

        let mut routes: FxHashMap<(InstrumentKey, Scrip, SubscriptionMode), u8> =
            FxHashMap::default();
        for sub in self.subscriptions.values() {
            let matches_scrip = scrips.contains(&sub.scrip)
                && exchange_code.is_none_or(|code| sub.scrip.exchange_code.eq_ignore_ascii_case(code));
            if matches_scrip {
                let depth = routes
                    .entry((sub.key.clone(), sub.scrip.clone(), sub.mode))
                    .or_insert(0);
                *depth = (*depth).max(sub.depth_level);
            }
        }

        let mut routes: Vec<Route> = routes
            .into_iter()
            .map(|((key, scrip, mode), depth_level)| Route {
                key,
                scrip,
                mode,
                depth_level,
            })
            .collect();
        routes.sort_by(|a, b| (&a.key, a.mode).cmp(&(&b.key, b.mode)));
        routes
    }

    /// Scrips indexed under `token`
    #[must_use]
    pub fn scrips_for_token(&self, token: &str) -> &[Scrip] {
        self.by_token.get(token).map_or(&[], Vec::as_slice)
    }

    /// Snapshot of all logical subscriptions, oldest first
    #[must_use]
    pub fn subscriptions(&self) -> Vec<LogicalSubscription> {
        let mut subs: Vec<_> = self.subscriptions.values().cloned().collect();
        subs.sort_by_key(|sub| sub.sequence);
        subs
    }

    /// Number of logical subscriptions
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether no subscription is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Drop every subscription and reference
    pub fn clear(&mut self) {
        self.subscriptions.clear();
        self.ref_counts.clear();
        self.by_token.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::*;

    fn reliance() -> (InstrumentKey, Scrip) {
        (InstrumentKey::new("NSE", "RELIANCE"), Scrip::new("nse_cm", "2885"))
    }

    #[fixture]
    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new()
    }

    #[rstest]
    fn test_first_and_last_reference(mut registry: SubscriptionRegistry) {
        let (key, scrip) = reliance();
        let first = registry.register(LogicalSubscription::new(key.clone(), scrip.clone(), SubscriptionMode::Depth, 5));
        let second = registry.register(LogicalSubscription::new(key.clone(), scrip.clone(), SubscriptionMode::Depth, 5));
        assert!(first.first_ref);
        assert!(!second.first_ref);
        assert_eq!(registry.ref_count(&scrip, SubscriptionMode::Depth), 2);

        let removed = registry.unregister(&key, SubscriptionMode::Depth).unwrap();
        assert!(!removed.last_ref);
        assert_eq!(registry.ref_count(&scrip, SubscriptionMode::Depth), 1);

        let removed = registry.unregister(&key, SubscriptionMode::Depth).unwrap();
        assert!(removed.last_ref);
        assert!(removed.scrip_released);
        assert!(registry.unregister(&key, SubscriptionMode::Depth).is_none());
        assert!(registry.routes_for("2885", None).is_empty());
    }

    #[rstest]
    fn test_unregister_removes_oldest_first(mut registry: SubscriptionRegistry) {
        let (key, scrip) = reliance();
        let older = LogicalSubscription::new(key.clone(), scrip.clone(), SubscriptionMode::Ltp, 0);
        let older_id = older.correlation_id;
        registry.register(older);
        registry.register(LogicalSubscription::new(key.clone(), scrip, SubscriptionMode::Ltp, 0));

        let removed = registry.unregister(&key, SubscriptionMode::Ltp).unwrap();
        assert_eq!(removed.subscription.correlation_id, older_id);
    }

    #[rstest]
    fn test_modes_are_counted_separately(mut registry: SubscriptionRegistry) {
        let (key, scrip) = reliance();
        registry.register(LogicalSubscription::new(key.clone(), scrip.clone(), SubscriptionMode::Ltp, 0));
        let depth = registry.register(LogicalSubscription::new(key.clone(), scrip.clone(), SubscriptionMode::Depth, 5));
        assert!(depth.first_ref);
        assert_eq!(registry.effective_mode(&scrip), Some(SubscriptionMode::Depth));

        let removed = registry.unregister(&key, SubscriptionMode::Depth).unwrap();
        assert!(removed.last_ref);
        assert!(!removed.scrip_released);
        assert_eq!(registry.effective_mode(&scrip), Some(SubscriptionMode::Ltp));
    }

    #[rstest]
    fn test_routes_follow_reverse_index(mut registry: SubscriptionRegistry) {
        let (key, scrip) = reliance();
        registry.register(LogicalSubscription::new(key.clone(), scrip.clone(), SubscriptionMode::Quote, 0));
        registry.register(LogicalSubscription::new(key.clone(), scrip.clone(), SubscriptionMode::Depth, 5));
        registry.register(LogicalSubscription::new(
            InstrumentKey::new("BSE", "RELIANCE"),
            Scrip::new("bse_cm", "2885"),
            SubscriptionMode::Ltp,
            0,
        ));

        assert_eq!(registry.routes_for("2885", None).len(), 3);

        let nse = registry.routes_for("2885", Some("nse_cm"));
        assert_eq!(nse.len(), 2);
        assert_eq!(nse[1].mode, SubscriptionMode::Depth);
        assert_eq!(nse[1].depth_level, 5);
        assert!(registry.routes_for("9999", None).is_empty());
    }

    #[rstest]
    fn test_active_pairs_and_scrips(mut registry: SubscriptionRegistry) {
        let (key, scrip) = reliance();
        registry.register(LogicalSubscription::new(key.clone(), scrip.clone(), SubscriptionMode::Ltp, 0));
        registry.register(LogicalSubscription::new(key, scrip.clone(), SubscriptionMode::Quote, 0));

        assert_eq!(registry.active_pairs().len(), 2);
        assert_eq!(registry.active_scrips(), vec![(scrip, SubscriptionMode::Quote)]);

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.active_pairs().is_empty());
    }

    proptest! {
        /// Upstream calls happen exactly on 0->1 and 1->0 transitions
        #[test]
        fn prop_transitions_match_reference_count(ops in prop::collection::vec(any::<bool>(), 1..200)) {
            let (key, scrip) = reliance();
            let mut registry = SubscriptionRegistry::new();
            let mut expected = 0usize;
            let (mut subscribes, mut unsubscribes) = (0usize, 0usize);

            for add in ops {
                if add {
                    let registered = registry.register(LogicalSubscription::new(
                        key.clone(), scrip.clone(), SubscriptionMode::Depth, 5,
                    ));
                    prop_assert_eq!(registered.first_ref, expected == 0);
                    subscribes += usize::from(registered.first_ref);
                    expected += 1;
                } else if let Some(removed) = registry.unregister(&key, SubscriptionMode::Depth) {
                    prop_assert_eq!(removed.last_ref, expected == 1);
                    unsubscribes += usize::from(removed.last_ref);
                    expected -= 1;
                } else {
                    prop_assert_eq!(expected, 0);
                }
                prop_assert_eq!(registry.ref_count(&scrip, SubscriptionMode::Depth), expected);
            }

            // subscribe frames lead unsubscribe frames by one while active
            prop_assert_eq!(subscribes - unsubscribes, usize::from(expected > 0));
        }
    }
}
