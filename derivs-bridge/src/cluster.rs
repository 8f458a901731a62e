//! Sliding window of liquidation events and nearest-cluster queries.
//!
//! Events are appended in receive order by a single feed task and evicted lazily from the
//! front whenever the window is written or read. Price buckets are never stored, they are
//! rebuilt from the retained events on every query.

use crate::{
    config::WindowConfig,
    error::DataError,
    event::{LiquidationEvent, Side},
};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Fractional distance from a mark price to the nearest liquidation cluster on each side.
///
/// Values are raw fractions of the mark price (0.0476 means 4.76%), `None` when no
/// qualifying cluster exists on that side.
#[derive(Copy, Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct NearestLiquidations {
    pub up_pct: Option<f64>,
    pub down_pct: Option<f64>,
}

/// Aggregated notional at one bucket price.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct ClusterLevel {
    pub price: f64,
    pub notional_usd: f64,
}

/// Point-in-time view of the cluster buckets, levels ascending by price.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct ClusterSnapshot {
    /// Buy liquidation clusters.
    pub up: Vec<ClusterLevel>,
    /// Sell liquidation clusters.
    pub down: Vec<ClusterLevel>,
    /// Number of events retained in the window, including those below the cluster minimum.
    pub events: usize,
}

/// Thread safe sliding window of [`LiquidationEvent`]s for one instrument.
#[derive(Debug)]
pub struct ClusterWindow {
    config: WindowConfig,
    events: Mutex<VecDeque<LiquidationEvent>>,
}

impl ClusterWindow {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Number of retained events, without trimming.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Append a [`LiquidationEvent`] and trim the window relative to its receive time.
    ///
    /// A receive time earlier than the newest retained event (wall clock stepped back) is
    /// raised to that event's time so the sequence stays ordered.
    pub fn add(&self, mut event: LiquidationEvent) {
        let mut events = self.events.lock();

        if let Some(newest) = events.back() {
            if event.received_at < newest.received_at {
                event.received_at = newest.received_at;
            }
        }

        trim(&mut events, self.cutoff(event.received_at));

        let max_events = self.config.max_events.max(1);
        while events.len() >= max_events {
            events.pop_front();
        }

        events.push_back(event);
    }

    /// Evict every event older than `now - window`.
    pub fn trim(&self) {
        self.trim_at(Utc::now())
    }

    pub fn trim_at(&self, now: DateTime<Utc>) {
        trim(&mut self.events.lock(), self.cutoff(now));
    }

    /// Nearest liquidation clusters above and below `mark_price`.
    pub fn nearest(&self, mark_price: f64) -> Result<NearestLiquidations, DataError> {
        self.nearest_at(mark_price, Utc::now())
    }

    pub fn nearest_at(
        &self,
        mark_price: f64,
        now: DateTime<Utc>,
    ) -> Result<NearestLiquidations, DataError> {
        if !mark_price.is_finite() || mark_price <= 0.0 {
            return Err(DataError::InvalidMarkPrice(mark_price));
        }

        Ok(self.buckets_at(now).nearest(mark_price))
    }

    /// Current cluster buckets on both sides.
    pub fn clusters(&self) -> ClusterSnapshot {
        self.clusters_at(Utc::now())
    }

    pub fn clusters_at(&self, now: DateTime<Utc>) -> ClusterSnapshot {
        let (buckets, events) = {
            let mut events = self.events.lock();
            trim(&mut events, self.cutoff(now));
            (
                ClusterBuckets::build(events.iter(), &self.config),
                events.len(),
            )
        };

        ClusterSnapshot {
            up: buckets.levels(&buckets.up),
            down: buckets.levels(&buckets.down),
            events,
        }
    }

    /// Trim and bucket under a single lock acquisition, so the result reflects one
    /// consistent state of the window.
    fn buckets_at(&self, now: DateTime<Utc>) -> ClusterBuckets {
        let mut events = self.events.lock();
        trim(&mut events, self.cutoff(now));
        ClusterBuckets::build(events.iter(), &self.config)
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.config.window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Events are in receive order, so eviction is a prefix removal.
fn trim(events: &mut VecDeque<LiquidationEvent>, cutoff: DateTime<Utc>) {
    while let Some(front) = events.front() {
        if front.received_at < cutoff {
            events.pop_front();
        } else {
            break;
        }
    }
}

/// Notional summed per bucket index, split by side. Bucket price = index * bin_size.
#[derive(Debug)]
struct ClusterBuckets {
    bin_size: f64,
    up: BTreeMap<i64, f64>,
    down: BTreeMap<i64, f64>,
}

impl ClusterBuckets {
    fn build<'a>(events: impl Iterator<Item = &'a LiquidationEvent>, config: &WindowConfig) -> Self {
        let mut buckets = Self {
            bin_size: config.bin_size,
            up: BTreeMap::new(),
            down: BTreeMap::new(),
        };

        // Filter on the individual event notional, not the bucket sum
        for event in events.filter(|event| event.notional_usd >= config.min_cluster_usd) {
            let index = (event.price / buckets.bin_size).round_ties_even() as i64;
            let side = match event.side {
                Side::Buy => &mut buckets.up,
                Side::Sell => &mut buckets.down,
            };
            *side.entry(index).or_default() += event.notional_usd;
        }

        buckets
    }

    fn price(&self, index: i64) -> f64 {
        index as f64 * self.bin_size
    }

    fn nearest(&self, mark_price: f64) -> NearestLiquidations {
        let up = self
            .up
            .keys()
            .map(|index| self.price(*index))
            .find(|price| *price > mark_price);

        let down = self
            .down
            .keys()
            .rev()
            .map(|index| self.price(*index))
            .find(|price| *price < mark_price);

        NearestLiquidations {
            up_pct: up.map(|up| (up - mark_price) / mark_price),
            down_pct: down.map(|down| (mark_price - down) / mark_price),
        }
    }

    fn levels(&self, side: &BTreeMap<i64, f64>) -> Vec<ClusterLevel> {
        side.iter()
            .map(|(index, notional_usd)| ClusterLevel {
                price: self.price(*index),
                notional_usd: *notional_usd,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    /// Event whose notional is exactly `notional_usd`.
    fn event(secs: i64, price: f64, side: Side, notional_usd: f64) -> LiquidationEvent {
        LiquidationEvent::received_at(at(secs), price, notional_usd / price, side, None)
    }

    fn window() -> ClusterWindow {
        ClusterWindow::new(WindowConfig::default())
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("expected a cluster level");
        assert!(
            (actual - expected).abs() < 1e-12,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_sell_clusters_bucket_and_nearest_below() {
        let window = window();
        window.add(event(0, 100.0, Side::Sell, 6_000.0));
        window.add(event(1, 101.0, Side::Sell, 6_000.0));
        window.add(event(2, 109.0, Side::Sell, 6_000.0));

        let snapshot = window.clusters_at(at(3));
        assert!(snapshot.up.is_empty());
        assert_eq!(snapshot.down.len(), 2);
        assert_eq!(snapshot.down[0].price, 100.0);
        assert!((snapshot.down[0].notional_usd - 12_000.0).abs() < 1e-9);
        assert_eq!(snapshot.down[1].price, 110.0);
        assert!((snapshot.down[1].notional_usd - 6_000.0).abs() < 1e-9);

        let nearest = window.nearest_at(105.0, at(3)).unwrap();
        assert_eq!(nearest.up_pct, None);
        assert_close(nearest.down_pct, (105.0 - 100.0) / 105.0);
        assert!((nearest.down_pct.unwrap() - 0.0476).abs() < 1e-4);
    }

    #[test]
    fn test_buy_clusters_nearest_above() {
        let window = window();
        window.add(event(0, 150.0, Side::Buy, 10_000.0));
        window.add(event(0, 121.0, Side::Buy, 10_000.0));
        window.add(event(0, 90.0, Side::Buy, 10_000.0));

        let nearest = window.nearest_at(105.0, at(1)).unwrap();
        assert_close(nearest.up_pct, (120.0 - 105.0) / 105.0);
        assert_eq!(nearest.down_pct, None);
    }

    #[test]
    fn test_nearest_is_strict_on_both_sides() {
        let window = window();
        window.add(event(0, 100.0, Side::Buy, 10_000.0));
        window.add(event(0, 100.0, Side::Sell, 10_000.0));

        let nearest = window.nearest_at(100.0, at(1)).unwrap();
        assert_eq!(nearest, NearestLiquidations::default());
    }

    #[test]
    fn test_empty_window_returns_no_levels() {
        let nearest = window().nearest_at(50_000.0, at(0)).unwrap();
        assert_eq!(nearest.up_pct, None);
        assert_eq!(nearest.down_pct, None);
    }

    #[test]
    fn test_invalid_mark_price() {
        struct TestCase {
            input: f64,
        }

        let tests = vec![
            // TC0: zero
            TestCase { input: 0.0 },
            // TC1: negative
            TestCase { input: -1.0 },
            // TC2: NaN
            TestCase { input: f64::NAN },
            // TC3: infinite
            TestCase { input: f64::INFINITY },
        ];

        let window = window();
        window.add(event(0, 100.0, Side::Sell, 6_000.0));

        for (index, test) in tests.into_iter().enumerate() {
            let actual = window.nearest_at(test.input, at(1));
            assert!(
                matches!(actual, Err(DataError::InvalidMarkPrice(_))),
                "TC{} failed: {:?}",
                index,
                actual
            );
        }
    }

    #[test]
    fn test_events_below_minimum_never_affect_clusters() {
        let window = window();
        window.add(event(0, 100.0, Side::Sell, 6_000.0));
        let before = window.clusters_at(at(1));
        let nearest_before = window.nearest_at(150.0, at(1)).unwrap();

        // Small events, including one in a bucket closer to the mark
        window.add(event(1, 140.0, Side::Sell, 4_999.99));
        window.add(event(1, 100.0, Side::Sell, 1.0));
        window.add(event(1, 160.0, Side::Buy, 100.0));

        let after = window.clusters_at(at(2));
        assert_eq!(after.up, before.up);
        assert_eq!(after.down, before.down);
        assert_eq!(after.events, 4);
        assert_eq!(window.nearest_at(150.0, at(2)).unwrap(), nearest_before);
    }

    #[test]
    fn test_minimum_applies_per_event_not_per_bucket() {
        let window = window();
        window.add(event(0, 100.0, Side::Sell, 3_000.0));
        window.add(event(0, 101.0, Side::Sell, 3_000.0));

        // 6_000 in the bucket, but neither event qualifies individually
        assert!(window.clusters_at(at(1)).down.is_empty());
    }

    #[test]
    fn test_trim_evicts_events_older_than_window() {
        let window = window();
        window.add(event(0, 100.0, Side::Sell, 6_000.0));
        window.add(event(60, 200.0, Side::Sell, 6_000.0));
        window.add(event(130, 300.0, Side::Sell, 6_000.0));

        // Adding at t=130 evicted the t=0 event (130 > 120)
        assert_eq!(window.len(), 2);

        // Exactly at the cutoff is retained
        window.trim_at(at(180));
        assert_eq!(window.len(), 2);

        window.trim_at(at(181));
        assert_eq!(window.len(), 1);

        let snapshot = window.clusters_at(at(181));
        assert_eq!(snapshot.down.len(), 1);
        assert_eq!(snapshot.down[0].price, 300.0);

        // Evicted events never come back
        let nearest = window.nearest_at(250.0, at(181)).unwrap();
        assert_eq!(nearest, NearestLiquidations::default());
    }

    #[test]
    fn test_retained_events_are_within_window() {
        let window = window();
        for secs in (0..600).step_by(7) {
            window.add(event(secs, 100.0 + secs as f64, Side::Buy, 10_000.0));
        }

        let now = at(600);
        window.trim_at(now);
        let retained = window.events.lock().clone();

        assert!(!retained.is_empty());
        for event in retained {
            assert!(now - event.received_at <= TimeDelta::seconds(120));
        }
    }

    #[test]
    fn test_nearest_is_idempotent_for_fixed_state() {
        let window = window();
        window.add(event(0, 95.0, Side::Sell, 20_000.0));
        window.add(event(0, 131.0, Side::Buy, 20_000.0));

        let first = window.nearest_at(110.0, at(1)).unwrap();
        let second = window.nearest_at(110.0, at(1)).unwrap();
        assert_eq!(first, second);
        assert_close(first.up_pct, (130.0 - 110.0) / 110.0);
        assert_close(first.down_pct, (110.0 - 100.0) / 110.0);
    }

    #[test]
    fn test_bucket_rounding_ties_to_even() {
        let window = window();
        window.add(event(0, 105.0, Side::Sell, 10_000.0));
        window.add(event(0, 115.0, Side::Sell, 10_000.0));

        let snapshot = window.clusters_at(at(1));
        let prices: Vec<f64> = snapshot.down.iter().map(|level| level.price).collect();
        assert_eq!(prices, vec![100.0, 120.0]);
    }

    #[test]
    fn test_max_events_evicts_oldest() {
        let window = ClusterWindow::new(WindowConfig::default().with_max_events(2));
        window.add(event(0, 100.0, Side::Sell, 6_000.0));
        window.add(event(1, 200.0, Side::Sell, 6_000.0));
        window.add(event(2, 300.0, Side::Sell, 6_000.0));

        assert_eq!(window.len(), 2);
        let prices: Vec<f64> = window
            .clusters_at(at(3))
            .down
            .iter()
            .map(|level| level.price)
            .collect();
        assert_eq!(prices, vec![200.0, 300.0]);
    }

    #[test]
    fn test_clock_step_back_keeps_order() {
        let window = window();
        window.add(event(100, 100.0, Side::Sell, 6_000.0));
        window.add(event(50, 200.0, Side::Sell, 6_000.0));

        let received: Vec<_> = window
            .events
            .lock()
            .iter()
            .map(|event| event.received_at)
            .collect();
        assert_eq!(received, vec![at(100), at(100)]);
    }

    #[test]
    fn test_custom_window_and_bin_size() {
        let window = ClusterWindow::new(
            WindowConfig::default()
                .with_window(Duration::from_secs(10))
                .with_bin_size(100.0)
                .with_min_cluster_usd(0.0),
        );
        window.add(event(0, 49_940.0, Side::Sell, 1.0));
        window.add(event(5, 50_240.0, Side::Buy, 1.0));

        let nearest = window.nearest_at(50_000.0, at(6)).unwrap();
        assert_close(nearest.down_pct, 100.0 / 50_000.0);
        assert_close(nearest.up_pct, 200.0 / 50_000.0);

        // t=0 event leaves the 10s window
        let nearest = window.nearest_at(50_000.0, at(11)).unwrap();
        assert_eq!(nearest.down_pct, None);
        assert!(nearest.up_pct.is_some());
    }

    #[test]
    fn test_concurrent_readers_see_consistent_state() {
        let window = Arc::new(ClusterWindow::new(WindowConfig::default()));

        std::thread::scope(|scope| {
            let writer = Arc::clone(&window);
            scope.spawn(move || {
                for n in 0..2_000 {
                    let side = if n % 2 == 0 { Side::Sell } else { Side::Buy };
                    let price = if side == Side::Sell { 90.0 } else { 120.0 };
                    writer.add(event(0, price, side, 10_000.0));
                }
            });

            for _ in 0..4 {
                let reader = Arc::clone(&window);
                scope.spawn(move || {
                    for _ in 0..500 {
                        let nearest = reader.nearest_at(105.0, at(1)).unwrap();
                        if let Some(up) = nearest.up_pct {
                            assert!((up - 15.0 / 105.0).abs() < 1e-12);
                        }
                        if let Some(down) = nearest.down_pct {
                            assert!((down - 15.0 / 105.0).abs() < 1e-12);
                        }
                    }
                });
            }
        });

        let snapshot = window.clusters_at(at(1));
        assert_eq!(snapshot.events, 2_000);
        assert!((snapshot.down[0].notional_usd - 10_000_000.0).abs() < 1e-3);
    }
}
