//! Ban Recorder
//!
//! Records rate-limit violations onto a shared per-day list and turns a
//! drained day into a human-readable summary. Recording is strictly
//! best-effort: a failed append is logged and swallowed so that it can never
//! influence an admission decision.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::services::counter_store::{CounterStore, CounterStoreError};

/// One recorded rate-limit violation.
///
/// Entries are not deduplicated; every rejection within a day appends one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BanEvent {
    /// Offending identity (`user:{name}` or `ip:{addr}`)
    pub identity: String,
    /// Route whose budget was exhausted
    pub route: String,
    /// Counter value at the moment of rejection
    pub strikes: u64,
    pub timestamp: DateTime<Utc>,
}

/// Strike totals for one drained day
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanSummary {
    /// Total violations drained
    pub total: u64,
    /// Violations per route, most-hit first
    pub by_route: Vec<(String, u64)>,
    /// Violations per identity, most-hit first
    pub by_identity: Vec<(String, u64)>,
}

impl BanSummary {
    /// Aggregate drained events by route and by identity
    pub fn from_events(events: &[BanEvent]) -> Self {
        let mut by_route: HashMap<String, u64> = HashMap::new();
        let mut by_identity: HashMap<String, u64> = HashMap::new();

        for event in events {
            *by_route.entry(event.route.clone()).or_default() += 1;
            *by_identity.entry(event.identity.clone()).or_default() += 1;
        }

        let mut by_route: Vec<_> = by_route.into_iter().collect();
        let mut by_identity: Vec<_> = by_identity.into_iter().collect();
        // Sort by count descending, name ascending for a stable report
        by_route.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        by_identity.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Self {
            total: events.len() as u64,
            by_route,
            by_identity,
        }
    }

    /// Render the report body sent to the notification sink
    pub fn render(&self, day: NaiveDate) -> String {
        let mut out = format!(
            "Rate-limit violations for {day}: {} total\n\nBy route:\n",
            self.total
        );
        for (route, count) in &self.by_route {
            out.push_str(&format!("  {count:>6}  {route}\n"));
        }
        out.push_str("\nBy identity:\n");
        for (identity, count) in &self.by_identity {
            out.push_str(&format!("  {count:>6}  {identity}\n"));
        }
        out
    }
}

/// Recorder for rate-limit violations backed by the shared counter store
#[derive(Clone)]
pub struct BanRecorder {
    store: Arc<dyn CounterStore>,
}

impl BanRecorder {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    fn day_key(day: NaiveDate) -> String {
        format!("bans:{}", day.format("%Y-%m-%d"))
    }

    /// Append one violation to today's shared list
    pub async fn record(
        &self,
        route: &str,
        identity: &str,
        strikes: u64,
    ) -> Result<(), CounterStoreError> {
        let event = BanEvent {
            identity: identity.to_string(),
            route: route.to_string(),
            strikes,
            timestamp: Utc::now(),
        };

        let payload = serde_json::to_string(&event)
            .map_err(|e| CounterStoreError::Operation(e.to_string()))?;

        self.store
            .push_entry(&Self::day_key(event.timestamp.date_naive()), &payload)
            .await
    }

    /// Atomically read and clear the given day's list.
    ///
    /// Entries that fail to parse are logged and skipped rather than
    /// poisoning the whole drain.
    pub async fn drain_day(&self, day: NaiveDate) -> Result<Vec<BanEvent>, CounterStoreError> {
        let raw = self.store.drain_entries(&Self::day_key(day)).await?;

        let mut events = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<BanEvent>(&entry) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping malformed ban entry: {e}"),
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::counter_store::MemoryCounterStore;

    fn recorder() -> BanRecorder {
        BanRecorder::new(Arc::new(MemoryCounterStore::new()))
    }

    #[tokio::test]
    async fn test_record_then_drain_round_trips() {
        let recorder = recorder();
        let today = Utc::now().date_naive();

        recorder.record("/products", "user:alice", 61).await.unwrap();

        let events = recorder.drain_day(today).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].route, "/products");
        assert_eq!(events[0].identity, "user:alice");
        assert_eq!(events[0].strikes, 61);
    }

    #[tokio::test]
    async fn test_repeated_violations_all_accumulate() {
        let recorder = recorder();
        let today = Utc::now().date_naive();

        for strikes in 61..=63 {
            recorder
                .record("/products", "ip:10.0.0.9", strikes)
                .await
                .unwrap();
        }

        let events = recorder.drain_day(today).await.unwrap();
        assert_eq!(events.len(), 3, "no deduplication within a day");
    }

    #[tokio::test]
    async fn test_drain_empties_the_day() {
        let recorder = recorder();
        let today = Utc::now().date_naive();

        recorder.record("/products", "user:alice", 61).await.unwrap();
        assert_eq!(recorder.drain_day(today).await.unwrap().len(), 1);

        let again = recorder.drain_day(today).await.unwrap();
        assert!(again.is_empty(), "second drain before new violations is empty");
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let store = Arc::new(MemoryCounterStore::new());
        let recorder = BanRecorder::new(store.clone());
        let today = Utc::now().date_naive();

        recorder.record("/products", "user:alice", 61).await.unwrap();
        store
            .push_entry(&format!("bans:{}", today.format("%Y-%m-%d")), "not json")
            .await
            .unwrap();

        let events = recorder.drain_day(today).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_summary_aggregates_by_route_and_identity() {
        let now = Utc::now();
        let event = |route: &str, identity: &str| BanEvent {
            identity: identity.to_string(),
            route: route.to_string(),
            strikes: 61,
            timestamp: now,
        };

        let events = vec![
            event("/products", "user:alice"),
            event("/products", "user:alice"),
            event("/products/{id}/adjust", "user:alice"),
            event("/products", "ip:10.0.0.9"),
        ];

        let summary = BanSummary::from_events(&events);
        assert_eq!(summary.total, 4);
        assert_eq!(
            summary.by_route,
            vec![
                ("/products".to_string(), 3),
                ("/products/{id}/adjust".to_string(), 1),
            ]
        );
        assert_eq!(
            summary.by_identity,
            vec![("user:alice".to_string(), 3), ("ip:10.0.0.9".to_string(), 1)]
        );
    }

    #[test]
    fn test_render_mentions_every_offender() {
        let now = Utc::now();
        let events = vec![BanEvent {
            identity: "user:alice".to_string(),
            route: "/products".to_string(),
            strikes: 61,
            timestamp: now,
        }];

        let report = BanSummary::from_events(&events).render(now.date_naive());
        assert!(report.contains("1 total"));
        assert!(report.contains("/products"));
        assert!(report.contains("user:alice"));
    }
}
