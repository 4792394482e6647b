//! Append-only rebalance event log, plus the notification sink.
//!
//! One JSON object per line. The log doubles as the source for the
//! daily turnover budget and the per-venue cost summary.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::event::{EventState, LegOutcome, RebalanceEvent};
use crate::types::Venue;

/// Append-only JSONL store of rebalance events.
pub struct EventStore {
    path: PathBuf,
}

impl EventStore {
    /// Open (or create) the event log for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Append one event as a JSON line.
    pub fn append(&self, event: &RebalanceEvent) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let json = serde_json::to_string(event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(writer, "{json}")?;
        writer.flush()?;
        Ok(())
    }

    /// All events, oldest first. Unparseable lines are skipped with a
    /// warning rather than poisoning the whole history.
    pub fn read_all(&self) -> Result<Vec<RebalanceEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        let mut events = Vec::new();
        for (i, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RebalanceEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!("skipping malformed event log line {}: {e}", i + 1),
            }
        }
        Ok(events)
    }

    /// The `limit` most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<RebalanceEvent>> {
        let mut events = self.read_all()?;
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }

    /// Filled notional across events created at or after `since`.
    /// Feeds the daily turnover budget.
    pub fn turnover_since(&self, since: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .read_all()?
            .iter()
            .filter(|e| e.created_at >= since)
            .map(|e| e.filled_notional_cents)
            .sum())
    }
}

/// Fees and volume one venue has accumulated.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VenueCosts {
    pub orders: usize,
    pub volume_cents: i64,
    pub fees_cents: i64,
}

impl VenueCosts {
    pub fn average_fee_rate(&self) -> f64 {
        if self.volume_cents > 0 {
            self.fees_cents as f64 / self.volume_cents as f64
        } else {
            0.0
        }
    }
}

/// Per-venue fee/volume summary over the whole event log.
pub fn venue_costs(events: &[RebalanceEvent]) -> FxHashMap<Venue, VenueCosts> {
    let mut summary: FxHashMap<Venue, VenueCosts> = FxHashMap::default();
    for event in events {
        for leg in &event.legs {
            if let LegOutcome::Filled(fill) = &leg.outcome {
                let entry = summary.entry(leg.venue).or_default();
                entry.orders += 1;
                entry.volume_cents += (fill.filled_qty * fill.avg_price_cents as f64).round() as i64;
                entry.fees_cents += fill.fee_cents;
            }
        }
    }
    summary
}

/// Receives every terminal event. Delivery channels (mail, chat, push)
/// live behind collaborators implementing this.
pub trait Notifier {
    fn emit(&self, event: &RebalanceEvent);
}

/// Notifier that writes to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn emit(&self, event: &RebalanceEvent) {
        match event.state {
            EventState::Completed => info!(
                "rebalance {}: {} ({} legs, ${:.2} fees)",
                event.portfolio,
                event.detail,
                event.legs.len(),
                event.fees_paid_cents as f64 / 100.0,
            ),
            EventState::Aborted => info!("rebalance {} aborted: {}", event.portfolio, event.detail),
            _ => warn!(
                "rebalance {} {}: {}",
                event.portfolio, event.state, event.detail
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::FillResult;
    use crate::event::LegRecord;
    use crate::trigger::TriggerReason;
    use crate::types::{Asset, Side};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap()
    }

    fn filled_event(created_at: DateTime<Utc>, notional_cents: i64, venue: Venue) -> RebalanceEvent {
        let mut event = RebalanceEvent::pending("core", TriggerReason::Scheduled, created_at);
        event.advance(EventState::Planned);
        event.advance(EventState::Validated);
        event.advance(EventState::Executing);
        event.legs.push(LegRecord {
            asset: Asset::new("BTC"),
            side: Side::Buy,
            venue,
            requested_qty: 1.0,
            attempts: 1,
            outcome: LegOutcome::Filled(FillResult {
                filled_qty: 1.0,
                avg_price_cents: notional_cents,
                fee_cents: notional_cents / 100,
            }),
        });
        event.filled_notional_cents = notional_cents;
        event.finish(EventState::Completed, "all legs filled", created_at);
        event
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(&dir.path().join("events.jsonl")).unwrap();

        store.append(&filled_event(now(), 100_00, Venue::Pro)).unwrap();
        store.append(&filled_event(now(), 250_00, Venue::Pro)).unwrap();

        let events = store.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].filled_notional_cents, 100_00);
        assert_eq!(events[1].filled_notional_cents, 250_00);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(&dir.path().join("events.jsonl")).unwrap();
        assert!(store.read_all().unwrap().is_empty());
        assert_eq!(store.turnover_since(now()).unwrap(), 0);
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep").join("nested").join("events.jsonl");
        let store = EventStore::open(&path).unwrap();
        store.append(&filled_event(now(), 10_00, Venue::Pro)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn recent_returns_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(&dir.path().join("events.jsonl")).unwrap();
        for cents in [1_00, 2_00, 3_00] {
            store.append(&filled_event(now(), cents, Venue::Pro)).unwrap();
        }

        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].filled_notional_cents, 3_00);
        assert_eq!(recent[1].filled_notional_cents, 2_00);
    }

    #[test]
    fn turnover_counts_only_events_since_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(&dir.path().join("events.jsonl")).unwrap();

        let yesterday = now() - chrono::Duration::hours(30);
        store.append(&filled_event(yesterday, 500_00, Venue::Pro)).unwrap();
        store.append(&filled_event(now(), 100_00, Venue::Pro)).unwrap();
        store.append(&filled_event(now(), 200_00, Venue::Pro)).unwrap();

        let start_of_day = now() - chrono::Duration::hours(12);
        assert_eq!(store.turnover_since(start_of_day).unwrap(), 300_00);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let store = EventStore::open(&path).unwrap();
        store.append(&filled_event(now(), 100_00, Venue::Pro)).unwrap();
        fs::write(
            &path,
            format!("{}\nnot json\n", fs::read_to_string(&path).unwrap().trim()),
        )
        .unwrap();

        let events = store.read_all().unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn venue_costs_aggregate_fills() {
        let events = vec![
            filled_event(now(), 100_00, Venue::Pro),
            filled_event(now(), 300_00, Venue::Pro),
            filled_event(now(), 200_00, Venue::Standard),
        ];

        let costs = venue_costs(&events);
        let pro = costs[&Venue::Pro];
        assert_eq!(pro.orders, 2);
        assert_eq!(pro.volume_cents, 400_00);
        assert_eq!(pro.fees_cents, 4_00);
        assert!((pro.average_fee_rate() - 0.01).abs() < 1e-9);

        let standard = costs[&Venue::Standard];
        assert_eq!(standard.orders, 1);
    }
}
