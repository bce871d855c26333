//! Ordered, queryable event store.
//!
//! Operational history of every state transition, distinct from the audit
//! chain: events are not hash-linked, but they are strictly ordered by
//! `seq` and never reordered. The replay harness reads recorded
//! intent/context/plan tuples back out of this store.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sentinel_core::{Clock, Result, SentinelError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

/// One recorded state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Strictly monotone sequence number, starting at 1.
    pub seq: u64,
    /// Event type, e.g. `plan.created`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Append time.
    pub timestamp: DateTime<Utc>,
    /// Event body; an envelope or a transition record.
    pub body: Value,
}

struct StoreInner {
    file: File,
    events: Vec<Event>,
}

/// Append-only event store with linearizable appends.
pub struct EventStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<StoreInner>,
}

impl EventStore {
    /// Open or create the store at `path`, loading existing events.
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut events = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for (idx, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let event: Event = serde_json::from_str(&line).map_err(|e| {
                    SentinelError::storage(format!("event line {} unparseable: {e}", idx + 1))
                })?;
                let expected = events.len() as u64 + 1;
                if event.seq != expected {
                    return Err(SentinelError::storage(format!(
                        "event store out of order: expected seq {expected}, found {}",
                        event.seq
                    )));
                }
                events.push(event);
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            clock,
            inner: Mutex::new(StoreInner { file, events }),
        })
    }

    /// Append an event and return it with its assigned sequence.
    pub fn append(&self, kind: &str, body: Value) -> Result<Event> {
        let mut inner = self.inner.lock();
        let event = Event {
            seq: inner.events.len() as u64 + 1,
            kind: kind.to_string(),
            timestamp: self.clock.now(),
            body,
        };
        let line = serde_json::to_string(&event)?;
        inner.file.write_all(line.as_bytes())?;
        inner.file.write_all(b"\n")?;
        inner.file.sync_all()?;
        inner.events.push(event.clone());
        Ok(event)
    }

    /// Events with `from <= seq <= to`, in order.
    pub fn query_range(&self, from: u64, to: u64) -> Vec<Event> {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| e.seq >= from && e.seq <= to)
            .cloned()
            .collect()
    }

    /// Events of one type, in order.
    pub fn query_kind(&self, kind: &str) -> Vec<Event> {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Events whose body carries `field == value` at the top level, in
    /// order. Used for `intentId` / `planId` correlation.
    pub fn query_correlated(&self, field: &str, value: &str) -> Vec<Event> {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| e.body.get(field).and_then(Value::as_str) == Some(value))
            .cloned()
            .collect()
    }

    /// Sequence of the newest event; 0 when empty.
    pub fn last_sequence(&self) -> u64 {
        self.inner.lock().events.len() as u64
    }

    /// Whether the backing file still accepts writes.
    pub fn healthy(&self) -> bool {
        self.inner.lock().file.metadata().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::FixedClock;
    use serde_json::json;

    fn fixed_clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::new(
            "2026-01-01T00:00:00Z".parse().expect("timestamp"),
        ))
    }

    #[test]
    fn appends_are_strictly_ordered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EventStore::open(dir.path().join("events.jsonl"), fixed_clock()).expect("open");
        for n in 0..5 {
            let event = store
                .append("intent.accepted", json!({"intentId": format!("i-{n}")}))
                .expect("append");
            assert_eq!(event.seq, n + 1);
        }
        assert_eq!(store.last_sequence(), 5);
    }

    #[test]
    fn queries_by_range_kind_and_correlation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EventStore::open(dir.path().join("events.jsonl"), fixed_clock()).expect("open");
        store
            .append("intent.accepted", json!({"intentId": "i-1"}))
            .expect("append");
        store
            .append("plan.created", json!({"intentId": "i-1", "planId": "p-1"}))
            .expect("append");
        store
            .append("intent.accepted", json!({"intentId": "i-2"}))
            .expect("append");

        assert_eq!(store.query_range(2, 3).len(), 2);
        assert_eq!(store.query_kind("intent.accepted").len(), 2);
        let correlated = store.query_correlated("intentId", "i-1");
        assert_eq!(correlated.len(), 2);
        assert!(correlated.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[test]
    fn store_reloads_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        {
            let store = EventStore::open(&path, fixed_clock()).expect("open");
            store.append("plan.created", json!({"planId": "p-1"})).expect("append");
        }
        let store = EventStore::open(&path, fixed_clock()).expect("reopen");
        assert_eq!(store.last_sequence(), 1);
        assert_eq!(store.query_kind("plan.created").len(), 1);
    }

    #[test]
    fn out_of_order_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"seq":1,"type":"a","timestamp":"2026-01-01T00:00:00Z","body":{}}"#,
                "\n",
                r#"{"seq":3,"type":"b","timestamp":"2026-01-01T00:00:01Z","body":{}}"#,
                "\n"
            ),
        )
        .expect("write");
        assert!(EventStore::open(&path, fixed_clock()).is_err());
    }
}
