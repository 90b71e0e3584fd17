use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::ledger::TouchEntry;
use crate::snapshot::{AttributionSnapshot, TrackingParam};
use crate::storage::{Backends, StorageKind};

/// First- and current-visit timestamps, epoch millis. `first_visit` is
/// written once; `current_visit` moves on every run.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Timestamps {
    #[serde(default)]
    pub first_visit: i64,
    #[serde(default)]
    pub current_visit: i64,
}

impl Timestamps {
    /// Elapsed millis between the first and the current visit; zero
    /// until both have been recorded.
    pub fn session_duration(&self) -> i64 {
        if self.first_visit == 0 || self.current_visit == 0 {
            return 0;
        }
        self.current_visit - self.first_visit
    }
}

/// An attribution snapshot bound to the visit that produced it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TouchRecord {
    #[serde(flatten)]
    pub snapshot: AttributionSnapshot,
    #[serde(default)]
    pub referrer: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// The aggregated blob persisted to every backend.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AttributionState {
    #[serde(default)]
    pub first_touch: Option<TouchRecord>,
    #[serde(default)]
    pub current_touch: Option<TouchRecord>,
    #[serde(default)]
    pub timestamps: Timestamps,
    #[serde(default)]
    pub touch_history: Vec<TouchEntry>,
}

/// The first- and current-touch pair produced by a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TouchState {
    pub first: TouchRecord,
    pub current: TouchRecord,
}

/// Multi-backend attribution persistence. Every write is best-effort:
/// one backend failing never blocks the others and never surfaces to the
/// pipeline.
pub struct AttributionStore {
    pub backends: Backends,
    pub config: Config,
}

impl AttributionStore {
    pub fn new(backends: Backends, config: Config) -> AttributionStore {
        AttributionStore { backends, config }
    }

    fn cookie_name(&self, key: &str) -> String {
        format!("{}{}", self.config.cookie.prefix, key)
    }

    /// Loads the aggregated state, trying durable then session then the
    /// cookie jar. A backend that fails or holds an unparseable blob is
    /// skipped; with nothing readable anywhere the state starts fresh.
    pub fn load_state(&self) -> AttributionState {
        let key = self.config.state_key.as_str();

        let candidates = [
            (StorageKind::Durable, self.backends.durable.get(key)),
            (StorageKind::Session, self.backends.session.get(key)),
            (
                StorageKind::Cookie,
                self.backends.cookies.get(&self.cookie_name(key)),
            ),
        ];

        for (kind, result) in candidates {
            let blob = match result {
                Ok(Some(blob)) => blob,
                Ok(None) => continue,
                Err(err) => {
                    debug!(backend = %kind, "state read failed: {}", err);
                    continue;
                }
            };
            match serde_json::from_str(&blob) {
                Ok(state) => return state,
                Err(err) => {
                    warn!(backend = %kind, "discarding unparseable state blob: {}", err);
                }
            }
        }

        AttributionState::default()
    }

    /// Serializes the state once and writes it to every backend. An
    /// oversized blob is not written anywhere, keeping the prior state
    /// intact.
    pub fn save_state(&self, state: &AttributionState) {
        let blob = match serde_json::to_string(state) {
            Ok(blob) => blob,
            Err(err) => {
                warn!("failed to serialize attribution state: {}", err);
                return;
            }
        };

        if blob.len() > self.config.max_state_bytes {
            counter!("attribution_state_writes_skipped_total").increment(1);
            warn!(
                bytes = blob.len(),
                "attribution state exceeds size cap, write skipped"
            );
            return;
        }

        let key = self.config.state_key.as_str();

        if self.backends.durable.available() {
            if let Err(err) = self.backends.durable.set(key, &blob) {
                report_write_failure(StorageKind::Durable, &err);
            }
        }
        if self.backends.session.available() {
            if let Err(err) = self.backends.session.set(key, &blob) {
                report_write_failure(StorageKind::Session, &err);
            }
        }
        if self.backends.cookies.available() {
            if let Err(err) = self.backends.cookies.set(
                &self.cookie_name(key),
                &blob,
                self.config.first_touch_expiry,
            ) {
                report_write_failure(StorageKind::Cookie, &err);
            }
        }
    }

    /// Applies one page view to the state. The first touch is write-once:
    /// an existing record is left byte-identical and only the current
    /// side moves.
    pub fn record_touch(
        &self,
        state: &mut AttributionState,
        snapshot: &AttributionSnapshot,
        referrer: &str,
        now: i64,
    ) -> TouchState {
        if state.first_touch.is_none() {
            let first = TouchRecord {
                snapshot: snapshot.clone(),
                referrer: referrer.to_string(),
                timestamp: now,
            };
            self.write_first_touch_cookies(&first);
            state.timestamps.first_visit = now;
            state.first_touch = Some(first);
        }

        state.timestamps.current_visit = now;
        let current = TouchRecord {
            snapshot: snapshot.clone(),
            referrer: referrer.to_string(),
            timestamp: now,
        };
        self.write_current_touch_cookie(&current);
        state.current_touch = Some(current.clone());

        let first = state
            .first_touch
            .clone()
            .unwrap_or_else(|| current.clone());

        TouchState { first, current }
    }

    /// One cookie per tracking field for the first touch: UTM fields
    /// always, click ids only when present, plus the entry timestamp.
    fn write_first_touch_cookies(&self, first: &TouchRecord) {
        if !self.backends.cookies.available() {
            return;
        }
        let expiry = self.config.first_touch_expiry;

        for param in TrackingParam::UTM {
            let name = self.cookie_name(param.query_key());
            if let Err(err) =
                self.backends
                    .cookies
                    .set(&name, first.snapshot.get(param), expiry)
            {
                report_write_failure(StorageKind::Cookie, &err);
            }
        }
        for param in TrackingParam::CLICK_IDS {
            let value = first.snapshot.get(param);
            if value.is_empty() {
                continue;
            }
            let name = self.cookie_name(param.query_key());
            if let Err(err) = self.backends.cookies.set(&name, value, expiry) {
                report_write_failure(StorageKind::Cookie, &err);
            }
        }

        let name = self.cookie_name("first_visit");
        if let Err(err) = self
            .backends
            .cookies
            .set(&name, &first.timestamp.to_string(), expiry)
        {
            report_write_failure(StorageKind::Cookie, &err);
        }
    }

    /// Fresh copy of the current-touch record, rewritten on every run
    /// with the short expiry so it lapses with the visit.
    fn write_current_touch_cookie(&self, current: &TouchRecord) {
        if !self.backends.cookies.available() {
            return;
        }
        let blob = match serde_json::to_string(current) {
            Ok(blob) => blob,
            Err(err) => {
                warn!("failed to serialize current touch: {}", err);
                return;
            }
        };
        let name = self.cookie_name("current_visit");
        if let Err(err) = self
            .backends
            .cookies
            .set(&name, &blob, self.config.current_touch_expiry)
        {
            report_write_failure(StorageKind::Cookie, &err);
        }
    }
}

fn report_write_failure(kind: StorageKind, err: &crate::storage::StorageError) {
    counter!("attribution_storage_write_failures_total", "backend" => kind.to_string())
        .increment(1);
    warn!(backend = %kind, "storage write failed: {}", err);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::Config;
    use crate::snapshot::AttributionSnapshot;
    use crate::storage::{
        Backends, CookieStore, FailingStore, MemoryCookieJar, MemoryStore, StringStore,
    };
    use crate::time::FixedTime;

    use super::{AttributionState, AttributionStore};

    fn snapshot(source: &str) -> AttributionSnapshot {
        AttributionSnapshot {
            utm_source: String::from(source),
            ..Default::default()
        }
    }

    fn memory_store() -> (AttributionStore, Arc<MemoryStore>, Arc<MemoryCookieJar>) {
        let clock = Arc::new(FixedTime::new(1_700_000_000_000));
        let durable = Arc::new(MemoryStore::new());
        let jar = Arc::new(MemoryCookieJar::new(clock));
        let backends = Backends {
            durable: durable.clone(),
            session: Arc::new(MemoryStore::new()),
            cookies: jar.clone(),
        };
        (
            AttributionStore::new(backends, Config::default()),
            durable,
            jar,
        )
    }

    #[test]
    fn state_round_trips_through_storage() {
        let (store, _, _) = memory_store();

        let mut state = AttributionState::default();
        store.record_touch(&mut state, &snapshot("google"), "", 100);
        store.save_state(&state);

        assert_eq!(store.load_state(), state);
    }

    #[test]
    fn first_touch_is_write_once() {
        let (store, _, _) = memory_store();
        let mut state = AttributionState::default();

        let initial = store.record_touch(&mut state, &snapshot("google"), "", 100);
        let later = store.record_touch(&mut state, &snapshot("facebook"), "", 200);

        assert_eq!(later.first, initial.first);
        assert_eq!(later.current.snapshot.utm_source, "facebook");
        assert_eq!(state.timestamps.first_visit, 100);
        assert_eq!(state.timestamps.current_visit, 200);
    }

    #[test]
    fn first_touch_writes_per_field_cookies() {
        let (store, _, jar) = memory_store();
        let mut state = AttributionState::default();

        let mut snap = snapshot("google");
        snap.gclid = String::from("abc123");
        store.record_touch(&mut state, &snap, "", 100);

        assert_eq!(jar.get("trk_utm_source").unwrap().as_deref(), Some("google"));
        assert_eq!(jar.get("trk_gclid").unwrap().as_deref(), Some("abc123"));
        assert_eq!(jar.get("trk_first_visit").unwrap().as_deref(), Some("100"));
        // Empty click ids get no cookie
        assert_eq!(jar.get("trk_fbclid").unwrap(), None);
    }

    #[test]
    fn current_touch_cookie_lapses_with_the_short_expiry() {
        let clock = Arc::new(FixedTime::new(0));
        let jar = Arc::new(MemoryCookieJar::new(clock.clone()));
        let backends = Backends {
            durable: Arc::new(MemoryStore::new()),
            session: Arc::new(MemoryStore::new()),
            cookies: jar.clone(),
        };
        let store = AttributionStore::new(backends, Config::default());

        let mut state = AttributionState::default();
        store.record_touch(&mut state, &snapshot("google"), "", 100);
        store.record_touch(&mut state, &snapshot("facebook"), "", 200);

        let blob = jar.get("trk_current_visit").unwrap().unwrap();
        assert!(blob.contains("\"utm_source\":\"facebook\""));

        // Two days on: the current-visit copy is gone, the first-touch
        // cookies are not
        clock.advance(2 * 86_400_000);
        assert_eq!(jar.get("trk_current_visit").unwrap(), None);
        assert_eq!(jar.get("trk_utm_source").unwrap().as_deref(), Some("google"));
    }

    #[test]
    fn session_duration_is_zero_until_both_visits_recorded() {
        use super::Timestamps;

        assert_eq!(Timestamps::default().session_duration(), 0);
        assert_eq!(
            Timestamps {
                first_visit: 100,
                current_visit: 0
            }
            .session_duration(),
            0
        );
        assert_eq!(
            Timestamps {
                first_visit: 100,
                current_visit: 350
            }
            .session_duration(),
            250
        );
    }

    #[test]
    fn failing_backend_does_not_block_the_others() {
        let clock = Arc::new(FixedTime::new(0));
        let durable = Arc::new(MemoryStore::new());
        let backends = Backends {
            durable: durable.clone(),
            session: Arc::new(FailingStore {}),
            cookies: Arc::new(MemoryCookieJar::new(clock)),
        };
        let store = AttributionStore::new(backends, Config::default());

        let mut state = AttributionState::default();
        store.record_touch(&mut state, &snapshot("google"), "", 100);
        store.save_state(&state);

        assert_eq!(store.load_state(), state);
        assert!(durable.get("attribution_state").unwrap().is_some());
    }

    #[test]
    fn oversized_state_write_is_skipped_keeping_prior_state() {
        let (store, _, _) = memory_store();

        let mut state = AttributionState::default();
        store.record_touch(&mut state, &snapshot("google"), "", 100);
        store.save_state(&state);

        let mut oversized = state.clone();
        store.record_touch(
            &mut oversized,
            &snapshot(&"x".repeat(4 * 1024 * 1024)),
            "",
            200,
        );
        store.save_state(&oversized);

        assert_eq!(store.load_state(), state);
    }

    #[test]
    fn unparseable_blob_falls_back_to_default() {
        let (store, durable, _) = memory_store();
        durable.set("attribution_state", "{not json").unwrap();

        assert_eq!(store.load_state(), AttributionState::default());
    }
}
