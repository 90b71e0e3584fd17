use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use metrics::counter;
use tracing::debug;
use url::Url;

use crate::api::AttributionError;
use crate::config::Config;
use crate::identity;
use crate::ledger;
use crate::publish::{EventSink, TrackingEvent};
use crate::referrer;
use crate::rewrite;
use crate::snapshot::TrackingParam;
use crate::storage::Backends;
use crate::store::{AttributionStore, Timestamps, TouchRecord};
use crate::time::TimeSource;

/// What a navigation observer reports. Replaces the History-API
/// monkey-patching of embedded trackers: the host subscribes the pipeline
/// to its navigation events instead of the pipeline hijacking them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavigationKind {
    Push,
    Replace,
    Pop,
}

/// The summary a completed run hands back to the embedding host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageView {
    pub visitor_id: String,
    pub session_id: String,
    pub first: TouchRecord,
    pub current: TouchRecord,
    pub rewritten_url: Url,
    pub event: TrackingEvent,
}

/// Combined stored state for the host-facing query accessor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackingData {
    pub first: Option<TouchRecord>,
    pub current: Option<TouchRecord>,
    pub timestamps: Timestamps,
}

impl TrackingData {
    pub fn session_duration(&self) -> i64 {
        self.timestamps.session_duration()
    }

    fn any_click_id(&self, param: TrackingParam) -> bool {
        let current = self
            .current
            .as_ref()
            .map_or(false, |record| !record.snapshot.get(param).is_empty());
        let first = self
            .first
            .as_ref()
            .map_or(false, |record| !record.snapshot.get(param).is_empty());
        current || first
    }

    /// A Google Ads click id was seen on either touch.
    pub fn has_paid_search_click(&self) -> bool {
        self.any_click_id(TrackingParam::Gclid)
    }

    /// A Meta Ads click id was seen on either touch.
    pub fn has_paid_social_click(&self) -> bool {
        self.any_click_id(TrackingParam::Fbclid)
    }

    pub fn is_direct_traffic(&self) -> bool {
        self.current
            .as_ref()
            .map_or(false, |record| record.snapshot.utm_source == "direct")
    }
}

/// A navigation observed inside the debounce window, held back until the
/// window passes instead of being dropped.
struct PendingNavigation {
    page_url: String,
    referrer: String,
}

/// The per-page-context attribution pipeline. One instance per embedding
/// context; every page view (and navigation re-run) goes through
/// [`Tracker::process`].
pub struct Tracker {
    store: AttributionStore,
    sink: Arc<dyn EventSink + Send + Sync>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
    config: Config,
    last_run: AtomicI64,
    pending: Mutex<Option<PendingNavigation>>,
}

impl Tracker {
    pub fn new(
        backends: Backends,
        sink: Arc<dyn EventSink + Send + Sync>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
        config: Config,
    ) -> Tracker {
        Tracker {
            store: AttributionStore::new(backends, config.clone()),
            sink,
            timesource,
            config,
            last_run: AtomicI64::new(i64::MIN),
            pending: Mutex::new(None),
        }
    }

    /// Runs the full pipeline for one page view: resolve identities,
    /// extract and resolve the snapshot, persist the touch, update the
    /// ledger, rewrite the URL, publish the event. Only an unparseable
    /// page URL aborts; every storage problem degrades locally.
    pub fn process(&self, page_url: &str, referrer: &str) -> Result<PageView, AttributionError> {
        let url = Url::parse(page_url)?;
        // A completed run reflects newer page state than anything held back
        if let Ok(mut pending) = self.pending.lock() {
            *pending = None;
        }
        let now = self.timesource.now_millis();
        counter!("attribution_runs_total").increment(1);

        let visitor_id = identity::resolve_visitor_id(&self.store, now);
        let session_id = identity::resolve_session_id(&self.store, now);

        let mut state = self.store.load_state();

        let mut snapshot = crate::extract::from_url(&url);
        if !snapshot.has_tracking_data() {
            // Parameterless view: recover what this session already saw.
            if let Some(current) = &state.current_touch {
                snapshot.merge_non_empty(&current.snapshot);
            }
        }
        if snapshot.utm_source.is_empty() {
            let derived = referrer::classify(referrer);
            debug!(source = %derived.source, medium = %derived.medium, "referrer fallback");
            snapshot.utm_source = derived.source;
            snapshot.utm_medium = derived.medium;
            snapshot.utm_campaign = derived.campaign;
        }

        let touch = self.store.record_touch(&mut state, &snapshot, referrer, now);
        ledger::append_touch(
            &mut state.touch_history,
            &session_id,
            &snapshot,
            now,
            self.config.max_touch_entries,
        );
        self.store.save_state(&state);

        let rewritten_url = rewrite::rewrite_visible_url(
            &url,
            &touch.first,
            &touch.current,
            self.config.rewrite_mode,
        );
        let url_updated = rewritten_url != url;

        let event = TrackingEvent::new(&touch.first, &touch.current, state.timestamps, url_updated);
        self.sink.publish(event.clone());

        self.last_run.store(now, Ordering::SeqCst);

        Ok(PageView {
            visitor_id,
            session_id,
            first: touch.first,
            current: touch.current,
            rewritten_url,
            event,
        })
    }

    /// Host-facing force trigger for pages that change the URL without a
    /// navigation event.
    pub fn force_update(
        &self,
        page_url: &str,
        referrer: &str,
    ) -> Result<PageView, AttributionError> {
        self.process(page_url, referrer)
    }

    /// Navigation subscription entry point. A navigation arriving inside
    /// the debounce window is not processed immediately, but it is never
    /// lost: it is held back and picked up by the next observation or by
    /// [`Tracker::flush_pending`] once the window has passed.
    pub fn observe_navigation(
        &self,
        kind: NavigationKind,
        page_url: &str,
        referrer: &str,
    ) -> Option<Result<PageView, AttributionError>> {
        let now = self.timesource.now_millis();
        let last = self.last_run.load(Ordering::SeqCst);
        if last != i64::MIN && now - last < self.config.navigation_debounce_millis {
            counter!("attribution_navigations_deferred_total").increment(1);
            debug!(?kind, "navigation deferred until the debounce window passes");
            if let Ok(mut pending) = self.pending.lock() {
                *pending = Some(PendingNavigation {
                    page_url: page_url.to_string(),
                    referrer: referrer.to_string(),
                });
            }
            return None;
        }
        Some(self.process(page_url, referrer))
    }

    /// Processes a navigation that was held back by the debounce window,
    /// once its settle interval has elapsed. Hosts call this from their
    /// next event-loop turn or timer tick.
    pub fn flush_pending(&self) -> Option<Result<PageView, AttributionError>> {
        let now = self.timesource.now_millis();
        let last = self.last_run.load(Ordering::SeqCst);
        if last != i64::MIN && now - last < self.config.navigation_debounce_millis {
            return None;
        }
        let pending = self.pending.lock().ok().and_then(|mut slot| slot.take())?;
        Some(self.process(&pending.page_url, &pending.referrer))
    }

    /// Read accessor over the persisted state, with the convenience
    /// predicates embedding pages use for audience decisions.
    pub fn tracking_data(&self) -> TrackingData {
        let state = self.store.load_state();
        TrackingData {
            first: state.first_touch,
            current: state.current_touch,
            timestamps: state.timestamps,
        }
    }

    pub fn store(&self) -> &AttributionStore {
        &self.store
    }
}
