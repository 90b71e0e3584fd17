use std::sync::Mutex;

use metrics::counter;
use serde::Serialize;
use tracing::info;

use crate::store::{Timestamps, TouchRecord};

pub const EVENT_NAME: &str = "tracking_data_processed";

/// The flattened summary pushed to the analytics queue after every run.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct TrackingEvent {
    pub event: String,
    pub utm_first_source: String,
    pub utm_first_medium: String,
    pub utm_first_campaign: String,
    pub utm_first_content: String,
    pub utm_first_term: String,
    pub utm_first_referrer: String,
    pub gclid_first: String,
    pub fbclid_first: String,
    pub utm_current_source: String,
    pub utm_current_medium: String,
    pub utm_current_campaign: String,
    pub utm_current_content: String,
    pub utm_current_term: String,
    pub utm_current_referrer: String,
    pub gclid_current: String,
    pub fbclid_current: String,
    pub first_visit_timestamp: i64,
    pub current_visit_timestamp: i64,
    pub session_duration: i64,
    pub url_updated: bool,
    pub has_gclid: bool,
    pub has_fbclid: bool,
}

impl TrackingEvent {
    pub fn new(
        first: &TouchRecord,
        current: &TouchRecord,
        timestamps: Timestamps,
        url_updated: bool,
    ) -> TrackingEvent {
        TrackingEvent {
            event: String::from(EVENT_NAME),
            utm_first_source: first.snapshot.utm_source.clone(),
            utm_first_medium: first.snapshot.utm_medium.clone(),
            utm_first_campaign: first.snapshot.utm_campaign.clone(),
            utm_first_content: first.snapshot.utm_content.clone(),
            utm_first_term: first.snapshot.utm_term.clone(),
            utm_first_referrer: first.referrer.clone(),
            gclid_first: first.snapshot.gclid.clone(),
            fbclid_first: first.snapshot.fbclid.clone(),
            utm_current_source: current.snapshot.utm_source.clone(),
            utm_current_medium: current.snapshot.utm_medium.clone(),
            utm_current_campaign: current.snapshot.utm_campaign.clone(),
            utm_current_content: current.snapshot.utm_content.clone(),
            utm_current_term: current.snapshot.utm_term.clone(),
            utm_current_referrer: current.referrer.clone(),
            gclid_current: current.snapshot.gclid.clone(),
            fbclid_current: current.snapshot.fbclid.clone(),
            first_visit_timestamp: timestamps.first_visit,
            current_visit_timestamp: timestamps.current_visit,
            session_duration: timestamps.session_duration(),
            url_updated,
            has_gclid: !current.snapshot.gclid.is_empty() || !first.snapshot.gclid.is_empty(),
            has_fbclid: !current.snapshot.fbclid.is_empty() || !first.snapshot.fbclid.is_empty(),
        }
    }
}

/// Downstream consumer of tracking events. Publishing is side-effect
/// only and must never fail the pipeline; implementations swallow their
/// own errors.
pub trait EventSink {
    fn publish(&self, event: TrackingEvent);
}

pub struct PrintSink {}

impl EventSink for PrintSink {
    fn publish(&self, event: TrackingEvent) {
        counter!("attribution_events_published_total").increment(1);
        info!("tracking event: {:?}", event);
    }
}

/// Append-only in-process queue, the embedding analogue of a global
/// analytics data layer.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<TrackingEvent>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn events(&self) -> Vec<TrackingEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: TrackingEvent) {
        counter!("attribution_events_published_total").increment(1);
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
