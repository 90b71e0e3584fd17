use serde::{Deserialize, Serialize};

use crate::snapshot::AttributionSnapshot;

/// One recorded touch: the attribution seen for a session, tagged with
/// the session identifier and the time it was first observed.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct TouchEntry {
    pub session_id: String,
    #[serde(rename = "utm")]
    pub snapshot: AttributionSnapshot,
    pub timestamp: i64,
}

/// Appends a touch to the history, keeping at most one live entry per
/// session. Later touches in the same session merge their non-empty
/// fields into the existing entry instead of appending; a snapshot with
/// no tracking data at all is ignored. The history is then truncated to
/// the `cap` most recent entries.
pub fn append_touch(
    history: &mut Vec<TouchEntry>,
    session_id: &str,
    snapshot: &AttributionSnapshot,
    now: i64,
    cap: usize,
) {
    if !snapshot.has_tracking_data() {
        return;
    }

    match history
        .iter_mut()
        .find(|entry| entry.session_id == session_id)
    {
        Some(entry) => {
            entry.snapshot.merge_non_empty(snapshot);
        }
        None => {
            history.push(TouchEntry {
                session_id: session_id.to_string(),
                snapshot: snapshot.clone(),
                timestamp: now,
            });
        }
    }

    if history.len() > cap {
        let excess = history.len() - cap;
        history.drain(..excess);
    }
}
