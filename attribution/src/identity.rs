use rand::Rng;
use tracing::debug;

use crate::store::AttributionStore;

pub const VISITOR_ID_KEY: &str = "visitor_id";
pub const SESSION_ID_KEY: &str = "session_id";

/// Timestamp plus a random integer. Not unique in any cryptographic
/// sense; collisions are acceptable for attribution.
pub fn generate_uid(now: i64) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{now}{suffix}")
}

/// Looks up the long-lived visitor identifier, cookie first, then the
/// durable store. A read failure counts as absent. A freshly generated
/// identifier is persisted to all three scopes best-effort.
pub fn resolve_visitor_id(store: &AttributionStore, now: i64) -> String {
    let cookie_name = format!("{}{}", store.config.cookie.prefix, VISITOR_ID_KEY);

    if let Ok(Some(id)) = store.backends.cookies.get(&cookie_name) {
        return id;
    }
    if let Ok(Some(id)) = store.backends.durable.get(VISITOR_ID_KEY) {
        return id;
    }

    let id = generate_uid(now);
    debug!(visitor_id = %id, "generated new visitor id");

    store
        .backends
        .cookies
        .set(&cookie_name, &id, store.config.first_touch_expiry)
        .ok();
    store.backends.durable.set(VISITOR_ID_KEY, &id).ok();
    store.backends.session.set(VISITOR_ID_KEY, &id).ok();

    id
}

/// Looks up the per-session identifier, stored only in the session scope
/// so it resets with the browsing session.
pub fn resolve_session_id(store: &AttributionStore, now: i64) -> String {
    if let Ok(Some(id)) = store.backends.session.get(SESSION_ID_KEY) {
        return id;
    }

    let id = generate_uid(now);
    debug!(session_id = %id, "generated new session id");
    store.backends.session.set(SESSION_ID_KEY, &id).ok();

    id
}
