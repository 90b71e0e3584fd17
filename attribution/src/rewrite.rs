use std::collections::HashSet;

use url::Url;

use crate::snapshot::TrackingParam;
use crate::store::TouchRecord;

/// Query key carrying the pipe-joined first-touch record.
pub const ENTRY_KEY: &str = "src";
/// Query key carrying the pipe-joined current-touch record.
pub const CURRENT_KEY: &str = "sck";

/// How resolved attribution is written back into the visible URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewriteMode {
    /// One query parameter per tracking field, current values.
    Individual,
    /// Two compact pipe-delimited parameters, `src` for the first touch
    /// and `sck` for the current touch.
    Composite,
}

/// Rebuilds the page URL with resolved attribution appended. Path,
/// fragment, and every query parameter not owned by the tracker are
/// preserved; a key that already exists is never appended again, which
/// makes the rewrite idempotent. The caller applies the result with a
/// history replacement, not a navigation.
pub fn rewrite_visible_url(
    url: &Url,
    first: &TouchRecord,
    current: &TouchRecord,
    mode: RewriteMode,
) -> Url {
    let existing: HashSet<String> = url
        .query_pairs()
        .map(|(key, _)| key.into_owned())
        .collect();

    let mut additions: Vec<(&str, String)> = Vec::new();
    match mode {
        RewriteMode::Individual => {
            for param in TrackingParam::ALL {
                let key = param.query_key();
                let value = current.snapshot.get(param);
                if !value.is_empty() && !existing.contains(key) {
                    additions.push((key, value.to_string()));
                }
            }
        }
        RewriteMode::Composite => {
            if !existing.contains(ENTRY_KEY) {
                additions.push((ENTRY_KEY, first.snapshot.composite(first.timestamp)));
            }
            if !existing.contains(CURRENT_KEY) {
                additions.push((CURRENT_KEY, current.snapshot.composite(current.timestamp)));
            }
        }
    }

    if additions.is_empty() {
        return url.clone();
    }

    let mut rewritten = url.clone();
    {
        let mut pairs = rewritten.query_pairs_mut();
        for (key, value) in &additions {
            pairs.append_pair(key, value);
        }
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use url::Url;

    use crate::snapshot::AttributionSnapshot;
    use crate::store::TouchRecord;

    use super::{rewrite_visible_url, RewriteMode};

    fn record(source: &str, medium: &str, timestamp: i64) -> TouchRecord {
        TouchRecord {
            snapshot: AttributionSnapshot {
                utm_source: String::from(source),
                utm_medium: String::from(medium),
                ..Default::default()
            },
            referrer: String::new(),
            timestamp,
        }
    }

    #[test]
    fn composite_appends_src_and_sck() {
        let url = Url::parse("https://shop.example/landing?page=2").unwrap();
        let first = record("google", "cpc", 100);
        let current = record("facebook", "social", 200);

        let rewritten = rewrite_visible_url(&url, &first, &current, RewriteMode::Composite);
        let query = rewritten.query().unwrap();

        assert!(query.contains("page=2"));
        assert!(query.contains("src=google%7Ccpc%7C%7C%7C%7C%7C%7C100"));
        assert!(query.contains("sck=facebook%7Csocial%7C%7C%7C%7C%7C%7C200"));
    }

    #[test]
    fn composite_rewrite_is_idempotent() {
        let url = Url::parse("https://shop.example/?utm_source=google").unwrap();
        let first = record("google", "cpc", 100);
        let current = record("google", "cpc", 200);

        let once = rewrite_visible_url(&url, &first, &current, RewriteMode::Composite);
        let twice = rewrite_visible_url(&once, &first, &current, RewriteMode::Composite);
        assert_eq!(once, twice);
    }

    #[test]
    fn individual_appends_only_non_empty_missing_keys() {
        let url = Url::parse("https://shop.example/?utm_source=original").unwrap();
        let current = record("resolved", "cpc", 200);

        let rewritten =
            rewrite_visible_url(&url, &current, &current, RewriteMode::Individual);
        let query = rewritten.query().unwrap();

        // Existing key untouched, missing key appended, empty fields skipped.
        assert!(query.contains("utm_source=original"));
        assert!(!query.contains("utm_source=resolved"));
        assert!(query.contains("utm_medium=cpc"));
        assert!(!query.contains("utm_campaign"));
    }

    #[test]
    fn individual_rewrite_is_idempotent() {
        let url = Url::parse("https://shop.example/").unwrap();
        let current = record("google", "cpc", 200);

        let once = rewrite_visible_url(&url, &current, &current, RewriteMode::Individual);
        let twice = rewrite_visible_url(&once, &current, &current, RewriteMode::Individual);
        assert_eq!(once, twice);
    }

    #[test]
    fn fragment_and_path_are_preserved() {
        let url = Url::parse("https://shop.example/pricing?plan=pro#faq").unwrap();
        let first = record("google", "cpc", 100);

        let rewritten = rewrite_visible_url(&url, &first, &first, RewriteMode::Composite);

        assert_eq!(rewritten.path(), "/pricing");
        assert_eq!(rewritten.fragment(), Some("faq"));
        assert!(rewritten.query().unwrap().contains("plan=pro"));
    }

    #[test]
    fn nothing_to_add_returns_the_url_unchanged() {
        let url = Url::parse("https://shop.example/?src=a&sck=b").unwrap();
        let first = record("google", "cpc", 100);

        let rewritten = rewrite_visible_url(&url, &first, &first, RewriteMode::Composite);
        assert_eq!(rewritten, url);
    }
}
