use percent_encoding::percent_decode_str;
use url::Url;

use crate::snapshot::{AttributionSnapshot, TrackingParam};

/// Reads the fixed tracking parameter set out of a page URL. Only the
/// first occurrence of each key is considered; a parameter that fails to
/// decode is captured as empty rather than failing the whole extraction.
pub fn from_url(url: &Url) -> AttributionSnapshot {
    let mut snapshot = AttributionSnapshot::default();
    for param in TrackingParam::ALL {
        if let Some(value) = query_param(url, param.query_key()) {
            snapshot.set(param, value);
        }
    }
    snapshot
}

/// First-match lookup of a raw query parameter. `+` decodes as a space
/// and values are percent-decoded; a bare key without `=` reads as empty.
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    let query = url.query()?;
    for pair in query.split('&') {
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (pair, None),
        };
        if key == name {
            return Some(value.map(decode_value).unwrap_or_default());
        }
    }
    None
}

/// Decodes one percent-encoded query value. A malformed escape or invalid
/// UTF-8 yields an empty string for this value only.
fn decode_value(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    if !valid_percent_escapes(&spaced) {
        return String::new();
    }
    match percent_decode_str(&spaced).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::new(),
    }
}

fn valid_percent_escapes(value: &str) -> bool {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len()
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::{from_url, query_param};

    fn url(input: &str) -> Url {
        Url::parse(input).unwrap()
    }

    #[test]
    fn extracts_the_fixed_parameter_set() {
        let page = url("https://shop.example/?utm_source=google&utm_medium=cpc&gclid=abc123");
        let snapshot = from_url(&page);

        assert_eq!(snapshot.utm_source, "google");
        assert_eq!(snapshot.utm_medium, "cpc");
        assert_eq!(snapshot.gclid, "abc123");
        assert_eq!(snapshot.utm_campaign, "");
    }

    #[test]
    fn first_occurrence_wins() {
        let page = url("https://shop.example/?utm_source=first&utm_source=second");
        assert_eq!(query_param(&page, "utm_source").as_deref(), Some("first"));
    }

    #[test]
    fn plus_decodes_as_space() {
        let page = url("https://shop.example/?utm_campaign=spring+sale");
        assert_eq!(
            query_param(&page, "utm_campaign").as_deref(),
            Some("spring sale")
        );
    }

    #[test]
    fn percent_encoding_is_decoded() {
        let page = url("https://shop.example/?utm_term=caf%C3%A9");
        assert_eq!(query_param(&page, "utm_term").as_deref(), Some("café"));
    }

    #[test]
    fn malformed_escape_reads_as_empty() {
        let page = url("https://shop.example/?utm_term=%zz&utm_source=google");
        assert_eq!(query_param(&page, "utm_term").as_deref(), Some(""));
        assert_eq!(query_param(&page, "utm_source").as_deref(), Some("google"));
    }

    #[test]
    fn truncated_escape_reads_as_empty() {
        let page = url("https://shop.example/?utm_term=abc%2");
        assert_eq!(query_param(&page, "utm_term").as_deref(), Some(""));
    }

    #[test]
    fn bare_key_reads_as_empty() {
        let page = url("https://shop.example/?utm_source&other=1");
        assert_eq!(query_param(&page, "utm_source").as_deref(), Some(""));
    }

    #[test]
    fn absent_key_is_none() {
        let page = url("https://shop.example/?other=1");
        assert_eq!(query_param(&page, "utm_source"), None);
    }

    #[test]
    fn no_query_string_is_none() {
        let page = url("https://shop.example/landing");
        assert_eq!(query_param(&page, "utm_source"), None);
    }
}
