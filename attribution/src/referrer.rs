use url::Url;

/// UTM triple derived from a referrer when the landing URL carried no
/// tracking parameters of its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferrerAttribution {
    pub source: String,
    pub medium: String,
    pub campaign: String,
}

impl ReferrerAttribution {
    fn direct() -> ReferrerAttribution {
        ReferrerAttribution {
            source: String::from("direct"),
            medium: String::from("direct"),
            campaign: String::from("direct"),
        }
    }

    fn referral(source: &str, medium: &str) -> ReferrerAttribution {
        ReferrerAttribution {
            source: String::from(source),
            medium: String::from(medium),
            campaign: format!("referral_{source}"),
        }
    }
}

/// Well-known referrer domains mapped to (source, medium). Checked in
/// order, first substring match of the referrer host wins.
const KNOWN_SOURCES: &[(&str, &str, &str)] = &[
    ("google.com", "google", "organic"),
    ("google.com.br", "google", "organic"),
    ("google.co.uk", "google", "organic"),
    ("bing.com", "bing", "organic"),
    ("yahoo.com", "yahoo", "organic"),
    ("duckduckgo.com", "duckduckgo", "organic"),
    ("facebook.com", "facebook", "social"),
    ("instagram.com", "instagram", "social"),
    ("twitter.com", "twitter", "social"),
    ("x.com", "twitter", "social"),
    ("linkedin.com", "linkedin", "social"),
    ("youtube.com", "youtube", "social"),
    ("whatsapp.com", "whatsapp", "social"),
    ("telegram.org", "telegram", "social"),
    ("pinterest.com", "pinterest", "social"),
    ("tiktok.com", "tiktok", "social"),
    ("reddit.com", "reddit", "social"),
    ("snapchat.com", "snapchat", "social"),
];

/// Classifies a referrer into source/medium/campaign. An absent or
/// unparseable referrer is direct traffic; an unknown domain becomes the
/// source verbatim with medium `referral`.
pub fn classify(referrer: &str) -> ReferrerAttribution {
    if referrer.is_empty() {
        return ReferrerAttribution::direct();
    }

    let host = match Url::parse(referrer).ok().and_then(|url| {
        url.host_str()
            .map(|host| host.to_ascii_lowercase())
    }) {
        Some(host) => host,
        None => return ReferrerAttribution::direct(),
    };

    for (domain, source, medium) in KNOWN_SOURCES {
        if host.contains(domain) {
            return ReferrerAttribution::referral(source, medium);
        }
    }

    let source = host.strip_prefix("www.").unwrap_or(&host);
    ReferrerAttribution::referral(source, "referral")
}
