use serde::{Deserialize, Serialize};

/// The fixed set of tracking parameters captured from the query string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackingParam {
    Source,
    Medium,
    Campaign,
    Content,
    Term,
    Gclid,
    Fbclid,
}

impl TrackingParam {
    pub const ALL: [TrackingParam; 7] = [
        TrackingParam::Source,
        TrackingParam::Medium,
        TrackingParam::Campaign,
        TrackingParam::Content,
        TrackingParam::Term,
        TrackingParam::Gclid,
        TrackingParam::Fbclid,
    ];

    pub const UTM: [TrackingParam; 5] = [
        TrackingParam::Source,
        TrackingParam::Medium,
        TrackingParam::Campaign,
        TrackingParam::Content,
        TrackingParam::Term,
    ];

    pub const CLICK_IDS: [TrackingParam; 2] = [TrackingParam::Gclid, TrackingParam::Fbclid];

    /// The query string key this parameter is read from and written back as.
    pub fn query_key(&self) -> &'static str {
        match self {
            TrackingParam::Source => "utm_source",
            TrackingParam::Medium => "utm_medium",
            TrackingParam::Campaign => "utm_campaign",
            TrackingParam::Content => "utm_content",
            TrackingParam::Term => "utm_term",
            TrackingParam::Gclid => "gclid",
            TrackingParam::Fbclid => "fbclid",
        }
    }
}

/// One attribution observation. Every field is always present; an absent
/// query parameter is represented as an empty string so that merges stay
/// total.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AttributionSnapshot {
    #[serde(default)]
    pub utm_source: String,
    #[serde(default)]
    pub utm_medium: String,
    #[serde(default)]
    pub utm_campaign: String,
    #[serde(default)]
    pub utm_content: String,
    #[serde(default)]
    pub utm_term: String,
    #[serde(default)]
    pub gclid: String,
    #[serde(default)]
    pub fbclid: String,
}

impl AttributionSnapshot {
    pub fn get(&self, param: TrackingParam) -> &str {
        match param {
            TrackingParam::Source => &self.utm_source,
            TrackingParam::Medium => &self.utm_medium,
            TrackingParam::Campaign => &self.utm_campaign,
            TrackingParam::Content => &self.utm_content,
            TrackingParam::Term => &self.utm_term,
            TrackingParam::Gclid => &self.gclid,
            TrackingParam::Fbclid => &self.fbclid,
        }
    }

    pub fn set(&mut self, param: TrackingParam, value: String) {
        let slot = match param {
            TrackingParam::Source => &mut self.utm_source,
            TrackingParam::Medium => &mut self.utm_medium,
            TrackingParam::Campaign => &mut self.utm_campaign,
            TrackingParam::Content => &mut self.utm_content,
            TrackingParam::Term => &mut self.utm_term,
            TrackingParam::Gclid => &mut self.gclid,
            TrackingParam::Fbclid => &mut self.fbclid,
        };
        *slot = value;
    }

    /// True when at least one tracking field is populated.
    pub fn has_tracking_data(&self) -> bool {
        TrackingParam::ALL
            .iter()
            .any(|param| !self.get(*param).is_empty())
    }

    /// Copies every non-empty field of `other` into `self` where `self`
    /// is still empty. A populated field is never clobbered.
    pub fn merge_non_empty(&mut self, other: &AttributionSnapshot) {
        for param in TrackingParam::ALL {
            if self.get(param).is_empty() && !other.get(param).is_empty() {
                self.set(param, other.get(param).to_string());
            }
        }
    }

    /// Pipe-joined values of the fixed parameter list, with the record
    /// timestamp as the final field. Used by the compact URL form.
    pub fn composite(&self, timestamp: i64) -> String {
        let mut fields: Vec<&str> = TrackingParam::ALL
            .iter()
            .map(|param| self.get(*param))
            .collect();
        let ts = timestamp.to_string();
        fields.push(&ts);
        fields.join("|")
    }
}
