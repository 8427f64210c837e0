//! Relay query filters

use serde::{Deserialize, Serialize};

use super::envelope::{EventKind, Envelope};

/// A relay-side filter. All present conditions must match; within a
/// condition any listed value may match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(rename = "#d", default, skip_serializing_if = "Option::is_none")]
    pub d_tags: Option<Vec<String>>,
    #[serde(rename = "#p", default, skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
    #[serde(rename = "#e", default, skip_serializing_if = "Option::is_none")]
    pub e_tags: Option<Vec<String>>,
    #[serde(rename = "#t", default, skip_serializing_if = "Option::is_none")]
    pub t_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kinds.get_or_insert_with(Vec::new).push(kind.as_u16());
        self
    }

    pub fn author(mut self, pubkey: impl Into<String>) -> Self {
        self.authors.get_or_insert_with(Vec::new).push(pubkey.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.ids.get_or_insert_with(Vec::new).push(id.into());
        self
    }

    pub fn d_tag(mut self, value: impl Into<String>) -> Self {
        self.d_tags.get_or_insert_with(Vec::new).push(value.into());
        self
    }

    pub fn p_tag(mut self, value: impl Into<String>) -> Self {
        self.p_tags.get_or_insert_with(Vec::new).push(value.into());
        self
    }

    pub fn e_tag(mut self, value: impl Into<String>) -> Self {
        self.e_tags.get_or_insert_with(Vec::new).push(value.into());
        self
    }

    pub fn t_tag(mut self, value: impl Into<String>) -> Self {
        self.t_tags.get_or_insert_with(Vec::new).push(value.into());
        self
    }

    /// Lower bound on `created_at`; `None` leaves it out entirely.
    pub fn since(mut self, since: Option<u64>) -> Self {
        self.since = since;
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `envelope` satisfies this filter (`limit` is not considered).
    pub fn matches(&self, envelope: &Envelope) -> bool {
        fn any_of(list: &Option<Vec<String>>, value: &str) -> bool {
            list.as_ref().map_or(true, |l| l.iter().any(|v| v == value))
        }
        fn tag_matches(list: &Option<Vec<String>>, envelope: &Envelope, name: &str) -> bool {
            list.as_ref().map_or(true, |wanted| {
                envelope
                    .tag_values(name)
                    .any(|value| wanted.iter().any(|w| w == value))
            })
        }

        any_of(&self.ids, &envelope.id)
            && any_of(&self.authors, &envelope.pubkey)
            && self
                .kinds
                .as_ref()
                .map_or(true, |k| k.contains(&envelope.kind))
            && tag_matches(&self.d_tags, envelope, "d")
            && tag_matches(&self.p_tags, envelope, "p")
            && tag_matches(&self.e_tags, envelope, "e")
            && tag_matches(&self.t_tags, envelope, "t")
            && self.since.map_or(true, |s| envelope.created_at >= s)
            && self.until.map_or(true, |u| envelope.created_at <= u)
    }
}
