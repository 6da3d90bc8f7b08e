//! NIP-01 subscription filters and event matching.

use std::collections::{BTreeMap, BTreeSet};

use serde::{de, ser::SerializeMap, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{
    event::{Event, EventId},
    keys::PublicKey,
};

/// Predicates describing which events a subscription receives. Every absent
/// field is unconstrained.
///
/// ```json
/// {"authors": ["6e46..."], "kinds": [1], "#t": ["news"], "since": 1700000000}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Exact event ids.
    pub ids: Option<BTreeSet<EventId>>,
    pub authors: Option<BTreeSet<PublicKey>>,
    pub kinds: Option<BTreeSet<u32>>,
    /// Single-letter tag constraints, serialized as `#<letter>`.
    pub tags: BTreeMap<char, BTreeSet<String>>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<u64>,
    /// Inclusive upper bound on `created_at`.
    pub until: Option<u64>,
    /// Advisory bound on stored events the relay replays; not a predicate.
    pub limit: Option<usize>,
}

impl Filter {
    /// Filter that matches every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept events whose id is one of `ids`. Repeated calls widen the set.
    pub fn ids(mut self, ids: impl IntoIterator<Item = EventId>) -> Self {
        self.ids.get_or_insert_with(BTreeSet::new).extend(ids);
        self
    }

    /// Accept events signed by one of `authors`.
    pub fn authors(mut self, authors: impl IntoIterator<Item = PublicKey>) -> Self {
        self.authors.get_or_insert_with(BTreeSet::new).extend(authors);
        self
    }

    /// Accept events of one of `kinds`.
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds.get_or_insert_with(BTreeSet::new).extend(kinds);
        self
    }

    /// Require a tag named `name` whose first value is one of `values`.
    pub fn tag<I, S>(mut self, name: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(name)
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Accept events created at or after `since`.
    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Accept events created at or before `until`.
    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    /// Ask the relay to replay at most `limit` stored events.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True when no field constrains matching.
    pub fn is_unconstrained(&self) -> bool {
        self.ids.is_none()
            && self.authors.is_none()
            && self.kinds.is_none()
            && self.tags.is_empty()
            && self.since.is_none()
            && self.until.is_none()
    }

    /// Check whether `ev` satisfies every present constraint.
    pub fn matches(&self, ev: &Event) -> bool {
        self.ids.as_ref().map_or(true, |ids| ids.contains(ev.id()))
            && self
                .authors
                .as_ref()
                .map_or(true, |authors| authors.contains(ev.pubkey()))
            && self
                .kinds
                .as_ref()
                .map_or(true, |kinds| kinds.contains(&ev.kind()))
            && self.since.map_or(true, |s| ev.created_at() >= s)
            && self.until.map_or(true, |u| ev.created_at() <= u)
            && self
                .tags
                .iter()
                .all(|(name, accepted)| has_tag_value(ev, *name, accepted))
    }
}

/// True when some tag named by the single letter `name` has its first value
/// in `accepted`.
fn has_tag_value(ev: &Event, name: char, accepted: &BTreeSet<String>) -> bool {
    ev.tags().iter().any(|tag| {
        let mut chars = tag.name().unwrap_or_default().chars();
        chars.next() == Some(name)
            && chars.next().is_none()
            && tag.value().map_or(false, |v| accepted.contains(v))
    })
}

/// OR-combination used by subscriptions holding several filters.
pub fn matches_any(filters: &[Filter], ev: &Event) -> bool {
    filters.iter().any(|f| f.matches(ev))
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(ids) = &self.ids {
            map.serialize_entry("ids", ids)?;
        }
        if let Some(authors) = &self.authors {
            map.serialize_entry("authors", authors)?;
        }
        if let Some(kinds) = &self.kinds {
            map.serialize_entry("kinds", kinds)?;
        }
        for (name, values) in &self.tags {
            map.serialize_entry(&format!("#{name}"), values)?;
        }
        if let Some(since) = self.since {
            map.serialize_entry("since", &since)?;
        }
        if let Some(until) = self.until {
            map.serialize_entry("until", &until)?;
        }
        if let Some(limit) = self.limit {
            map.serialize_entry("limit", &limit)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        let mut filter = Filter::default();
        for (key, val) in raw {
            match key.as_str() {
                "ids" => filter.ids = Some(from_value(val)?),
                "authors" => filter.authors = Some(from_value(val)?),
                "kinds" => filter.kinds = Some(from_value(val)?),
                "since" => filter.since = from_value(val)?,
                "until" => filter.until = from_value(val)?,
                "limit" => filter.limit = from_value(val)?,
                other => {
                    // Only `#<letter>` keys are tag constraints; anything else is ignored.
                    let mut chars = other.chars();
                    let letter = (chars.next(), chars.next(), chars.next());
                    if let (Some('#'), Some(name), None) = letter {
                        filter.tags.insert(name, from_value(val)?);
                    }
                }
            }
        }
        Ok(filter)
    }
}

fn from_value<T, E>(val: Value) -> Result<T, E>
where
    T: de::DeserializeOwned,
    E: de::Error,
{
    serde_json::from_value(val).map_err(E::custom)
}
