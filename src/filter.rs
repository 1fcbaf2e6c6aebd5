//! Subscription filters and `REQ`/`CLOSE` messages.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    config::csv_strings,
    error::{Error, Result},
    event::{to_ascii_json, to_ascii_string},
};

/// Recognized filter fields, in the order they are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    Authors,
    Ids,
    Kinds,
    EventRefs,
    PubkeyRefs,
    Since,
    Until,
    Limit,
}

impl FilterField {
    pub const ALL: [FilterField; 8] = [
        FilterField::Authors,
        FilterField::Ids,
        FilterField::Kinds,
        FilterField::EventRefs,
        FilterField::PubkeyRefs,
        FilterField::Since,
        FilterField::Until,
        FilterField::Limit,
    ];

    /// Look up a field by its protocol name, rejecting anything unknown.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| Error::UnsupportedFilter(name.to_string()))
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterField::Authors => "authors",
            FilterField::Ids => "ids",
            FilterField::Kinds => "kinds",
            FilterField::EventRefs => "#e",
            FilterField::PubkeyRefs => "#p",
            FilterField::Since => "since",
            FilterField::Until => "until",
            FilterField::Limit => "limit",
        }
    }

    /// List fields take a sequence of values; the rest take one.
    pub fn is_list(self) -> bool {
        !matches!(
            self,
            FilterField::Since | FilterField::Until | FilterField::Limit
        )
    }
}

/// Raw value supplied for a filter field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    List(Vec<String>),
    Scalar(String),
}

impl FilterValue {
    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FilterValue::List(items.into_iter().map(Into::into).collect())
    }

    pub fn scalar(value: impl Into<String>) -> Self {
        FilterValue::Scalar(value.into())
    }
}

/// Criteria a relay matches events against. Unset fields are omitted from the
/// JSON entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    /// Events referencing these event ids.
    #[serde(rename = "#e", default, skip_serializing_if = "Option::is_none")]
    pub event_refs: Option<Vec<String>>,
    /// Events referencing these pubkeys.
    #[serde(rename = "#p", default, skip_serializing_if = "Option::is_none")]
    pub pubkey_refs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl SubscriptionFilter {
    /// Build a filter from string-keyed parameters.
    ///
    /// Unknown names fail with [`Error::UnsupportedFilter`] before anything
    /// reaches a relay. A field may appear once; an empty list counts as
    /// given but is left out of the JSON.
    pub fn from_params<I, K>(params: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, FilterValue)>,
        K: AsRef<str>,
    {
        let mut filter = Self::default();
        let mut seen = HashSet::new();
        for (name, value) in params {
            let field = FilterField::from_name(name.as_ref())?;
            if !seen.insert(field) {
                return Err(invalid(field, "given more than once"));
            }
            filter.set(field, value)?;
        }
        Ok(filter)
    }

    fn set(&mut self, field: FilterField, value: FilterValue) -> Result<()> {
        use FilterField::*;
        use FilterValue::{List, Scalar};

        match (field, value) {
            (Authors, List(items)) => self.authors = non_empty(items),
            (Ids, List(items)) => self.ids = non_empty(items),
            (EventRefs, List(items)) => self.event_refs = non_empty(items),
            (PubkeyRefs, List(items)) => self.pubkey_refs = non_empty(items),
            (Kinds, List(items)) => {
                let kinds = items
                    .iter()
                    .map(|k| parse_int::<u32>(field, k))
                    .collect::<Result<Vec<_>>>()?;
                self.kinds = non_empty(kinds);
            }
            (Since, Scalar(raw)) => self.since = Some(parse_int(field, &raw)?),
            (Until, Scalar(raw)) => self.until = Some(parse_int(field, &raw)?),
            (Limit, Scalar(raw)) => self.limit = Some(parse_int(field, &raw)?),
            (_, Scalar(_)) => return Err(invalid(field, "expected a list")),
            (_, List(_)) => return Err(invalid(field, "expected a single value")),
        }
        Ok(())
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

/// Parse a `NAME=VALUE` command-line filter argument. List fields take a
/// comma-separated value.
pub fn parse_filter_arg(arg: &str) -> Result<(String, FilterValue)> {
    let Some((name, raw)) = arg.split_once('=') else {
        let field = FilterField::from_name(arg.trim())?;
        return Err(invalid(field, "expected NAME=VALUE"));
    };
    let name = name.trim();
    let field = FilterField::from_name(name)?;
    let value = if field.is_list() {
        FilterValue::list(csv_strings(raw))
    } else {
        FilterValue::scalar(raw.trim())
    };
    Ok((name.to_string(), value))
}

fn parse_int<T: std::str::FromStr>(field: FilterField, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(field, &format!("{raw:?} is not a non-negative integer")))
}

fn invalid(field: FilterField, reason: &str) -> Error {
    Error::InvalidFilterValue {
        field: field.name().to_string(),
        reason: reason.to_string(),
    }
}

/// A filter bound to the requester it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    filter: SubscriptionFilter,
    subscription_id: String,
}

impl SubscriptionRequest {
    pub fn build(requester_pubkey: &str, filter: SubscriptionFilter) -> Result<Self> {
        let subscription_id = Self::derive_id(requester_pubkey, &filter)?;
        Ok(Self {
            filter,
            subscription_id,
        })
    }

    pub fn from_params<I, K>(requester_pubkey: &str, params: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, FilterValue)>,
        K: AsRef<str>,
    {
        Self::build(requester_pubkey, SubscriptionFilter::from_params(params)?)
    }

    /// Hex SHA-256 of the requester pubkey followed by the compact filter JSON.
    /// Anyone holding the same pubkey and filter derives the same id.
    pub fn derive_id(requester_pubkey: &str, filter: &SubscriptionFilter) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(requester_pubkey.as_bytes());
        hasher.update(to_ascii_json(filter)?);
        Ok(hex::encode(hasher.finalize()))
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// `["REQ", <id>, {filter}]`
    pub fn open_payload(&self) -> Result<String> {
        to_ascii_string(&("REQ", &self.subscription_id, &self.filter))
    }

    /// `["CLOSE", <id>]`
    pub fn close_payload(&self) -> Result<String> {
        to_ascii_string(&("CLOSE", &self.subscription_id))
    }
}
