// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Catalog documents (`items/{web|game|events}`).
//!
//! The catalog is written by an external admin process whose entries name
//! the item under any of `id`, `itemID`, `type`, `sku` or `key`. Entries are
//! kept as raw maps and read through [`CatalogKey`] and typed accessors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Purchasable item namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Web store, paid in tickets
    Web,
    /// Game store, paid in credits
    Game,
    /// Event rewards (display only)
    Events,
}

impl Channel {
    pub fn doc_id(&self) -> &'static str {
        match self {
            Channel::Web => "web",
            Channel::Game => "game",
            Channel::Events => "events",
        }
    }

    /// Parse a purchase source hint. Only the two store channels count.
    pub fn from_hint(hint: Option<&str>) -> Option<Self> {
        match hint.map(str::trim) {
            Some("web") => Some(Channel::Web),
            Some("game") => Some(Channel::Game),
            _ => None,
        }
    }
}

/// Catalog document body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDoc {
    #[serde(default)]
    pub data: Vec<CatalogEntry>,
}

/// One catalog entry, schema as written upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CatalogEntry(pub Map<String, Value>);

/// One way an entry (or a purchase request) names its item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKey<'a> {
    Id(&'a str),
    ItemId(&'a str),
    Type(&'a str),
    Sku(&'a str),
    Key(&'a str),
}

/// Key fields in resolution priority order.
pub const KEY_FIELDS: [&str; 5] = ["id", "itemID", "type", "sku", "key"];

impl<'a> CatalogKey<'a> {
    fn from_field(field: &str, value: &'a str) -> Option<Self> {
        match field {
            "id" => Some(CatalogKey::Id(value)),
            "itemID" => Some(CatalogKey::ItemId(value)),
            "type" => Some(CatalogKey::Type(value)),
            "sku" => Some(CatalogKey::Sku(value)),
            "key" => Some(CatalogKey::Key(value)),
            _ => None,
        }
    }

    /// Every non-empty string key on `map`, highest priority first.
    pub fn candidates(map: &'a Map<String, Value>) -> impl Iterator<Item = CatalogKey<'a>> + 'a {
        KEY_FIELDS.iter().filter_map(move |field| {
            let value = map.get(*field)?.as_str()?.trim();
            if value.is_empty() {
                return None;
            }
            Self::from_field(field, value)
        })
    }

    /// The first key present, in fixed priority order.
    pub fn resolve(map: &'a Map<String, Value>) -> Option<CatalogKey<'a>> {
        Self::candidates(map).next()
    }

    pub fn as_str(&self) -> &'a str {
        match *self {
            CatalogKey::Id(v)
            | CatalogKey::ItemId(v)
            | CatalogKey::Type(v)
            | CatalogKey::Sku(v)
            | CatalogKey::Key(v) => v,
        }
    }
}

impl CatalogEntry {
    /// Whether any of the entry's key fields equals `key`.
    pub fn matches(&self, key: &str) -> bool {
        CatalogKey::candidates(&self.0).any(|candidate| candidate.as_str() == key)
    }

    /// Non-empty trimmed string field.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn title(&self) -> Option<&str> {
        self.str_field("title")
    }

    /// Item ID granted by the entry (`type`).
    pub fn item_type(&self) -> Option<&str> {
        self.str_field("type")
    }

    /// Unit cost from `cost`, or `price` when `cost` is absent.
    ///
    /// Returns `None` when the value is not numeric.
    pub fn unit_cost(&self) -> Option<f64> {
        let raw = self
            .0
            .get("cost")
            .filter(|v| !v.is_null())
            .or_else(|| self.0.get("price"))?;

        match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Bundle size, when set to a positive integer.
    pub fn count(&self) -> Option<u64> {
        self.0.get("count").and_then(Value::as_u64).filter(|c| *c > 0)
    }
}

/// First entry in `entries` matching `key`.
pub fn find_entry<'a>(entries: &'a [CatalogEntry], key: &str) -> Option<&'a CatalogEntry> {
    entries.iter().find(|entry| entry.matches(key))
}
