// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Currency balances as one keyed map.
//!
//! The user document stores the web currency at the top-level `ticket` field
//! and every other balance under `items.<key>`. [`BalanceKey`] hides that
//! difference: callers credit and debit by key and get back a single
//! field-masked write for whatever changed.

use crate::db::{user_doc, Write};
use crate::error::AppError;
use crate::models::User;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Address of one balance on the user document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BalanceKey {
    /// Web-store currency (`ticket`)
    Ticket,
    /// Entry in the `items` map; the game currency is `currency_credit`
    Item(String),
}

impl BalanceKey {
    /// Envelope item ID that credits the ticket balance.
    pub const TICKET_ID: &'static str = "currency_ticket";
    /// Envelope item ID (and `items` key) of the game currency.
    pub const CREDIT_ID: &'static str = "currency_credit";

    pub fn credit() -> Self {
        BalanceKey::Item(Self::CREDIT_ID.to_string())
    }

    /// The currency an envelope line with this item ID pays out, if any.
    pub fn currency(item_id: &str) -> Option<Self> {
        match item_id {
            Self::TICKET_ID => Some(BalanceKey::Ticket),
            Self::CREDIT_ID => Some(Self::credit()),
            _ => None,
        }
    }

    pub fn is_currency_id(item_id: &str) -> bool {
        Self::currency(item_id).is_some()
    }

    /// Key for an arbitrary `items` entry. The key becomes part of a field
    /// path, so only plain identifiers are accepted.
    pub fn item(key: &str) -> Result<Self, AppError> {
        let mut chars = key.chars();
        let valid = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid {
            return Err(AppError::InvalidPayload(format!(
                "invalid balance key: {:?}",
                key
            )));
        }
        Ok(BalanceKey::Item(key.to_string()))
    }

    /// Field path on the user document.
    pub fn field_path(&self) -> String {
        match self {
            BalanceKey::Ticket => "ticket".to_string(),
            BalanceKey::Item(key) => format!("items.{}", key),
        }
    }
}

impl std::fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceKey::Ticket => write!(f, "ticket"),
            BalanceKey::Item(key) => write!(f, "{}", key),
        }
    }
}

/// Working copy of a user's balances inside a transaction body.
#[derive(Debug, Clone, Default)]
pub struct Balances {
    values: BTreeMap<BalanceKey, u64>,
    changed: BTreeSet<BalanceKey>,
}

impl Balances {
    pub fn of(user: &User) -> Self {
        let mut values = BTreeMap::new();
        values.insert(BalanceKey::Ticket, user.ticket);
        for (key, amount) in &user.items {
            values.insert(BalanceKey::Item(key.clone()), *amount);
        }
        Self {
            values,
            changed: BTreeSet::new(),
        }
    }

    /// Zero balances for an account being opened. Both currencies are
    /// written out so the new document carries explicit zeros.
    pub fn opened() -> Self {
        let mut balances = Self::default();
        for key in [BalanceKey::Ticket, BalanceKey::credit()] {
            balances.values.insert(key.clone(), 0);
            balances.changed.insert(key);
        }
        balances
    }

    pub fn get(&self, key: &BalanceKey) -> u64 {
        self.values.get(key).copied().unwrap_or(0)
    }

    /// Add `amount`. No upper bound beyond integer range.
    pub fn credit(&mut self, key: &BalanceKey, amount: u64) -> Result<u64, AppError> {
        let updated = self
            .get(key)
            .checked_add(amount)
            .ok_or_else(|| AppError::InvalidPayload(format!("{} balance overflow", key)))?;
        self.values.insert(key.clone(), updated);
        self.changed.insert(key.clone());
        Ok(updated)
    }

    /// Subtract `amount`, refusing to go below zero.
    pub fn debit(&mut self, key: &BalanceKey, amount: u64) -> Result<u64, AppError> {
        let updated = self
            .get(key)
            .checked_sub(amount)
            .ok_or_else(|| AppError::InsufficientFunds(key.clone()))?;
        self.values.insert(key.clone(), updated);
        self.changed.insert(key.clone());
        Ok(updated)
    }

    /// Merge write for the balances that changed, stamping `lastUpdatedAt`.
    pub fn into_write(self, user_id: &str, now: &str) -> Write {
        let mut data = Map::new();
        let mut items = Map::new();
        let mut fields = vec!["lastUpdatedAt".to_string()];
        data.insert("lastUpdatedAt".to_string(), Value::from(now));

        for key in &self.changed {
            let amount = Value::from(self.get(key));
            match key {
                BalanceKey::Ticket => {
                    data.insert("ticket".to_string(), amount);
                }
                BalanceKey::Item(item) => {
                    items.insert(item.clone(), amount);
                }
            }
            fields.push(key.field_path());
        }
        if !items.is_empty() {
            data.insert("items".to_string(), Value::Object(items));
        }

        Write::Merge {
            path: user_doc(user_id),
            data: Value::Object(data),
            fields,
        }
    }
}
