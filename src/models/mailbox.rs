// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Reward envelopes stored in `users/{uid}/mailbox`.

use crate::models::BalanceKey;
use serde::{Deserialize, Serialize};

/// One mailbox entry: a bundle of reward lines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub items: Vec<ItemLine>,
    /// Sole record of whether the rewards were paid out. Missing means unclaimed.
    #[serde(default)]
    pub is_claimed: bool,
    #[serde(default)]
    pub is_deleted: bool,
    /// Server-assigned write time; orders the mailbox and serves as its cursor
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemLine {
    #[serde(rename = "itemID")]
    pub item_id: String,
    pub count: u64,
}

impl Envelope {
    /// True when every line pays out a currency.
    pub fn is_currency_only(&self) -> bool {
        !self.items.is_empty()
            && self
                .items
                .iter()
                .all(|line| BalanceKey::is_currency_id(&line.item_id))
    }
}
