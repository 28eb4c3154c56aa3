// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Reward mailbox: envelope delivery and listing.
//!
//! Currency-only envelopes pay out at delivery time, in the same transaction
//! that writes the envelope, and are stored already claimed. Envelopes with
//! any other item are stored unclaimed for the game client to redeem.

use crate::db::{mailbox, user_doc, FirestoreDb, Order, Page, Query, StoredDoc, TxnPlan, Write};
use crate::error::{AppError, Result};
use crate::models::{BalanceKey, Envelope, ItemLine, User};
use crate::services::ledger::{post_entries, Entry};
use crate::time_utils::server_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const UNKNOWN_ITEM_ID: &str = "unknown_item";

/// Delivery request body.
///
/// Accepts either an `items` list or the single-line form
/// `{type: "coin" | "ticket" | <id>, itemID, count}` used by older clients.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryRequest {
    pub title: Option<String>,
    pub message: Option<String>,
    /// Older clients send the body as `content`
    pub content: Option<String>,
    pub items: Option<Vec<Value>>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(rename = "itemID")]
    pub item_id: Option<String>,
    pub count: Option<Value>,
}

impl DeliveryRequest {
    /// Raw item lines, mapping the single-line form onto one line.
    pub fn raw_lines(&self) -> Vec<Value> {
        if let Some(items) = &self.items {
            return items.clone();
        }

        let item_id = match self.kind.as_deref().map(str::trim) {
            Some("coin") => BalanceKey::CREDIT_ID.to_string(),
            Some("ticket") => BalanceKey::TICKET_ID.to_string(),
            Some(kind) if !kind.is_empty() => kind.to_string(),
            _ => self
                .item_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_ITEM_ID.to_string()),
        };
        let count = self
            .count
            .as_ref()
            .and_then(Value::as_u64)
            .filter(|c| *c > 0)
            .unwrap_or(1);

        vec![serde_json::json!({ "itemID": item_id, "count": count })]
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref().or(self.content.as_deref())
    }
}

/// Keep only well-formed lines: string item ID and positive integer count.
pub fn sanitize_lines(raw: &[Value]) -> Vec<ItemLine> {
    raw.iter()
        .filter_map(|line| {
            let item_id = line.get("itemID")?.as_str()?.trim();
            if item_id.is_empty() {
                return None;
            }
            let count = line.get("count")?.as_u64().filter(|c| *c > 0)?;
            Some(ItemLine {
                item_id: item_id.to_string(),
                count,
            })
        })
        .collect()
}

/// Outcome of a delivery.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub id: String,
    pub is_claimed: bool,
    /// Amount credited per currency (empty for item envelopes)
    pub credited: BTreeMap<String, u64>,
}

#[derive(Clone)]
pub struct MailboxService {
    db: FirestoreDb,
}

impl MailboxService {
    pub fn new(db: FirestoreDb) -> Self {
        Self { db }
    }

    /// Write an envelope to the user's mailbox, paying out currency-only
    /// envelopes in the same transaction.
    ///
    /// A user document that does not exist yet is opened with zero balances.
    pub async fn deliver(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
        raw_lines: &[Value],
    ) -> Result<DeliveryReceipt> {
        let title = title.trim();
        let message = message.trim();
        let lines = sanitize_lines(raw_lines);

        if title.is_empty() || message.is_empty() || lines.is_empty() {
            return Err(AppError::InvalidPayload(
                "title, message and items are required".to_string(),
            ));
        }

        let now = server_timestamp();
        let mut envelope = Envelope {
            title: title.to_string(),
            message: message.to_string(),
            items: lines,
            is_claimed: false,
            is_deleted: false,
            timestamp: now.clone(),
        };
        envelope.is_claimed = envelope.is_currency_only();

        let credits = if envelope.is_claimed {
            sum_currency(&envelope.items)?
        } else {
            BTreeMap::new()
        };
        let entries: Vec<Entry> = credits
            .iter()
            .map(|(key, amount)| Entry::Credit(key.clone(), *amount))
            .collect();

        // Generated once so a retried transaction body writes the same envelope
        let envelope_id = uuid::Uuid::new_v4().to_string();
        let envelope_write = Write::set(mailbox(user_id).doc(envelope_id.clone()), &envelope)?;

        self.db
            .run_transaction(&user_doc(user_id), |user: Option<User>| {
                let (balance_write, _) = post_entries(user_id, user.as_ref(), &entries, &now)?;
                Ok(TxnPlan::new(())
                    .write(envelope_write.clone())
                    .write(balance_write))
            })
            .await?;

        tracing::info!(
            user_id,
            envelope_id = %envelope_id,
            lines = envelope.items.len(),
            is_claimed = envelope.is_claimed,
            "Envelope delivered"
        );

        Ok(DeliveryReceipt {
            id: envelope_id,
            is_claimed: envelope.is_claimed,
            credited: credits
                .into_iter()
                .map(|(key, amount)| (key.to_string(), amount))
                .collect(),
        })
    }

    /// List envelopes newest first.
    ///
    /// With `include_currency` false, currency-only envelopes are dropped
    /// from the page after the query, so a page may hold fewer than `limit`
    /// entries while `next_cursor` is still set.
    pub async fn list(
        &self,
        user_id: &str,
        include_currency: bool,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<StoredDoc<Envelope>>> {
        let mut query = Query::new(mailbox(user_id))
            .order_by("timestamp", Order::Descending)
            .limit(limit);
        if let Some(cursor) = cursor {
            query = query.less_than("timestamp", cursor);
        }

        let docs: Vec<StoredDoc<Envelope>> = self.db.query(&query).await?;

        let next_cursor = if docs.len() as u32 >= limit {
            docs.last().map(|doc| doc.data.timestamp.clone())
        } else {
            None
        };

        let items = docs
            .into_iter()
            .filter(|doc| include_currency || !doc.data.is_currency_only())
            .collect();

        Ok(Page { items, next_cursor })
    }
}

/// Total per currency across envelope lines.
fn sum_currency(lines: &[ItemLine]) -> Result<BTreeMap<BalanceKey, u64>> {
    let mut totals: BTreeMap<BalanceKey, u64> = BTreeMap::new();
    for line in lines {
        let Some(key) = BalanceKey::currency(&line.item_id) else {
            continue;
        };
        let total = totals.entry(key).or_insert(0);
        *total = total
            .checked_add(line.count)
            .ok_or_else(|| AppError::InvalidPayload("reward amount too large".to_string()))?;
    }
    Ok(totals)
}
