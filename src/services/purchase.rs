// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Purchase orchestration.
//!
//! A purchase resolves the item in the web and game catalogs, then in one
//! transaction debits the channel's currency and writes an unclaimed mailbox
//! envelope holding the item. Either both happen or neither does.

use crate::db::{catalog_doc, mailbox, user_doc, FirestoreDb, TxnPlan, Write};
use crate::error::{AppError, Result};
use crate::models::catalog::find_entry;
use crate::models::{
    BalanceKey, CatalogDoc, CatalogEntry, CatalogKey, Channel, Envelope, ItemLine, User,
};
use crate::services::ledger::{post_entries, Entry};
use crate::time_utils::server_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Purchase request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PurchaseRequest {
    /// Item reference; named by any of the catalog key fields
    #[serde(default)]
    pub item: Map<String, Value>,
    /// "web" or "game"; required when both catalogs carry the item
    pub source: Option<String>,
    pub quantity: Option<Value>,
}

impl PurchaseRequest {
    /// Number of bundles; anything but a positive integer means one.
    fn quantity(&self) -> u64 {
        self.quantity
            .as_ref()
            .and_then(Value::as_u64)
            .filter(|q| *q > 0)
            .unwrap_or(1)
    }

    fn item_str(&self, field: &str) -> Option<&str> {
        self.item
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn item_count(&self) -> Option<u64> {
        self.item.get("count").and_then(Value::as_u64).filter(|c| *c > 0)
    }
}

/// Result of a successful purchase.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseReceipt {
    pub envelope_id: String,
    pub channel: Channel,
    /// Currency charged ("ticket" or "currency_credit")
    pub currency: String,
    pub total_cost: u64,
    /// Balance of the charged currency after the debit
    pub balance: u64,
}

/// Which channel an item resolves to, given hits in each catalog and a hint.
fn choose_channel<'a>(
    key: &str,
    web: Option<&'a CatalogEntry>,
    game: Option<&'a CatalogEntry>,
    hint: Option<Channel>,
) -> Result<(Channel, &'a CatalogEntry)> {
    match (web, game) {
        (Some(web), Some(game)) => match hint {
            Some(Channel::Web) => Ok((Channel::Web, web)),
            Some(Channel::Game) => Ok((Channel::Game, game)),
            _ => Err(AppError::AmbiguousSource(key.to_string())),
        },
        (Some(web), None) => Ok((Channel::Web, web)),
        (None, Some(game)) => Ok((Channel::Game, game)),
        (None, None) => Err(AppError::NotFound(format!(
            "Item {} not found in catalog",
            key
        ))),
    }
}

/// Total price as a whole, positive amount.
fn total_cost(key: &str, entry: &CatalogEntry, quantity: u64) -> Result<u64> {
    let invalid = || AppError::InvalidPrice(format!("catalog price of {} is not usable", key));

    let unit = entry.unit_cost().ok_or_else(invalid)?;
    if !unit.is_finite() || unit <= 0.0 {
        return Err(invalid());
    }

    let total = unit * quantity as f64;
    if !total.is_finite() || total.fract() != 0.0 || total > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(total as u64)
}

fn currency_for(channel: Channel) -> BalanceKey {
    match channel {
        Channel::Game => BalanceKey::credit(),
        _ => BalanceKey::Ticket,
    }
}

fn store_label(channel: Channel) -> &'static str {
    match channel {
        Channel::Game => "game store",
        _ => "web store",
    }
}

#[derive(Clone)]
pub struct PurchaseService {
    db: FirestoreDb,
}

impl PurchaseService {
    pub fn new(db: FirestoreDb) -> Self {
        Self { db }
    }

    async fn load_catalog(&self, channel: Channel) -> Result<Vec<CatalogEntry>> {
        let doc: Option<CatalogDoc> = self.db.get(&catalog_doc(channel.doc_id())).await?;
        Ok(doc.map(|d| d.data).unwrap_or_default())
    }

    /// Catalog lists for display, keyed by channel.
    pub async fn catalogs(
        &self,
    ) -> Result<(Vec<CatalogEntry>, Vec<CatalogEntry>, Vec<CatalogEntry>)> {
        tokio::try_join!(
            self.load_catalog(Channel::Events),
            self.load_catalog(Channel::Web),
            self.load_catalog(Channel::Game),
        )
    }

    pub async fn purchase(
        &self,
        user_id: &str,
        request: &PurchaseRequest,
    ) -> Result<PurchaseReceipt> {
        let key = CatalogKey::resolve(&request.item)
            .ok_or_else(|| AppError::InvalidPayload("item key is required".to_string()))?
            .as_str();
        let quantity = request.quantity();

        let (web, game) = tokio::try_join!(
            self.load_catalog(Channel::Web),
            self.load_catalog(Channel::Game)
        )?;

        let (channel, entry) = choose_channel(
            key,
            find_entry(&web, key),
            find_entry(&game, key),
            Channel::from_hint(request.source.as_deref()),
        )?;

        let total = total_cost(key, entry, quantity)?;
        let currency = currency_for(channel);

        let bundle = request.item_count().or_else(|| entry.count()).unwrap_or(1);
        let line = ItemLine {
            item_id: entry
                .item_type()
                .or_else(|| request.item_str("type"))
                .unwrap_or(key)
                .to_string(),
            count: bundle
                .checked_mul(quantity)
                .ok_or_else(|| AppError::InvalidPayload("quantity too large".to_string()))?,
        };

        let now = server_timestamp();
        let envelope = Envelope {
            title: entry
                .title()
                .or_else(|| request.item_str("title"))
                .unwrap_or(key)
                .to_string(),
            message: format!("Item purchased from the {}.", store_label(channel)),
            items: vec![line],
            is_claimed: false,
            is_deleted: false,
            timestamp: now.clone(),
        };

        let envelope_id = uuid::Uuid::new_v4().to_string();
        let envelope_write = Write::set(mailbox(user_id).doc(envelope_id.clone()), &envelope)?;
        let debit = [Entry::Debit(currency.clone(), total)];

        let balance = self
            .db
            .run_transaction(&user_doc(user_id), |user: Option<User>| {
                let user =
                    user.ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
                let (balance_write, balances) = post_entries(user_id, Some(&user), &debit, &now)?;
                Ok(TxnPlan::new(balances.get(&currency))
                    .write(balance_write)
                    .write(envelope_write.clone()))
            })
            .await?;

        tracing::info!(
            user_id,
            item = key,
            channel = channel.doc_id(),
            quantity,
            total_cost = total,
            envelope_id = %envelope_id,
            "Purchase completed"
        );

        Ok(PurchaseReceipt {
            envelope_id,
            channel,
            currency: currency.to_string(),
            total_cost: total,
            balance,
        })
    }
}
