// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Currency ledger.
//!
//! Every balance change goes through [`post_entries`], either on its own via
//! [`Ledger`] or inside a larger transaction (purchases, reward delivery).

use crate::db::{user_doc, FirestoreDb, TxnPlan, Write};
use crate::error::{AppError, Result};
use crate::models::{BalanceKey, Balances, User};
use crate::time_utils::server_timestamp;

/// One signed balance change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Credit(BalanceKey, u64),
    Debit(BalanceKey, u64),
}

impl Entry {
    fn key(&self) -> &BalanceKey {
        match self {
            Entry::Credit(key, _) | Entry::Debit(key, _) => key,
        }
    }
}

/// Apply `entries` in order to a user document read inside a transaction.
///
/// `None` opens the account with zero balances. Fails without producing a
/// write if any amount is zero or any debit would take a balance below zero.
pub fn post_entries(
    user_id: &str,
    user: Option<&User>,
    entries: &[Entry],
    now: &str,
) -> Result<(Write, Balances)> {
    let mut balances = user.map(Balances::of).unwrap_or_else(Balances::opened);

    for entry in entries {
        match entry {
            Entry::Credit(_, 0) | Entry::Debit(_, 0) => {
                return Err(AppError::InvalidPayload(format!(
                    "{} amount must be positive",
                    entry.key()
                )));
            }
            Entry::Credit(key, amount) => {
                balances.credit(key, *amount)?;
            }
            Entry::Debit(key, amount) => {
                balances.debit(key, *amount)?;
            }
        }
    }

    let view = balances.clone();
    Ok((balances.into_write(user_id, now), view))
}

/// Standalone credit/debit against one user.
#[derive(Clone)]
pub struct Ledger {
    db: FirestoreDb,
}

impl Ledger {
    pub fn new(db: FirestoreDb) -> Self {
        Self { db }
    }

    /// Add `amount` to a balance. Returns the new balance.
    pub async fn credit(&self, user_id: &str, key: &BalanceKey, amount: u64) -> Result<u64> {
        self.post(user_id, Entry::Credit(key.clone(), amount)).await
    }

    /// Remove `amount` from a balance. Returns the new balance.
    ///
    /// Fails with `InsufficientFunds` and writes nothing if the balance is
    /// smaller than `amount`.
    pub async fn debit(&self, user_id: &str, key: &BalanceKey, amount: u64) -> Result<u64> {
        self.post(user_id, Entry::Debit(key.clone(), amount)).await
    }

    async fn post(&self, user_id: &str, entry: Entry) -> Result<u64> {
        let path = user_doc(user_id);
        let now = server_timestamp();

        let balance = self
            .db
            .run_transaction(&path, |user: Option<User>| {
                let user =
                    user.ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
                let (write, balances) = post_entries(user_id, Some(&user), &[entry.clone()], &now)?;
                Ok(TxnPlan::new(balances.get(entry.key())).write(write))
            })
            .await?;

        tracing::debug!(
            user_id,
            entry = ?entry,
            balance,
            "Ledger entry posted"
        );
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ledger_with_user(ticket: u64) -> (Ledger, FirestoreDb) {
        let db = FirestoreDb::new_in_memory();
        let user = User {
            ticket,
            ..Default::default()
        };
        db.set(user_doc("u1"), &user).await.unwrap();
        (Ledger::new(db.clone()), db)
    }

    #[tokio::test]
    async fn test_credit_then_debit() {
        let (ledger, db) = ledger_with_user(0).await;

        assert_eq!(ledger.credit("u1", &BalanceKey::credit(), 40).await.unwrap(), 40);
        assert_eq!(ledger.debit("u1", &BalanceKey::credit(), 15).await.unwrap(), 25);

        let user: User = db.get(&user_doc("u1")).await.unwrap().unwrap();
        assert_eq!(user.items.get("currency_credit"), Some(&25));
    }

    #[tokio::test]
    async fn test_overdraft_leaves_balance_unchanged() {
        let (ledger, db) = ledger_with_user(3).await;

        let err = ledger.debit("u1", &BalanceKey::Ticket, 4).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds(BalanceKey::Ticket)));

        let user: User = db.get(&user_doc("u1")).await.unwrap().unwrap();
        assert_eq!(user.ticket, 3);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let (ledger, _db) = ledger_with_user(3).await;
        let err = ledger.credit("u1", &BalanceKey::Ticket, 0).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let ledger = Ledger::new(FirestoreDb::new_in_memory());
        let err = ledger.credit("ghost", &BalanceKey::Ticket, 1).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
