// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Play-time tracking and change notification for long-poll clients.
//!
//! Each watched user gets one `watch` channel. It is fed by play-time writes
//! made through this process and by a refresher task that re-reads the user
//! document while anyone is listening, which picks up writes from the game
//! server. The channel and its refresher go away with the last listener.
//!
//! Play time only grows, so the channel value only moves forward: a late or
//! stale read never rolls back a value a listener has already seen.

use crate::config::Config;
use crate::db::{user_doc, FirestoreDb, TxnPlan, Write};
use crate::error::{AppError, Result};
use crate::models::User;
use crate::time_utils::server_timestamp;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Largest single play-time increment accepted, in seconds.
pub const MAX_INCREMENT_SECS: u64 = 3600;

/// How a wait for a play-time change ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Changed(u64),
    Timeout,
}

type Watchers = DashMap<String, Arc<watch::Sender<u64>>>;

#[derive(Clone)]
pub struct PlaytimeHub {
    db: FirestoreDb,
    watchers: Arc<Watchers>,
    max_wait: Duration,
    refresh: Duration,
}

/// One registered listener. Dropping it deregisters, on every exit path.
struct Listener {
    watchers: Arc<Watchers>,
    user_id: String,
    tx: Arc<watch::Sender<u64>>,
    rx: Option<watch::Receiver<u64>>,
}

impl Drop for Listener {
    fn drop(&mut self) {
        // Release our receiver first so the count below excludes it
        self.rx.take();
        let removed = self
            .watchers
            .remove_if(&self.user_id, |_, tx| tx.receiver_count() == 0);
        if removed.is_some() {
            tracing::debug!(user_id = %self.user_id, "Last play-time listener gone");
        }
    }
}

impl PlaytimeHub {
    pub fn new(db: FirestoreDb, config: &Config) -> Self {
        Self {
            db,
            watchers: Arc::new(DashMap::new()),
            max_wait: config.longpoll_max,
            refresh: config.longpoll_refresh,
        }
    }

    /// Number of users with at least one listener.
    pub fn watched_users(&self) -> usize {
        self.watchers.len()
    }

    /// Current play time in seconds.
    pub async fn get(&self, user_id: &str) -> Result<u64> {
        Ok(self.load(user_id).await?.playtime)
    }

    async fn load(&self, user_id: &str) -> Result<User> {
        self.db
            .get(&user_doc(user_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
    }

    /// Wait until play time differs from `since` or `timeout` elapses.
    ///
    /// The wait is capped by the configured server maximum regardless of the
    /// requested timeout.
    pub async fn await_change(
        &self,
        user_id: &str,
        since: u64,
        timeout: Duration,
    ) -> Result<WaitOutcome> {
        let wait = timeout.min(self.max_wait);

        // Subscribe before reading, so a write landing in between still
        // reaches this listener
        let mut listener = self.listen(user_id);
        let stored = self.get(user_id).await?;
        listener.tx.send_if_modified(|value| advance(value, stored));
        let Some(rx) = listener.rx.as_mut() else {
            return Ok(WaitOutcome::Timeout);
        };

        let current = *rx.borrow_and_update();
        if current != since {
            return Ok(WaitOutcome::Changed(current));
        }

        let changed = async {
            loop {
                if rx.changed().await.is_err() {
                    // Sender gone; only the timer can end the wait
                    std::future::pending::<()>().await;
                }
                let value = *rx.borrow_and_update();
                if value != since {
                    return value;
                }
            }
        };

        let outcome = tokio::select! {
            value = changed => WaitOutcome::Changed(value),
            _ = tokio::time::sleep(wait) => WaitOutcome::Timeout,
        };
        Ok(outcome)
    }

    /// Register a listener for `user_id`, creating its channel if needed.
    ///
    /// The subscription is taken while the map entry is held, and channels
    /// are only retired under the same lock, so a listener never joins a
    /// channel that has just been dropped from the map.
    fn listen(&self, user_id: &str) -> Listener {
        let entry = self
            .watchers
            .entry(user_id.to_string())
            .or_insert_with(|| {
                let (tx, _) = watch::channel(0);
                let tx = Arc::new(tx);
                self.spawn_refresher(user_id.to_string(), Arc::clone(&tx));
                tx
            });
        let rx = entry.subscribe();
        let tx = Arc::clone(entry.value());
        drop(entry);

        Listener {
            watchers: Arc::clone(&self.watchers),
            user_id: user_id.to_string(),
            tx,
            rx: Some(rx),
        }
    }

    fn spawn_refresher(&self, user_id: String, tx: Arc<watch::Sender<u64>>) {
        let db = self.db.clone();
        let watchers = Arc::clone(&self.watchers);
        let period = self.refresh;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                watchers.remove_if(&user_id, |_, current| {
                    Arc::ptr_eq(current, &tx) && current.receiver_count() == 0
                });
                let ours = watchers
                    .get(&user_id)
                    .is_some_and(|current| Arc::ptr_eq(current.value(), &tx));
                if !ours {
                    break;
                }

                match db.get::<User>(&user_doc(&user_id)).await {
                    Ok(Some(user)) => {
                        tx.send_if_modified(|value| advance(value, user.playtime));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(
                            user_id = %user_id,
                            error = %e,
                            "Play-time refresh failed"
                        );
                    }
                }
            }
        });
    }

    fn publish(&self, user_id: &str, playtime: u64) {
        if let Some(tx) = self.watchers.get(user_id) {
            tx.send_if_modified(|value| advance(value, playtime));
        }
    }

    /// Add `amount` seconds of play time. Returns the new total.
    pub async fn increment(&self, user_id: &str, amount: u64) -> Result<u64> {
        if !(1..=MAX_INCREMENT_SECS).contains(&amount) {
            return Err(AppError::InvalidPayload(format!(
                "amount must be between 1 and {}",
                MAX_INCREMENT_SECS
            )));
        }

        let now = server_timestamp();
        let path = user_doc(user_id);
        let playtime = self
            .db
            .run_transaction(&path, |user: Option<User>| {
                let user =
                    user.ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
                let playtime = user.playtime.checked_add(amount).ok_or_else(|| {
                    AppError::InvalidPayload("play time overflow".to_string())
                })?;
                Ok(TxnPlan::new(playtime).write(Write::merge(
                    path.clone(),
                    json!({ "playtime": playtime, "lastUpdatedAt": now }),
                    &["playtime", "lastUpdatedAt"],
                )))
            })
            .await?;

        self.publish(user_id, playtime);
        Ok(playtime)
    }

    /// Record activity without changing play time.
    pub async fn touch(&self, user_id: &str) -> Result<()> {
        let now = server_timestamp();
        let path = user_doc(user_id);
        self.db
            .run_transaction(&path, |user: Option<User>| {
                if user.is_none() {
                    return Err(AppError::NotFound(format!("User {} not found", user_id)));
                }
                Ok(TxnPlan::new(()).write(Write::merge(
                    path.clone(),
                    json!({ "lastUpdatedAt": now }),
                    &["lastUpdatedAt"],
                )))
            })
            .await
    }
}

fn advance(slot: &mut u64, value: u64) -> bool {
    if value > *slot {
        *slot = value;
        true
    } else {
        false
    }
}
