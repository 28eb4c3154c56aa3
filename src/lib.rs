// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Fearless: game companion backend
//!
//! This crate provides the web API behind the game's companion site:
//! currency balances, the reward mailbox, the item store, accounts, the
//! community forum and play-time tracking, all kept consistent on top of
//! Firestore.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::FirestoreDb;
use services::{
    FirebaseVerifier, ForumService, IdentityAdmin, Ledger, LifecycleService, MailboxService,
    Notifier, PlaytimeHub, ProfileService, PropagationService, PurchaseService,
    VerificationService,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: FirestoreDb,
    pub ledger: Ledger,
    pub mailbox: MailboxService,
    pub purchases: PurchaseService,
    pub forum: ForumService,
    pub lifecycle: LifecycleService,
    pub profile: ProfileService,
    pub playtime: PlaytimeHub,
    pub verification: VerificationService,
    pub id_token_verifier: Arc<FirebaseVerifier>,
}

impl AppState {
    /// Wire every service over one database handle.
    pub fn new(
        config: Config,
        db: FirestoreDb,
        id_token_verifier: Arc<FirebaseVerifier>,
        identity_admin: IdentityAdmin,
        notifier: Notifier,
    ) -> Self {
        let forum = ForumService::new(db.clone());
        let propagation = PropagationService::new(db.clone());

        Self {
            ledger: Ledger::new(db.clone()),
            mailbox: MailboxService::new(db.clone()),
            purchases: PurchaseService::new(db.clone()),
            lifecycle: LifecycleService::new(db.clone(), forum.clone(), identity_admin),
            profile: ProfileService::new(db.clone(), propagation),
            playtime: PlaytimeHub::new(db.clone(), &config),
            verification: VerificationService::new(db.clone(), notifier),
            forum,
            id_token_verifier,
            config,
            db,
        }
    }
}
