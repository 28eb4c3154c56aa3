// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running.
//! Run with: FIRESTORE_EMULATOR_HOST=localhost:8080 cargo test --test firestore_integration
//!
//! Every test works under its own user ID, so runs against a shared emulator
//! do not interfere.

use fearless_server::db::{mailbox, my_comments, user_doc, Query, Write};
use fearless_server::error::AppError;
use fearless_server::models::{BalanceKey, Envelope, Provider, User};
use fearless_server::services::{
    Actor, ForumService, IdentityAdmin, Ledger, LifecycleService, MailboxService,
    PropagationService, VerifiedIdentity,
};
use serde_json::{json, Value};

mod common;
use common::test_db;

/// Generate a unique user ID for test isolation.
fn unique_uid(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

fn identity(uid: &str) -> VerifiedIdentity {
    VerifiedIdentity {
        uid: uid.to_string(),
        email: Some(format!("{uid}@example.com")),
        name: Some(format!("name-{uid}")),
        provider: Provider::Google,
    }
}

fn actor(uid: &str) -> Actor {
    Actor {
        user_id: uid.to_string(),
        email: None,
        is_admin: false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LEDGER TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_ledger_round_trip_against_emulator() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid("ledger");
    let lifecycle = LifecycleService::new(
        db.clone(),
        ForumService::new(db.clone()),
        IdentityAdmin::new_mock(),
    );
    lifecycle.provision(&identity(&uid), "img.png").await.unwrap();

    let ledger = Ledger::new(db.clone());
    assert_eq!(ledger.credit(&uid, &BalanceKey::Ticket, 10).await.unwrap(), 10);
    assert_eq!(ledger.debit(&uid, &BalanceKey::Ticket, 4).await.unwrap(), 6);
    assert!(matches!(
        ledger.debit(&uid, &BalanceKey::Ticket, 7).await,
        Err(AppError::InsufficientFunds(_))
    ));

    let user: User = db.get(&user_doc(&uid)).await.unwrap().unwrap();
    assert_eq!(user.ticket, 6);
    assert_eq!(user.items.get("currency_credit"), Some(&0));

    println!("✓ Ledger verified: uid={}", uid);
}

#[tokio::test]
async fn test_merge_leaves_other_fields_alone() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid("merge");
    db.set(
        user_doc(&uid),
        &json!({"name": "n", "ticket": 3, "items": {"currency_credit": 5, "sword": 1}}),
    )
    .await
    .unwrap();

    db.commit(vec![Write::merge(
        user_doc(&uid),
        json!({"items": {"currency_credit": 9}}),
        &["items.currency_credit"],
    )])
    .await
    .unwrap();

    let user: User = db.get(&user_doc(&uid)).await.unwrap().unwrap();
    assert_eq!(user.ticket, 3);
    assert_eq!(user.items.get("currency_credit"), Some(&9));
    assert_eq!(user.items.get("sword"), Some(&1));
}

#[tokio::test]
async fn test_update_never_creates_documents() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid("update");

    let result = db
        .commit(vec![Write::update(
            user_doc(&uid),
            json!({"userName": "ghost"}),
            &["userName"],
        )])
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))), "{:?}", result);
    assert!(db.get::<Value>(&user_doc(&uid)).await.unwrap().is_none());
}

// ═══════════════════════════════════════════════════════════════════════════
// MAILBOX TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_currency_envelope_claimed_at_delivery() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid("mail");
    let mail = MailboxService::new(db.clone());

    mail.deliver(
        &uid,
        "Daily Gold",
        "Login bonus",
        &[json!({"itemID": "currency_credit", "count": 100})],
    )
    .await
    .unwrap();

    let user: User = db.get(&user_doc(&uid)).await.unwrap().unwrap();
    assert_eq!(user.items.get("currency_credit"), Some(&100));

    let envelopes = db
        .query::<Envelope>(&Query::new(mailbox(&uid)))
        .await
        .unwrap();
    assert_eq!(envelopes.len(), 1);
    assert!(envelopes[0].data.is_claimed);
}

// ═══════════════════════════════════════════════════════════════════════════
// ACCOUNT TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_rename_and_delete_against_emulator() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid("author");
    let other = unique_uid("other");
    let forum = ForumService::new(db.clone());
    let lifecycle = LifecycleService::new(db.clone(), forum.clone(), IdentityAdmin::new_mock());
    lifecycle.provision(&identity(&uid), "img.png").await.unwrap();

    let others_post = forum.create_post(&actor(&other), "t", "c").await.unwrap();
    forum.add_comment(&actor(&uid), &others_post, "hi").await.unwrap();

    let report = PropagationService::new(db.clone())
        .rename_author(&uid, "Renamed")
        .await
        .unwrap();
    assert_eq!(report.comments, 1);

    let report = lifecycle.delete_account(&uid, None).await;
    assert!(report.completed, "{:?}", report);
    assert!(db.get::<User>(&user_doc(&uid)).await.unwrap().is_none());
    assert!(db
        .query::<Value>(&Query::new(my_comments(&uid)))
        .await
        .unwrap()
        .is_empty());
    assert!(forum.list_comments(&others_post).await.unwrap().is_empty());

    forum.purge_post(&others_post, &other).await.unwrap();
}
