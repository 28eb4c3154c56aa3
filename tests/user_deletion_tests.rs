// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Account provisioning and deletion tests.
//!
//! These tests verify that:
//! 1. Concurrent first sign-ins create exactly one user document
//! 2. Deleting an account removes everything reachable from it, including
//!    comments on other users' posts
//! 3. Deletion runs in chunks larger than one batch

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use fearless_server::db::{comments, my_comments, posts, tombstone_doc, Query};
use fearless_server::models::{Provider, Tombstone};
use fearless_server::services::{Actor, VerifiedIdentity};
use serde_json::Value;
use tower::ServiceExt;

mod common;

fn identity(uid: &str) -> VerifiedIdentity {
    VerifiedIdentity {
        uid: uid.to_string(),
        email: Some(format!("{uid}@example.com")),
        name: None,
        provider: Provider::Local,
    }
}

fn actor(uid: &str) -> Actor {
    Actor {
        user_id: uid.to_string(),
        email: Some(format!("{uid}@example.com")),
        is_admin: false,
    }
}

#[tokio::test]
async fn test_concurrent_provisioning_creates_one_document() {
    let (_, state) = common::create_test_app();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            state
                .lifecycle
                .provision(&identity("racer"), "img.png")
                .await
                .unwrap()
        }));
    }

    let mut created = 0;
    for handle in handles {
        let (user, was_created) = handle.await.unwrap();
        assert_eq!(user.ticket, 0);
        if was_created {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    let store = state.db.memory_store().unwrap();
    assert_eq!(store.count_matching("users/racer"), 1);
}

#[tokio::test]
async fn test_provisioning_keeps_existing_balances() {
    let (_, state) = common::create_test_app();
    common::seed_user(&state, "u1", 9, 4).await;

    let (user, created) = state
        .lifecycle
        .provision(&identity("u1"), "img.png")
        .await
        .unwrap();

    assert!(!created);
    assert_eq!(user.ticket, 9);
    assert_eq!(user.items.get("currency_credit"), Some(&4));
}

#[tokio::test]
async fn test_delete_account_removes_all_records() {
    let (_, state) = common::create_test_app();
    state
        .lifecycle
        .provision(&identity("alice"), "img.png")
        .await
        .unwrap();

    // Own post with a comment from bob, and a comment on bob's post
    let own_post = state
        .forum
        .create_post(&actor("alice"), "mine", "hello")
        .await
        .unwrap();
    state
        .forum
        .add_comment(&actor("bob"), &own_post, "nice")
        .await
        .unwrap();
    let bobs_post = state
        .forum
        .create_post(&actor("bob"), "bob's", "hi")
        .await
        .unwrap();
    let alice_comment = state
        .forum
        .add_comment(&actor("alice"), &bobs_post, "hey bob")
        .await
        .unwrap();
    state
        .mailbox
        .deliver(
            "alice",
            "Sword",
            "Reward",
            &[serde_json::json!({"itemID": "sword", "count": 1})],
        )
        .await
        .unwrap();

    let report = state
        .lifecycle
        .delete_account("alice", Some("alice@example.com"))
        .await;
    assert!(report.completed, "{:?}", report);

    // Alice's comment on bob's post is gone, and so is bob's index entry
    // for his comment on alice's deleted post
    let remaining: Vec<_> = state
        .db
        .query::<Value>(&Query::new(comments(&bobs_post)))
        .await
        .unwrap();
    assert!(remaining.iter().all(|doc| doc.id != alice_comment));
    let bobs_index: Vec<_> = state
        .db
        .query::<Value>(&Query::new(my_comments("bob")))
        .await
        .unwrap();
    assert!(bobs_index.is_empty());

    let alice_posts: Vec<_> = state
        .db
        .query::<Value>(&Query::new(posts()).eq("userId", "alice"))
        .await
        .unwrap();
    assert!(alice_posts.is_empty());
    assert!(common::load_user(&state, "alice").await.is_none());

    let tombstone: Tombstone = state
        .db
        .get(&tombstone_doc("alice"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tombstone.email.as_deref(), Some("alice@example.com"));
}

#[tokio::test]
async fn test_delete_spans_multiple_batches() {
    let (_, state) = common::create_test_app();
    state
        .lifecycle
        .provision(&identity("busy"), "img.png")
        .await
        .unwrap();
    let post = state
        .forum
        .create_post(&actor("other"), "t", "c")
        .await
        .unwrap();
    for i in 0..450 {
        state
            .forum
            .add_comment(&actor("busy"), &post, &format!("comment {i}"))
            .await
            .unwrap();
    }

    let report = state.lifecycle.delete_account("busy", None).await;
    assert!(report.completed, "{:?}", report);

    let store = state.db.memory_store().unwrap();
    assert_eq!(store.count_matching("users/busy"), 0);
    let remaining: Vec<_> = state
        .db
        .query::<Value>(&Query::new(comments(&post)))
        .await
        .unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn test_delete_route_clears_session() {
    let (app, state) = common::create_test_app();
    common::seed_user(&state, "u1", 3, 0).await;
    let token = common::create_test_jwt("u1", &state.config.jwt_signing_key);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/account")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cleared = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter(|v| v.to_str().unwrap().contains("Max-Age=0"))
        .count();
    assert_eq!(cleared, 2);
    assert!(common::load_user(&state, "u1").await.is_none());
}

#[tokio::test]
async fn test_interrupted_delete_reports_unavailable_and_keeps_account() {
    let (app, state) = common::create_test_app();
    common::seed_user(&state, "u1", 3, 0).await;
    state
        .forum
        .create_post(&actor("u1"), "t", "c")
        .await
        .unwrap();
    let token = common::create_test_jwt("u1", &state.config.jwt_signing_key);

    let store = state.db.memory_store().unwrap();
    store.fail_writes_to("myPosts");

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/account")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(common::load_user(&state, "u1").await.is_some());
}
