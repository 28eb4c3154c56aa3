// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Display-name propagation tests.
//!
//! A rename through the profile route must reach every post, post mirror,
//! comment and comment index entry written by the user, and nothing else.
//! A rename racing a deletion must never bring deleted documents back.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use fearless_server::db::{comments, my_comments, my_posts, posts, Query};
use fearless_server::models::{Comment, CommentIndexEntry, Post};
use fearless_server::services::{Actor, PropagationService};
use fearless_server::AppState;
use tower::ServiceExt;

mod common;

fn actor(uid: &str) -> Actor {
    Actor {
        user_id: uid.to_string(),
        email: Some(format!("{uid}@example.com")),
        is_admin: false,
    }
}

fn rename_request(token: &str, name: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/profile")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(common::json_body(serde_json::json!({ "name": name })))
        .unwrap()
}

async fn post_names(state: &AppState) -> Vec<(String, String)> {
    state
        .db
        .query::<Post>(&Query::new(posts()))
        .await
        .unwrap()
        .into_iter()
        .map(|doc| (doc.data.user_id, doc.data.user_name))
        .collect()
}

#[tokio::test]
async fn test_rename_reaches_every_authored_copy() {
    let (app, state) = common::create_test_app();
    common::seed_user(&state, "alice", 0, 0).await;
    common::seed_user(&state, "bob", 0, 0).await;
    let token = common::create_test_jwt("alice", &state.config.jwt_signing_key);

    let alices_post = state
        .forum
        .create_post(&actor("alice"), "a", "b")
        .await
        .unwrap();
    let bobs_post = state
        .forum
        .create_post(&actor("bob"), "c", "d")
        .await
        .unwrap();
    state
        .forum
        .add_comment(&actor("alice"), &bobs_post, "from alice")
        .await
        .unwrap();
    state
        .forum
        .add_comment(&actor("bob"), &alices_post, "from bob")
        .await
        .unwrap();

    let response = app.oneshot(rename_request(&token, "Ally")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert_eq!(body["name"], "Ally");
    assert_eq!(body["propagated"]["posts"], 1);
    assert_eq!(body["propagated"]["comments"], 1);

    for (author, name) in post_names(&state).await {
        match author.as_str() {
            "alice" => assert_eq!(name, "Ally"),
            _ => assert_ne!(name, "Ally"),
        }
    }

    let mirrors = state
        .db
        .query::<Post>(&Query::new(my_posts("alice")))
        .await
        .unwrap();
    assert!(mirrors.iter().all(|doc| doc.data.user_name == "Ally"));

    for post_id in [&alices_post, &bobs_post] {
        let thread = state
            .db
            .query::<Comment>(&Query::new(comments(post_id)))
            .await
            .unwrap();
        for doc in thread {
            if doc.data.user_id == "alice" {
                assert_eq!(doc.data.user_name, "Ally");
            } else {
                assert_ne!(doc.data.user_name, "Ally");
            }
        }
    }

    let index = state
        .db
        .query::<CommentIndexEntry>(&Query::new(my_comments("alice")))
        .await
        .unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].data.user_name, "Ally");

    let bobs_index = state
        .db
        .query::<CommentIndexEntry>(&Query::new(my_comments("bob")))
        .await
        .unwrap();
    assert_ne!(bobs_index[0].data.user_name, "Ally");
}

#[tokio::test]
async fn test_taken_name_conflicts_without_writes() {
    let (app, state) = common::create_test_app();
    common::seed_user(&state, "alice", 0, 0).await;
    common::seed_user(&state, "bob", 0, 0).await;
    state
        .forum
        .create_post(&actor("alice"), "a", "b")
        .await
        .unwrap();
    let token = common::create_test_jwt("alice", &state.config.jwt_signing_key);

    // seed_user names accounts "player-{uid}"
    let response = app
        .oneshot(rename_request(&token, "player-bob"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let user = common::load_user(&state, "alice").await.unwrap();
    assert_eq!(user.name, "player-alice");
    assert!(post_names(&state)
        .await
        .iter()
        .all(|(_, name)| name != "player-bob"));
}

#[tokio::test]
async fn test_name_availability_route() {
    let (app, state) = common::create_test_app();
    common::seed_user(&state, "alice", 0, 0).await;
    common::seed_user(&state, "bob", 0, 0).await;
    let token = common::create_test_jwt("alice", &state.config.jwt_signing_key);

    let check = |name: &str| {
        Request::builder()
            .method("GET")
            .uri(format!("/api/profile/check-name?name={name}"))
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    };

    let body = common::body_json(app.clone().oneshot(check("player-bob")).await.unwrap()).await;
    assert_eq!(body["available"], false);
    let body = common::body_json(app.clone().oneshot(check("player-alice")).await.unwrap()).await;
    assert_eq!(body["available"], true);
    let body = common::body_json(app.oneshot(check("fresh")).await.unwrap()).await;
    assert_eq!(body["available"], true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rename_racing_post_deletion_leaves_no_orphans() {
    let (_, state) = common::create_test_app();
    common::seed_user(&state, "alice", 0, 0).await;
    common::seed_user(&state, "bob", 0, 0).await;
    let propagation = PropagationService::new(state.db.clone());

    for round in 0..10 {
        let post_id = state
            .forum
            .create_post(&actor("bob"), "busy thread", "c")
            .await
            .unwrap();
        for i in 0..300 {
            state
                .forum
                .add_comment(&actor("alice"), &post_id, &format!("reply {i}"))
                .await
                .unwrap();
        }

        let rename = {
            let propagation = propagation.clone();
            tokio::spawn(async move {
                propagation
                    .rename_author("alice", &format!("Alicia{round}"))
                    .await
            })
        };
        state
            .forum
            .delete_post(&actor("bob"), &post_id)
            .await
            .unwrap();
        rename.await.unwrap().unwrap();

        let orphans = state
            .db
            .query::<Comment>(&Query::new(comments(&post_id)))
            .await
            .unwrap();
        assert!(
            orphans.is_empty(),
            "round {round}: {} comments under a deleted post",
            orphans.len()
        );

        let index = state
            .db
            .query::<CommentIndexEntry>(&Query::new(my_comments("alice")))
            .await
            .unwrap();
        assert!(
            index.is_empty(),
            "round {round}: {} index entries left",
            index.len()
        );

        let post: Option<Post> = state.db.get(&posts().doc(post_id.clone())).await.unwrap();
        assert!(post.is_none(), "round {round}: post came back");
        let mirror: Option<Post> = state.db.get(&my_posts("bob").doc(post_id)).await.unwrap();
        assert!(mirror.is_none(), "round {round}: mirror came back");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rename_racing_own_post_deletion() {
    let (_, state) = common::create_test_app();
    common::seed_user(&state, "alice", 0, 0).await;
    let propagation = PropagationService::new(state.db.clone());

    let mut post_ids = Vec::new();
    for i in 0..200 {
        post_ids.push(
            state
                .forum
                .create_post(&actor("alice"), &format!("post {i}"), "c")
                .await
                .unwrap(),
        );
    }

    let rename = {
        let propagation = propagation.clone();
        tokio::spawn(async move { propagation.rename_author("alice", "Ally").await })
    };
    for post_id in post_ids.iter().step_by(2) {
        state
            .forum
            .delete_post(&actor("alice"), post_id)
            .await
            .unwrap();
    }
    rename.await.unwrap().unwrap();

    let live = state.db.query::<Post>(&Query::new(posts())).await.unwrap();
    let mirrors = state
        .db
        .query::<Post>(&Query::new(my_posts("alice")))
        .await
        .unwrap();
    assert_eq!(live.len(), 100);
    assert_eq!(mirrors.len(), 100);
    assert!(live.iter().all(|doc| doc.data.user_name == "Ally"));
    assert!(mirrors.iter().all(|doc| doc.data.user_name == "Ally"));
}
