// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Forum posts and comments, with their per-user mirrors.
//!
//! A post lives at `posts/{postId}` and is mirrored verbatim at
//! `users/{uid}/myPosts/{postId}`. A comment lives at
//! `posts/{postId}/comments/{commentId}` and is indexed at
//! `users/{uid}/myComments/{commentId}`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub title: String,
    pub contents: String,
    pub user_id: String,
    /// Author display name, rewritten on rename
    pub user_name: String,
    pub date_time: String,
    #[serde(default)]
    pub views: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub contents: String,
    pub user_id: String,
    pub user_name: String,
    pub date_time: String,
}

/// Entry in the commenter's own index, pointing back at the live comment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommentIndexEntry {
    #[serde(rename = "noticeId")]
    pub post_id: String,
    pub comment_id: String,
    pub contents: String,
    pub user_name: String,
    pub date_time: String,
}

/// Author reference read from posts and comments during sweeps. Lenient so a
/// malformed document cannot stall a cascade.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorRef {
    #[serde(rename = "userId", default)]
    pub user_id: String,
}

/// Pointer from a comment index entry back to the live comment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentPointer {
    #[serde(rename = "noticeId", default)]
    pub post_id: String,
    #[serde(rename = "commentId", default)]
    pub comment_id: String,
}

impl CommentIndexEntry {
    pub fn for_comment(post_id: &str, comment_id: &str, comment: &Comment) -> Self {
        Self {
            post_id: post_id.to_string(),
            comment_id: comment_id.to_string(),
            contents: comment.contents.clone(),
            user_name: comment.user_name.clone(),
            date_time: comment.date_time.clone(),
        }
    }
}
