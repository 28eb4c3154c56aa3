// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account provisioning and the deletion cascade.
//!
//! Deletion runs as a fixed sequence of sweeps, children before parents. Each
//! sweep commits bounded batches until its query comes back empty, so any step
//! can be re-run against a partially deleted account. The user document and
//! the identity record are only removed once every sweep has finished.

use crate::db::{
    comments, mailbox, my_comments, my_posts, posts, tombstone_doc, user_doc, CollectionPath,
    FirestoreDb, Query, StoredDoc, TxnPlan, Write, BATCH_SIZE,
};
use crate::error::Result;
use crate::models::{AuthorRef, CommentPointer, Tombstone, User};
use crate::services::forum::ForumService;
use crate::services::identity::{IdentityAdmin, VerifiedIdentity};
use crate::time_utils::server_timestamp;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Sweeps run by [`LifecycleService::delete_account`], in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionStep {
    Mailbox,
    AuthoredComments,
    PostMirror,
    AuthoredPosts,
}

impl DeletionStep {
    pub const ALL: [DeletionStep; 4] = [
        DeletionStep::Mailbox,
        DeletionStep::AuthoredComments,
        DeletionStep::PostMirror,
        DeletionStep::AuthoredPosts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionStep::Mailbox => "mailbox",
            DeletionStep::AuthoredComments => "authored_comments",
            DeletionStep::PostMirror => "post_mirror",
            DeletionStep::AuthoredPosts => "authored_posts",
        }
    }
}

/// Outcome of one deletion run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    /// True once the user document and identity record are gone
    pub completed: bool,
    pub failed_steps: Vec<&'static str>,
    /// Documents removed per step
    pub removed: BTreeMap<&'static str, usize>,
}

#[derive(Clone)]
pub struct LifecycleService {
    db: FirestoreDb,
    forum: ForumService,
    identity: IdentityAdmin,
}

impl LifecycleService {
    pub fn new(db: FirestoreDb, forum: ForumService, identity: IdentityAdmin) -> Self {
        Self {
            db,
            forum,
            identity,
        }
    }

    /// Create the user document on first sign-in, or touch `lastUpdatedAt`.
    ///
    /// Keyed by the identity's uid inside a transaction, so concurrent first
    /// sign-ins produce one document. Returns the user and whether it was created.
    pub async fn provision(
        &self,
        identity: &VerifiedIdentity,
        default_image: &str,
    ) -> Result<(User, bool)> {
        let now = server_timestamp();
        let path = user_doc(&identity.uid);
        let name = starter_name(identity);

        let (user, created) = self
            .db
            .run_transaction(&path, |current: Option<User>| match current {
                Some(mut user) => {
                    user.last_updated_at = now.clone();
                    let touch = Write::merge(
                        path.clone(),
                        json!({ "lastUpdatedAt": now }),
                        &["lastUpdatedAt"],
                    );
                    Ok(TxnPlan::new((user, false)).write(touch))
                }
                None => {
                    let user = User::starter(
                        &name,
                        identity.email.as_deref(),
                        identity.provider,
                        default_image,
                        &now,
                    );
                    let write = Write::set(path.clone(), &user)?;
                    Ok(TxnPlan::new((user, true)).write(write))
                }
            })
            .await?;

        if created {
            tracing::info!(
                user_id = %identity.uid,
                provider = identity.provider.as_str(),
                "Account provisioned"
            );
        }
        Ok((user, created))
    }

    /// Remove every document belonging to `user_id`.
    ///
    /// A failed sweep is logged and skipped; the remaining sweeps still run,
    /// but the account itself is kept so the whole run can be repeated.
    pub async fn delete_account(&self, user_id: &str, email: Option<&str>) -> DeletionReport {
        let mut report = DeletionReport::default();

        for step in DeletionStep::ALL {
            match self.run_step(step, user_id).await {
                Ok(removed) => {
                    tracing::debug!(
                        user_id,
                        step = step.as_str(),
                        removed,
                        "Deletion step finished"
                    );
                    report.removed.insert(step.as_str(), removed);
                }
                Err(e) => {
                    tracing::warn!(
                        user_id,
                        step = step.as_str(),
                        error = %e,
                        "Deletion step failed"
                    );
                    report.failed_steps.push(step.as_str());
                }
            }
        }

        if !report.failed_steps.is_empty() {
            tracing::warn!(
                user_id,
                failed = ?report.failed_steps,
                "Account deletion incomplete; user document kept"
            );
            return report;
        }

        if let Err(e) = self.remove_account(user_id, email).await {
            tracing::error!(user_id, error = %e, "Failed to remove user document");
            report.failed_steps.push("user_document");
            return report;
        }

        if let Err(e) = self.identity.delete_user(user_id).await {
            tracing::error!(user_id, error = %e, "Failed to delete identity record");
            report.failed_steps.push("identity");
            return report;
        }

        report.completed = true;
        tracing::info!(user_id, removed = ?report.removed, "Account deleted");
        report
    }

    async fn run_step(&self, step: DeletionStep, user_id: &str) -> Result<usize> {
        match step {
            DeletionStep::Mailbox => {
                self.sweep(mailbox(user_id), |doc: &StoredDoc<IgnoredAny>| {
                    vec![Write::delete(mailbox(user_id).doc(doc.id.clone()))]
                })
                .await
            }
            DeletionStep::AuthoredComments => {
                // The index is the only way to find comments under other users' posts
                self.sweep(my_comments(user_id), |entry: &StoredDoc<CommentPointer>| {
                    let mut group = Vec::with_capacity(2);
                    if !entry.data.post_id.is_empty() {
                        group.push(Write::delete(
                            comments(&entry.data.post_id).doc(comment_id(entry)),
                        ));
                    }
                    group.push(Write::delete(my_comments(user_id).doc(entry.id.clone())));
                    group
                })
                .await
            }
            DeletionStep::PostMirror => {
                self.sweep(my_posts(user_id), |doc: &StoredDoc<IgnoredAny>| {
                    vec![Write::delete(my_posts(user_id).doc(doc.id.clone()))]
                })
                .await
            }
            DeletionStep::AuthoredPosts => self.purge_authored_posts(user_id).await,
        }
    }

    /// Delete `collection` in bounded batches until empty.
    async fn sweep<T, F>(&self, collection: CollectionPath, groups_for: F) -> Result<usize>
    where
        T: DeserializeOwned + Send,
        F: Fn(&StoredDoc<T>) -> Vec<Write>,
    {
        let mut removed = 0;
        loop {
            let batch: Vec<StoredDoc<T>> = self
                .db
                .query(&Query::new(collection.clone()).limit(BATCH_SIZE as u32))
                .await?;
            if batch.is_empty() {
                return Ok(removed);
            }

            let groups: Vec<Vec<Write>> = batch.iter().map(&groups_for).collect();
            self.db.commit_grouped(groups).await?;
            removed += batch.len();
        }
    }

    async fn purge_authored_posts(&self, user_id: &str) -> Result<usize> {
        let mut removed = 0;
        loop {
            let batch: Vec<StoredDoc<AuthorRef>> = self
                .db
                .query(
                    &Query::new(posts())
                        .eq("userId", user_id)
                        .limit(BATCH_SIZE as u32),
                )
                .await?;
            if batch.is_empty() {
                return Ok(removed);
            }

            for post in &batch {
                let comments = self.forum.purge_post(&post.id, user_id).await?;
                tracing::debug!(user_id, post_id = %post.id, comments, "Authored post removed");
                removed += 1;
            }
        }
    }

    async fn remove_account(&self, user_id: &str, email: Option<&str>) -> Result<()> {
        let tombstone = Tombstone {
            email: email.map(str::to_string),
            deleted_at: server_timestamp(),
        };

        self.db
            .commit(vec![
                Write::set(tombstone_doc(user_id), &tombstone)?,
                Write::delete(user_doc(user_id)),
            ])
            .await
    }
}

/// Comment ID for an index entry; entries are keyed by comment ID, the field is a fallback.
fn comment_id(entry: &StoredDoc<CommentPointer>) -> String {
    if entry.data.comment_id.is_empty() {
        entry.id.clone()
    } else {
        entry.data.comment_id.clone()
    }
}

/// Display name for a new account: token name, else email local part.
fn starter_name(identity: &VerifiedIdentity) -> String {
    identity
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or_else(|| {
            identity
                .email
                .as_deref()
                .and_then(|e| e.split('@').next())
                .filter(|local| !local.is_empty())
        })
        .unwrap_or("anonymous")
        .to_string()
}
