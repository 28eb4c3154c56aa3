// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Display-name propagation.
//!
//! Posts are found by querying `userId`. Comments live under other users'
//! posts and cannot be queried by author, so they are found by walking the
//! author's `myComments` index.

use crate::db::{
    comments, my_comments, my_posts, posts, FirestoreDb, Query, StoredDoc, Write, BATCH_SIZE,
};
use crate::error::{AppError, Result};
use crate::models::{AuthorRef, CommentPointer};
use serde::de::IgnoredAny;
use serde::Serialize;
use serde_json::json;

/// A comment and its index entry take two writes, so comment pages are half
/// as long as post pages.
const COMMENT_PAGE: usize = BATCH_SIZE / 2;

/// Documents rewritten by one rename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationReport {
    pub posts: usize,
    pub post_mirrors: usize,
    pub comments: usize,
    /// Index entries whose comment no longer exists; these are removed
    pub dangling_removed: usize,
}

#[derive(Clone)]
pub struct PropagationService {
    db: FirestoreDb,
}

impl PropagationService {
    pub fn new(db: FirestoreDb) -> Self {
        Self { db }
    }

    /// Rewrite `userName` on every post, post mirror, comment and comment
    /// index entry authored by `user_id`.
    ///
    /// Each collection is walked in pages of documents still carrying another
    /// name, until none are left. Renames only update existing documents, so
    /// anything deleted while the rename runs stays deleted. A comment and
    /// its index entry always land in the same commit.
    pub async fn rename_author(&self, user_id: &str, new_name: &str) -> Result<PropagationReport> {
        let mut report = PropagationReport::default();
        let data = json!({ "userName": new_name });
        let rename = |path| Write::update(path, data.clone(), &["userName"]);

        report.posts = self
            .rename_all(
                Query::new(posts()).eq("userId", user_id),
                new_name,
                |post| rename(posts().doc(post.id.clone())),
            )
            .await?;

        report.post_mirrors = self
            .rename_all(Query::new(my_posts(user_id)), new_name, |mirror| {
                rename(my_posts(user_id).doc(mirror.id.clone()))
            })
            .await?;

        loop {
            let index: Vec<StoredDoc<CommentPointer>> = self
                .db
                .query(&stale_names(Query::new(my_comments(user_id)), new_name, COMMENT_PAGE))
                .await?;
            if index.is_empty() {
                break;
            }

            let mut renames = Vec::with_capacity(index.len());
            let mut removals = Vec::new();
            for entry in &index {
                let index_path = my_comments(user_id).doc(entry.id.clone());
                let comment_id = if entry.data.comment_id.is_empty() {
                    entry.id.clone()
                } else {
                    entry.data.comment_id.clone()
                };

                let live_path = comments(&entry.data.post_id).doc(comment_id);
                let live: Option<AuthorRef> = if entry.data.post_id.is_empty() {
                    None
                } else {
                    self.db.get(&live_path).await?
                };

                match live {
                    Some(comment) if comment.user_id == user_id => {
                        renames.push(vec![rename(live_path), rename(index_path)]);
                    }
                    Some(_) => {
                        tracing::warn!(
                            user_id,
                            comment = %live_path,
                            "Index entry points at another user's comment"
                        );
                        removals.push(Write::delete(index_path));
                    }
                    None => removals.push(Write::delete(index_path)),
                }
            }

            report.dangling_removed += removals.len();
            self.db.commit(removals).await?;
            report.comments += self.commit_page(renames).await?;
        }

        tracing::info!(
            user_id,
            posts = report.posts,
            post_mirrors = report.post_mirrors,
            comments = report.comments,
            dangling_removed = report.dangling_removed,
            "Author name propagated"
        );
        Ok(report)
    }

    /// Rename every document matched by `query` that still carries another
    /// name. Returns how many were rewritten.
    async fn rename_all<F>(&self, query: Query, new_name: &str, rename: F) -> Result<usize>
    where
        F: Fn(&StoredDoc<IgnoredAny>) -> Write,
    {
        let mut renamed = 0;
        loop {
            let page: Vec<StoredDoc<IgnoredAny>> = self
                .db
                .query(&stale_names(query.clone(), new_name, BATCH_SIZE))
                .await?;
            if page.is_empty() {
                return Ok(renamed);
            }

            let groups = page.iter().map(|doc| vec![rename(doc)]).collect();
            renamed += self.commit_page(groups).await?;
        }
    }

    /// Commit one page of rename groups. If a document was deleted after the
    /// page was read the whole commit fails; the groups are then retried one
    /// at a time and those whose documents are gone are dropped.
    ///
    /// Returns the number of groups that landed.
    async fn commit_page(&self, groups: Vec<Vec<Write>>) -> Result<usize> {
        let writes: Vec<Write> = groups.iter().flatten().cloned().collect();
        match self.db.commit(writes).await {
            Ok(()) => return Ok(groups.len()),
            Err(AppError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let mut landed = 0;
        for group in groups {
            match self.db.commit(group).await {
                Ok(()) => landed += 1,
                Err(AppError::NotFound(e)) => {
                    tracing::debug!(error = %e, "Renamed document deleted concurrently");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(landed)
    }
}

/// Narrow `query` to one page of documents whose `userName` differs from
/// `new_name`. Renamed and deleted documents drop out, so repeating the query
/// walks the whole collection.
fn stale_names(query: Query, new_name: &str, page: usize) -> Query {
    query.not_eq("userName", new_name).limit(page as u32)
}
