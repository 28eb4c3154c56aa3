// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Forum posts and comments.
//!
//! Every post write also writes the author's `myPosts` mirror, and every
//! comment write also writes the commenter's `myComments` index entry, in the
//! same atomic commit.

use crate::db::{
    comments, my_comments, my_posts, posts, user_doc, FirestoreDb, Order, Page, Query, StoredDoc,
    TxnPlan, Write, BATCH_SIZE,
};
use crate::error::{AppError, Result};
use crate::models::{AuthorRef, Comment, CommentIndexEntry, Post, User};
use crate::time_utils::server_timestamp;
use serde_json::json;

/// Largest page a listing returns.
pub const MAX_PAGE_SIZE: u32 = 50;
const MAX_COMMENTS: u32 = 500;
const ANONYMOUS: &str = "anonymous";

/// The user performing a forum action.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub email: Option<String>,
    pub is_admin: bool,
}

impl Actor {
    fn may_moderate(&self, owner_id: &str) -> bool {
        self.is_admin || self.user_id == owner_id
    }
}

fn require_text(value: &str, field: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::InvalidPayload(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

#[derive(Clone)]
pub struct ForumService {
    db: FirestoreDb,
}

impl ForumService {
    pub fn new(db: FirestoreDb) -> Self {
        Self { db }
    }

    /// Name shown on new posts: profile name, else email local part, else "anonymous".
    pub async fn display_name(&self, actor: &Actor) -> Result<String> {
        let user: Option<User> = self.db.get(&user_doc(&actor.user_id)).await?;

        let name = user
            .map(|u| u.name.trim().to_string())
            .filter(|n| !n.is_empty())
            .or_else(|| {
                actor
                    .email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .map(str::trim)
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| ANONYMOUS.to_string());
        Ok(name)
    }

    // ─── Posts ───────────────────────────────────────────────

    pub async fn create_post(&self, actor: &Actor, title: &str, contents: &str) -> Result<String> {
        let post = Post {
            title: require_text(title, "title")?,
            contents: require_text(contents, "contents")?,
            user_id: actor.user_id.clone(),
            user_name: self.display_name(actor).await?,
            date_time: server_timestamp(),
            views: 0,
        };

        let post_id = uuid::Uuid::new_v4().simple().to_string();
        self.db
            .commit(vec![
                Write::set(posts().doc(post_id.clone()), &post)?,
                Write::set(my_posts(&actor.user_id).doc(post_id.clone()), &post)?,
            ])
            .await?;

        tracing::info!(user_id = %actor.user_id, post_id = %post_id, "Post created");
        Ok(post_id)
    }

    /// All posts, newest first.
    pub async fn list_posts(
        &self,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<StoredDoc<Post>>> {
        self.page(Query::new(posts()), limit, cursor).await
    }

    /// The caller's posts, newest first, read from their mirror.
    pub async fn list_my_posts(
        &self,
        user_id: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<StoredDoc<Post>>> {
        self.page(Query::new(my_posts(user_id)), limit, cursor).await
    }

    async fn page<T>(
        &self,
        query: Query,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<StoredDoc<T>>>
    where
        T: serde::de::DeserializeOwned + Send + HasDateTime,
    {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let mut query = query.order_by("dateTime", Order::Descending).limit(limit);
        if let Some(cursor) = cursor {
            query = query.less_than("dateTime", cursor);
        }

        let items: Vec<StoredDoc<T>> = self.db.query(&query).await?;
        let next_cursor = if items.len() as u32 >= limit {
            items.last().map(|doc| doc.data.date_time().to_string())
        } else {
            None
        };
        Ok(Page { items, next_cursor })
    }

    /// Read a post and count the view on both copies.
    pub async fn view_post(&self, post_id: &str) -> Result<StoredDoc<Post>> {
        let path = posts().doc(post_id);

        let post = self
            .db
            .run_transaction(&path, |post: Option<Post>| {
                let mut post =
                    post.ok_or_else(|| AppError::NotFound(format!("Post {} not found", post_id)))?;
                post.views += 1;

                let views = json!({ "views": post.views });
                Ok(TxnPlan::new(post.clone())
                    .write(Write::merge(path.clone(), views, &["views"]))
                    .write(Write::set(my_posts(&post.user_id).doc(post_id), &post)?))
            })
            .await?;

        Ok(StoredDoc {
            id: post_id.to_string(),
            data: post,
        })
    }

    /// Edit title and/or contents. Owner or admin only.
    pub async fn edit_post(
        &self,
        actor: &Actor,
        post_id: &str,
        title: Option<&str>,
        contents: Option<&str>,
    ) -> Result<()> {
        let title = title.map(str::trim).filter(|t| !t.is_empty());
        let contents = contents.map(str::trim).filter(|c| !c.is_empty());
        if title.is_none() && contents.is_none() {
            return Err(AppError::InvalidPayload("no changes".to_string()));
        }

        let path = posts().doc(post_id);
        self.db
            .run_transaction(&path, |post: Option<Post>| {
                let post =
                    post.ok_or_else(|| AppError::NotFound(format!("Post {} not found", post_id)))?;
                if !actor.may_moderate(&post.user_id) {
                    return Err(AppError::Forbidden("not the author of this post".to_string()));
                }

                let mut fields = Vec::new();
                let mut data = serde_json::Map::new();
                if let Some(title) = title {
                    data.insert("title".to_string(), json!(title));
                    fields.push("title");
                }
                if let Some(contents) = contents {
                    data.insert("contents".to_string(), json!(contents));
                    fields.push("contents");
                }
                let data = serde_json::Value::Object(data);

                Ok(TxnPlan::new(())
                    .write(Write::merge(path.clone(), data.clone(), &fields))
                    .write(Write::merge(
                        my_posts(&post.user_id).doc(post_id),
                        data,
                        &fields,
                    )))
            })
            .await?;

        tracing::info!(user_id = %actor.user_id, post_id, "Post edited");
        Ok(())
    }

    /// Delete a post with its comments. Owner or admin only.
    pub async fn delete_post(&self, actor: &Actor, post_id: &str) -> Result<()> {
        let post: AuthorRef = self
            .db
            .get(&posts().doc(post_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", post_id)))?;

        if !actor.may_moderate(&post.user_id) {
            return Err(AppError::Forbidden("not the author of this post".to_string()));
        }

        let removed = self.purge_post(post_id, &post.user_id).await?;
        tracing::info!(user_id = %actor.user_id, post_id, comments = removed, "Post deleted");
        Ok(())
    }

    /// Remove a post's comments (with each commenter's index entry), then the
    /// post and its mirror. Safe to re-run after a partial failure.
    ///
    /// Returns the number of comments removed.
    pub async fn purge_post(&self, post_id: &str, author_id: &str) -> Result<usize> {
        let removed = self.drain_comments(post_id).await?;

        let mut writes = vec![Write::delete(posts().doc(post_id))];
        if !author_id.is_empty() {
            writes.push(Write::delete(my_posts(author_id).doc(post_id)));
        }
        self.db.commit(writes).await?;
        Ok(removed)
    }

    async fn drain_comments(&self, post_id: &str) -> Result<usize> {
        let mut removed = 0;
        loop {
            let batch: Vec<StoredDoc<AuthorRef>> = self
                .db
                .query(&Query::new(comments(post_id)).limit(BATCH_SIZE as u32))
                .await?;
            if batch.is_empty() {
                return Ok(removed);
            }

            let groups = batch
                .iter()
                .map(|comment| {
                    let mut group = vec![Write::delete(comments(post_id).doc(comment.id.clone()))];
                    if !comment.data.user_id.is_empty() {
                        group.push(Write::delete(
                            my_comments(&comment.data.user_id).doc(comment.id.clone()),
                        ));
                    }
                    group
                })
                .collect();

            self.db.commit_grouped(groups).await?;
            removed += batch.len();
            tracing::debug!(post_id, removed, "Comment batch removed");
        }
    }

    // ─── Comments ────────────────────────────────────────────

    /// Add a comment. The post is re-read in the transaction so a comment is
    /// never written under a post that was just deleted.
    pub async fn add_comment(
        &self,
        actor: &Actor,
        post_id: &str,
        contents: &str,
    ) -> Result<String> {
        let comment = Comment {
            contents: require_text(contents, "contents")?,
            user_id: actor.user_id.clone(),
            user_name: self.display_name(actor).await?,
            date_time: server_timestamp(),
        };
        let comment_id = uuid::Uuid::new_v4().simple().to_string();
        let index = CommentIndexEntry::for_comment(post_id, &comment_id, &comment);

        let comment_write = Write::set(comments(post_id).doc(comment_id.clone()), &comment)?;
        let index_write = Write::set(my_comments(&actor.user_id).doc(comment_id.clone()), &index)?;

        self.db
            .run_transaction(&posts().doc(post_id), |post: Option<AuthorRef>| {
                if post.is_none() {
                    return Err(AppError::NotFound(format!("Post {} not found", post_id)));
                }
                Ok(TxnPlan::new(())
                    .write(comment_write.clone())
                    .write(index_write.clone()))
            })
            .await?;

        tracing::info!(
            user_id = %actor.user_id,
            post_id,
            comment_id = %comment_id,
            "Comment added"
        );
        Ok(comment_id)
    }

    /// Comments on a post, oldest first.
    pub async fn list_comments(&self, post_id: &str) -> Result<Vec<StoredDoc<Comment>>> {
        self.db
            .query(
                &Query::new(comments(post_id))
                    .order_by("dateTime", Order::Ascending)
                    .limit(MAX_COMMENTS),
            )
            .await
    }

    /// The caller's comments, newest first, read from their index.
    pub async fn list_my_comments(
        &self,
        user_id: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<Page<StoredDoc<CommentIndexEntry>>> {
        self.page(Query::new(my_comments(user_id)), limit, cursor).await
    }

    /// Delete a comment and its index entry. Allowed for the comment author,
    /// the post owner and admins.
    pub async fn delete_comment(
        &self,
        actor: &Actor,
        post_id: &str,
        comment_id: &str,
    ) -> Result<()> {
        let comment: AuthorRef = self
            .db
            .get(&comments(post_id).doc(comment_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Comment {} not found", comment_id)))?;

        let mut allowed = actor.may_moderate(&comment.user_id);
        if !allowed {
            let post: Option<AuthorRef> = self.db.get(&posts().doc(post_id)).await?;
            allowed = post.is_some_and(|p| p.user_id == actor.user_id);
        }
        if !allowed {
            return Err(AppError::Forbidden("not allowed to delete this comment".to_string()));
        }

        let mut writes = vec![Write::delete(comments(post_id).doc(comment_id))];
        if !comment.user_id.is_empty() {
            writes.push(Write::delete(my_comments(&comment.user_id).doc(comment_id)));
        }
        self.db.commit(writes).await?;

        tracing::info!(user_id = %actor.user_id, post_id, comment_id, "Comment deleted");
        Ok(())
    }
}

/// Documents listed newest first by `dateTime`.
trait HasDateTime {
    fn date_time(&self) -> &str;
}

impl HasDateTime for Post {
    fn date_time(&self) -> &str {
        &self.date_time
    }
}

impl HasDateTime for CommentIndexEntry {
    fn date_time(&self) -> &str {
        &self.date_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(id: &str) -> Actor {
        Actor {
            user_id: id.to_string(),
            email: Some(format!("{}@example.com", id)),
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn test_post_and_mirror_written_together() {
        let db = FirestoreDb::new_in_memory();
        let forum = ForumService::new(db.clone());

        let id = forum.create_post(&actor("alice"), " Hello ", "World").await.unwrap();

        let post: Post = db.get(&posts().doc(id.clone())).await.unwrap().unwrap();
        let mirror: Post = db.get(&my_posts("alice").doc(id)).await.unwrap().unwrap();
        assert_eq!(post, mirror);
        assert_eq!(post.title, "Hello");
        // No profile: falls back to the email local part
        assert_eq!(post.user_name, "alice");
    }

    #[tokio::test]
    async fn test_view_counts_on_both_copies() {
        let db = FirestoreDb::new_in_memory();
        let forum = ForumService::new(db.clone());
        let id = forum.create_post(&actor("alice"), "t", "c").await.unwrap();

        forum.view_post(&id).await.unwrap();
        let viewed = forum.view_post(&id).await.unwrap();
        assert_eq!(viewed.data.views, 2);

        let mirror: Post = db.get(&my_posts("alice").doc(id)).await.unwrap().unwrap();
        assert_eq!(mirror.views, 2);
    }

    #[tokio::test]
    async fn test_only_owner_or_admin_edits() {
        let db = FirestoreDb::new_in_memory();
        let forum = ForumService::new(db.clone());
        let id = forum.create_post(&actor("alice"), "t", "c").await.unwrap();

        let err = forum
            .edit_post(&actor("bob"), &id, Some("hijack"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let admin = Actor {
            is_admin: true,
            ..actor("mod")
        };
        forum.edit_post(&admin, &id, Some("fixed"), None).await.unwrap();

        let mirror: Post = db.get(&my_posts("alice").doc(id)).await.unwrap().unwrap();
        assert_eq!(mirror.title, "fixed");
        assert_eq!(mirror.contents, "c");
    }

    #[tokio::test]
    async fn test_comment_on_missing_post_rejected() {
        let db = FirestoreDb::new_in_memory();
        let forum = ForumService::new(db.clone());

        let err = forum.add_comment(&actor("bob"), "nope", "hi").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(db.memory_store().unwrap().count_matching("myComments"), 0);
    }

    #[tokio::test]
    async fn test_delete_post_clears_commenter_indexes() {
        let db = FirestoreDb::new_in_memory();
        let forum = ForumService::new(db.clone());
        let id = forum.create_post(&actor("alice"), "t", "c").await.unwrap();
        forum.add_comment(&actor("bob"), &id, "first").await.unwrap();
        forum.add_comment(&actor("carol"), &id, "second").await.unwrap();

        forum.delete_post(&actor("alice"), &id).await.unwrap();

        let store = db.memory_store().unwrap();
        assert_eq!(store.count_matching(&id), 0);
        assert_eq!(store.count_matching("myComments"), 0);
    }

    #[tokio::test]
    async fn test_post_owner_may_delete_others_comment() {
        let db = FirestoreDb::new_in_memory();
        let forum = ForumService::new(db.clone());
        let id = forum.create_post(&actor("alice"), "t", "c").await.unwrap();
        let comment = forum.add_comment(&actor("bob"), &id, "rude").await.unwrap();

        let err = forum
            .delete_comment(&actor("carol"), &id, &comment)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        forum.delete_comment(&actor("alice"), &id, &comment).await.unwrap();
        assert!(forum.list_comments(&id).await.unwrap().is_empty());
        let mine = forum.list_my_comments("bob", 10, None).await.unwrap();
        assert!(mine.items.is_empty());
    }
}
