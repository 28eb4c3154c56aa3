// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer (Firestore).
//!
//! Documents are addressed by [`DocPath`] (collection path + id). Every write
//! goes through [`Write`] so the same write group can be committed by the
//! Firestore backend or the in-memory backend.

pub mod firestore;
pub mod memory;

pub use self::firestore::FirestoreDb;
pub use memory::MemoryStore;

use serde_json::Value;

/// Firestore limits batch/transaction writes to 500 operations.
pub const MAX_WRITES_PER_COMMIT: usize = 500;

/// Chunk size for unbounded sweeps. Stays well below the commit limit.
pub const BATCH_SIZE: usize = 400;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    /// Per-user reward envelopes (`users/{uid}/mailbox`)
    pub const MAILBOX: &str = "mailbox";
    /// Catalog documents keyed by channel (`items/{web|game|events}`)
    pub const CATALOG: &str = "items";
    pub const POSTS: &str = "posts";
    /// Comments under a post (`posts/{postId}/comments`)
    pub const COMMENTS: &str = "comments";
    /// Mirror of a user's posts (`users/{uid}/myPosts`)
    pub const MY_POSTS: &str = "myPosts";
    /// Index of a user's comments (`users/{uid}/myComments`)
    pub const MY_COMMENTS: &str = "myComments";
    /// Email verification codes keyed by email
    pub const VERIFICATIONS: &str = "verifications";
    /// Deletion tombstones keyed by uid
    pub const DELETED_USERS: &str = "deletedUsers";
}

/// A collection, either top-level or nested under one parent document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionPath {
    /// Parent document as (collection, id)
    pub parent: Option<(String, String)>,
    pub name: String,
}

impl CollectionPath {
    pub fn root(name: &str) -> Self {
        Self {
            parent: None,
            name: name.to_string(),
        }
    }

    pub fn nested(parent_collection: &str, parent_id: &str, name: &str) -> Self {
        Self {
            parent: Some((parent_collection.to_string(), parent_id.to_string())),
            name: name.to_string(),
        }
    }

    pub fn doc(&self, id: impl Into<String>) -> DocPath {
        DocPath {
            collection: self.clone(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.parent {
            Some((col, id)) => write!(f, "{}/{}/{}", col, id, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Full address of one document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocPath {
    pub collection: CollectionPath,
    pub id: String,
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

// ─── Path helpers ────────────────────────────────────────────

pub fn users() -> CollectionPath {
    CollectionPath::root(collections::USERS)
}

pub fn user_doc(user_id: &str) -> DocPath {
    users().doc(user_id)
}

pub fn mailbox(user_id: &str) -> CollectionPath {
    CollectionPath::nested(collections::USERS, user_id, collections::MAILBOX)
}

pub fn my_posts(user_id: &str) -> CollectionPath {
    CollectionPath::nested(collections::USERS, user_id, collections::MY_POSTS)
}

pub fn my_comments(user_id: &str) -> CollectionPath {
    CollectionPath::nested(collections::USERS, user_id, collections::MY_COMMENTS)
}

pub fn posts() -> CollectionPath {
    CollectionPath::root(collections::POSTS)
}

pub fn comments(post_id: &str) -> CollectionPath {
    CollectionPath::nested(collections::POSTS, post_id, collections::COMMENTS)
}

pub fn catalog_doc(channel: &str) -> DocPath {
    CollectionPath::root(collections::CATALOG).doc(channel)
}

pub fn verification_doc(email: &str) -> DocPath {
    // Emails may contain characters Firestore rejects in document IDs
    CollectionPath::root(collections::VERIFICATIONS).doc(urlencoding::encode(email).into_owned())
}

pub fn tombstone_doc(user_id: &str) -> DocPath {
    CollectionPath::root(collections::DELETED_USERS).doc(user_id)
}

// ─── Writes ──────────────────────────────────────────────────

/// One write inside an atomic commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Overwrite the whole document.
    Set { path: DocPath, data: Value },
    /// Update only the listed field paths (dotted for nested maps), taking
    /// values from `data`. Creates the document if it does not exist.
    Merge {
        path: DocPath,
        data: Value,
        fields: Vec<String>,
    },
    /// Like [`Write::Merge`], but the document must already exist. A missing
    /// document fails the whole commit with [`AppError::NotFound`].
    ///
    /// [`AppError::NotFound`]: crate::error::AppError::NotFound
    Update {
        path: DocPath,
        data: Value,
        fields: Vec<String>,
    },
    Delete { path: DocPath },
}

impl Write {
    pub fn set<T: serde::Serialize>(
        path: DocPath,
        value: &T,
    ) -> Result<Self, crate::error::AppError> {
        let data = serde_json::to_value(value).map_err(|e| {
            crate::error::AppError::Internal(anyhow::anyhow!("serialize {}: {}", path, e))
        })?;
        Ok(Write::Set { path, data })
    }

    pub fn merge(path: DocPath, data: Value, fields: &[&str]) -> Self {
        Write::Merge {
            path,
            data,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn update(path: DocPath, data: Value, fields: &[&str]) -> Self {
        Write::Update {
            path,
            data,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn delete(path: DocPath) -> Self {
        Write::Delete { path }
    }

    pub fn path(&self) -> &DocPath {
        match self {
            Write::Set { path, .. }
            | Write::Merge { path, .. }
            | Write::Update { path, .. }
            | Write::Delete { path } => path,
        }
    }
}

// ─── Queries ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, String),
    /// Matches documents whose field is present and differs from the value.
    NotEq(String, String),
    LessThan(String, String),
}

/// A single-collection query. No joins: cross-references are resolved by callers.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: CollectionPath,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Order)>,
    pub limit: Option<u32>,
}

impl Query {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn eq(mut self, field: &str, value: impl Into<String>) -> Self {
        self.filters.push(Filter::Eq(field.to_string(), value.into()));
        self
    }

    pub fn not_eq(mut self, field: &str, value: impl Into<String>) -> Self {
        self.filters
            .push(Filter::NotEq(field.to_string(), value.into()));
        self
    }

    pub fn less_than(mut self, field: &str, value: impl Into<String>) -> Self {
        self.filters
            .push(Filter::LessThan(field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, order: Order) -> Self {
        self.order_by = Some((field.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A document returned by a query, together with its ID.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredDoc<T> {
    pub id: String,
    #[serde(flatten)]
    pub data: T,
}

/// One page of a newest-first listing. `next_cursor` is the ordering value
/// of the last document returned, or `None` when the listing is exhausted.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Writes to commit atomically with a transaction, plus the value handed back
/// to the caller once the commit succeeds.
#[derive(Debug)]
pub struct TxnPlan<T> {
    pub writes: Vec<Write>,
    pub output: T,
}

impl<T> TxnPlan<T> {
    pub fn new(output: T) -> Self {
        Self {
            writes: Vec::new(),
            output,
        }
    }

    pub fn write(mut self, write: Write) -> Self {
        self.writes.push(write);
        self
    }
}
