// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with generic document operations.
//!
//! Provides the store capabilities the services rely on:
//! - point reads, overwrites, field-masked merges and deletes
//! - single-collection queries (equality / less-than, order, limit)
//! - atomic write groups bounded by [`MAX_WRITES_PER_COMMIT`]
//! - read-modify-write transactions retried on contention
//!
//! The same API is served by an in-memory backend for tests and offline use.

use crate::db::{
    CollectionPath, DocPath, Filter, MemoryStore, Order, Query, StoredDoc, TxnPlan, Write,
    BATCH_SIZE, MAX_WRITES_PER_COMMIT,
};
use crate::error::AppError;
use firestore::errors::FirestoreError;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Attempts before a contended transaction is reported as a conflict.
const MAX_TXN_ATTEMPTS: u32 = 5;
const TXN_BACKOFF_BASE: Duration = Duration::from_millis(50);

#[derive(Clone)]
enum Backend {
    Firestore(firestore::FirestoreDb),
    Memory(MemoryStore),
    Offline,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    backend: Backend,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::store(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            backend: Backend::Firestore(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| AppError::store(format!("Failed to connect to Firestore Emulator: {}", e)))?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            backend: Backend::Firestore(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self {
            backend: Backend::Offline,
        }
    }

    /// Create a client backed by a fresh in-memory store.
    pub fn new_in_memory() -> Self {
        Self::with_memory_store(MemoryStore::new())
    }

    /// Create a client over an existing in-memory store (shared with the caller).
    pub fn with_memory_store(store: MemoryStore) -> Self {
        Self {
            backend: Backend::Memory(store),
        }
    }

    /// The in-memory store, when this client uses one.
    pub fn memory_store(&self) -> Option<&MemoryStore> {
        match &self.backend {
            Backend::Memory(store) => Some(store),
            _ => None,
        }
    }

    fn offline() -> AppError {
        AppError::store("Database not connected (offline mode)")
    }

    // ─── Reads ───────────────────────────────────────────────────

    /// Read one document.
    pub async fn get<T>(&self, path: &DocPath) -> Result<Option<T>, AppError>
    where
        T: DeserializeOwned + Send,
    {
        match &self.backend {
            Backend::Firestore(client) => firestore_get(client, path).await,
            Backend::Memory(store) => store
                .get_value(path)?
                .map(|value| decode(path, value))
                .transpose(),
            Backend::Offline => Err(Self::offline()),
        }
    }

    /// Run a single-collection query.
    pub async fn query<T>(&self, query: &Query) -> Result<Vec<StoredDoc<T>>, AppError>
    where
        T: DeserializeOwned + Send,
    {
        match &self.backend {
            Backend::Firestore(client) => firestore_query(client, query).await,
            Backend::Memory(store) => store
                .query_values(query)?
                .into_iter()
                .map(|doc| {
                    let path = query.collection.doc(doc.id.clone());
                    Ok(StoredDoc {
                        id: doc.id,
                        data: decode(&path, doc.data)?,
                    })
                })
                .collect(),
            Backend::Offline => Err(Self::offline()),
        }
    }

    // ─── Writes ──────────────────────────────────────────────────

    /// Commit a group of writes atomically.
    pub async fn commit(&self, writes: Vec<Write>) -> Result<(), AppError> {
        if writes.is_empty() {
            return Ok(());
        }
        if writes.len() > MAX_WRITES_PER_COMMIT {
            return Err(AppError::Internal(anyhow::anyhow!(
                "commit of {} writes exceeds limit of {}",
                writes.len(),
                MAX_WRITES_PER_COMMIT
            )));
        }

        match &self.backend {
            Backend::Firestore(client) => {
                let mut transaction = client.begin_transaction().await.map_err(|e| {
                    AppError::store(format!("Failed to begin transaction: {}", e))
                })?;

                if let Err(e) = add_all(client, &mut transaction, &writes) {
                    let _ = transaction.rollback().await;
                    return Err(e);
                }

                transaction
                    .commit()
                    .await
                    .map_err(|e| commit_error("Failed to commit writes", e))?;
                Ok(())
            }
            Backend::Memory(store) => store.commit(&writes),
            Backend::Offline => Err(Self::offline()),
        }
    }

    /// Commit groups of writes in bounded chunks.
    ///
    /// Each group lands in a single commit; groups are packed up to
    /// [`BATCH_SIZE`] writes per commit. Not atomic across chunks.
    /// Returns the number of writes committed.
    pub async fn commit_grouped(&self, groups: Vec<Vec<Write>>) -> Result<usize, AppError> {
        let mut committed = 0;
        let mut chunk: Vec<Write> = Vec::new();

        for group in groups {
            if !chunk.is_empty() && chunk.len() + group.len() > BATCH_SIZE {
                committed += chunk.len();
                self.commit(std::mem::take(&mut chunk)).await?;
            }
            chunk.extend(group);
        }

        if !chunk.is_empty() {
            committed += chunk.len();
            self.commit(chunk).await?;
        }
        Ok(committed)
    }

    pub async fn set<T: serde::Serialize>(&self, path: DocPath, value: &T) -> Result<(), AppError> {
        self.commit(vec![Write::set(path, value)?]).await
    }

    pub async fn delete(&self, path: DocPath) -> Result<(), AppError> {
        self.commit(vec![Write::delete(path)]).await
    }

    // ─── Transactions ────────────────────────────────────────────

    /// Read `path`, hand it to `body`, and commit the returned writes atomically.
    ///
    /// The body may run more than once when the backend retries on
    /// contention, so it must be a pure function of the document it is given.
    /// An `Err` from the body aborts the transaction without writing.
    pub async fn run_transaction<D, T, F>(&self, path: &DocPath, body: F) -> Result<T, AppError>
    where
        D: DeserializeOwned + Send,
        T: Send,
        F: Fn(Option<D>) -> Result<TxnPlan<T>, AppError> + Send + Sync,
    {
        match &self.backend {
            Backend::Firestore(client) => firestore_transaction(client, path, &body).await,
            Backend::Memory(store) => store.transact(path, |raw| {
                let current = raw.map(|value| decode(path, value)).transpose()?;
                let plan = body(current)?;
                Ok((plan.writes, plan.output))
            }),
            Backend::Offline => Err(Self::offline()),
        }
    }
}

fn decode<T: DeserializeOwned>(path: &DocPath, value: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(value)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Malformed document {}: {}", path, e)))
}

// ─── Firestore backend ───────────────────────────────────────

/// Full parent path for a collection, as the Firestore API expects it.
fn parent_of(client: &firestore::FirestoreDb, collection: &CollectionPath) -> String {
    match &collection.parent {
        Some((parent_collection, parent_id)) => format!(
            "{}/{}/{}",
            client.get_documents_path(),
            parent_collection,
            parent_id
        ),
        None => client.get_documents_path().clone(),
    }
}

/// Whether a commit failed because of transaction contention or another
/// error the client marks as retryable.
fn is_contention(err: &FirestoreError) -> bool {
    matches!(err, FirestoreError::DatabaseError(db_err) if db_err.retry_possible)
}

/// A failed update precondition comes back as not-found; callers can act on it.
fn commit_error(context: &str, err: FirestoreError) -> AppError {
    match err {
        FirestoreError::DataNotFoundError(_) => {
            AppError::NotFound(format!("{}: {}", context, err))
        }
        other => AppError::store(format!("{}: {}", context, other)),
    }
}

async fn firestore_get<T>(
    client: &firestore::FirestoreDb,
    path: &DocPath,
) -> Result<Option<T>, AppError>
where
    T: DeserializeOwned + Send,
{
    let parent = parent_of(client, &path.collection);
    client
        .fluent()
        .select()
        .by_id_in(path.collection.name.as_str())
        .parent(parent.as_str())
        .obj()
        .one(&path.id)
        .await
        .map_err(AppError::store)
}

async fn firestore_query<T>(
    client: &firestore::FirestoreDb,
    query: &Query,
) -> Result<Vec<StoredDoc<T>>, AppError>
where
    T: DeserializeOwned + Send,
{
    let parent = parent_of(client, &query.collection);
    let mut select = client
        .fluent()
        .select()
        .from(query.collection.name.as_str())
        .parent(parent.as_str());

    if !query.filters.is_empty() {
        let filters = query.filters.clone();
        select = select.filter(move |q| {
            q.for_all(filters.iter().map(|f| match f {
                Filter::Eq(field, value) => q.field(field.as_str()).eq(value.clone()),
                Filter::NotEq(field, value) => q.field(field.as_str()).neq(value.clone()),
                Filter::LessThan(field, value) => {
                    q.field(field.as_str()).less_than(value.clone())
                }
            }))
        });
    }

    if let Some((field, order)) = &query.order_by {
        let direction = match order {
            Order::Ascending => firestore::FirestoreQueryDirection::Ascending,
            Order::Descending => firestore::FirestoreQueryDirection::Descending,
        };
        select = select.order_by([(field.as_str(), direction)]);
    }

    if let Some(limit) = query.limit {
        select = select.limit(limit);
    }

    let documents = select.query().await.map_err(AppError::store)?;

    documents
        .iter()
        .map(|doc| {
            let id = doc.name.rsplit('/').next().unwrap_or_default().to_string();
            let data = firestore::FirestoreDb::deserialize_doc_to::<T>(doc).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Malformed document {}: {}", doc.name, e))
            })?;
            Ok(StoredDoc { id, data })
        })
        .collect()
}

fn add_all(
    client: &firestore::FirestoreDb,
    transaction: &mut firestore::FirestoreTransaction<'_>,
    writes: &[Write],
) -> Result<(), AppError> {
    writes
        .iter()
        .try_for_each(|write| add_to_transaction(client, transaction, write))
}

fn add_to_transaction(
    client: &firestore::FirestoreDb,
    transaction: &mut firestore::FirestoreTransaction<'_>,
    write: &Write,
) -> Result<(), AppError> {
    let parent = parent_of(client, &write.path().collection);
    let added = match write {
        Write::Set { path, data } => client
            .fluent()
            .update()
            .in_col(path.collection.name.as_str())
            .document_id(&path.id)
            .parent(parent.as_str())
            .object(data)
            .add_to_transaction(transaction)
            .map(|_| ()),
        Write::Merge { path, data, fields } => client
            .fluent()
            .update()
            .fields(fields.iter().map(String::as_str))
            .in_col(path.collection.name.as_str())
            .document_id(&path.id)
            .parent(parent.as_str())
            .object(data)
            .add_to_transaction(transaction)
            .map(|_| ()),
        Write::Update { path, data, fields } => client
            .fluent()
            .update()
            .fields(fields.iter().map(String::as_str))
            .in_col(path.collection.name.as_str())
            .precondition(firestore::FirestoreWritePrecondition::Exists(true))
            .document_id(&path.id)
            .parent(parent.as_str())
            .object(data)
            .add_to_transaction(transaction)
            .map(|_| ()),
        Write::Delete { path } => client
            .fluent()
            .delete()
            .from(path.collection.name.as_str())
            .document_id(&path.id)
            .parent(parent.as_str())
            .add_to_transaction(transaction)
            .map(|_| ()),
    };

    added.map_err(|e| {
        AppError::store(format!(
            "Failed to add write for {} to transaction: {}",
            write.path(),
            e
        ))
    })
}

async fn firestore_transaction<D, T, F>(
    client: &firestore::FirestoreDb,
    path: &DocPath,
    body: &F,
) -> Result<T, AppError>
where
    D: DeserializeOwned + Send,
    T: Send,
    F: Fn(Option<D>) -> Result<TxnPlan<T>, AppError> + Send + Sync,
{
    for attempt in 1..=MAX_TXN_ATTEMPTS {
        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::store(format!("Failed to begin transaction: {}", e)))?;

        // Reads through this client register the document for conflict detection
        let txn_client = client.clone_with_consistency_selector(
            firestore::FirestoreConsistencySelector::Transaction(
                transaction.transaction_id().clone(),
            ),
        );

        let current: Option<D> = match firestore_get(&txn_client, path).await {
            Ok(current) => current,
            Err(e) => {
                let _ = transaction.rollback().await;
                return Err(e);
            }
        };

        let plan = match body(current) {
            Ok(plan) => plan,
            Err(e) => {
                let _ = transaction.rollback().await;
                return Err(e);
            }
        };

        if let Err(e) = add_all(client, &mut transaction, &plan.writes) {
            let _ = transaction.rollback().await;
            return Err(e);
        }

        match transaction.commit().await {
            Ok(_) => return Ok(plan.output),
            Err(e) if is_contention(&e) && attempt < MAX_TXN_ATTEMPTS => {
                tracing::warn!(
                    path = %path,
                    attempt,
                    error = %e,
                    "Transaction contention, retrying"
                );
                tokio::time::sleep(TXN_BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
            }
            Err(e) if is_contention(&e) => break,
            Err(e) => return Err(commit_error("Transaction commit failed", e)),
        }
    }

    Err(AppError::Conflict(format!(
        "transaction on {} did not commit after {} attempts",
        path, MAX_TXN_ATTEMPTS
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{mailbox, user_doc};
    use serde_json::{json, Value};

    fn details(code: &str) -> firestore::errors::FirestoreErrorPublicGenericDetails {
        firestore::errors::FirestoreErrorPublicGenericDetails {
            code: code.to_string(),
        }
    }

    fn database_error(code: &str, retry_possible: bool) -> FirestoreError {
        FirestoreError::DatabaseError(firestore::errors::FirestoreDatabaseError {
            public: details(code),
            details: "commit failed".to_string(),
            retry_possible,
        })
    }

    fn not_found() -> FirestoreError {
        FirestoreError::DataNotFoundError(firestore::errors::FirestoreDataNotFoundError {
            public: details("NotFound"),
            data_detail_message: "no entity to update".to_string(),
        })
    }

    #[test]
    fn test_only_retryable_database_errors_count_as_contention() {
        assert!(is_contention(&database_error("Aborted", true)));
        assert!(!is_contention(&database_error("InvalidArgument", false)));
        // Wording in a non-retryable error must not trigger a retry
        assert!(!is_contention(&database_error("ABORTED contention", false)));
        assert!(!is_contention(&not_found()));
    }

    #[test]
    fn test_missing_update_target_maps_to_not_found() {
        assert!(matches!(
            commit_error("Failed to commit writes", not_found()),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            commit_error("Failed to commit writes", database_error("Internal", false)),
            AppError::Unavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_offline_mode_reports_unavailable() {
        let db = FirestoreDb::new_mock();
        let err = db.get::<Value>(&user_doc("u1")).await.unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_commit_grouped_keeps_groups_together() {
        let db = FirestoreDb::new_in_memory();
        let col = mailbox("u1");
        let groups: Vec<Vec<Write>> = (0..BATCH_SIZE)
            .map(|i| {
                vec![
                    Write::Set {
                        path: col.doc(format!("a{}", i)),
                        data: json!({"n": i}),
                    },
                    Write::Set {
                        path: col.doc(format!("b{}", i)),
                        data: json!({"n": i}),
                    },
                ]
            })
            .collect();

        let committed = db.commit_grouped(groups).await.unwrap();
        assert_eq!(committed, BATCH_SIZE * 2);

        let docs: Vec<StoredDoc<Value>> = db.query(&Query::new(col)).await.unwrap();
        assert_eq!(docs.len(), BATCH_SIZE * 2);
    }

    #[tokio::test]
    async fn test_transaction_output_returned_after_commit() {
        let db = FirestoreDb::new_in_memory();
        let path = user_doc("u1");

        let created = db
            .run_transaction(&path, |current: Option<Value>| {
                let plan = TxnPlan::new(current.is_none());
                Ok(plan.write(Write::Set {
                    path: user_doc("u1"),
                    data: json!({"ticket": 0}),
                }))
            })
            .await
            .unwrap();

        assert!(created);
        let stored: Option<Value> = db.get(&path).await.unwrap();
        assert_eq!(stored.unwrap()["ticket"], 0);
    }
}
