// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory document store with Firestore semantics.
//!
//! Used for tests and offline development. A single lock serializes every
//! commit and transaction, which gives the same isolation guarantees the
//! Firestore backend gets from optimistic concurrency.

use super::{DocPath, Filter, Order, Query, StoredDoc, Write};
use crate::error::AppError;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    docs: BTreeMap<DocPath, Value>,
    /// Collection names whose writes fail (test hook).
    failing: HashSet<String>,
}

/// Shared in-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, AppError> {
        self.inner
            .lock()
            .map_err(|_| AppError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    /// Make every write touching `collection` fail until cleared.
    pub fn fail_writes_to(&self, collection: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing.insert(collection.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing.clear();
        }
    }

    /// Number of stored documents whose path contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .docs
                    .iter()
                    .filter(|(path, data)| {
                        path.to_string().contains(needle) || data.to_string().contains(needle)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn get_value(&self, path: &DocPath) -> Result<Option<Value>, AppError> {
        Ok(self.lock()?.docs.get(path).cloned())
    }

    pub fn query_values(&self, query: &Query) -> Result<Vec<StoredDoc<Value>>, AppError> {
        let inner = self.lock()?;
        Ok(run_query(&inner.docs, query))
    }

    pub fn commit(&self, writes: &[Write]) -> Result<(), AppError> {
        let mut inner = self.lock()?;
        apply_all(&mut inner, writes)
    }

    /// Read one document, run `body` on it, and apply the resulting writes
    /// while holding the store lock.
    pub fn transact<F, R>(&self, path: &DocPath, body: F) -> Result<R, AppError>
    where
        F: FnOnce(Option<Value>) -> Result<(Vec<Write>, R), AppError>,
    {
        let mut inner = self.lock()?;
        let current = inner.docs.get(path).cloned();
        let (writes, output) = body(current)?;
        apply_all(&mut inner, &writes)?;
        Ok(output)
    }
}

fn apply_all(inner: &mut Inner, writes: &[Write]) -> Result<(), AppError> {
    if writes.len() > super::MAX_WRITES_PER_COMMIT {
        return Err(AppError::Internal(anyhow::anyhow!(
            "commit of {} writes exceeds limit of {}",
            writes.len(),
            super::MAX_WRITES_PER_COMMIT
        )));
    }

    if let Some(write) = writes
        .iter()
        .find(|w| inner.failing.contains(&w.path().collection.name))
    {
        return Err(AppError::Unavailable(format!(
            "injected write failure for {}",
            write.path()
        )));
    }

    check_preconditions(&inner.docs, writes)?;

    for write in writes {
        match write {
            Write::Set { path, data } => {
                inner.docs.insert(path.clone(), data.clone());
            }
            Write::Merge { path, data, fields } | Write::Update { path, data, fields } => {
                let doc = inner
                    .docs
                    .entry(path.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                apply_fields(doc, data, fields);
            }
            Write::Delete { path } => {
                inner.docs.remove(path);
            }
        }
    }
    Ok(())
}

/// Fail the commit if any update targets a document that will not exist when
/// the update is reached. Earlier writes in the same commit count.
fn check_preconditions(
    docs: &BTreeMap<DocPath, Value>,
    writes: &[Write],
) -> Result<(), AppError> {
    let mut staged: HashMap<&DocPath, bool> = HashMap::new();
    for write in writes {
        match write {
            Write::Set { path, .. } | Write::Merge { path, .. } => {
                staged.insert(path, true);
            }
            Write::Delete { path } => {
                staged.insert(path, false);
            }
            Write::Update { path, .. } => {
                let exists = staged
                    .get(path)
                    .copied()
                    .unwrap_or_else(|| docs.contains_key(path));
                if !exists {
                    return Err(AppError::NotFound(format!("No document to update: {}", path)));
                }
            }
        }
    }
    Ok(())
}

fn apply_fields(doc: &mut Value, data: &Value, fields: &[String]) {
    for field in fields {
        match lookup(data, field) {
            Some(value) => assign(doc, field, value.clone()),
            None => remove(doc, field),
        }
    }
}

/// Resolve a dotted field path.
fn lookup<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

fn assign(doc: &mut Value, field: &str, value: Value) {
    let mut segments: Vec<&str> = field.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };

    let mut current = doc;
    for segment in segments {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(last.to_string(), value);
    }
}

fn remove(doc: &mut Value, field: &str) {
    let (parent, last) = match field.rsplit_once('.') {
        Some((parent, last)) => (lookup_mut(doc, parent), last),
        None => (Some(doc), field),
    };
    if let Some(Value::Object(map)) = parent {
        map.remove(last);
    }
}

fn lookup_mut<'a>(value: &'a mut Value, field: &str) -> Option<&'a mut Value> {
    field
        .split('.')
        .try_fold(value, |current, segment| current.get_mut(segment))
}

fn run_query(docs: &BTreeMap<DocPath, Value>, query: &Query) -> Vec<StoredDoc<Value>> {
    let mut matches: Vec<StoredDoc<Value>> = docs
        .iter()
        .filter(|(path, _)| path.collection == query.collection)
        .filter(|(_, data)| query.filters.iter().all(|f| matches_filter(data, f)))
        // Firestore omits documents that lack the ordering field
        .filter(|(_, data)| {
            query
                .order_by
                .as_ref()
                .map_or(true, |(field, _)| lookup(data, field).is_some())
        })
        .map(|(path, data)| StoredDoc {
            id: path.id.clone(),
            data: data.clone(),
        })
        .collect();

    if let Some((field, order)) = &query.order_by {
        matches.sort_by(|a, b| {
            let ord = compare_values(lookup(&a.data, field), lookup(&b.data, field))
                .then_with(|| a.id.cmp(&b.id));
            match order {
                Order::Ascending => ord,
                Order::Descending => ord.reverse(),
            }
        });
    }

    if let Some(limit) = query.limit {
        matches.truncate(limit as usize);
    }
    matches
}

fn matches_filter(data: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(field, expected) => {
            lookup(data, field).and_then(Value::as_str) == Some(expected.as_str())
        }
        Filter::NotEq(field, excluded) => lookup(data, field)
            .and_then(Value::as_str)
            .is_some_and(|v| v != excluded.as_str()),
        Filter::LessThan(field, bound) => lookup(data, field)
            .and_then(Value::as_str)
            .is_some_and(|v| v < bound.as_str()),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{mailbox, user_doc};
    use serde_json::json;

    #[test]
    fn test_merge_updates_dotted_paths_only() {
        let store = MemoryStore::new();
        let path = user_doc("u1");
        store
            .commit(&[Write::Set {
                path: path.clone(),
                data: json!({
                    "name": "A",
                    "ticket": 1,
                    "items": {"currency_credit": 2, "sword": 1}
                }),
            }])
            .unwrap();

        store
            .commit(&[Write::merge(
                path.clone(),
                json!({"items": {"currency_credit": 7}}),
                &["items.currency_credit"],
            )])
            .unwrap();

        let doc = store.get_value(&path).unwrap().unwrap();
        assert_eq!(doc["items"]["currency_credit"], 7);
        assert_eq!(doc["items"]["sword"], 1);
        assert_eq!(doc["name"], "A");
    }

    #[test]
    fn test_query_orders_descending_and_limits() {
        let store = MemoryStore::new();
        let col = mailbox("u1");
        let writes: Vec<Write> = ["2024-01-01", "2024-03-01", "2024-02-01"]
            .iter()
            .enumerate()
            .map(|(i, ts)| Write::Set {
                path: col.doc(format!("m{}", i)),
                data: json!({"timestamp": ts}),
            })
            .collect();
        store.commit(&writes).unwrap();

        let docs = store
            .query_values(
                &Query::new(col.clone())
                    .order_by("timestamp", Order::Descending)
                    .limit(2),
            )
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);

        let older = store
            .query_values(
                &Query::new(col)
                    .less_than("timestamp", "2024-02-01")
                    .order_by("timestamp", Order::Descending),
            )
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, "m0");
    }

    #[test]
    fn test_update_of_missing_document_writes_nothing() {
        let store = MemoryStore::new();
        let present = user_doc("u1");
        store
            .commit(&[Write::Set {
                path: present.clone(),
                data: json!({"name": "A"}),
            }])
            .unwrap();

        let err = store
            .commit(&[
                Write::update(present.clone(), json!({"name": "B"}), &["name"]),
                Write::update(user_doc("gone"), json!({"name": "B"}), &["name"]),
            ])
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(store.get_value(&present).unwrap().unwrap()["name"], "A");
        assert!(store.get_value(&user_doc("gone")).unwrap().is_none());
    }

    #[test]
    fn test_update_sees_earlier_writes_in_commit() {
        let store = MemoryStore::new();
        let path = user_doc("u1");
        store
            .commit(&[
                Write::Set {
                    path: path.clone(),
                    data: json!({"name": "A", "ticket": 1}),
                },
                Write::update(path.clone(), json!({"name": "B"}), &["name"]),
            ])
            .unwrap();
        assert_eq!(store.get_value(&path).unwrap().unwrap()["name"], "B");

        let err = store
            .commit(&[
                Write::delete(path.clone()),
                Write::update(path.clone(), json!({"name": "C"}), &["name"]),
            ])
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(store.get_value(&path).unwrap().unwrap()["ticket"], 1);
    }

    #[test]
    fn test_not_eq_skips_missing_fields() {
        let store = MemoryStore::new();
        let col = mailbox("u1");
        store
            .commit(&[
                Write::Set {
                    path: col.doc("a"),
                    data: json!({"userName": "old"}),
                },
                Write::Set {
                    path: col.doc("b"),
                    data: json!({"userName": "new"}),
                },
                Write::Set {
                    path: col.doc("c"),
                    data: json!({}),
                },
            ])
            .unwrap();

        let docs = store
            .query_values(&Query::new(col).not_eq("userName", "new"))
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn test_oversized_commit_is_rejected() {
        let store = MemoryStore::new();
        let writes: Vec<Write> = (0..=crate::db::MAX_WRITES_PER_COMMIT)
            .map(|i| Write::delete(user_doc(&i.to_string())))
            .collect();
        assert!(store.commit(&writes).is_err());
    }

    #[test]
    fn test_failed_transaction_body_writes_nothing() {
        let store = MemoryStore::new();
        let path = user_doc("u1");
        let result: Result<(), AppError> = store.transact(&path, |_| {
            Err(AppError::InvalidPayload("nope".to_string()))
        });
        assert!(result.is_err());
        assert!(store.get_value(&path).unwrap().is_none());
    }
}
