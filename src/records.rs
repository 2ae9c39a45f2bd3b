use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreResult;
use crate::models::{Department, Employee, Feedback, SurveyResponse, WorkloadEntry};
use crate::store::{self, from_item, to_item, KeyValueStore};

/// A typed row of one store table.
pub trait Record: Serialize + DeserializeOwned {
    const TABLE: &'static str;
}

impl Record for SurveyResponse {
    const TABLE: &'static str = store::SURVEY_RESPONSES;
}

impl Record for Employee {
    const TABLE: &'static str = store::EMPLOYEES;
}

impl Record for Department {
    const TABLE: &'static str = store::DEPARTMENTS;
}

impl Record for Feedback {
    const TABLE: &'static str = store::FEEDBACKS;
}

impl Record for WorkloadEntry {
    const TABLE: &'static str = store::WORKLOADS;
}

/// Scans the whole table. Items that no longer decode are logged and skipped.
pub async fn load_all<T: Record>(store: &dyn KeyValueStore) -> StoreResult<Vec<T>> {
    let items = store.scan_all(T::TABLE).await?;
    let mut records = Vec::with_capacity(items.len());
    for item in items.iter() {
        match from_item::<T>(item) {
            Ok(record) => records.push(record),
            Err(err) => tracing::warn!(table = T::TABLE, error = %err, "skipping malformed item"),
        }
    }
    Ok(records)
}

pub async fn load<T: Record>(store: &dyn KeyValueStore, key: &str) -> StoreResult<Option<T>> {
    match store.get(T::TABLE, key).await? {
        Some(item) => Ok(Some(from_item(&item)?)),
        None => Ok(None),
    }
}

pub async fn save<T: Record>(store: &dyn KeyValueStore, record: &T) -> StoreResult<()> {
    store.put(T::TABLE, to_item(record)?).await
}

/// Writes only the serialized fields of `partial`; `None` fields are skipped.
pub async fn update<T: Record, P: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    partial: &P,
) -> StoreResult<Option<T>> {
    match store.update(T::TABLE, key, to_item(partial)?).await? {
        Some(item) => Ok(Some(from_item(&item)?)),
        None => Ok(None),
    }
}
