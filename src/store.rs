use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};

pub const SURVEY_RESPONSES: &str = "Survey_Response";
pub const EMPLOYEES: &str = "Employees";
pub const DEPARTMENTS: &str = "Departments";
pub const FEEDBACKS: &str = "Feedbacks";
pub const WORKLOADS: &str = "Employee_Workload";
pub const UPLOAD_TASKS: &str = "Upload_Tasks";

pub fn key_attribute(table: &str) -> StoreResult<&'static str> {
    match table {
        SURVEY_RESPONSES => Ok("response_id"),
        EMPLOYEES => Ok("Employee_ID"),
        DEPARTMENTS => Ok("department_id"),
        FEEDBACKS => Ok("comment_id"),
        WORKLOADS => Ok("Workload_ID"),
        UPLOAD_TASKS => Ok("task_id"),
        other => Err(StoreError::UnknownTable(other.to_string())),
    }
}

/// Attribute value at rest. Numbers are fixed-point with two decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attr {
    S(String),
    N(Decimal),
    #[serde(rename = "BOOL")]
    Bool(bool),
    L(Vec<Attr>),
    M(Item),
    #[serde(rename = "NULL")]
    Null,
}

pub type Item = BTreeMap<String, Attr>;

pub fn quantize(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

fn attr_from_value(value: Value) -> Attr {
    match value {
        Value::Null => Attr::Null,
        Value::Bool(b) => Attr::Bool(b),
        Value::Number(n) => {
            let decimal = if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Decimal::from_u64(u)
            } else {
                n.as_f64().and_then(quantize)
            };
            decimal.map(Attr::N).unwrap_or(Attr::Null)
        }
        Value::String(s) => Attr::S(s),
        Value::Array(items) => Attr::L(items.into_iter().map(attr_from_value).collect()),
        Value::Object(map) => Attr::M(
            map.into_iter()
                .map(|(k, v)| (k, attr_from_value(v)))
                .collect(),
        ),
    }
}

fn value_from_attr(attr: &Attr) -> Value {
    match attr {
        Attr::S(s) => Value::String(s.clone()),
        Attr::N(d) => {
            if d.fract().is_zero() {
                if let Some(i) = d.to_i64() {
                    return Value::Number(Number::from(i));
                }
            }
            d.to_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        Attr::Bool(b) => Value::Bool(*b),
        Attr::L(items) => Value::Array(items.iter().map(value_from_attr).collect()),
        Attr::M(map) => Value::Object(item_to_json(map)),
        Attr::Null => Value::Null,
    }
}

pub fn item_to_json(item: &Item) -> Map<String, Value> {
    item.iter()
        .map(|(k, v)| (k.clone(), value_from_attr(v)))
        .collect()
}

/// Float to fixed-point boundary for writes.
pub fn to_item<T: Serialize>(value: &T) -> StoreResult<Item> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, attr_from_value(v)))
            .collect()),
        other => Err(StoreError::Malformed {
            table: String::new(),
            reason: format!("expected an object, got {other}"),
        }),
    }
}

/// Fixed-point to float boundary for reads.
pub fn from_item<T: DeserializeOwned>(item: &Item) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(item_to_json(item)))?)
}

pub fn item_key(table: &str, item: &Item) -> StoreResult<String> {
    let key = key_attribute(table)?;
    match item.get(key) {
        Some(Attr::S(value)) => Ok(value.clone()),
        Some(Attr::N(value)) => Ok(value.normalize().to_string()),
        _ => Err(StoreError::MissingKey {
            table: table.to_string(),
            key: key.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    pub next: Option<String>,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Items after `start_after` in key order, at most the store's page size.
    async fn scan_page(&self, table: &str, start_after: Option<String>) -> StoreResult<Page>;

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Item>>;

    async fn put(&self, table: &str, item: Item) -> StoreResult<()>;

    /// Merges `partial` into an existing item. Absent keys are not created.
    async fn update(&self, table: &str, key: &str, partial: Item) -> StoreResult<Option<Item>>;

    async fn scan_all(&self, table: &str) -> StoreResult<Vec<Item>> {
        let mut items = Vec::new();
        let mut cursor = None;
        loop {
            let page = self.scan_page(table, cursor).await?;
            items.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(items)
    }
}

pub struct MemoryStore {
    page_size: usize,
    tables: RwLock<HashMap<String, BTreeMap<String, Item>>>,
}

impl MemoryStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            tables: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn scan_page(&self, table: &str, start_after: Option<String>) -> StoreResult<Page> {
        key_attribute(table)?;
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(table) else {
            return Ok(Page::default());
        };

        let iter: Box<dyn Iterator<Item = (&String, &Item)> + '_> = match &start_after {
            Some(after) => Box::new(
                rows.range::<String, _>((
                    std::ops::Bound::Excluded(after.clone()),
                    std::ops::Bound::Unbounded,
                )),
            ),
            None => Box::new(rows.iter()),
        };

        let mut items = Vec::new();
        let mut last_key = None;
        for (key, item) in iter.take(self.page_size + 1) {
            if items.len() == self.page_size {
                return Ok(Page {
                    items,
                    next: last_key,
                });
            }
            items.push(item.clone());
            last_key = Some(key.clone());
        }
        Ok(Page { items, next: None })
    }

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Item>> {
        key_attribute(table)?;
        let tables = self.tables.read().await;
        Ok(tables.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    async fn put(&self, table: &str, item: Item) -> StoreResult<()> {
        let key = item_key(table, &item)?;
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().insert(key, item);
        Ok(())
    }

    async fn update(&self, table: &str, key: &str, partial: Item) -> StoreResult<Option<Item>> {
        key_attribute(table)?;
        let mut tables = self.tables.write().await;
        let Some(existing) = tables.get_mut(table).and_then(|rows| rows.get_mut(key)) else {
            return Ok(None);
        };
        existing.extend(partial);
        Ok(Some(existing.clone()))
    }
}
