use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::error::StoreResult;
use crate::models::{Department, Employee, WorkloadEntry};
use crate::records;
use crate::store::{key_attribute, item_key, Item, KeyValueStore, Page};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Key-value tables on Postgres: one JSONB row per item.
pub struct PgStore {
    pool: PgPool,
    page_size: usize,
}

impl PgStore {
    pub fn new(pool: PgPool, page_size: usize) -> Self {
        Self {
            pool,
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl KeyValueStore for PgStore {
    async fn scan_page(&self, table: &str, start_after: Option<String>) -> StoreResult<Page> {
        key_attribute(table)?;
        let rows = sqlx::query(
            r#"
            SELECT item_key, item
            FROM kv_items
            WHERE table_name = $1 AND ($2::TEXT IS NULL OR item_key > $2)
            ORDER BY item_key
            LIMIT $3
            "#,
        )
        .bind(table)
        .bind(start_after)
        .bind((self.page_size + 1) as i64)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() > self.page_size;
        let mut items = Vec::with_capacity(rows.len().min(self.page_size));
        let mut last_key = None;
        for row in rows.into_iter().take(self.page_size) {
            let Json(item): Json<Item> = row.try_get("item")?;
            last_key = Some(row.try_get::<String, _>("item_key")?);
            items.push(item);
        }

        Ok(Page {
            items,
            next: if has_more { last_key } else { None },
        })
    }

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Item>> {
        key_attribute(table)?;
        let row = sqlx::query("SELECT item FROM kv_items WHERE table_name = $1 AND item_key = $2")
            .bind(table)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let Json(item): Json<Item> = row.try_get("item")?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, table: &str, item: Item) -> StoreResult<()> {
        let key = item_key(table, &item)?;
        sqlx::query(
            r#"
            INSERT INTO kv_items (table_name, item_key, item)
            VALUES ($1, $2, $3)
            ON CONFLICT (table_name, item_key) DO UPDATE
            SET item = EXCLUDED.item, updated_at = now()
            "#,
        )
        .bind(table)
        .bind(key)
        .bind(Json(&item))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, table: &str, key: &str, partial: Item) -> StoreResult<Option<Item>> {
        key_attribute(table)?;
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT item FROM kv_items WHERE table_name = $1 AND item_key = $2 FOR UPDATE",
        )
        .bind(table)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let Json(mut item): Json<Item> = row.try_get("item")?;
        item.extend(partial);

        sqlx::query(
            "UPDATE kv_items SET item = $3, updated_at = now() WHERE table_name = $1 AND item_key = $2",
        )
        .bind(table)
        .bind(key)
        .bind(Json(&item))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(item))
    }
}

/// Departments and employees so the first upload has sync targets.
pub async fn seed(store: &dyn KeyValueStore) -> anyhow::Result<()> {
    let departments = [
        ("D001", "Engineering"),
        ("D002", "Sales"),
        ("D003", "Operations"),
        ("D004", "Human Resources"),
        ("D005", "Finance"),
    ];
    for (id, name) in departments {
        records::save(
            store,
            &Department {
                department_id: id.to_string(),
                department_name: name.to_string(),
                ..Department::default()
            },
        )
        .await?;
    }

    let employees = [
        ("E001", "Aisyah Rahman", "Engineering", "Software Engineer", "Kuala Lumpur", "G5", "Senior"),
        ("E002", "Daniel Tan", "Engineering", "QA Analyst", "Penang", "G4", "Mid"),
        ("E003", "Priya Nair", "Sales", "Account Manager", "Kuala Lumpur", "G5", "Senior"),
        ("E004", "Hafiz Ismail", "Operations", "Operations Lead", "Johor Bahru", "G6", "Lead"),
        ("E005", "Mei Ling Wong", "Human Resources", "HR Business Partner", "Kuala Lumpur", "G5", "Senior"),
        ("E006", "Arjun Kumar", "Finance", "Financial Analyst", "Cyberjaya", "G4", "Mid"),
    ];
    for (id, name, division, position, location, grade, level) in employees {
        records::save(
            store,
            &Employee {
                employee_id: id.to_string(),
                name: Some(name.to_string()),
                division: Some(division.to_string()),
                position: Some(position.to_string()),
                location: Some(location.to_string()),
                job_grade: Some(grade.to_string()),
                employee_level: Some(level.to_string()),
                ..Employee::default()
            },
        )
        .await?;
    }

    let workloads = [
        ("W001", "E001", "2026-01-05", 46.0),
        ("W002", "E002", "2026-01-05", 41.5),
        ("W003", "E003", "2026-01-05", 44.0),
        ("W004", "E004", "2026-01-05", 52.0),
        ("W005", "E005", "2026-01-05", 39.0),
        ("W006", "E006", "2026-01-05", 42.5),
    ];
    for (id, employee_id, date, hours) in workloads {
        records::save(
            store,
            &WorkloadEntry {
                workload_id: id.to_string(),
                employee_id: employee_id.to_string(),
                date: Some(date.to_string()),
                hours_logged: Some(hours),
            },
        )
        .await?;
    }

    tracing::info!(
        departments = departments.len(),
        employees = employees.len(),
        "seed data written"
    );
    Ok(())
}
