use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::IngestError;
use crate::models::{parse_question_header, SurveyResponse, QUESTION_COUNT};
use crate::monitor::{AlertCounts, RiskMonitor};
use crate::records;
use crate::scoring::{score_response, DimensionMap};
use crate::store::KeyValueStore;
use crate::sync::{perform_full_sync, SyncReport};
use crate::temporal::{enrich, HolidayCalendar};

const SAMPLE_ROWS: usize = 10;

const EMPLOYEE_ID: &[&str] = &["employee_id", "Employee_ID", "mployee_id"];
const SUBMISSION_DATE: &[&str] = &["submission_date", "Submission_Date"];
const DEPARTMENT: &[&str] = &["department", "Department"];
const LOCATION: &[&str] = &["location", "Location"];
const RESPONSE_ID: &[&str] = &["response_id"];
const SENTIMENT_SCORE: &[&str] = &["sentiment_score", "Sentiment_Score"];

/// Column positions for one upload, resolved once from the header row.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    employee_id: usize,
    submission_date: usize,
    department: Option<usize>,
    location: Option<usize>,
    response_id: Option<usize>,
    sentiment_score: Option<usize>,
    /// (column position, 1-based question number)
    questions: Vec<(usize, usize)>,
}

impl ColumnSchema {
    pub fn resolve(headers: &csv::StringRecord) -> Result<Self, IngestError> {
        let find = |aliases: &[&str]| {
            headers
                .iter()
                .position(|h| aliases.contains(&h.trim()))
        };

        let mut questions: Vec<(usize, usize)> = Vec::new();
        let mut seen: Vec<Option<&str>> = vec![None; QUESTION_COUNT];
        for (column, header) in headers.iter().enumerate() {
            let Some(index) = parse_question_header(header) else {
                continue;
            };
            if index == 0 || index as usize > QUESTION_COUNT {
                return Err(IngestError::QuestionOutOfRange {
                    column: header.trim().to_string(),
                    index,
                });
            }
            let slot = &mut seen[index as usize - 1];
            if let Some(first) = slot {
                return Err(IngestError::DuplicateQuestion {
                    column: header.trim().to_string(),
                    index,
                    first: first.to_string(),
                });
            }
            *slot = Some(header.trim());
            questions.push((column, index as usize));
        }
        if questions.is_empty() {
            return Err(IngestError::NoQuestionColumns);
        }

        Ok(Self {
            employee_id: find(EMPLOYEE_ID).ok_or(IngestError::MissingColumn("employee_id"))?,
            submission_date: find(SUBMISSION_DATE).ok_or(IngestError::MissingColumn("submission_date"))?,
            department: find(DEPARTMENT),
            location: find(LOCATION),
            response_id: find(RESPONSE_ID),
            sentiment_score: find(SENTIMENT_SCORE),
            questions,
        })
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }
}

fn cell(row: &csv::StringRecord, column: Option<usize>) -> Option<String> {
    column
        .and_then(|c| row.get(c))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn number(row: &csv::StringRecord, column: usize) -> Option<f64> {
    row.get(column)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Parses an upload into scored, date-enriched responses.
pub fn parse_survey_csv<R: Read>(
    reader: R,
    map: DimensionMap,
    calendar: &HolidayCalendar,
) -> Result<Vec<SurveyResponse>, IngestError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let schema = ColumnSchema::resolve(reader.headers()?)?;
    tracing::debug!(questions = schema.question_count(), "upload header resolved");

    let mut responses = Vec::new();
    for result in reader.records() {
        let row = result?;
        let mut response = SurveyResponse {
            response_id: cell(&row, schema.response_id).unwrap_or_else(|| Uuid::new_v4().to_string()),
            employee_id: cell(&row, Some(schema.employee_id)),
            department: cell(&row, schema.department),
            location: cell(&row, schema.location),
            submission_date: cell(&row, Some(schema.submission_date)),
            sentiment_score: schema.sentiment_score.and_then(|c| number(&row, c)),
            ..SurveyResponse::default()
        };
        for (column, question) in &schema.questions {
            response.questions.set(*question, number(&row, *column));
        }
        score_response(&mut response, map);
        enrich(&mut response, calendar);
        responses.push(response);
    }
    Ok(responses)
}

pub fn validate_filename(filename: &str) -> Result<(), IngestError> {
    if filename.to_ascii_lowercase().ends_with(".csv") {
        Ok(())
    } else {
        Err(IngestError::UnsupportedFile(filename.to_string()))
    }
}

/// Everything an upload needs; cloned into the background job.
#[derive(Clone)]
pub struct IngestContext {
    pub store: Arc<dyn KeyValueStore>,
    pub monitor: Arc<RiskMonitor>,
    pub dimension_map: DimensionMap,
    pub calendar: Arc<HolidayCalendar>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub filename: String,
    pub total_rows_processed: usize,
    pub total_rows_saved: usize,
    pub failed_rows: usize,
    pub sync: SyncReport,
    pub alerts: AlertCounts,
    pub sample_data: Vec<SurveyResponse>,
}

/// Saves every parsed row, then refreshes employees/departments and runs alert checks.
/// A failed row write is counted and skipped.
pub async fn ingest_survey_csv(
    ctx: &IngestContext,
    bytes: &[u8],
    filename: &str,
    now: DateTime<Utc>,
) -> Result<IngestReport, IngestError> {
    let responses = parse_survey_csv(bytes, ctx.dimension_map, &ctx.calendar)?;
    tracing::info!(filename, rows = responses.len(), "survey upload parsed");

    let mut saved = Vec::with_capacity(responses.len());
    let mut failed_rows = 0usize;
    for response in &responses {
        match records::save(ctx.store.as_ref(), response).await {
            Ok(()) => saved.push(response),
            Err(err) => {
                failed_rows += 1;
                tracing::warn!(response_id = %response.response_id, error = %err, "failed to save survey row");
            }
        }
    }

    let sync = perform_full_sync(ctx.store.as_ref(), now).await?;
    let alerts = ctx.monitor.detect_and_notify(ctx.store.as_ref(), now).await;

    Ok(IngestReport {
        filename: filename.to_string(),
        total_rows_processed: responses.len(),
        total_rows_saved: saved.len(),
        failed_rows,
        sync,
        alerts,
        sample_data: saved.into_iter().take(SAMPLE_ROWS).cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::{StoreError, StoreResult};
    use crate::models::{Department, Employee, Quarter};
    use crate::monitor::AlertHub;
    use crate::store::{Attr, Item, MemoryStore, Page, SURVEY_RESPONSES};

    /// Memory store whose survey writes fail for one response id.
    struct RejectingStore {
        inner: MemoryStore,
        reject: &'static str,
    }

    #[async_trait]
    impl KeyValueStore for RejectingStore {
        async fn scan_page(&self, table: &str, start_after: Option<String>) -> StoreResult<Page> {
            self.inner.scan_page(table, start_after).await
        }

        async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Item>> {
            self.inner.get(table, key).await
        }

        async fn put(&self, table: &str, item: Item) -> StoreResult<()> {
            if table == SURVEY_RESPONSES && item.get("response_id") == Some(&Attr::S(self.reject.to_string())) {
                return Err(StoreError::Malformed {
                    table: table.to_string(),
                    reason: "write rejected".to_string(),
                });
            }
            self.inner.put(table, item).await
        }

        async fn update(&self, table: &str, key: &str, partial: Item) -> StoreResult<Option<Item>> {
            self.inner.update(table, key, partial).await
        }
    }

    fn headers(line: &str) -> csv::StringRecord {
        csv::StringRecord::from(line.split(',').collect::<Vec<_>>())
    }

    #[test]
    fn schema_accepts_aliases() {
        let schema = ColumnSchema::resolve(&headers("mployee_id,Submission_Date,Department,Q1_Recommend,q9")).unwrap();
        assert_eq!(schema.employee_id, 0);
        assert_eq!(schema.submission_date, 1);
        assert_eq!(schema.department, Some(2));
        assert_eq!(schema.location, None);
        assert_eq!(schema.question_count(), 2);
    }

    #[test]
    fn schema_rejects_bad_columns() {
        assert!(matches!(
            ColumnSchema::resolve(&headers("submission_date,Q1")),
            Err(IngestError::MissingColumn("employee_id"))
        ));
        assert!(matches!(
            ColumnSchema::resolve(&headers("employee_id,Q1")),
            Err(IngestError::MissingColumn("submission_date"))
        ));
        assert!(matches!(
            ColumnSchema::resolve(&headers("employee_id,submission_date,Q31_Extra")),
            Err(IngestError::QuestionOutOfRange { index: 31, .. })
        ));
        assert!(matches!(
            ColumnSchema::resolve(&headers("employee_id,submission_date,Q1,Q1_Recommend")),
            Err(IngestError::DuplicateQuestion { index: 1, .. })
        ));
        assert!(matches!(
            ColumnSchema::resolve(&headers("employee_id,submission_date,quarter")),
            Err(IngestError::NoQuestionColumns)
        ));
    }

    #[test]
    fn rows_are_scored_and_enriched() {
        let csv = "employee_id,submission_date,department,Q1_Recommend,Q9_Proud_Work,Q3_Enablement_Tools\n\
                   E1,2024-03-15,Sales,5,5,\n\
                   E2,15/03/2024,Sales,abc,3,2\n";
        let rows = parse_survey_csv(csv.as_bytes(), DimensionMap::Core, &HolidayCalendar::default()).unwrap();
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.dimensions.employee_engagement, Some(5.0));
        assert_eq!(first.rates.engagement_rate, Some(100.0));
        assert_eq!(first.questions.get(3), None);
        assert_eq!(first.quarter, Some(Quarter::Q1));
        assert_eq!(first.month.as_deref(), Some("March"));
        assert_eq!(first.year, Some(2024));
        assert!(!first.response_id.is_empty());

        let second = &rows[1];
        assert_eq!(second.questions.get(1), None);
        assert_eq!(second.dimensions.employee_engagement, Some(3.0));
        assert_eq!(second.year, None);
        assert_eq!(second.quarter, None);
    }

    #[test]
    fn only_csv_files_are_accepted() {
        assert!(validate_filename("survey.CSV").is_ok());
        assert!(matches!(validate_filename("survey.xlsx"), Err(IngestError::UnsupportedFile(_))));
    }

    #[tokio::test]
    async fn upload_saves_rows_then_syncs() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(50));
        records::save(
            store.as_ref(),
            &Employee {
                employee_id: "E1".to_string(),
                ..Employee::default()
            },
        )
        .await
        .unwrap();
        records::save(
            store.as_ref(),
            &Department {
                department_id: "D1".to_string(),
                department_name: "Sales".to_string(),
                ..Department::default()
            },
        )
        .await
        .unwrap();

        let ctx = IngestContext {
            store: store.clone(),
            monitor: Arc::new(RiskMonitor::new(AlertHub::new(8), 40.0)),
            dimension_map: DimensionMap::Core,
            calendar: Arc::new(HolidayCalendar::default()),
        };
        let csv = "employee_id,submission_date,department,Q1_Recommend,Q9_Proud_Work\n\
                   E1,2024-03-15,Sales,5,5\n\
                   E1,2024-03-16,Sales,5,5\n\
                   E1,2024-03-17,Sales,5,5\n";
        let report = ingest_survey_csv(&ctx, csv.as_bytes(), "march.csv", Utc::now())
            .await
            .unwrap();
        assert_eq!(report.total_rows_processed, 3);
        assert_eq!(report.total_rows_saved, 3);
        assert_eq!(report.failed_rows, 0);
        assert_eq!(report.sync.employees_updated, 1);
        assert_eq!(report.sync.departments_updated, 1);
        assert_eq!(report.sample_data.len(), 3);

        let employee: Employee = records::load(store.as_ref(), "E1").await.unwrap().unwrap();
        assert_eq!(employee.rates.engagement_rate, Some(100.0));
    }

    #[tokio::test]
    async fn failed_row_write_is_counted_and_batch_continues() {
        let store: Arc<dyn KeyValueStore> = Arc::new(RejectingStore {
            inner: MemoryStore::new(50),
            reject: "r2",
        });
        for id in ["E1", "E2", "E3"] {
            records::save(
                store.as_ref(),
                &Employee {
                    employee_id: id.to_string(),
                    ..Employee::default()
                },
            )
            .await
            .unwrap();
        }

        let ctx = IngestContext {
            store: store.clone(),
            monitor: Arc::new(RiskMonitor::new(AlertHub::new(8), 40.0)),
            dimension_map: DimensionMap::Core,
            calendar: Arc::new(HolidayCalendar::default()),
        };
        let csv = "response_id,employee_id,submission_date,department,Q1_Recommend,Q9_Proud_Work\n\
                   r1,E1,2024-03-15,Sales,5,5\n\
                   r2,E2,2024-03-16,Sales,4,4\n\
                   r3,E3,2024-03-17,Sales,5,5\n";
        let report = ingest_survey_csv(&ctx, csv.as_bytes(), "march.csv", Utc::now())
            .await
            .unwrap();
        assert_eq!(report.total_rows_processed, 3);
        assert_eq!(report.total_rows_saved, 2);
        assert_eq!(report.failed_rows, 1);
        assert_eq!(report.sync.employees_updated, 2);
        let sampled: Vec<&str> = report.sample_data.iter().map(|r| r.response_id.as_str()).collect();
        assert_eq!(sampled, vec!["r1", "r3"]);

        let stored: Vec<SurveyResponse> = records::load_all(store.as_ref()).await.unwrap();
        assert_eq!(stored.len(), 2);
        let synced: Employee = records::load(store.as_ref(), "E3").await.unwrap().unwrap();
        assert_eq!(synced.rates.engagement_rate, Some(100.0));
        let skipped: Employee = records::load(store.as_ref(), "E2").await.unwrap().unwrap();
        assert_eq!(skipped.rates.engagement_rate, None);
    }
}
