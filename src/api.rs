use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::aggregate::{filter_metrics, risk_summary, AggregationContext, GroupBy, MetricsFilter, SnapshotFilter};
use crate::cache::ResultCache;
use crate::config::AppConfig;
use crate::dashboard::{
    count_above, department_overview, engagement_trends, filter_options, summarize_dashboard, team_risk, teams_below,
    window_snapshot, Granularity, TeamFilter, TrendFilter,
};
use crate::error::{ApiError, ApiResult};
use crate::feedback::{feedback_samples, feedback_summary, record_feedback, theme_analysis, top_themes, FeedbackQuery, NewFeedback};
use crate::ingest::{ingest_survey_csv, validate_filename, IngestContext};
use crate::labels::RiskLabel;
use crate::models::{Department, Dimension, Employee, Feedback, SurveyResponse, WorkloadEntry};
use crate::monitor::{AlertEnvelope, AlertHub, RiskMonitor};
use crate::narrative::{DepartmentContext, InsightContext, NarrativeService, TextGenerator, ThemeCount};
use crate::records;
use crate::scoring::{mean, round_to};
use crate::store::KeyValueStore;
use crate::tasks::{TaskRegistry, TaskStatus};
use crate::temporal::{parse_submission_date, DateRange, HolidayCalendar};

const MAX_PAGE: usize = 100;
const DEFAULT_PAGE: usize = 20;
const ALERT_BUFFER: usize = 64;
const INSIGHT_CRITICAL_ENGAGEMENT: f64 = 55.0;
const INSIGHT_ALERT_RATE: f64 = 50.0;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn KeyValueStore>,
    pub tasks: TaskRegistry,
    pub cache: Arc<ResultCache>,
    pub narrative: NarrativeService,
    pub monitor: Arc<RiskMonitor>,
    pub ingest: IngestContext,
}

impl AppState {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        generator: Arc<dyn TextGenerator>,
        config: &AppConfig,
        calendar: HolidayCalendar,
    ) -> Self {
        let monitor = Arc::new(RiskMonitor::new(
            AlertHub::new(ALERT_BUFFER),
            config.stress_alert_threshold,
        ));
        Self {
            tasks: TaskRegistry::new(store.clone()),
            cache: Arc::new(ResultCache::new(config.cache_ttl)),
            narrative: NarrativeService::new(generator),
            ingest: IngestContext {
                store: store.clone(),
                monitor: monitor.clone(),
                dimension_map: config.dimension_map,
                calendar: Arc::new(calendar),
            },
            monitor,
            store,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/upload/csv", post(upload_csv))
        .route("/upload/status/:task_id", get(upload_status))
        .route("/metrics", get(metrics))
        .route("/metrics/summary", get(metrics_summary))
        .route("/metrics/risk-summary", get(metrics_risk_summary))
        .route("/metrics/dimensions", get(dimension_scores))
        .route("/metrics/dimensions/:employee_id", get(employee_dimensions))
        .route("/team", get(team))
        .route("/team/:department/recommendation", get(team_recommendation))
        .route("/departments", get(departments))
        .route("/trends/engagement", get(trends))
        .route("/feedback", get(list_feedback).post(create_feedback))
        .route("/feedback/samples", get(samples))
        .route("/feedback/summary", get(summary_of_feedback))
        .route("/themes", get(themes))
        .route("/filters", get(filters))
        .route("/insights", get(insights))
        .route("/ws/alerts", get(alerts_ws))
        .route("/ws/alerts/state", delete(reset_alerts));

    let api = ["metrics", "team", "departments", "insights", "feedback", "trends", "filters"]
        .into_iter()
        .fold(api, |api, group| api.route(&format!("/{group}/cache"), delete(clear_cache)));

    Router::new().nest("/api/v1", api).with_state(state)
}

pub async fn serve(state: AppState, bind: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(%bind, "wellbeing risk API listening");
    axum::serve(listener, router(state))
        .await
        .context("server stopped unexpectedly")
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn ok<T: Serialize>(data: T) -> Value {
    json!({ "success": true, "data": data })
}

fn paged<T: Serialize>(data: T, total: usize, limit: usize, offset: usize) -> Value {
    json!({
        "success": true,
        "data": data,
        "pagination": { "total": total, "limit": limit, "offset": offset },
    })
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError::BadRequest(message.into())
}

fn parse_range(raw: Option<&str>) -> ApiResult<DateRange> {
    raw.map_or(Ok(DateRange::default()), |v| v.parse().map_err(ApiError::BadRequest))
}

fn parse_date(name: &str, raw: Option<&str>) -> ApiResult<Option<NaiveDate>> {
    match raw {
        None => Ok(None),
        Some(v) => parse_submission_date(v)
            .map(Some)
            .ok_or_else(|| bad_request(format!("invalid {name} '{v}', expected YYYY-MM-DD"))),
    }
}

fn page_bounds(limit: Option<usize>, offset: Option<usize>) -> ApiResult<(usize, usize)> {
    let limit = limit.unwrap_or(DEFAULT_PAGE);
    if !(1..=MAX_PAGE).contains(&limit) {
        return Err(bad_request(format!("limit must be between 1 and {MAX_PAGE}")));
    }
    Ok((limit, offset.unwrap_or(0)))
}

/// Serves `key` from the result cache. `compute` is only polled on a miss.
async fn cached<Fut>(state: &AppState, key: String, compute: Fut) -> ApiResult<Json<Value>>
where
    Fut: Future<Output = ApiResult<Value>>,
{
    if let Some(hit) = state.cache.get(&key).await {
        tracing::debug!(%key, "cache hit");
        return Ok(Json(hit));
    }
    let body = compute.await?;
    state.cache.insert(key, body.clone()).await;
    Ok(Json(body))
}

async fn upload_csv(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let filename = params.filename.unwrap_or_else(|| "upload.csv".to_string());
    validate_filename(&filename)?;
    let task = state.tasks.create(&filename).await?;
    let task_id = task.task_id.clone();

    tokio::spawn(run_upload(state, task.task_id, filename, body));

    Ok(Json(ok(json!({
        "task_id": task_id,
        "message": format!("Upload started. Check status with /api/v1/upload/status/{task_id}"),
    }))))
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    filename: Option<String>,
}

async fn run_upload(state: AppState, task_id: String, filename: String, body: Bytes) {
    if let Err(err) = state.tasks.set_status(&task_id, TaskStatus::Processing).await {
        tracing::error!(%task_id, error = %err, "failed to mark upload as processing");
    }

    let outcome = ingest_survey_csv(&state.ingest, &body, &filename, Utc::now()).await;
    let recorded = match outcome {
        Ok(report) => {
            let dropped = state.cache.clear().await;
            tracing::info!(%task_id, rows = report.total_rows_saved, cache_entries = dropped, "upload completed");
            match serde_json::to_value(&report) {
                Ok(result) => state.tasks.complete(&task_id, &result).await,
                Err(err) => state.tasks.fail(&task_id, &err.to_string()).await,
            }
        }
        Err(err) => {
            tracing::warn!(%task_id, error = %err, "upload failed");
            state.tasks.fail(&task_id, &err.to_string()).await
        }
    };
    if let Err(err) = recorded {
        tracing::error!(%task_id, error = %err, "failed to record upload outcome");
    }
}

async fn upload_status(State(state): State<AppState>, Path(task_id): Path<String>) -> ApiResult<Json<Value>> {
    match state.tasks.get(&task_id).await? {
        Some(task) => Ok(Json(ok(task))),
        None => Err(ApiError::NotFound(format!("Task '{task_id}' not found"))),
    }
}

#[derive(Debug, Deserialize)]
struct MetricsParams {
    departments: Option<String>,
    quarter: Option<String>,
    year: Option<i32>,
    group_by: Option<String>,
}

async fn metrics(State(state): State<AppState>, Query(params): Query<MetricsParams>) -> ApiResult<Json<Value>> {
    let key = ResultCache::key(
        "metrics",
        &[
            ("departments", params.departments.clone()),
            ("quarter", params.quarter.clone()),
            ("year", params.year.map(|y| y.to_string())),
            ("group_by", params.group_by.clone()),
        ],
    );
    cached(&state, key, async {
        let filter = MetricsFilter {
            departments: params
                .departments
                .as_deref()
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|d| !d.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            quarter: params
                .quarter
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(ApiError::BadRequest)?,
            year: params.year,
            group_by: match params.group_by.as_deref() {
                None => None,
                Some(v) if v.eq_ignore_ascii_case("quarter") => Some(GroupBy::Quarter),
                Some(other) => return Err(bad_request(format!("invalid group_by '{other}', expected quarter"))),
            },
        };

        let store = state.store.as_ref();
        let records: Vec<SurveyResponse> = records::load_all(store).await?;
        let employees: Vec<Employee> = records::load_all(store).await?;
        let workloads: Vec<WorkloadEntry> = records::load_all(store).await?;
        let ctx = AggregationContext::build(&employees, &workloads);
        Ok(ok(filter_metrics(&records, &ctx, &filter, today())))
    })
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WindowParams {
    date_range: Option<String>,
    department: Option<String>,
}

async fn metrics_summary(State(state): State<AppState>, Query(params): Query<WindowParams>) -> ApiResult<Json<Value>> {
    let range = parse_range(params.date_range.as_deref())?;
    let key = ResultCache::key(
        "metrics/summary",
        &[
            ("dateRange", Some(range.as_str().to_string())),
            ("department", params.department.clone()),
        ],
    );
    cached(&state, key, async {
        let store = state.store.as_ref();
        let records: Vec<SurveyResponse> = records::load_all(store).await?;
        let employees: Vec<Employee> = records::load_all(store).await?;
        let summary = summarize_dashboard(
            &records,
            employees.len(),
            range,
            params.department.as_deref(),
            Utc::now(),
        );
        Ok(ok(summary))
    })
    .await
}

#[derive(Debug, Deserialize)]
struct RiskSummaryParams {
    department: Option<String>,
    position: Option<String>,
    quarter: Option<String>,
    year: Option<i32>,
}

async fn metrics_risk_summary(
    State(state): State<AppState>,
    Query(params): Query<RiskSummaryParams>,
) -> ApiResult<Json<Value>> {
    let department = params
        .department
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| bad_request("department is required"))?;
    let filter = SnapshotFilter {
        department: Some(department),
        position: params.position,
        quarter: params
            .quarter
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(ApiError::BadRequest)?,
        year: params.year,
    };
    let key = ResultCache::key(
        "metrics/risk-summary",
        &[
            ("department", filter.department.clone()),
            ("position", filter.position.clone()),
            ("quarter", filter.quarter.map(|q| q.to_string())),
            ("year", filter.year.map(|y| y.to_string())),
        ],
    );
    cached(&state, key, async {
        let store = state.store.as_ref();
        let records: Vec<SurveyResponse> = records::load_all(store).await?;
        let employees: Vec<Employee> = records::load_all(store).await?;
        Ok(ok(risk_summary(&records, &employees, &filter)))
    })
    .await
}

#[derive(Debug, Deserialize)]
struct DimensionParams {
    category: Option<String>,
    department_name: Option<String>,
    employee_id: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn dimension_scores(
    State(state): State<AppState>,
    Query(params): Query<DimensionParams>,
) -> ApiResult<Json<Value>> {
    let (limit, offset) = page_bounds(params.limit, params.offset)?;
    let store = state.store.as_ref();
    match params.category.as_deref().unwrap_or("departments") {
        "departments" => {
            let mut rows: Vec<Department> = records::load_all(store).await?;
            if let Some(want) = params.department_name.as_deref() {
                rows.retain(|d| d.department_name.eq_ignore_ascii_case(want));
            }
            rows.sort_by(|a, b| a.department_id.cmp(&b.department_id));
            let total = rows.len();
            let page: Vec<Department> = rows.into_iter().skip(offset).take(limit).collect();
            Ok(Json(paged(page, total, limit, offset)))
        }
        "employees" => {
            let mut rows: Vec<Employee> = records::load_all(store).await?;
            if let Some(id) = params.employee_id.as_deref() {
                rows.retain(|e| e.employee_id == id);
            }
            if let Some(want) = params.department_name.as_deref() {
                rows.retain(|e| e.division.as_deref().is_some_and(|d| d.eq_ignore_ascii_case(want)));
            }
            rows.sort_by(|a, b| a.employee_id.cmp(&b.employee_id));
            let total = rows.len();
            let page: Vec<Employee> = rows.into_iter().skip(offset).take(limit).collect();
            Ok(Json(paged(page, total, limit, offset)))
        }
        other => Err(bad_request(format!(
            "invalid category '{other}', expected departments or employees"
        ))),
    }
}

async fn employee_dimensions(
    State(state): State<AppState>,
    Path(employee_id): Path<String>,
) -> ApiResult<Json<Value>> {
    match records::load::<Employee>(state.store.as_ref(), &employee_id).await? {
        Some(employee) => Ok(Json(ok(employee))),
        None => Err(ApiError::NotFound(format!("Employee '{employee_id}' not found"))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamParams {
    department: Option<String>,
    risk_level: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn team(State(state): State<AppState>, Query(params): Query<TeamParams>) -> ApiResult<Json<Value>> {
    let (limit, offset) = page_bounds(params.limit, params.offset)?;
    let risk_level = match params.risk_level.as_deref() {
        None => None,
        Some(raw) => Some(RiskLabel::parse(raw).ok_or_else(|| {
            bad_request(format!("invalid riskLevel '{raw}', expected healthy, watch, warning or critical"))
        })?),
    };
    let key = ResultCache::key(
        "team",
        &[
            ("department", params.department.clone()),
            ("riskLevel", risk_level.map(|r| r.to_string())),
            ("limit", Some(limit.to_string())),
            ("offset", Some(offset.to_string())),
        ],
    );
    cached(&state, key, async {
        let store = state.store.as_ref();
        let records: Vec<SurveyResponse> = records::load_all(store).await?;
        let employees: Vec<Employee> = records::load_all(store).await?;
        let filter = TeamFilter {
            department: params.department.clone(),
            risk_level,
            limit,
            offset,
        };
        let page = team_risk(&records, &employees, &filter);
        Ok(paged(page.items, page.total, page.limit, page.offset))
    })
    .await
}

#[derive(Debug, Deserialize)]
struct RecommendationParams {
    position: Option<String>,
}

async fn team_recommendation(
    State(state): State<AppState>,
    Path(department): Path<String>,
    Query(params): Query<RecommendationParams>,
) -> ApiResult<Json<Value>> {
    let key = ResultCache::key(
        "team/recommendation",
        &[("department", Some(department.clone())), ("position", params.position.clone())],
    );
    cached(&state, key, async {
        let store = state.store.as_ref();
        let records: Vec<SurveyResponse> = records::load_all(store).await?;
        let employees: Vec<Employee> = records::load_all(store).await?;
        let feedbacks: Vec<Feedback> = records::load_all(store).await?;

        let filter = SnapshotFilter {
            department: Some(department.clone()),
            position: params.position.clone(),
            ..SnapshotFilter::default()
        };
        let summary = risk_summary(&records, &employees, &filter);
        if summary.employees == 0 {
            return Err(ApiError::NotFound(format!("No survey data for department '{department}'")));
        }

        let mut weakest: Vec<(String, f64)> = Dimension::ALL
            .into_iter()
            .filter_map(|d| summary.dimensions.get(d).map(|v| (d.label().to_string(), v)))
            .collect();
        weakest.sort_by(|a, b| a.1.total_cmp(&b.1));
        weakest.truncate(3);

        let members: Vec<&str> = employees
            .iter()
            .filter(|e| e.division.as_deref().is_some_and(|d| d.eq_ignore_ascii_case(&department)))
            .map(|e| e.employee_id.as_str())
            .collect();
        let comments: Vec<&Feedback> = feedbacks
            .iter()
            .filter(|f| f.employee_id.as_deref().is_some_and(|id| members.contains(&id)))
            .collect();

        let context = DepartmentContext {
            department: summary.department.clone(),
            position: summary.position.clone(),
            respondents: summary.employees,
            engagement_rate: summary.rates.engagement_rate,
            stress_rate: summary.rates.stress_rate,
            attrition_rate: summary.rates.attrition_rate,
            overall_risk: summary.risk.overall.to_string(),
            weakest_dimensions: weakest,
            top_themes: top_themes(&comments, 3),
        };
        let diagnosis = state.narrative.diagnose(&context).await;
        Ok(ok(json!({ "context": context, "recommendation": diagnosis })))
    })
    .await
}

async fn departments(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    cached(&state, ResultCache::key("departments", &[]), async {
        let store = state.store.as_ref();
        let departments: Vec<Department> = records::load_all(store).await?;
        let employees: Vec<Employee> = records::load_all(store).await?;
        let feedbacks: Vec<Feedback> = records::load_all(store).await?;
        Ok(ok(department_overview(&departments, &employees, &feedbacks)))
    })
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrendParams {
    start_date: Option<String>,
    end_date: Option<String>,
    department: Option<String>,
    position: Option<String>,
    granularity: Option<String>,
}

async fn trends(State(state): State<AppState>, Query(params): Query<TrendParams>) -> ApiResult<Json<Value>> {
    let filter = TrendFilter {
        start: parse_date("startDate", params.start_date.as_deref())?,
        end: parse_date("endDate", params.end_date.as_deref())?,
        department: params.department.clone(),
        position: params.position.clone(),
        granularity: params
            .granularity
            .as_deref()
            .map(str::parse::<Granularity>)
            .transpose()
            .map_err(ApiError::BadRequest)?
            .unwrap_or_default(),
    };
    let key = ResultCache::key(
        "trends/engagement",
        &[
            ("startDate", params.start_date),
            ("endDate", params.end_date),
            ("department", params.department),
            ("position", params.position),
            ("granularity", params.granularity),
        ],
    );
    cached(&state, key, async {
        let store = state.store.as_ref();
        let records: Vec<SurveyResponse> = records::load_all(store).await?;
        let employees: Vec<Employee> = records::load_all(store).await?;
        Ok(ok(engagement_trends(&records, &employees, &filter, today())))
    })
    .await
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_feedback(State(state): State<AppState>, Query(params): Query<ListParams>) -> ApiResult<Json<Value>> {
    let (limit, offset) = page_bounds(params.limit, params.offset)?;
    let mut feedbacks: Vec<Feedback> = records::load_all(state.store.as_ref()).await?;
    feedbacks.sort_by(|a, b| b.submitted_on().cmp(&a.submitted_on()));
    let total = feedbacks.len();
    let page: Vec<Feedback> = feedbacks.into_iter().skip(offset).take(limit).collect();
    Ok(Json(paged(page, total, limit, offset)))
}

async fn create_feedback(State(state): State<AppState>, Json(input): Json<NewFeedback>) -> ApiResult<Json<Value>> {
    if input.comments.trim().is_empty() {
        return Err(bad_request("comments must not be empty"));
    }
    if let Some(raw) = input.submission_date.as_deref() {
        parse_date("submission_date", Some(raw))?;
    }
    let feedback = record_feedback(state.store.as_ref(), &state.narrative, input, today()).await?;
    state.cache.clear().await;
    Ok(Json(ok(feedback)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SampleParams {
    date_range: Option<String>,
    sentiment: Option<String>,
    theme: Option<String>,
    department: Option<String>,
    limit: Option<usize>,
}

async fn samples(State(state): State<AppState>, Query(params): Query<SampleParams>) -> ApiResult<Json<Value>> {
    let (limit, _) = page_bounds(Some(params.limit.unwrap_or(10)), None)?;
    let query = FeedbackQuery {
        range: parse_range(params.date_range.as_deref())?,
        sentiment: params
            .sentiment
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(ApiError::BadRequest)?,
        theme: params.theme,
        department: params.department,
        limit,
    };
    let store = state.store.as_ref();
    let feedbacks: Vec<Feedback> = records::load_all(store).await?;
    let employees: Vec<Employee> = records::load_all(store).await?;
    Ok(Json(ok(feedback_samples(&feedbacks, &employees, &query, today()))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeParams {
    date_range: Option<String>,
}

async fn summary_of_feedback(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Json<Value>> {
    let range = parse_range(params.date_range.as_deref())?;
    let key = ResultCache::key("feedback/summary", &[("dateRange", Some(range.as_str().to_string()))]);
    cached(&state, key, async {
        let feedbacks: Vec<Feedback> = records::load_all(state.store.as_ref()).await?;
        Ok(ok(feedback_summary(&feedbacks, range, today())))
    })
    .await
}

async fn themes(State(state): State<AppState>, Query(params): Query<RangeParams>) -> ApiResult<Json<Value>> {
    let range = parse_range(params.date_range.as_deref())?;
    let key = ResultCache::key("themes", &[("dateRange", Some(range.as_str().to_string()))]);
    cached(&state, key, async {
        let feedbacks: Vec<Feedback> = records::load_all(state.store.as_ref()).await?;
        Ok(ok(theme_analysis(&feedbacks, range, today())))
    })
    .await
}

async fn filters(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    cached(&state, ResultCache::key("filters", &[]), async {
        let employees: Vec<Employee> = records::load_all(state.store.as_ref()).await?;
        Ok(ok(filter_options(&employees)))
    })
    .await
}

async fn insights(State(state): State<AppState>, Query(params): Query<WindowParams>) -> ApiResult<Json<Value>> {
    let range = parse_range(params.date_range.as_deref())?;
    let key = ResultCache::key(
        "insights",
        &[
            ("dateRange", Some(range.as_str().to_string())),
            ("department", params.department.clone()),
        ],
    );
    cached(&state, key, async {
        let store = state.store.as_ref();
        let records: Vec<SurveyResponse> = records::load_all(store).await?;
        let employees: Vec<Employee> = records::load_all(store).await?;
        let mut feedbacks: Vec<Feedback> = records::load_all(store).await?;
        let department = params.department.as_deref();
        let today = today();

        if let Some(want) = department {
            let members: Vec<&str> = employees
                .iter()
                .filter(|e| e.division.as_deref().is_some_and(|d| d.eq_ignore_ascii_case(want)))
                .map(|e| e.employee_id.as_str())
                .collect();
            feedbacks.retain(|f| f.employee_id.as_deref().is_some_and(|id| members.contains(&id)));
        }
        let theme_data = theme_analysis(&feedbacks, range, today);

        let (snapshot, trend) = window_snapshot(&records, range, department, today);
        let context = InsightContext {
            date_range: range.as_str().to_string(),
            department: params.department.clone(),
            avg_engagement: mean(snapshot.iter().map(|r| r.rates.engagement_rate)).map(|avg| round_to(avg, 1)),
            engagement_trend: round_to(trend.unwrap_or(0.0), 1),
            critical_teams: teams_below(&snapshot, INSIGHT_CRITICAL_ENGAGEMENT),
            burnout_alerts: count_above(&snapshot, INSIGHT_ALERT_RATE, |r| r.rates.stress_rate),
            attrition_risk: count_above(&snapshot, INSIGHT_ALERT_RATE, |r| r.rates.attrition_rate),
            top_themes: theme_data
                .iter()
                .take(5)
                .map(|t| ThemeCount {
                    name: t.theme.clone(),
                    count: t.frequency,
                })
                .collect(),
        };
        let narrative = state.narrative.summarize(&context).await;
        Ok(ok(json!({
            "metrics": context,
            "themes": theme_data,
            "narrative": narrative,
        })))
    })
    .await
}

async fn clear_cache(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let cleared = state.cache.clear().await;
    tracing::info!(cleared, "result cache cleared");
    Ok(Json(ok(json!({ "cleared": cleared }))))
}

/// Forgets which departments and employees were already alerted on.
async fn reset_alerts(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.monitor.reset().await;
    tracing::info!("alert state reset");
    Ok(Json(ok(json!({ "reset": true }))))
}

async fn alerts_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let alerts = state.monitor.hub().subscribe();
    ws.on_upgrade(move |socket| alert_session(socket, alerts))
}

fn control_frame(kind: &str) -> Message {
    let mut frame = json!({ "type": kind, "timestamp": Utc::now().to_rfc3339() });
    if kind == "connection" {
        frame["message"] = json!("Connected to risk monitoring alerts");
    }
    Message::Text(frame.to_string())
}

async fn alert_session(mut socket: WebSocket, mut alerts: broadcast::Receiver<AlertEnvelope>) {
    tracing::info!("alert client connected");
    if socket.send(control_frame("connection")).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) if text.trim() == "ping" => {
                    if socket.send(control_frame("pong")).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            alert = alerts.recv() => match alert {
                Ok(alert) => {
                    let Ok(text) = serde_json::to_string(&alert) else {
                        continue;
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "alert client fell behind, alerts dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    tracing::info!("alert client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrative::testing::ScriptedGenerator;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt;

    fn state_with(replies: Vec<&str>) -> AppState {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(25));
        AppState::new(
            store,
            Arc::new(ScriptedGenerator::new(replies)),
            &AppConfig::default(),
            HolidayCalendar::default(),
        )
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri).body(body).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        call(app, Method::GET, uri, Body::empty()).await
    }

    async fn seed_employee(state: &AppState, id: &str, division: &str) {
        records::save(
            state.store.as_ref(),
            &Employee {
                employee_id: id.to_string(),
                division: Some(division.to_string()),
                position: Some("Analyst".to_string()),
                ..Employee::default()
            },
        )
        .await
        .unwrap();
    }

    fn recent(days_ago: i64) -> String {
        (today() - chrono::Duration::days(days_ago)).format("%Y-%m-%d").to_string()
    }

    #[tokio::test]
    async fn unknown_date_range_is_a_client_error() {
        let app = router(state_with(vec![]));
        let (status, body) = get_json(&app, "/api/v1/metrics/summary?dateRange=fortnight").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("fortnight"));

        let (status, _) = get_json(&app, "/api/v1/insights?dateRange=decade").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_runs_in_background_and_reports_status() {
        let state = state_with(vec![]);
        seed_employee(&state, "E1", "Sales").await;
        let app = router(state);

        let (status, _) = call(&app, Method::POST, "/api/v1/upload/csv?filename=survey.xlsx", Body::from("x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let csv = format!(
            "employee_id,submission_date,department,Q1_Recommend,Q9_Proud_Work\nE1,{},Sales,4,4\n",
            recent(1)
        );
        let (status, body) = call(&app, Method::POST, "/api/v1/upload/csv?filename=survey.csv", Body::from(csv)).await;
        assert_eq!(status, StatusCode::OK);
        let task_id = body["data"]["task_id"].as_str().unwrap().to_string();

        let mut task = Value::Null;
        for _ in 0..100 {
            let (_, body) = get_json(&app, &format!("/api/v1/upload/status/{task_id}")).await;
            task = body["data"].clone();
            if task["status"] == "completed" || task["status"] == "failed" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(task["status"], "completed");
        assert_eq!(task["result"]["total_rows_saved"], 1);

        let (_, body) = get_json(&app, "/api/v1/metrics/summary?dateRange=week").await;
        assert_eq!(body["data"]["totalEmployees"], 1);
        assert_eq!(body["data"]["avgEngagement"], 75.0);
        assert_eq!(body["data"]["feedbackResponseRate"], 100.0);

        let (status, _) = get_json(&app, "/api/v1/upload/status/missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    async fn seed_response(state: &AppState, id: &str, employee: &str, department: &str, engagement: f64) {
        let mut response = SurveyResponse {
            response_id: id.to_string(),
            employee_id: Some(employee.to_string()),
            department: Some(department.to_string()),
            submission_date: Some(recent(1)),
            ..SurveyResponse::default()
        };
        response.rates.engagement_rate = Some(engagement);
        records::save(state.store.as_ref(), &response).await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_endpoints_are_cached() {
        let reply = r#"{"diagnosis": "Morale is low.", "recommendation": "Hold skip-level meetings."}"#;
        let state = state_with(vec![reply]);
        seed_response(&state, "r1", "E1", "Sales", 50.0).await;
        let app = router(state.clone());

        let (status, first) = get_json(&app, "/api/v1/metrics/risk-summary?department=Sales").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["data"]["employees"], 1);
        let (_, advice) = get_json(&app, "/api/v1/team/Sales/recommendation").await;
        assert_eq!(advice["data"]["recommendation"]["diagnosis"], "Morale is low.");

        seed_response(&state, "r2", "E2", "Sales", 90.0).await;
        let (_, stale) = get_json(&app, "/api/v1/metrics/risk-summary?department=Sales").await;
        assert_eq!(stale, first);
        let (_, again) = get_json(&app, "/api/v1/team/Sales/recommendation").await;
        assert_eq!(again, advice);

        call(&app, Method::DELETE, "/api/v1/metrics/cache", Body::empty()).await;
        let (_, fresh) = get_json(&app, "/api/v1/metrics/risk-summary?department=Sales").await;
        assert_eq!(fresh["data"]["employees"], 2);
    }

    #[tokio::test]
    async fn cached_results_survive_until_cleared() {
        let state = state_with(vec![]);
        seed_employee(&state, "E1", "Sales").await;
        let app = router(state.clone());

        let (_, first) = get_json(&app, "/api/v1/filters").await;
        assert_eq!(first["data"]["departments"], json!(["Sales"]));

        seed_employee(&state, "E2", "Ops").await;
        let (_, stale) = get_json(&app, "/api/v1/filters").await;
        assert_eq!(stale, first);

        let (status, cleared) = call(&app, Method::DELETE, "/api/v1/filters/cache", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cleared["data"]["cleared"], 1);
        let (_, fresh) = get_json(&app, "/api/v1/filters").await;
        assert_eq!(fresh["data"]["departments"], json!(["Ops", "Sales"]));
    }

    #[tokio::test]
    async fn alert_state_can_be_reset() {
        let app = router(state_with(vec![]));
        let (status, body) = call(&app, Method::DELETE, "/api/v1/ws/alerts/state", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["reset"], true);
    }

    #[tokio::test]
    async fn insights_fall_back_when_generator_output_is_unusable() {
        let app = router(state_with(vec!["not json at all"]));
        let (status, body) = get_json(&app, "/api/v1/insights?dateRange=all").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["narrative"]["summary"], "Data processed.");
        assert_eq!(body["data"]["narrative"]["keyObservations"], json!([]));
        assert!(body["data"]["metrics"]["avgEngagement"].is_null());
        assert_eq!(body["data"]["metrics"]["engagementTrend"], 0.0);
    }

    #[tokio::test]
    async fn insights_use_generator_summary() {
        let reply = "```json\n{\"summary\": \"Engagement is steady.\", \"keyObservations\": []}\n```";
        let app = router(state_with(vec![reply]));
        let (_, body) = get_json(&app, "/api/v1/insights").await;
        assert_eq!(body["data"]["narrative"]["summary"], "Engagement is steady.");
        assert_eq!(body["data"]["metrics"]["dateRange"], "month");
    }

    #[tokio::test]
    async fn feedback_is_analysed_and_summarised() {
        let reply = r#"{"rephrased_comment": "Workload is heavy.", "categories": "Workload & Capacity", "sentiment_score": 3}"#;
        let app = router(state_with(vec![reply]));
        let body = Body::from(r#"{"employee_id": "E1", "comments": "too much work lah"}"#);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/feedback")
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (_, summary) = get_json(&app, "/api/v1/feedback/summary?dateRange=all").await;
        assert_eq!(summary["data"]["totalMentions"], 1);
        assert_eq!(summary["data"]["negative"], 1);

        let (_, listed) = get_json(&app, "/api/v1/feedback?limit=5").await;
        assert_eq!(listed["pagination"]["total"], 1);
        assert_eq!(listed["data"][0]["category"], "Workload & Capacity");
    }

    #[tokio::test]
    async fn pagination_and_required_parameters_are_validated() {
        let app = router(state_with(vec![]));
        let (status, _) = get_json(&app, "/api/v1/team?limit=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(&app, "/api/v1/metrics/dimensions?limit=101").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(&app, "/api/v1/metrics/risk-summary").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(&app, "/api/v1/metrics/dimensions/E404").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get_json(&app, "/api/v1/trends/engagement?startDate=01-02-2024").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metrics_group_by_quarter_returns_four_rows() {
        let state = state_with(vec![]);
        let mut response = SurveyResponse {
            response_id: "r1".to_string(),
            employee_id: Some("E1".to_string()),
            department: Some("Sales".to_string()),
            submission_date: Some("2024-02-01".to_string()),
            year: Some(2024),
            quarter: Some(crate::models::Quarter::Q1),
            ..SurveyResponse::default()
        };
        response.questions.set(1, Some(5.0));
        response.rates.engagement_rate = Some(80.0);
        records::save(state.store.as_ref(), &response).await.unwrap();
        let app = router(state);

        let (status, body) = get_json(&app, "/api/v1/metrics?year=2024&group_by=quarter").await;
        assert_eq!(status, StatusCode::OK);
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0]["Response_Count"], 1);
        assert_eq!(rows[2]["Response_Count"], 0);

        let (_, body) = get_json(&app, "/api/v1/metrics?year=2024&quarter=Q2&group_by=quarter").await;
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0]["Quarter"], "Q1");
        assert_eq!(rows[0]["Response_Count"], 1);

        let (_, body) = get_json(&app, "/api/v1/metrics?departments=sales&quarter=Q1&year=2024").await;
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Department"], "Sales");
        assert!(rows[0].get("employee_id").is_none());

        let (status, _) = get_json(&app, "/api/v1/metrics?group_by=month").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
