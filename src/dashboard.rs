use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::aggregate::{latest_per_employee, mean_rates, same_department};
use crate::feedback::top_themes;
use crate::labels::{RiskLabel, RiskProfile};
use crate::models::{Department, Employee, Feedback, SurveyResponse, QUESTION_KEYS};
use crate::narrative::ThemeCount;
use crate::scoring::{mean, round_to};
use crate::temporal::DateRange;

const TEAM_AT_RISK_ENGAGEMENT: f64 = 65.0;
const ALERT_RATE: f64 = 60.0;
const DEFAULT_TREND_DAYS: i64 = 90;

#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl<T> Paged<T> {
    pub fn slice(all: Vec<T>, limit: usize, offset: usize) -> Self {
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).collect();
        Self {
            items,
            total,
            limit,
            offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_employees: usize,
    pub teams_at_risk: usize,
    pub avg_engagement: Option<f64>,
    pub engagement_trend: f64,
    pub burnout_alerts: usize,
    pub attrition_risk_count: usize,
    pub feedback_response_rate: Option<f64>,
    pub generated_at: String,
}

fn department_matches(record: &SurveyResponse, department: Option<&str>) -> bool {
    match department {
        Some(want) => record
            .department
            .as_deref()
            .is_some_and(|d| same_department(d, want)),
        None => true,
    }
}

fn snapshot_engagement(rows: &[&SurveyResponse]) -> Option<f64> {
    mean(rows.iter().map(|r| r.rates.engagement_rate))
}

/// Departments whose mean engagement falls below `threshold`.
pub fn teams_below(snapshot: &[&SurveyResponse], threshold: f64) -> Vec<String> {
    let mut by_department: BTreeMap<&str, Vec<&SurveyResponse>> = BTreeMap::new();
    for record in snapshot {
        if let Some(department) = record.department.as_deref() {
            by_department.entry(department).or_default().push(*record);
        }
    }
    by_department
        .into_iter()
        .filter(|(_, rows)| snapshot_engagement(rows).is_some_and(|avg| avg < threshold))
        .map(|(department, _)| department.to_string())
        .collect()
}

pub fn count_above(snapshot: &[&SurveyResponse], threshold: f64, rate: fn(&SurveyResponse) -> Option<f64>) -> usize {
    snapshot
        .iter()
        .filter(|r| rate(**r).is_some_and(|v| v > threshold))
        .count()
}

/// Snapshot of the window plus the change in engagement against the previous window.
pub fn window_snapshot<'a>(
    records: &'a [SurveyResponse],
    range: DateRange,
    department: Option<&str>,
    today: NaiveDate,
) -> (Vec<&'a SurveyResponse>, Option<f64>) {
    let scoped = records.iter().filter(|r| department_matches(r, department));
    let (current, previous): (Vec<&SurveyResponse>, Vec<&SurveyResponse>) = scoped
        .filter(|r| {
            r.submitted_on()
                .is_some_and(|d| range.contains(d, today) || range.contains_previous(d, today))
        })
        .partition(|r| r.submitted_on().is_some_and(|d| range.contains(d, today)));

    let snapshot = latest_per_employee(current);
    let previous = latest_per_employee(previous);
    let trend = match (snapshot_engagement(&snapshot), snapshot_engagement(&previous)) {
        (Some(now), Some(before)) if before != 0.0 => Some((now - before) / before * 100.0),
        _ => None,
    };
    (snapshot, trend)
}

/// Null engagement and response rate mean there was nothing to measure.
pub fn summarize_dashboard(
    records: &[SurveyResponse],
    employee_count: usize,
    range: DateRange,
    department: Option<&str>,
    now: DateTime<Utc>,
) -> DashboardSummary {
    let (snapshot, trend) = window_snapshot(records, range, department, now.date_naive());
    let feedback_response_rate = (employee_count > 0)
        .then(|| round_to(snapshot.len() as f64 / employee_count as f64 * 100.0, 1));

    DashboardSummary {
        total_employees: snapshot.len(),
        teams_at_risk: teams_below(&snapshot, TEAM_AT_RISK_ENGAGEMENT).len(),
        avg_engagement: snapshot_engagement(&snapshot).map(|avg| round_to(avg, 1)),
        engagement_trend: round_to(trend.unwrap_or(0.0), 1),
        burnout_alerts: count_above(&snapshot, ALERT_RATE, |r| r.rates.stress_rate),
        attrition_risk_count: count_above(&snapshot, ALERT_RATE, |r| r.rates.attrition_rate),
        feedback_response_rate,
        generated_at: now.to_rfc3339(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub question: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamRisk {
    pub department: String,
    pub employees: usize,
    pub engagement_rate: Option<f64>,
    pub stress_rate: Option<f64>,
    pub attrition_rate: Option<f64>,
    pub risk: RiskProfile,
    pub top_drivers: Vec<Driver>,
}

#[derive(Debug, Clone, Default)]
pub struct TeamFilter {
    pub department: Option<String>,
    pub risk_level: Option<RiskLabel>,
    pub limit: usize,
    pub offset: usize,
}

/// The three questions with the lowest mean score.
pub fn lowest_drivers(rows: &[&SurveyResponse], count: usize) -> Vec<Driver> {
    let mut drivers: Vec<Driver> = QUESTION_KEYS
        .iter()
        .enumerate()
        .filter_map(|(i, key)| {
            mean(rows.iter().map(|r| r.questions.get(i + 1))).map(|score| Driver {
                question: key.to_string(),
                score: round_to(score, 2),
            })
        })
        .collect();
    drivers.sort_by(|a, b| a.score.total_cmp(&b.score).then_with(|| a.question.cmp(&b.question)));
    drivers.truncate(count);
    drivers
}

/// Current team risk from the latest submission per employee. The team is the
/// employee's division when known, else the department on the submission.
pub fn team_risk(records: &[SurveyResponse], employees: &[Employee], filter: &TeamFilter) -> Paged<TeamRisk> {
    let divisions: HashMap<&str, &str> = employees
        .iter()
        .filter_map(|e| Some((e.employee_id.as_str(), e.division.as_deref()?)))
        .collect();

    let snapshot = latest_per_employee(records);
    let mut teams: BTreeMap<&str, Vec<&SurveyResponse>> = BTreeMap::new();
    for record in snapshot {
        let team = record
            .employee_id
            .as_deref()
            .and_then(|id| divisions.get(id).copied())
            .or(record.department.as_deref());
        if let Some(team) = team {
            teams.entry(team).or_default().push(record);
        }
    }

    let mut rows: Vec<TeamRisk> = teams
        .into_iter()
        .filter(|(team, _)| {
            filter
                .department
                .as_deref()
                .map_or(true, |want| same_department(team, want))
        })
        .map(|(team, rows)| {
            let rates = mean_rates(&rows);
            TeamRisk {
                department: team.to_string(),
                employees: rows.len(),
                risk: RiskProfile::from_rates(rates.engagement_rate, rates.stress_rate, rates.attrition_rate),
                engagement_rate: rates.engagement_rate,
                stress_rate: rates.stress_rate,
                attrition_rate: rates.attrition_rate,
                top_drivers: lowest_drivers(&rows, 3),
            }
        })
        .filter(|team| filter.risk_level.map_or(true, |level| team.risk.overall == level))
        .collect();

    rows.sort_by(|a, b| {
        b.risk
            .overall
            .cmp(&a.risk.overall)
            .then_with(|| a.department.cmp(&b.department))
    });
    Paged::slice(rows, filter.limit, filter.offset)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    Daily,
    #[default]
    Weekly,
    Monthly,
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Granularity::Daily),
            "weekly" | "week" => Ok(Granularity::Weekly),
            "monthly" | "month" => Ok(Granularity::Monthly),
            other => Err(format!("invalid granularity '{other}', expected daily, weekly or monthly")),
        }
    }
}

impl Granularity {
    /// Bucket key: the day, the Sunday closing the week, or the first of the month.
    pub fn bucket(self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Daily => date,
            Granularity::Weekly => {
                date + Duration::days(6 - i64::from(date.weekday().num_days_from_monday()))
            }
            Granularity::Monthly => date.with_day(1).unwrap_or(date),
        }
    }

    pub fn label(self, bucket: NaiveDate) -> String {
        match self {
            Granularity::Daily => bucket.format("%b %d").to_string(),
            Granularity::Weekly => format!(
                "Week {} ({})",
                bucket.iso_week().week(),
                bucket.format("%b %d")
            ),
            Granularity::Monthly => bucket.format("%B %Y").to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrendFilter {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub department: Option<String>,
    pub position: Option<String>,
    pub granularity: Granularity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub label: String,
    pub period: NaiveDate,
    pub responses: usize,
    pub engagement: Option<f64>,
    pub stress: Option<f64>,
    pub attrition: Option<f64>,
}

pub fn engagement_trends(
    records: &[SurveyResponse],
    employees: &[Employee],
    filter: &TrendFilter,
    today: NaiveDate,
) -> Vec<TrendPoint> {
    let end = filter.end.unwrap_or(today);
    let start = filter
        .start
        .unwrap_or_else(|| end - Duration::days(DEFAULT_TREND_DAYS));
    let positions: HashMap<&str, &str> = employees
        .iter()
        .filter_map(|e| Some((e.employee_id.as_str(), e.position.as_deref()?)))
        .collect();

    let mut buckets: BTreeMap<NaiveDate, Vec<&SurveyResponse>> = BTreeMap::new();
    for record in records {
        let Some(date) = record.submitted_on() else {
            continue;
        };
        if date < start || date > end || !department_matches(record, filter.department.as_deref()) {
            continue;
        }
        if let Some(want) = filter.position.as_deref() {
            let position = record.employee_id.as_deref().and_then(|id| positions.get(id));
            if !position.is_some_and(|p| p.eq_ignore_ascii_case(want)) {
                continue;
            }
        }
        buckets
            .entry(filter.granularity.bucket(date))
            .or_default()
            .push(record);
    }

    let one_decimal = |v: Option<f64>| v.map(|x| round_to(x, 1));
    buckets
        .into_iter()
        .map(|(period, rows)| TrendPoint {
            label: filter.granularity.label(period),
            period,
            responses: rows.len(),
            engagement: one_decimal(mean(rows.iter().map(|r| r.rates.engagement_rate))),
            stress: one_decimal(mean(rows.iter().map(|r| r.rates.stress_rate))),
            attrition: one_decimal(mean(rows.iter().map(|r| r.rates.attrition_rate))),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentOverview {
    pub department_id: String,
    pub name: String,
    pub members: usize,
    pub engagement_rate: Option<f64>,
    pub stress_rate: Option<f64>,
    pub attrition_rate: Option<f64>,
    pub risk: RiskProfile,
    pub top_themes: Vec<ThemeCount>,
    pub metrics_updated_at: Option<String>,
}

pub fn department_overview(
    departments: &[Department],
    employees: &[Employee],
    feedbacks: &[Feedback],
) -> Vec<DepartmentOverview> {
    let mut overview: Vec<DepartmentOverview> = departments
        .iter()
        .map(|department| {
            let members: Vec<&Employee> = employees
                .iter()
                .filter(|e| {
                    e.division
                        .as_deref()
                        .is_some_and(|d| same_department(d, &department.department_name))
                })
                .collect();
            let member_ids: BTreeSet<&str> = members.iter().map(|e| e.employee_id.as_str()).collect();
            let comments: Vec<&Feedback> = feedbacks
                .iter()
                .filter(|f| f.employee_id.as_deref().is_some_and(|id| member_ids.contains(id)))
                .collect();
            let rates = &department.rates;
            DepartmentOverview {
                department_id: department.department_id.clone(),
                name: department.department_name.clone(),
                members: members.len(),
                engagement_rate: rates.engagement_rate,
                stress_rate: rates.stress_rate,
                attrition_rate: rates.attrition_rate,
                risk: RiskProfile::from_rates(rates.engagement_rate, rates.stress_rate, rates.attrition_rate),
                top_themes: top_themes(&comments, 3),
                metrics_updated_at: department.metrics_updated_at.clone(),
            }
        })
        .collect();
    overview.sort_by(|a, b| a.name.cmp(&b.name));
    overview
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub departments: Vec<String>,
    pub positions: Vec<String>,
    pub job_grades: Vec<String>,
    pub employee_levels: Vec<String>,
    pub locations: Vec<String>,
}

pub fn filter_options(employees: &[Employee]) -> FilterOptions {
    fn unique<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<String> {
        values
            .flatten()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    FilterOptions {
        departments: unique(employees.iter().map(|e| e.division.as_deref())),
        positions: unique(employees.iter().map(|e| e.position.as_deref())),
        job_grades: unique(employees.iter().map(|e| e.job_grade.as_deref())),
        employee_levels: unique(employees.iter().map(|e| e.employee_level.as_deref())),
        locations: unique(employees.iter().map(|e| e.location.as_deref())),
    }
}
