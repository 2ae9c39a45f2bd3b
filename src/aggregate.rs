use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::labels::{RiskLabel, RiskProfile};
use crate::models::{Dimension, DimensionScores, Employee, Quarter, RiskRates, SurveyResponse, WorkloadEntry};
use crate::scoring::{mean, round_to};

/// A row counts as a full survey response when any of these is answered (non-zero).
pub const FULL_SURVEY_QUESTIONS: [usize; 5] = [1, 23, 29, 17, 28];

const JOB_SATISFACTION: usize = 23;
const WORK_LIFE_BALANCE: usize = 29;
const MANAGER_SUPPORT: usize = 18;
const GROWTH: usize = 12;
const RECOMMEND: usize = 1;
const RARELY_LOOK: usize = 17;
const STAY_TWO_YEARS: usize = 28;
const ENGAGEMENT_QUESTIONS: [usize; 4] = [1, 9, 23, 25];

pub fn is_full_survey(response: &SurveyResponse) -> bool {
    FULL_SURVEY_QUESTIONS
        .iter()
        .any(|q| matches!(response.questions.get(*q), Some(v) if v != 0.0))
}

pub fn same_department(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Headcount and workload per department, keyed by division name.
#[derive(Debug, Clone, Default)]
pub struct AggregationContext {
    headcounts: HashMap<String, usize>,
    workloads: HashMap<String, f64>,
}

impl AggregationContext {
    pub fn build(employees: &[Employee], workloads: &[WorkloadEntry]) -> Self {
        let mut headcounts: HashMap<String, usize> = HashMap::new();
        let mut division_of: HashMap<&str, &str> = HashMap::new();
        for employee in employees {
            if let Some(division) = employee.division.as_deref() {
                *headcounts.entry(division.to_string()).or_insert(0) += 1;
                division_of.insert(employee.employee_id.as_str(), division);
            }
        }

        let mut hours: HashMap<String, Vec<Option<f64>>> = HashMap::new();
        for entry in workloads {
            if let Some(division) = division_of.get(entry.employee_id.as_str()) {
                hours
                    .entry(division.to_string())
                    .or_default()
                    .push(entry.hours_logged);
            }
        }
        let workloads = hours
            .into_iter()
            .filter_map(|(division, values)| mean(values).map(|avg| (division, avg)))
            .collect();

        Self {
            headcounts,
            workloads,
        }
    }

    pub fn headcount(&self, department: Option<&str>) -> usize {
        match department {
            Some(name) => self
                .headcounts
                .iter()
                .filter(|(k, _)| same_department(k, name))
                .map(|(_, v)| *v)
                .sum(),
            None => self.headcounts.values().sum(),
        }
    }

    pub fn department_workload(&self, department: &str) -> Option<f64> {
        self.workloads
            .iter()
            .find(|(k, _)| same_department(k, department))
            .map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMetrics {
    #[serde(rename = "Department")]
    pub department: String,
    #[serde(rename = "Year")]
    pub year: Option<i32>,
    #[serde(rename = "Quarter")]
    pub quarter: Option<Quarter>,
    #[serde(rename = "Response_Count")]
    pub response_count: usize,
    #[serde(rename = "Total_Employees")]
    pub total_employees: usize,
    #[serde(rename = "Response_Rate")]
    pub response_rate: Option<f64>,
    #[serde(rename = "Total_Feedback_Count")]
    pub total_feedback_count: usize,
    #[serde(rename = "Open_Text_Only_Count")]
    pub open_text_only_count: usize,
    #[serde(rename = "Job_Satisfaction")]
    pub job_satisfaction: Option<f64>,
    #[serde(rename = "Work_Life_Balance")]
    pub work_life_balance: Option<f64>,
    #[serde(rename = "Manager_Support")]
    pub manager_support: Option<f64>,
    #[serde(rename = "Growth_Opportunities")]
    pub growth_opportunities: Option<f64>,
    #[serde(rename = "Overall_Engagement")]
    pub overall_engagement: Option<f64>,
    #[serde(rename = "eNPS")]
    pub enps: Option<f64>,
    #[serde(rename = "eNPS_Promoters")]
    pub enps_promoters: usize,
    #[serde(rename = "eNPS_Passives")]
    pub enps_passives: usize,
    #[serde(rename = "eNPS_Detractors")]
    pub enps_detractors: usize,
    #[serde(rename = "Avg_eNPS_Score")]
    pub avg_enps_score: Option<f64>,
    #[serde(rename = "Burnout_Score")]
    pub burnout_score: Option<f64>,
    #[serde(rename = "Burnout_Rate")]
    pub burnout_rate: Option<f64>,
    #[serde(rename = "Turnover_Risk")]
    pub turnover_risk: Option<f64>,
    #[serde(rename = "Avg_Workload")]
    pub avg_workload: Option<f64>,
    #[serde(rename = "Avg_Sentiment")]
    pub avg_sentiment: Option<f64>,
}

impl GroupMetrics {
    /// Placeholder for a bucket with no rows; rates stay null so charts can interpolate.
    pub fn empty(department: String, year: Option<i32>, quarter: Option<Quarter>, total_employees: usize) -> Self {
        Self {
            department,
            year,
            quarter,
            response_count: 0,
            total_employees,
            response_rate: None,
            total_feedback_count: 0,
            open_text_only_count: 0,
            job_satisfaction: None,
            work_life_balance: None,
            manager_support: None,
            growth_opportunities: None,
            overall_engagement: None,
            enps: None,
            enps_promoters: 0,
            enps_passives: 0,
            enps_detractors: 0,
            avg_enps_score: None,
            burnout_score: None,
            burnout_rate: None,
            turnover_risk: None,
            avg_workload: None,
            avg_sentiment: None,
        }
    }
}

fn round2(value: Option<f64>) -> Option<f64> {
    value.map(|v| round_to(v, 2))
}

fn present(rows: &[&SurveyResponse], question: usize) -> Vec<f64> {
    rows.iter().filter_map(|r| r.questions.get(question)).collect()
}

/// Both answers of a pair, for rows that have both.
fn aligned(rows: &[&SurveyResponse], first: usize, second: usize) -> Vec<(f64, f64)> {
    rows.iter()
        .filter_map(|r| Some((r.questions.get(first)?, r.questions.get(second)?)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnpsBreakdown {
    pub score: Option<f64>,
    pub promoters: usize,
    pub passives: usize,
    pub detractors: usize,
}

/// 5-point tiers: 5 promotes, 4 is passive, 3 or below detracts.
pub fn enps(scores: &[f64]) -> EnpsBreakdown {
    if scores.is_empty() {
        return EnpsBreakdown::default();
    }
    let promoters = scores.iter().filter(|s| **s == 5.0).count();
    let passives = scores.iter().filter(|s| **s == 4.0).count();
    let detractors = scores.iter().filter(|s| **s <= 3.0).count();
    let total = scores.len() as f64;
    EnpsBreakdown {
        score: Some((promoters as f64 - detractors as f64) / total * 100.0),
        promoters,
        passives,
        detractors,
    }
}

/// 6 minus mean wellness over rows answering both questions.
pub fn burnout_score(wlb_count: usize, pairs: &[(f64, f64)]) -> Option<f64> {
    if wlb_count == 0 {
        return None;
    }
    mean(pairs.iter().map(|(wlb, js)| Some((wlb + js) / 2.0))).map(|wellness| 6.0 - wellness)
}

/// Share of paired rows with both answers at 2 or below.
pub fn severe_share(lead_count: usize, pairs: &[(f64, f64)]) -> Option<f64> {
    if lead_count == 0 || pairs.is_empty() {
        return None;
    }
    let severe = pairs.iter().filter(|(a, b)| *a <= 2.0 && *b <= 2.0).count();
    Some(severe as f64 / pairs.len() as f64 * 100.0)
}

pub fn response_rate(responses: usize, total_employees: usize) -> Option<f64> {
    if total_employees == 0 {
        None
    } else {
        Some(responses as f64 / total_employees as f64 * 100.0)
    }
}

pub fn compute_group(
    department: String,
    year: Option<i32>,
    quarter: Option<Quarter>,
    rows: &[&SurveyResponse],
    total_employees: usize,
    ctx: &AggregationContext,
) -> GroupMetrics {
    let full: Vec<&SurveyResponse> = rows.iter().copied().filter(|r| is_full_survey(r)).collect();
    let respondents: HashSet<&str> = full.iter().map(|r| r.respondent_key()).collect();

    let recommend = present(&full, RECOMMEND);
    let wlb = present(&full, WORK_LIFE_BALANCE);
    let split = enps(&recommend);
    let wellness_pairs = aligned(&full, WORK_LIFE_BALANCE, JOB_SATISFACTION);
    let turnover_pairs = aligned(&full, RARELY_LOOK, STAY_TWO_YEARS);
    let rarely_look = present(&full, RARELY_LOOK);

    let overall_engagement = mean(full.iter().map(|r| {
        mean(ENGAGEMENT_QUESTIONS.iter().map(|q| r.questions.get(*q)))
    }));
    let avg_workload = mean(rows.iter().map(|r| {
        r.department
            .as_deref()
            .and_then(|d| ctx.department_workload(d))
    }));

    GroupMetrics {
        department,
        year,
        quarter,
        response_count: respondents.len(),
        total_employees,
        response_rate: round2(response_rate(respondents.len(), total_employees)),
        total_feedback_count: rows.len(),
        open_text_only_count: rows.len() - full.len(),
        job_satisfaction: round2(mean(present(&full, JOB_SATISFACTION).into_iter().map(Some))),
        work_life_balance: round2(mean(wlb.iter().copied().map(Some))),
        manager_support: round2(mean(present(&full, MANAGER_SUPPORT).into_iter().map(Some))),
        growth_opportunities: round2(mean(present(&full, GROWTH).into_iter().map(Some))),
        overall_engagement: round2(overall_engagement),
        enps: round2(split.score),
        enps_promoters: split.promoters,
        enps_passives: split.passives,
        enps_detractors: split.detractors,
        avg_enps_score: round2(mean(recommend.iter().copied().map(Some))),
        burnout_score: round2(burnout_score(wlb.len(), &wellness_pairs)),
        burnout_rate: round2(severe_share(wlb.len(), &wellness_pairs)),
        turnover_risk: round2(severe_share(rarely_look.len(), &turnover_pairs)),
        avg_workload: round2(avg_workload),
        avg_sentiment: round2(mean(rows.iter().map(|r| r.sentiment_score))),
    }
}

/// Department x Year x Quarter. Rows without a parseable date are not grouped.
pub fn aggregate_groups<'a, I>(records: I, ctx: &AggregationContext) -> Vec<GroupMetrics>
where
    I: IntoIterator<Item = &'a SurveyResponse>,
{
    let mut groups: BTreeMap<(String, i32, Quarter), Vec<&SurveyResponse>> = BTreeMap::new();
    for record in records {
        let (Some(year), Some(quarter)) = (record.year, record.quarter) else {
            continue;
        };
        let department = record
            .department
            .clone()
            .unwrap_or_else(|| "Unknown".to_string());
        groups.entry((department, year, quarter)).or_default().push(record);
    }

    groups
        .into_iter()
        .map(|((department, year, quarter), rows)| {
            let headcount = ctx.headcount(Some(&department));
            compute_group(department, Some(year), Some(quarter), &rows, headcount, ctx)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Quarter,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsFilter {
    pub departments: Vec<String>,
    pub quarter: Option<Quarter>,
    pub year: Option<i32>,
    pub group_by: Option<GroupBy>,
}

fn matches_departments(record: &SurveyResponse, departments: &[String]) -> bool {
    departments.is_empty()
        || record
            .department
            .as_deref()
            .is_some_and(|d| departments.iter().any(|want| same_department(d, want)))
}

fn scope_label(departments: &[String]) -> String {
    if departments.is_empty() {
        "All".to_string()
    } else {
        departments.join(", ")
    }
}

fn scope_headcount(departments: &[String], ctx: &AggregationContext) -> usize {
    if departments.is_empty() {
        ctx.headcount(None)
    } else {
        departments.iter().map(|d| ctx.headcount(Some(d))).sum()
    }
}

/// Applies the department/quarter/year combination rules. Without a year the
/// current one (from `today`) is used. Grouping by quarter always yields Q1..Q4,
/// whatever `quarter` says.
pub fn filter_metrics(
    records: &[SurveyResponse],
    ctx: &AggregationContext,
    filter: &MetricsFilter,
    today: NaiveDate,
) -> Vec<GroupMetrics> {
    let departments = &filter.departments;
    let year = filter.year.unwrap_or_else(|| today.year());

    let scoped: Vec<&SurveyResponse> = records
        .iter()
        .filter(|r| matches_departments(r, departments))
        .filter(|r| r.year == Some(year))
        .collect();

    if filter.group_by == Some(GroupBy::Quarter) {
        let label = scope_label(departments);
        let headcount = scope_headcount(departments, ctx);
        return Quarter::ALL
            .into_iter()
            .map(|quarter| {
                let rows: Vec<&SurveyResponse> = scoped
                    .iter()
                    .copied()
                    .filter(|r| r.quarter == Some(quarter))
                    .collect();
                if rows.is_empty() {
                    GroupMetrics::empty(label.clone(), Some(year), Some(quarter), headcount)
                } else {
                    compute_group(label.clone(), Some(year), Some(quarter), &rows, headcount, ctx)
                }
            })
            .collect();
    }

    match (departments.is_empty(), filter.quarter) {
        (false, Some(quarter)) => aggregate_groups(scoped.into_iter().filter(|r| r.quarter == Some(quarter)), ctx),
        (false, None) => departments
            .iter()
            .map(|department| {
                let rows: Vec<&SurveyResponse> = scoped
                    .iter()
                    .copied()
                    .filter(|r| r.department.as_deref().is_some_and(|d| same_department(d, department)))
                    .collect();
                compute_group(department.clone(), Some(year), None, &rows, ctx.headcount(Some(department)), ctx)
            })
            .collect(),
        (true, Some(quarter)) => {
            let rows: Vec<&SurveyResponse> =
                scoped.into_iter().filter(|r| r.quarter == Some(quarter)).collect();
            vec![compute_group(
                "All".to_string(),
                Some(year),
                Some(quarter),
                &rows,
                ctx.headcount(None),
                ctx,
            )]
        }
        (true, None) => vec![compute_group(
            "All".to_string(),
            Some(year),
            None,
            &scoped,
            ctx.headcount(None),
            ctx,
        )],
    }
}

/// Latest submission per employee. Rows without an employee id stay separate.
pub fn latest_per_employee<'a, I>(records: I) -> Vec<&'a SurveyResponse>
where
    I: IntoIterator<Item = &'a SurveyResponse>,
{
    let mut latest: BTreeMap<(bool, &str), &SurveyResponse> = BTreeMap::new();
    for record in records {
        let key = match record.employee_id.as_deref() {
            Some(id) => (true, id),
            None => (false, record.response_id.as_str()),
        };
        match latest.get(&key) {
            Some(current) if current.submitted_on() > record.submitted_on() => {}
            _ => {
                latest.insert(key, record);
            }
        }
    }
    latest.into_values().collect()
}

pub fn mean_rates(rows: &[&SurveyResponse]) -> RiskRates {
    RiskRates {
        engagement_rate: round2(mean(rows.iter().map(|r| r.rates.engagement_rate))),
        stress_rate: round2(mean(rows.iter().map(|r| r.rates.stress_rate))),
        attrition_rate: round2(mean(rows.iter().map(|r| r.rates.attrition_rate))),
    }
}

pub fn mean_dimensions(rows: &[&SurveyResponse]) -> DimensionScores {
    let mut scores = DimensionScores::default();
    for dimension in Dimension::ALL {
        scores.set(dimension, round2(mean(rows.iter().map(|r| r.dimensions.get(dimension)))));
    }
    scores
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentSnapshot {
    pub department: String,
    pub respondents: usize,
    #[serde(flatten)]
    pub rates: RiskRates,
    pub dimensions: DimensionScores,
    pub risk: RiskProfile,
}

/// Per-department means over an already deduplicated snapshot.
pub fn snapshot_by_department(snapshot: &[&SurveyResponse]) -> Vec<DepartmentSnapshot> {
    let mut groups: BTreeMap<&str, Vec<&SurveyResponse>> = BTreeMap::new();
    for record in snapshot {
        if let Some(department) = record.department.as_deref() {
            groups.entry(department).or_default().push(*record);
        }
    }
    groups
        .into_iter()
        .map(|(department, rows)| {
            let rates = mean_rates(&rows);
            DepartmentSnapshot {
                department: department.to_string(),
                respondents: rows.len(),
                risk: RiskProfile::from_rates(rates.engagement_rate, rates.stress_rate, rates.attrition_rate),
                dimensions: mean_dimensions(&rows),
                rates,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    pub department: Option<String>,
    pub position: Option<String>,
    pub quarter: Option<Quarter>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSummary {
    pub department: String,
    pub position: Option<String>,
    pub employees: usize,
    #[serde(flatten)]
    pub rates: RiskRates,
    pub dimensions: DimensionScores,
    pub risk: RiskProfile,
    pub critical_employees: usize,
    pub warning_employees: usize,
}

/// Filters first, then keeps the latest submission per employee.
pub fn risk_summary(records: &[SurveyResponse], employees: &[Employee], filter: &SnapshotFilter) -> RiskSummary {
    let position_of: HashMap<&str, &str> = employees
        .iter()
        .filter_map(|e| Some((e.employee_id.as_str(), e.position.as_deref()?)))
        .collect();

    let filtered = records
        .iter()
        .filter(|r| match filter.department.as_deref() {
            Some(want) => r.department.as_deref().is_some_and(|d| same_department(d, want)),
            None => true,
        })
        .filter(|r| filter.quarter.map_or(true, |q| r.quarter == Some(q)))
        .filter(|r| filter.year.map_or(true, |y| r.year == Some(y)))
        .filter(|r| match filter.position.as_deref() {
            Some(want) => r
                .employee_id
                .as_deref()
                .and_then(|id| position_of.get(id))
                .is_some_and(|p| p.eq_ignore_ascii_case(want)),
            None => true,
        });
    let snapshot = latest_per_employee(filtered);

    let rates = mean_rates(&snapshot);
    let profiles: Vec<RiskProfile> = snapshot
        .iter()
        .map(|r| RiskProfile::from_rates(r.rates.engagement_rate, r.rates.stress_rate, r.rates.attrition_rate))
        .collect();

    RiskSummary {
        department: filter.department.clone().unwrap_or_else(|| "All".to_string()),
        position: filter.position.clone(),
        employees: snapshot.len(),
        risk: RiskProfile::from_rates(rates.engagement_rate, rates.stress_rate, rates.attrition_rate),
        dimensions: mean_dimensions(&snapshot),
        rates,
        critical_employees: profiles
            .iter()
            .filter(|p| p.overall == RiskLabel::Critical)
            .count(),
        warning_employees: profiles
            .iter()
            .filter(|p| p.overall == RiskLabel::Warning)
            .count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{score_response, DimensionMap};
    use crate::temporal::{enrich, HolidayCalendar};

    fn response(id: &str, employee: Option<&str>, department: &str, date: &str, answers: &[(usize, f64)]) -> SurveyResponse {
        let mut record = SurveyResponse {
            response_id: id.to_string(),
            employee_id: employee.map(str::to_string),
            department: Some(department.to_string()),
            submission_date: Some(date.to_string()),
            ..SurveyResponse::default()
        };
        for (q, v) in answers {
            record.questions.set(*q, Some(*v));
        }
        score_response(&mut record, DimensionMap::Core);
        enrich(&mut record, &HolidayCalendar::default());
        record
    }

    fn staff(id: &str, division: &str) -> Employee {
        Employee {
            employee_id: id.to_string(),
            division: Some(division.to_string()),
            ..Employee::default()
        }
    }

    fn context() -> AggregationContext {
        let employees = vec![staff("E1", "Sales"), staff("E2", "Sales"), staff("E3", "Sales"), staff("E4", "Ops")];
        let workloads = vec![
            WorkloadEntry {
                workload_id: "W1".to_string(),
                employee_id: "E1".to_string(),
                date: None,
                hours_logged: Some(40.0),
            },
            WorkloadEntry {
                workload_id: "W2".to_string(),
                employee_id: "E2".to_string(),
                date: None,
                hours_logged: Some(50.0),
            },
        ];
        AggregationContext::build(&employees, &workloads)
    }

    #[test]
    fn enps_uses_five_point_tiers() {
        let breakdown = enps(&[5.0, 5.0, 4.0, 3.0, 1.0]);
        assert_eq!(breakdown.promoters, 2);
        assert_eq!(breakdown.passives, 1);
        assert_eq!(breakdown.detractors, 2);
        assert_eq!(breakdown.score, Some(0.0));
        assert_eq!(enps(&[]).score, None);
    }

    #[test]
    fn burnout_and_turnover_need_both_answers() {
        let pairs = [(1.0, 2.0), (4.0, 4.0)];
        assert_eq!(burnout_score(2, &pairs), Some(6.0 - 2.75));
        assert_eq!(severe_share(2, &pairs), Some(50.0));
        assert_eq!(severe_share(0, &pairs), None);
        assert_eq!(severe_share(3, &[]), None);
        assert_eq!(response_rate(3, 0), None);
    }

    #[test]
    fn groups_split_full_survey_from_open_text_rows() {
        let mut open_text = response("r3", Some("E3"), "Sales", "2024-02-01", &[]);
        open_text.sentiment_score = Some(2.0);
        let mut full = response("r1", Some("E1"), "Sales", "2024-01-10", &[(1, 5.0), (23, 4.0), (29, 2.0)]);
        full.sentiment_score = Some(8.0);
        let records = vec![
            full,
            response("r2", Some("E2"), "Sales", "2024-03-10", &[(1, 3.0), (23, 2.0), (29, 2.0)]),
            open_text,
        ];

        let groups = aggregate_groups(&records, &context());
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.quarter, Some(Quarter::Q1));
        assert_eq!(group.response_count, 2);
        assert_eq!(group.total_employees, 3);
        assert_eq!(group.response_rate, Some(66.67));
        assert_eq!(group.total_feedback_count, 3);
        assert_eq!(group.open_text_only_count, 1);
        assert_eq!(group.job_satisfaction, Some(3.0));
        assert_eq!(group.enps, Some(0.0));
        assert_eq!(group.burnout_rate, Some(50.0));
        assert_eq!(group.avg_sentiment, Some(5.0));
        assert_eq!(group.avg_workload, Some(45.0));
    }

    #[test]
    fn quarter_grouping_emits_null_rows_for_empty_quarters() {
        let records = vec![
            response("r1", Some("E1"), "Sales", "2024-01-10", &[(1, 5.0)]),
            response("r2", Some("E2"), "Sales", "2024-05-10", &[(1, 4.0)]),
        ];
        let filter = MetricsFilter {
            group_by: Some(GroupBy::Quarter),
            year: Some(2024),
            ..MetricsFilter::default()
        };
        let today = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let rows = filter_metrics(&records, &context(), &filter, today);
        assert_eq!(rows.len(), 4);
        let q3 = &rows[2];
        assert_eq!(q3.quarter, Some(Quarter::Q3));
        assert_eq!(q3.response_count, 0);
        assert_eq!(q3.response_rate, None);
        assert_eq!(q3.enps, None);
        assert_eq!(q3.burnout_rate, None);
        assert_eq!(rows[0].response_count, 1);
        assert_eq!(rows[0].department, "All");
    }

    #[test]
    fn quarter_is_ignored_when_grouping_by_quarter() {
        let records = vec![
            response("r1", Some("E1"), "Sales", "2024-01-10", &[(1, 5.0)]),
            response("r2", Some("E2"), "Sales", "2024-05-10", &[(1, 4.0)]),
        ];
        let filter = MetricsFilter {
            quarter: Some(Quarter::Q2),
            year: Some(2024),
            group_by: Some(GroupBy::Quarter),
            ..MetricsFilter::default()
        };
        let today = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let rows = filter_metrics(&records, &context(), &filter, today);
        let quarters: Vec<Option<Quarter>> = rows.iter().map(|r| r.quarter).collect();
        assert_eq!(
            quarters,
            vec![Some(Quarter::Q1), Some(Quarter::Q2), Some(Quarter::Q3), Some(Quarter::Q4)]
        );
        assert_eq!(rows[0].response_count, 1);
        assert_eq!(rows[1].response_count, 1);
    }

    #[test]
    fn department_and_quarter_return_group_rows() {
        let records = vec![
            response("r1", Some("E1"), "Sales", "2024-01-10", &[(1, 5.0)]),
            response("r2", Some("E4"), "Ops", "2024-01-11", &[(1, 4.0)]),
            response("r3", Some("E2"), "Sales", "2024-07-10", &[(1, 4.0)]),
        ];
        let filter = MetricsFilter {
            departments: vec!["sales".to_string()],
            quarter: Some(Quarter::Q1),
            year: Some(2024),
            group_by: None,
        };
        let today = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let rows = filter_metrics(&records, &context(), &filter, today);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].department, "Sales");
        assert_eq!(rows[0].year, Some(2024));
        assert_eq!(rows[0].quarter, Some(Quarter::Q1));
        assert_eq!(rows[0].response_count, 1);
        assert_eq!(rows[0].total_employees, 3);
        let wire = serde_json::to_value(&rows[0]).unwrap();
        assert!(wire.get("employee_id").is_none());
        assert!(wire.get("Response_Count").is_some());
    }

    #[test]
    fn no_filters_aggregate_current_year_as_all() {
        let records = vec![
            response("r1", Some("E1"), "Sales", "2024-01-10", &[(1, 5.0)]),
            response("r2", Some("E4"), "Ops", "2024-04-11", &[(1, 3.0)]),
            response("r3", Some("E2"), "Sales", "2023-04-11", &[(1, 3.0)]),
        ];
        let today = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let rows = filter_metrics(&records, &context(), &MetricsFilter::default(), today);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].department, "All");
        assert_eq!(rows[0].response_count, 2);
        assert_eq!(rows[0].total_employees, 4);
        assert_eq!(rows[0].response_rate, Some(50.0));
    }

    #[test]
    fn snapshot_keeps_latest_submission_per_employee() {
        let records = vec![
            response("r1", Some("E1"), "Sales", "2024-06-01", &[(1, 5.0), (9, 5.0)]),
            response("r2", Some("E1"), "Sales", "2024-01-01", &[(1, 1.0), (9, 1.0)]),
            response("r3", None, "Sales", "2024-01-01", &[(1, 3.0), (9, 3.0)]),
            response("r4", None, "Sales", "2024-01-01", &[(1, 3.0), (9, 3.0)]),
        ];
        let snapshot = latest_per_employee(&records);
        assert_eq!(snapshot.len(), 3);
        let e1 = snapshot.iter().find(|r| r.employee_id.as_deref() == Some("E1")).unwrap();
        assert_eq!(e1.response_id, "r1");
        assert_eq!(e1.rates.engagement_rate, Some(100.0));
    }

    #[test]
    fn risk_summary_filters_before_dedup() {
        let records = vec![
            response("r1", Some("E1"), "Sales", "2024-02-01", &[(1, 5.0), (9, 5.0)]),
            response("r2", Some("E1"), "Sales", "2024-08-01", &[(1, 1.0), (9, 1.0)]),
        ];
        let employees = vec![staff("E1", "Sales")];
        let filter = SnapshotFilter {
            department: Some("Sales".to_string()),
            quarter: Some(Quarter::Q1),
            ..SnapshotFilter::default()
        };
        let summary = risk_summary(&records, &employees, &filter);
        assert_eq!(summary.employees, 1);
        assert_eq!(summary.rates.engagement_rate, Some(100.0));
        assert_eq!(summary.risk.engagement, RiskLabel::Healthy);
    }

    #[test]
    fn department_snapshot_labels_means() {
        let records = vec![
            response("r1", Some("E1"), "Sales", "2024-02-01", &[(1, 2.0), (9, 2.0)]),
            response("r2", Some("E2"), "Sales", "2024-02-01", &[(1, 3.0), (9, 3.0)]),
        ];
        let snapshot = latest_per_employee(&records);
        let departments = snapshot_by_department(&snapshot);
        assert_eq!(departments.len(), 1);
        assert_eq!(departments[0].rates.engagement_rate, Some(37.5));
        assert_eq!(departments[0].risk.overall, RiskLabel::Critical);
    }
}
