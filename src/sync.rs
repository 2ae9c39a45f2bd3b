use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{latest_per_employee, mean_dimensions, mean_rates};
use crate::error::StoreResult;
use crate::labels::{RiskLabel, RiskProfile};
use crate::models::{Department, DimensionScores, Employee, RiskRates, SurveyResponse};
use crate::records;
use crate::store::KeyValueStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub employees_updated: usize,
    pub employees_missing: usize,
    pub departments_updated: usize,
    pub departments_skipped: usize,
}

#[derive(Serialize)]
struct EmployeeMetrics<'a> {
    #[serde(flatten)]
    rates: &'a RiskRates,
    #[serde(flatten)]
    dimensions: &'a DimensionScores,
    #[serde(skip_serializing_if = "Option::is_none")]
    division: Option<&'a str>,
    metrics_updated_at: &'a str,
}

#[derive(Serialize)]
struct DepartmentMetrics<'a> {
    #[serde(flatten)]
    rates: &'a RiskRates,
    #[serde(flatten)]
    dimensions: &'a DimensionScores,
    overall_risk: RiskLabel,
    metrics_updated_at: &'a str,
}

/// Refreshes employee and department metrics from the full submission history.
pub async fn perform_full_sync(store: &dyn KeyValueStore, now: DateTime<Utc>) -> StoreResult<SyncReport> {
    let responses: Vec<SurveyResponse> = records::load_all(store).await?;
    let departments: Vec<Department> = records::load_all(store).await?;
    let stamp = now.to_rfc3339();
    let snapshot = latest_per_employee(&responses);
    let mut report = SyncReport::default();

    for record in &snapshot {
        let Some(employee_id) = record.employee_id.as_deref() else {
            continue;
        };
        let partial = EmployeeMetrics {
            rates: &record.rates,
            dimensions: &record.dimensions,
            division: record.department.as_deref(),
            metrics_updated_at: &stamp,
        };
        match records::update::<Employee, _>(store, employee_id, &partial).await? {
            Some(_) => report.employees_updated += 1,
            None => {
                tracing::debug!(employee_id, "no employee record to sync");
                report.employees_missing += 1;
            }
        }
    }

    let department_ids: HashMap<&str, &str> = departments
        .iter()
        .map(|d| (d.department_name.as_str(), d.department_id.as_str()))
        .collect();
    let mut groups: BTreeMap<&str, Vec<&SurveyResponse>> = BTreeMap::new();
    for record in &snapshot {
        if let Some(department) = record.department.as_deref() {
            groups.entry(department).or_default().push(*record);
        }
    }

    for (name, rows) in groups {
        let Some(department_id) = department_ids.get(name) else {
            tracing::warn!(department = name, "survey department has no matching department record");
            report.departments_skipped += 1;
            continue;
        };
        let rates = mean_rates(&rows);
        let dimensions = mean_dimensions(&rows);
        let partial = DepartmentMetrics {
            overall_risk: RiskProfile::from_rates(rates.engagement_rate, rates.stress_rate, rates.attrition_rate)
                .overall,
            rates: &rates,
            dimensions: &dimensions,
            metrics_updated_at: &stamp,
        };
        if records::update::<Department, _>(store, department_id, &partial)
            .await?
            .is_some()
        {
            report.departments_updated += 1;
        }
    }

    tracing::info!(
        employees_updated = report.employees_updated,
        departments_updated = report.departments_updated,
        departments_skipped = report.departments_skipped,
        "metrics sync finished"
    );
    Ok(report)
}
