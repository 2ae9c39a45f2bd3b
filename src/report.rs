use std::fmt::Write;

use chrono::NaiveDate;

use crate::aggregate::{
    aggregate_groups, filter_metrics, latest_per_employee, same_department, snapshot_by_department,
    AggregationContext, GroupBy, MetricsFilter,
};
use crate::models::{Employee, SurveyResponse};

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{v:.decimals$}"),
        None => "n/a".to_string(),
    }
}

/// Employees with a stress rate, highest first.
pub fn highest_stress<'a>(employees: &'a [Employee], department: Option<&str>, limit: usize) -> Vec<&'a Employee> {
    let mut stressed: Vec<&'a Employee> = employees
        .iter()
        .filter(|e| e.rates.stress_rate.is_some())
        .filter(|e| match department {
            Some(want) => e.division.as_deref().is_some_and(|d| same_department(d, want)),
            None => true,
        })
        .collect();
    stressed.sort_by(|a, b| {
        b.rates
            .stress_rate
            .unwrap_or(0.0)
            .total_cmp(&a.rates.stress_rate.unwrap_or(0.0))
            .then_with(|| a.employee_id.cmp(&b.employee_id))
    });
    stressed.truncate(limit);
    stressed
}

pub fn build_report(
    department: Option<&str>,
    year: i32,
    today: NaiveDate,
    records: &[SurveyResponse],
    ctx: &AggregationContext,
    employees: &[Employee],
) -> String {
    let scoped: Vec<SurveyResponse> = records
        .iter()
        .filter(|r| match department {
            Some(want) => r.department.as_deref().is_some_and(|d| same_department(d, want)),
            None => true,
        })
        .cloned()
        .collect();
    let groups = aggregate_groups(&scoped, ctx);
    let snapshot = latest_per_employee(&scoped);
    let departments = snapshot_by_department(&snapshot);

    let mut output = String::new();
    let scope_label = department.unwrap_or("all departments");

    let _ = writeln!(output, "# Wellbeing Risk Report");
    let _ = writeln!(output, "Generated for {} on {}", scope_label, today);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Department Snapshot");

    if departments.is_empty() {
        let _ = writeln!(output, "No survey responses recorded yet.");
    } else {
        let _ = writeln!(
            output,
            "| Department | Respondents | Engagement | Stress | Attrition | Overall |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|");
        for row in departments.iter() {
            let _ = writeln!(
                output,
                "| {} | {} | {} ({}) | {} ({}) | {} ({}) | {} |",
                row.department,
                row.respondents,
                fmt_opt(row.rates.engagement_rate, 1),
                row.risk.engagement,
                fmt_opt(row.rates.stress_rate, 1),
                row.risk.stress,
                fmt_opt(row.rates.attrition_rate, 1),
                row.risk.attrition,
                row.risk.overall
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Department Quarters");
    if groups.is_empty() {
        let _ = writeln!(output, "No dated responses to group.");
    }
    for group in groups.iter() {
        let quarter = group.quarter.map(|q| q.as_str()).unwrap_or("-");
        let _ = writeln!(
            output,
            "- {} {} {}: {} of {} responded ({}%), {} open-text only, eNPS {}, burnout rate {}",
            group.department,
            group.year.map(|y| y.to_string()).unwrap_or_default(),
            quarter,
            group.response_count,
            group.total_employees,
            fmt_opt(group.response_rate, 1),
            group.open_text_only_count,
            fmt_opt(group.enps, 1),
            fmt_opt(group.burnout_rate, 1)
        );
    }

    let filter = MetricsFilter {
        departments: department.map(|d| vec![d.to_string()]).unwrap_or_default(),
        year: Some(year),
        group_by: Some(GroupBy::Quarter),
        ..MetricsFilter::default()
    };
    let _ = writeln!(output);
    let _ = writeln!(output, "## Quarterly Metrics ({year})");

    for row in filter_metrics(records, ctx, &filter, today).iter() {
        let quarter = row.quarter.map(|q| q.as_str()).unwrap_or("-");
        if row.response_count == 0 {
            let _ = writeln!(output, "- {}: no responses", quarter);
            continue;
        }
        let _ = writeln!(
            output,
            "- {}: {} responses, engagement {}, eNPS {}, burnout {}, turnover risk {}",
            quarter,
            row.response_count,
            fmt_opt(row.overall_engagement, 2),
            fmt_opt(row.enps, 1),
            fmt_opt(row.burnout_rate, 1),
            fmt_opt(row.turnover_risk, 1)
        );
    }

    let stressed = highest_stress(employees, department, 10);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Stress Employees");

    if stressed.is_empty() {
        let _ = writeln!(output, "No employee stress metrics synced yet.");
    } else {
        for employee in stressed {
            let _ = writeln!(
                output,
                "- {} ({}, {}) stress {} engagement {}",
                employee.name.as_deref().unwrap_or(&employee.employee_id),
                employee.division.as_deref().unwrap_or("Unassigned"),
                employee.position.as_deref().unwrap_or("Unknown"),
                fmt_opt(employee.rates.stress_rate, 1),
                fmt_opt(employee.rates.engagement_rate, 1)
            );
        }
    }

    output
}
