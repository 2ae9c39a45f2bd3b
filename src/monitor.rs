use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};

use crate::labels::RiskLabel;
use crate::models::{Department, Employee};
use crate::records;
use crate::store::KeyValueStore;

pub const DEPARTMENT_CRITICAL: &str = "department_critical";
pub const EMPLOYEE_STRESS: &str = "employee_stress";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    pub data: Value,
}

impl AlertEnvelope {
    pub fn new(kind: &str, now: DateTime<Utc>, data: Value) -> Self {
        Self {
            kind: kind.to_string(),
            timestamp: now.to_rfc3339(),
            data,
        }
    }
}

/// Fan-out to every connected alert session. Sending with no subscribers is not an error.
#[derive(Clone)]
pub struct AlertHub {
    sender: broadcast::Sender<AlertEnvelope>,
}

impl AlertHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEnvelope> {
        self.sender.subscribe()
    }

    pub fn publish(&self, alert: AlertEnvelope) -> usize {
        match self.sender.send(alert) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::debug!("no alert subscribers connected");
                0
            }
        }
    }
}

/// Ids already alerted on. An id leaves the set once its condition clears.
#[derive(Debug, Default)]
pub struct AlertState {
    departments: HashSet<String>,
    employees: HashSet<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertCounts {
    pub department_alerts: usize,
    pub employee_alerts: usize,
}

impl AlertCounts {
    pub fn total(&self) -> usize {
        self.department_alerts + self.employee_alerts
    }
}

pub struct RiskMonitor {
    state: Mutex<AlertState>,
    hub: AlertHub,
    stress_threshold: f64,
}

impl RiskMonitor {
    pub fn new(hub: AlertHub, stress_threshold: f64) -> Self {
        Self {
            state: Mutex::new(AlertState::default()),
            hub,
            stress_threshold,
        }
    }

    pub fn hub(&self) -> &AlertHub {
        &self.hub
    }

    pub async fn check_department_risks(&self, departments: &[Department], now: DateTime<Utc>) -> Vec<AlertEnvelope> {
        let mut state = self.state.lock().await;
        let mut alerts = Vec::new();
        for department in departments {
            let id = &department.department_id;
            let critical = department.overall_risk == Some(RiskLabel::Critical);
            if critical && !state.departments.contains(id) {
                tracing::warn!(department = %department.department_name, "department is critical");
                state.departments.insert(id.clone());
                alerts.push(AlertEnvelope::new(
                    DEPARTMENT_CRITICAL,
                    now,
                    json!({
                        "department_id": id,
                        "department_name": department.department_name,
                        "overall_risk": RiskLabel::Critical,
                        "engagement_rate": department.rates.engagement_rate,
                    }),
                ));
            } else if !critical && state.departments.remove(id) {
                tracing::info!(department = %department.department_name, "department no longer critical");
            }
        }
        alerts
    }

    pub async fn check_employee_stress(&self, employees: &[Employee], now: DateTime<Utc>) -> Vec<AlertEnvelope> {
        let mut state = self.state.lock().await;
        let mut alerts = Vec::new();
        for employee in employees {
            let Some(stress) = employee.rates.stress_rate else {
                continue;
            };
            let id = &employee.employee_id;
            if stress > self.stress_threshold && !state.employees.contains(id) {
                tracing::warn!(employee_id = %id, stress, "employee stress over threshold");
                state.employees.insert(id.clone());
                alerts.push(AlertEnvelope::new(
                    EMPLOYEE_STRESS,
                    now,
                    json!({
                        "employee_id": id,
                        "employee_name": employee.name.as_deref().unwrap_or("Unknown"),
                        "department": employee.division.as_deref().unwrap_or("Unknown"),
                        "position": employee.position.as_deref().unwrap_or("Unknown"),
                        "stress_rate": stress,
                        "engagement_rate": employee.rates.engagement_rate,
                        "attrition_rate": employee.rates.attrition_rate,
                    }),
                ));
            } else if stress <= self.stress_threshold && state.employees.remove(id) {
                tracing::info!(employee_id = %id, stress, "employee stress back under threshold");
            }
        }
        alerts
    }

    /// Checks both tables and broadcasts new alerts. Store failures are logged
    /// and count as no alerts.
    pub async fn detect_and_notify(&self, store: &dyn KeyValueStore, now: DateTime<Utc>) -> AlertCounts {
        let mut alerts = Vec::new();
        let mut counts = AlertCounts::default();

        match records::load_all::<Department>(store).await {
            Ok(departments) => {
                let found = self.check_department_risks(&departments, now).await;
                counts.department_alerts = found.len();
                alerts.extend(found);
            }
            Err(err) => tracing::error!(error = %err, "department risk check failed"),
        }
        match records::load_all::<Employee>(store).await {
            Ok(employees) => {
                let found = self.check_employee_stress(&employees, now).await;
                counts.employee_alerts = found.len();
                alerts.extend(found);
            }
            Err(err) => tracing::error!(error = %err, "employee stress check failed"),
        }

        for alert in alerts {
            self.hub.publish(alert);
        }
        if counts.total() > 0 {
            tracing::info!(
                departments = counts.department_alerts,
                employees = counts.employee_alerts,
                "alerts sent"
            );
        } else {
            tracing::debug!("no new risks detected");
        }
        counts
    }

    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.departments.clear();
        state.employees.clear();
    }
}
