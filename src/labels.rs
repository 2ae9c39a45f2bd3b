use std::fmt;

use serde::{Deserialize, Serialize};

/// Categorical risk level. Ordering follows severity, so `max` picks the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLabel {
    Healthy,
    Watch,
    Warning,
    Critical,
}

impl RiskLabel {
    pub fn severity(self) -> u8 {
        match self {
            RiskLabel::Healthy => 1,
            RiskLabel::Watch => 2,
            RiskLabel::Warning => 3,
            RiskLabel::Critical => 4,
        }
    }

    pub fn from_severity(weight: u8) -> Self {
        match weight {
            0 | 1 => RiskLabel::Healthy,
            2 => RiskLabel::Watch,
            3 => RiskLabel::Warning,
            _ => RiskLabel::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLabel::Healthy => "healthy",
            RiskLabel::Watch => "watch",
            RiskLabel::Warning => "warning",
            RiskLabel::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "healthy" => Some(RiskLabel::Healthy),
            "watch" => Some(RiskLabel::Watch),
            "warning" => Some(RiskLabel::Warning),
            "critical" => Some(RiskLabel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricPolarity {
    /// Engagement-style scores.
    HigherIsBetter,
    /// Stress, burnout and attrition rates.
    LowerIsBetter,
}

/// Missing or NaN values label as healthy.
pub fn risk_label(value: Option<f64>, polarity: MetricPolarity) -> RiskLabel {
    let value = match value {
        Some(v) if !v.is_nan() => v,
        _ => return RiskLabel::Healthy,
    };

    match polarity {
        MetricPolarity::HigherIsBetter => {
            if value > 75.0 {
                RiskLabel::Healthy
            } else if value > 65.0 {
                RiskLabel::Watch
            } else if value >= 55.0 {
                RiskLabel::Warning
            } else {
                RiskLabel::Critical
            }
        }
        MetricPolarity::LowerIsBetter => {
            if value <= 20.0 {
                RiskLabel::Healthy
            } else if value <= 35.0 {
                RiskLabel::Watch
            } else if value <= 50.0 {
                RiskLabel::Warning
            } else {
                RiskLabel::Critical
            }
        }
    }
}

pub fn combine<I>(labels: I) -> RiskLabel
where
    I: IntoIterator<Item = RiskLabel>,
{
    let worst = labels.into_iter().map(RiskLabel::severity).max().unwrap_or(1);
    RiskLabel::from_severity(worst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskProfile {
    pub engagement: RiskLabel,
    pub stress: RiskLabel,
    pub attrition: RiskLabel,
    pub overall: RiskLabel,
}

impl RiskProfile {
    pub fn from_rates(engagement: Option<f64>, stress: Option<f64>, attrition: Option<f64>) -> Self {
        let engagement = risk_label(engagement, MetricPolarity::HigherIsBetter);
        let stress = risk_label(stress, MetricPolarity::LowerIsBetter);
        let attrition = risk_label(attrition, MetricPolarity::LowerIsBetter);
        Self {
            engagement,
            stress,
            attrition,
            overall: combine([engagement, stress, attrition]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_boundaries_are_exact() {
        let label = |v| risk_label(Some(v), MetricPolarity::HigherIsBetter);
        assert_eq!(label(76.0), RiskLabel::Healthy);
        assert_eq!(label(75.01), RiskLabel::Healthy);
        assert_eq!(label(75.0), RiskLabel::Watch);
        assert_eq!(label(65.01), RiskLabel::Watch);
        assert_eq!(label(65.0), RiskLabel::Warning);
        assert_eq!(label(55.0), RiskLabel::Warning);
        assert_eq!(label(54.99), RiskLabel::Critical);
    }

    #[test]
    fn rate_boundaries_are_inclusive() {
        let label = |v| risk_label(Some(v), MetricPolarity::LowerIsBetter);
        assert_eq!(label(20.0), RiskLabel::Healthy);
        assert_eq!(label(20.1), RiskLabel::Watch);
        assert_eq!(label(35.0), RiskLabel::Watch);
        assert_eq!(label(50.0), RiskLabel::Warning);
        assert_eq!(label(50.1), RiskLabel::Critical);
    }

    #[test]
    fn missing_values_are_healthy() {
        assert_eq!(risk_label(None, MetricPolarity::LowerIsBetter), RiskLabel::Healthy);
        assert_eq!(
            risk_label(Some(f64::NAN), MetricPolarity::HigherIsBetter),
            RiskLabel::Healthy
        );
    }

    #[test]
    fn combine_takes_most_severe() {
        use RiskLabel::*;
        assert_eq!(combine([Healthy, Critical, Watch]), Critical);
        assert_eq!(combine([Healthy, Healthy, Healthy]), Healthy);
        assert_eq!(combine([Watch, Warning]), Warning);
        assert_eq!(combine(Vec::new()), Healthy);
    }

    #[test]
    fn profile_combines_three_labels() {
        let profile = RiskProfile::from_rates(Some(80.0), Some(55.0), Some(10.0));
        assert_eq!(profile.engagement, RiskLabel::Healthy);
        assert_eq!(profile.stress, RiskLabel::Critical);
        assert_eq!(profile.overall, RiskLabel::Critical);
    }
}
