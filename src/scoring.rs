use std::str::FromStr;

use crate::models::{Dimension, DimensionScores, QuestionScores, RiskRates, SurveyResponse};

/// Question groupings for the eight dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DimensionMap {
    /// 15-question survey.
    #[default]
    Core,
    /// 30-question survey.
    Extended,
}

impl DimensionMap {
    pub fn questions(self, dimension: Dimension) -> &'static [usize] {
        match self {
            DimensionMap::Core => match dimension {
                Dimension::EmployeeEngagement => &[1, 9],
                Dimension::Leadership => &[2, 10],
                Dimension::Enablement => &[3, 11],
                Dimension::Development => &[4, 12],
                Dimension::DelightCustomer => &[5, 13],
                Dimension::CompanyConfidence => &[6, 14],
                Dimension::CultureValues => &[7, 15],
                Dimension::Esg => &[8],
            },
            DimensionMap::Extended => match dimension {
                Dimension::EmployeeEngagement => &[1, 9, 22, 23, 25, 28],
                Dimension::Leadership => &[2, 10, 18, 30],
                Dimension::Enablement => &[3, 11, 29],
                Dimension::Development => &[4, 12, 19],
                Dimension::DelightCustomer => &[5, 13, 20, 27],
                Dimension::CompanyConfidence => &[6, 14, 24],
                Dimension::CultureValues => &[7, 15, 21],
                Dimension::Esg => &[8, 16],
            },
        }
    }
}

impl FromStr for DimensionMap {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "core" => Ok(DimensionMap::Core),
            "extended" => Ok(DimensionMap::Extended),
            other => Err(format!("unknown dimension map '{other}'")),
        }
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Mean of the present values; `None` when nothing is present.
pub fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = values
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Rescales a 1-5 Likert value to 0-100.
pub fn likert_to_pct(value: f64) -> f64 {
    (((value - 1.0) / 4.0) * 100.0).clamp(0.0, 100.0)
}

pub fn score_dimensions(questions: &QuestionScores, map: DimensionMap) -> DimensionScores {
    let mut scores = DimensionScores::default();
    for dimension in Dimension::ALL {
        let value = mean(map.questions(dimension).iter().map(|q| questions.get(*q)));
        scores.set(dimension, value.map(|v| round_to(v, 2)));
    }
    scores
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateBreakdown {
    pub rates: RiskRates,
    pub stress_score: Option<f64>,
}

/// Each rate is computed independently; missing inputs only null that rate.
pub fn compute_rates(dimensions: &DimensionScores, questions: &QuestionScores) -> RateBreakdown {
    let engagement_rate = dimensions
        .employee_engagement
        .map(|v| round_to(likert_to_pct(v), 1));

    let stress_score = match (dimensions.enablement, dimensions.culture_values) {
        (Some(enablement), Some(culture)) => Some(round_to(6.0 - (enablement + culture) / 2.0, 2)),
        _ => None,
    };
    let stress_rate = stress_score.map(|v| round_to(likert_to_pct(v), 1));

    let attrition_rate = match (questions.get(1), questions.get(12)) {
        (Some(recommend), Some(career)) => {
            let retention = (recommend + career) / 2.0;
            Some(round_to(likert_to_pct(6.0 - retention), 1))
        }
        _ => None,
    };

    RateBreakdown {
        rates: RiskRates {
            engagement_rate,
            stress_rate,
            attrition_rate,
        },
        stress_score,
    }
}

pub fn score_response(response: &mut SurveyResponse, map: DimensionMap) {
    response.dimensions = score_dimensions(&response.questions, map);
    let breakdown = compute_rates(&response.dimensions, &response.questions);
    response.rates = breakdown.rates;
    response.stress_score = breakdown.stress_score;
}
