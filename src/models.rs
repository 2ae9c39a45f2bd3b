use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::labels::RiskLabel;
use crate::temporal;

pub const QUESTION_COUNT: usize = 30;

/// Canonical column key for each survey question, indexed by question number - 1.
pub const QUESTION_KEYS: [&str; QUESTION_COUNT] = [
    "Q1_Recommend",
    "Q2_Sup_Feedback",
    "Q3_Enablement_Tools",
    "Q4_Sup_Career_Interest",
    "Q5_Quality_Services",
    "Q6_Trust_Top_Mgmt",
    "Q7_Diversity_Inclusion",
    "Q8_ESG_Community",
    "Q9_Proud_Work",
    "Q10_Sup_Informed",
    "Q11_Systems_Process",
    "Q12_Career_Opp",
    "Q13_Great_Service",
    "Q14_Future_Success",
    "Q15_Respect",
    "Q16_ESG_Environment",
    "Q17_Rarely_Look_Job",
    "Q18_Sup_Role_Model",
    "Q19_L&D_Access",
    "Q20_Cust_Feedback_Usage",
    "Q21_Values_Lived",
    "Q22_Motivated_More",
    "Q23_Job_Sat",
    "Q24_Sup_Comm_Strategy",
    "Q25_Excited_Work",
    "Q26_Comp_Benefits",
    "Q27_Delight_Cust",
    "Q28_Stay_2_Years",
    "Q29_Health_Safety",
    "Q30_Sup_Recognize",
];

/// Parses `Q<n>` or `Q<n>_<suffix>` (case-insensitive `q`) into `n`.
/// The index is returned unchecked so callers can report out-of-range columns.
pub fn parse_question_header(header: &str) -> Option<u32> {
    let header = header.trim();
    let rest = header
        .strip_prefix('Q')
        .or_else(|| header.strip_prefix('q'))?;
    let digits: &str = match rest.find('_') {
        Some(pos) => &rest[..pos],
        None => rest,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    pub const ALL: [Quarter; 4] = [Quarter::Q1, Quarter::Q2, Quarter::Q3, Quarter::Q4];

    pub fn from_month(month: u32) -> Option<Self> {
        match month {
            1..=3 => Some(Quarter::Q1),
            4..=6 => Some(Quarter::Q2),
            7..=9 => Some(Quarter::Q3),
            10..=12 => Some(Quarter::Q4),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quarter::Q1 => "Q1",
            Quarter::Q2 => "Q2",
            Quarter::Q3 => "Q3",
            Quarter::Q4 => "Q4",
        }
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quarter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "Q1" => Ok(Quarter::Q1),
            "Q2" => Ok(Quarter::Q2),
            "Q3" => Ok(Quarter::Q3),
            "Q4" => Ok(Quarter::Q4),
            other => Err(format!("invalid quarter '{other}', expected Q1..Q4")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    EmployeeEngagement,
    Leadership,
    Enablement,
    Development,
    DelightCustomer,
    CompanyConfidence,
    CultureValues,
    Esg,
}

impl Dimension {
    pub const ALL: [Dimension; 8] = [
        Dimension::EmployeeEngagement,
        Dimension::Leadership,
        Dimension::Enablement,
        Dimension::Development,
        Dimension::DelightCustomer,
        Dimension::CompanyConfidence,
        Dimension::CultureValues,
        Dimension::Esg,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Dimension::EmployeeEngagement => "Dim_Employee_Engagement",
            Dimension::Leadership => "Dim_Leadership",
            Dimension::Enablement => "Dim_Enablement",
            Dimension::Development => "Dim_Development",
            Dimension::DelightCustomer => "Dim_Delight_Customer",
            Dimension::CompanyConfidence => "Dim_Company_Confidence",
            Dimension::CultureValues => "Dim_Culture_Values",
            Dimension::Esg => "Dim_ESG",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Dimension::EmployeeEngagement => "Employee Engagement",
            Dimension::Leadership => "Leadership",
            Dimension::Enablement => "Enablement",
            Dimension::Development => "Development",
            Dimension::DelightCustomer => "Delight Customer",
            Dimension::CompanyConfidence => "Company Confidence",
            Dimension::CultureValues => "Culture & Values",
            Dimension::Esg => "ESG",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    #[serde(rename = "Dim_Employee_Engagement", default, skip_serializing_if = "Option::is_none")]
    pub employee_engagement: Option<f64>,
    #[serde(rename = "Dim_Leadership", default, skip_serializing_if = "Option::is_none")]
    pub leadership: Option<f64>,
    #[serde(rename = "Dim_Enablement", default, skip_serializing_if = "Option::is_none")]
    pub enablement: Option<f64>,
    #[serde(rename = "Dim_Development", default, skip_serializing_if = "Option::is_none")]
    pub development: Option<f64>,
    #[serde(rename = "Dim_Delight_Customer", default, skip_serializing_if = "Option::is_none")]
    pub delight_customer: Option<f64>,
    #[serde(rename = "Dim_Company_Confidence", default, skip_serializing_if = "Option::is_none")]
    pub company_confidence: Option<f64>,
    #[serde(rename = "Dim_Culture_Values", default, skip_serializing_if = "Option::is_none")]
    pub culture_values: Option<f64>,
    #[serde(rename = "Dim_ESG", default, skip_serializing_if = "Option::is_none")]
    pub esg: Option<f64>,
}

impl DimensionScores {
    pub fn get(&self, dimension: Dimension) -> Option<f64> {
        match dimension {
            Dimension::EmployeeEngagement => self.employee_engagement,
            Dimension::Leadership => self.leadership,
            Dimension::Enablement => self.enablement,
            Dimension::Development => self.development,
            Dimension::DelightCustomer => self.delight_customer,
            Dimension::CompanyConfidence => self.company_confidence,
            Dimension::CultureValues => self.culture_values,
            Dimension::Esg => self.esg,
        }
    }

    pub fn set(&mut self, dimension: Dimension, value: Option<f64>) {
        let slot = match dimension {
            Dimension::EmployeeEngagement => &mut self.employee_engagement,
            Dimension::Leadership => &mut self.leadership,
            Dimension::Enablement => &mut self.enablement,
            Dimension::Development => &mut self.development,
            Dimension::DelightCustomer => &mut self.delight_customer,
            Dimension::CompanyConfidence => &mut self.company_confidence,
            Dimension::CultureValues => &mut self.culture_values,
            Dimension::Esg => &mut self.esg,
        };
        *slot = value;
    }
}

/// Raw Likert answers, Q1..Q30. Serialized under the canonical question keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionScores([Option<f64>; QUESTION_COUNT]);

impl QuestionScores {
    /// `index` is the 1-based question number.
    pub fn get(&self, index: usize) -> Option<f64> {
        index
            .checked_sub(1)
            .and_then(|i| self.0.get(i))
            .copied()
            .flatten()
    }

    pub fn set(&mut self, index: usize, value: Option<f64>) {
        if let Some(slot) = index.checked_sub(1).and_then(|i| self.0.get_mut(i)) {
            *slot = value;
        }
    }

    pub fn answered(&self) -> usize {
        self.0.iter().filter(|v| v.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<f64>)> + '_ {
        self.0.iter().enumerate().map(|(i, v)| (i + 1, *v))
    }
}

impl Serialize for QuestionScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.answered()))?;
        for (key, value) in QUESTION_KEYS.iter().zip(self.0.iter()) {
            if let Some(value) = value {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for QuestionScores {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QuestionVisitor;

        impl<'de> Visitor<'de> for QuestionVisitor {
            type Value = QuestionScores;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of question scores")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut scores = QuestionScores::default();
                while let Some(key) = access.next_key::<String>()? {
                    match QUESTION_KEYS.iter().position(|k| *k == key) {
                        Some(pos) => {
                            let value = access.next_value::<Option<f64>>()?;
                            scores.set(pos + 1, value);
                        }
                        None => {
                            access.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                Ok(scores)
            }
        }

        deserializer.deserialize_map(QuestionVisitor)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskRates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrition_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub response_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<f64>,
    #[serde(flatten)]
    pub dimensions: DimensionScores,
    #[serde(flatten)]
    pub rates: RiskRates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter: Option<Quarter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_season: Option<String>,
    #[serde(flatten)]
    pub questions: QuestionScores,
}

impl SurveyResponse {
    pub fn submitted_on(&self) -> Option<NaiveDate> {
        self.submission_date
            .as_deref()
            .and_then(temporal::parse_submission_date)
    }

    /// Identity used for distinct counts and snapshot dedup.
    pub fn respondent_key(&self) -> &str {
        self.employee_id.as_deref().unwrap_or(&self.response_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    #[serde(rename = "Employee_ID")]
    pub employee_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub division: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_grade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_level: Option<String>,
    #[serde(flatten)]
    pub rates: RiskRates,
    #[serde(flatten)]
    pub dimensions: DimensionScores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub department_id: String,
    pub department_name: String,
    #[serde(flatten)]
    pub rates: RiskRates,
    #[serde(flatten)]
    pub dimensions: DimensionScores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_risk: Option<RiskLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Negative,
    Neutral,
    Positive,
}

impl SentimentLabel {
    pub fn from_score(score: f64) -> Self {
        if score <= 4.0 {
            SentimentLabel::Negative
        } else if score <= 6.0 {
            SentimentLabel::Neutral
        } else {
            SentimentLabel::Positive
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Positive => "positive",
        }
    }
}

impl FromStr for SentimentLabel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "negative" => Ok(SentimentLabel::Negative),
            "neutral" => Ok(SentimentLabel::Neutral),
            "positive" => Ok(SentimentLabel::Positive),
            other => Err(format!("invalid sentiment '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub comment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    pub comments: String,
    #[serde(default)]
    pub rephrased_comment: String,
    #[serde(default)]
    pub category: String,
    pub sentiment_score: f64,
    pub sentiment_label: SentimentLabel,
    pub submission_date: String,
}

impl Feedback {
    pub fn submitted_on(&self) -> Option<NaiveDate> {
        temporal::parse_submission_date(&self.submission_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadEntry {
    #[serde(rename = "Workload_ID")]
    pub workload_id: String,
    #[serde(rename = "Employee_ID")]
    pub employee_id: String,
    #[serde(rename = "Date", default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "Hours_Logged", default, skip_serializing_if = "Option::is_none")]
    pub hours_logged: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_headers_accept_suffixes_and_case() {
        assert_eq!(parse_question_header("Q1_Recommend"), Some(1));
        assert_eq!(parse_question_header("q12"), Some(12));
        assert_eq!(parse_question_header("Q31_Extra"), Some(31));
        assert_eq!(parse_question_header("Quarter"), None);
        assert_eq!(parse_question_header("Q_"), None);
        assert_eq!(parse_question_header("employee_id"), None);
    }

    #[test]
    fn quarter_follows_calendar_months() {
        assert_eq!(Quarter::from_month(3), Some(Quarter::Q1));
        assert_eq!(Quarter::from_month(4), Some(Quarter::Q2));
        assert_eq!(Quarter::from_month(9), Some(Quarter::Q3));
        assert_eq!(Quarter::from_month(12), Some(Quarter::Q4));
        assert_eq!(Quarter::from_month(13), None);
        assert_eq!("q2".parse::<Quarter>(), Ok(Quarter::Q2));
    }

    #[test]
    fn survey_response_serializes_canonical_keys() {
        let mut response = SurveyResponse {
            response_id: "r-1".to_string(),
            employee_id: Some("E1".to_string()),
            ..SurveyResponse::default()
        };
        response.questions.set(1, Some(5.0));
        response.questions.set(12, Some(2.0));
        response.dimensions.employee_engagement = Some(4.5);

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["Q1_Recommend"], 5.0);
        assert_eq!(value["Q12_Career_Opp"], 2.0);
        assert_eq!(value["Dim_Employee_Engagement"], 4.5);
        assert!(value.get("Q2_Sup_Feedback").is_none());
        assert!(value.get("stress_rate").is_none());

        let back: SurveyResponse = serde_json::from_value(value).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn sentiment_label_thresholds() {
        assert_eq!(SentimentLabel::from_score(4.0), SentimentLabel::Negative);
        assert_eq!(SentimentLabel::from_score(5.0), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_score(6.0), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_score(6.5), SentimentLabel::Positive);
    }
}
