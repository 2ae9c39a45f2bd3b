use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::LlmConfig;
use crate::error::NarrativeError;
use crate::models::SentimentLabel;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, NarrativeError>;
}

/// Ollama-style `/api/generate` endpoint.
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self, NarrativeError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn complete(&self, prompt: &str) -> Result<String, NarrativeError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "format": "json",
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NarrativeError::Status(status.as_u16()));
        }
        let body: Value = response.json().await?;
        body.get("response")
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string)
            .ok_or(NarrativeError::EmptyResponse)
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn complete(&self, _prompt: &str) -> Result<String, NarrativeError> {
        Err(NarrativeError::Disabled)
    }
}

fn fence_open() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^```[a-zA-Z]*\s*").expect("fence regex"))
}

fn fence_close() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*```$").expect("fence regex"))
}

fn control_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\x00-\x1F\x7F]").expect("control char regex"))
}

fn trailing_commas() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("trailing comma regex"))
}

pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let opened = fence_open().replace(trimmed, "");
    fence_close().replace(&opened, "").into_owned()
}

/// First `{` to last `}`, or `None` when there is no object.
pub fn extract_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Raw newlines and tabs inside generated strings break JSON; drop them all.
pub fn strip_control_chars(text: &str) -> String {
    control_chars().replace_all(text, "").into_owned()
}

pub fn normalize_quotes(text: &str) -> String {
    text.replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}

pub fn drop_trailing_commas(text: &str) -> String {
    trailing_commas().replace_all(text, "$1").into_owned()
}

pub fn repair_json(raw: &str) -> Option<Value> {
    let unfenced = strip_code_fences(raw);
    let body = extract_braces(&unfenced)?;
    let cleaned = drop_trailing_commas(&normalize_quotes(&strip_control_chars(body)));
    serde_json::from_str::<Value>(&cleaned)
        .ok()
        .filter(Value::is_object)
}

pub fn parse_or_fallback<T: DeserializeOwned>(raw: &str, fallback: T) -> T {
    match repair_json(raw).and_then(|value| serde_json::from_value::<T>(value).ok()) {
        Some(parsed) => parsed,
        None => {
            tracing::warn!("generator returned unusable JSON, using fallback");
            fallback
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub title: String,
    pub insight: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightSummary {
    pub summary: String,
    #[serde(default)]
    pub key_observations: Vec<Observation>,
}

impl InsightSummary {
    pub fn fallback() -> Self {
        Self {
            summary: "Data processed.".to_string(),
            key_observations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub diagnosis: String,
    pub recommendation: String,
}

impl Diagnosis {
    pub fn fallback() -> Self {
        Self {
            diagnosis: "LLM currently unavailable.".to_string(),
            recommendation: "Please rely on metrics.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentAnalysis {
    pub rephrased: String,
    pub category: String,
    pub sentiment_score: f64,
    pub sentiment_label: SentimentLabel,
}

impl CommentAnalysis {
    pub fn fallback(original: &str) -> Self {
        Self {
            rephrased: original.to_string(),
            category: String::new(),
            sentiment_score: 5.0,
            sentiment_label: SentimentLabel::Neutral,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCommentAnalysis {
    #[serde(alias = "rephrased_comment")]
    rephrased: String,
    #[serde(alias = "categories")]
    category: String,
    sentiment_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeCount {
    pub name: String,
    pub count: usize,
}

/// Aggregate numbers only; nothing identifying individuals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightContext {
    pub date_range: String,
    pub department: Option<String>,
    pub avg_engagement: Option<f64>,
    pub engagement_trend: f64,
    pub critical_teams: Vec<String>,
    pub burnout_alerts: usize,
    pub attrition_risk: usize,
    pub top_themes: Vec<ThemeCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentContext {
    pub department: String,
    pub position: Option<String>,
    pub respondents: usize,
    pub engagement_rate: Option<f64>,
    pub stress_rate: Option<f64>,
    pub attrition_rate: Option<f64>,
    pub overall_risk: String,
    pub weakest_dimensions: Vec<(String, f64)>,
    pub top_themes: Vec<ThemeCount>,
}

#[derive(Clone)]
pub struct NarrativeService {
    generator: Arc<dyn TextGenerator>,
}

impl NarrativeService {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    async fn ask<T: DeserializeOwned>(&self, prompt: &str, fallback: T, purpose: &str) -> T {
        match self.generator.complete(prompt).await {
            Ok(raw) => {
                tracing::debug!(purpose, chars = raw.len(), "generator replied");
                parse_or_fallback(&raw, fallback)
            }
            Err(err) => {
                tracing::warn!(purpose, error = %err, "text generator unavailable, using fallback");
                fallback
            }
        }
    }

    pub async fn summarize(&self, context: &InsightContext) -> InsightSummary {
        let data = serde_json::to_string_pretty(context).unwrap_or_default();
        let prompt = format!(
            "You are an HR analytics assistant. Using only the aggregate metrics below, \
             write a short executive summary of workforce wellbeing.\n\
             Metrics:\n{data}\n\n\
             Respond with JSON only, shaped as \
             {{\"summary\": string, \"keyObservations\": [{{\"title\": string, \"insight\": string}}]}} \
             with at most three observations."
        );
        self.ask(&prompt, InsightSummary::fallback(), "summary").await
    }

    pub async fn diagnose(&self, context: &DepartmentContext) -> Diagnosis {
        let data = serde_json::to_string_pretty(context).unwrap_or_default();
        let prompt = format!(
            "You are an organisational psychologist. Diagnose the main wellbeing risk for the \
             team described by these aggregate metrics and recommend one concrete action.\n\
             Team metrics:\n{data}\n\n\
             Respond with JSON only: {{\"diagnosis\": string, \"recommendation\": string}}."
        );
        self.ask(&prompt, Diagnosis::fallback(), "diagnosis").await
    }

    pub async fn analyze_comment(&self, text: &str) -> CommentAnalysis {
        if text.trim().is_empty() {
            return CommentAnalysis::fallback(text);
        }
        let prompt = format!(
            "Rephrase the employee comment below in neutral professional English, assign exactly \
             one category (for example \"Workload & Capacity\", \"Leadership Trust\", \
             \"Career Development\", \"Team Collaboration\", \"Work-Life Balance\") and a \
             sentiment score from 1 (very negative) to 10 (very positive).\n\
             Comment: {text}\n\n\
             Respond with JSON only: \
             {{\"rephrased_comment\": string, \"categories\": string, \"sentiment_score\": number}}."
        );
        let raw = match self.generator.complete(&prompt).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, "comment analysis unavailable, keeping original text");
                return CommentAnalysis::fallback(text);
            }
        };
        match repair_json(&raw).and_then(|v| serde_json::from_value::<RawCommentAnalysis>(v).ok()) {
            Some(parsed) if parsed.sentiment_score.is_finite() => {
                let score = parsed.sentiment_score.clamp(1.0, 10.0);
                CommentAnalysis {
                    rephrased: parsed.rephrased,
                    category: parsed.category.trim().to_string(),
                    sentiment_score: score,
                    sentiment_label: SentimentLabel::from_score(score),
                }
            }
            _ => CommentAnalysis::fallback(text),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedGenerator;
    use super::*;

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"summary\": \"ok\"}\n```"), "{\"summary\": \"ok\"}");
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn braces_are_located() {
        assert_eq!(extract_braces("Sure! {\"a\": {\"b\": 1}} hope this helps"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_braces("no object here"), None);
        assert_eq!(extract_braces("} backwards {"), None);
    }

    #[test]
    fn control_chars_quotes_and_commas_are_cleaned() {
        assert_eq!(strip_control_chars("{\"a\":\n\t1}"), "{\"a\":1}");
        assert_eq!(normalize_quotes("\u{201C}a\u{201D}: \u{2018}b\u{2019}"), "\"a\": 'b'");
        assert_eq!(drop_trailing_commas("{\"a\": [1, 2, ], }"), "{\"a\": [1, 2]}");
    }

    #[test]
    fn repair_handles_fenced_json() {
        let value = repair_json("```json\n{\"summary\": \"ok\"}\n```").unwrap();
        assert_eq!(value, json!({ "summary": "ok" }));
    }

    #[test]
    fn repair_handles_smart_quotes_and_trailing_commas() {
        let raw = "Here you go: {\u{201C}summary\u{201D}: \u{201C}fine\u{201D}, \u{201C}keyObservations\u{201D}: [],}";
        let parsed: InsightSummary = parse_or_fallback(raw, InsightSummary::fallback());
        assert_eq!(parsed.summary, "fine");
    }

    #[test]
    fn garbage_falls_back_without_error() {
        assert_eq!(repair_json("not json at all"), None);
        let parsed = parse_or_fallback("not json at all", InsightSummary::fallback());
        assert_eq!(parsed, InsightSummary::fallback());
        let wrong_shape = parse_or_fallback("{\"diagnosis\": 3}", Diagnosis::fallback());
        assert_eq!(wrong_shape, Diagnosis::fallback());
    }

    #[tokio::test]
    async fn disabled_generator_yields_fallbacks() {
        let service = NarrativeService::new(Arc::new(DisabledGenerator));
        let context = DepartmentContext {
            department: "Sales".to_string(),
            position: None,
            respondents: 3,
            engagement_rate: Some(50.0),
            stress_rate: Some(60.0),
            attrition_rate: None,
            overall_risk: "critical".to_string(),
            weakest_dimensions: vec![],
            top_themes: vec![],
        };
        assert_eq!(service.diagnose(&context).await, Diagnosis::fallback());
        assert_eq!(service.analyze_comment("too many meetings").await, CommentAnalysis::fallback("too many meetings"));
    }

    #[tokio::test]
    async fn comment_analysis_parses_and_labels() {
        let generator = Arc::new(ScriptedGenerator::new([
            "```json\n{\"rephrased_comment\": \"Workload is high.\", \"categories\": \"Workload & Capacity\", \"sentiment_score\": 3}\n```",
        ]));
        let service = NarrativeService::new(generator.clone());
        let analysis = service.analyze_comment("kerja banyak sangat").await;
        assert_eq!(analysis.rephrased, "Workload is high.");
        assert_eq!(analysis.category, "Workload & Capacity");
        assert_eq!(analysis.sentiment_label, SentimentLabel::Negative);
        assert!(generator.prompts.lock().unwrap()[0].contains("kerja banyak sangat"));
    }

    #[tokio::test]
    async fn summary_prompt_carries_only_aggregates() {
        let generator = Arc::new(ScriptedGenerator::new(["{\"summary\": \"Stable quarter.\", \"keyObservations\": [{\"title\": \"Sales\", \"insight\": \"Stress rising\"}]}"]));
        let service = NarrativeService::new(generator.clone());
        let context = InsightContext {
            date_range: "month".to_string(),
            department: None,
            avg_engagement: Some(71.2),
            engagement_trend: -3.5,
            critical_teams: vec!["Sales".to_string()],
            burnout_alerts: 2,
            attrition_risk: 1,
            top_themes: vec![ThemeCount {
                name: "Workload & Capacity".to_string(),
                count: 4,
            }],
        };
        let summary = service.summarize(&context).await;
        assert_eq!(summary.key_observations.len(), 1);
        let prompt = generator.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("71.2"));
        assert!(prompt.contains("Workload & Capacity"));
    }
}
