use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{Employee, Feedback, SentimentLabel};
use crate::narrative::{NarrativeService, ThemeCount};
use crate::records;
use crate::scoring::round_to;
use crate::store::KeyValueStore;
use crate::temporal::DateRange;

const TREND_BAND_PCT: f64 = 2.0;

#[derive(Debug, Clone, Deserialize)]
pub struct NewFeedback {
    #[serde(default)]
    pub employee_id: Option<String>,
    pub comments: String,
    #[serde(default)]
    pub submission_date: Option<String>,
}

/// Analyses the comment and stores it. Analysis never fails; the store write can.
pub async fn record_feedback(
    store: &dyn KeyValueStore,
    narrative: &NarrativeService,
    input: NewFeedback,
    today: NaiveDate,
) -> StoreResult<Feedback> {
    let analysis = narrative.analyze_comment(&input.comments).await;
    let feedback = Feedback {
        comment_id: Uuid::new_v4().to_string(),
        employee_id: input.employee_id,
        rephrased_comment: analysis.rephrased,
        category: analysis.category,
        sentiment_score: analysis.sentiment_score,
        sentiment_label: analysis.sentiment_label,
        submission_date: input
            .submission_date
            .unwrap_or_else(|| today.format("%Y-%m-%d").to_string()),
        comments: input.comments,
    };
    records::save(store, &feedback).await?;
    tracing::info!(
        comment_id = %feedback.comment_id,
        category = %feedback.category,
        sentiment = feedback.sentiment_label.as_str(),
        "feedback recorded"
    );
    Ok(feedback)
}

fn division_index(employees: &[Employee]) -> HashMap<&str, &str> {
    employees
        .iter()
        .filter_map(|e| Some((e.employee_id.as_str(), e.division.as_deref()?)))
        .collect()
}

fn in_range(feedback: &Feedback, range: DateRange, today: NaiveDate) -> bool {
    match feedback.submitted_on() {
        Some(date) => range.contains(date, today),
        None => range == DateRange::All,
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackQuery {
    pub range: DateRange,
    pub sentiment: Option<SentimentLabel>,
    pub theme: Option<String>,
    pub department: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSample {
    pub id: String,
    pub employee_id: Option<String>,
    pub department: Option<String>,
    pub comment: String,
    pub original: String,
    pub theme: String,
    pub sentiment: SentimentLabel,
    pub sentiment_score: f64,
    pub date: String,
}

/// Newest first.
pub fn feedback_samples(
    feedbacks: &[Feedback],
    employees: &[Employee],
    query: &FeedbackQuery,
    today: NaiveDate,
) -> Vec<FeedbackSample> {
    let divisions = division_index(employees);
    let mut matching: Vec<(&Feedback, Option<&str>)> = feedbacks
        .iter()
        .filter(|f| in_range(f, query.range, today))
        .filter(|f| query.sentiment.map_or(true, |s| f.sentiment_label == s))
        .filter(|f| {
            query
                .theme
                .as_deref()
                .map_or(true, |t| f.category.eq_ignore_ascii_case(t))
        })
        .map(|f| {
            let department = f
                .employee_id
                .as_deref()
                .and_then(|id| divisions.get(id).copied());
            (f, department)
        })
        .filter(|(_, department)| match query.department.as_deref() {
            Some(want) => department.is_some_and(|d| d.eq_ignore_ascii_case(want)),
            None => true,
        })
        .collect();

    matching.sort_by(|(a, _), (b, _)| b.submitted_on().cmp(&a.submitted_on()));
    matching
        .into_iter()
        .take(query.limit)
        .map(|(f, department)| FeedbackSample {
            id: f.comment_id.clone(),
            employee_id: f.employee_id.clone(),
            department: department.map(str::to_string),
            comment: if f.rephrased_comment.is_empty() {
                f.comments.clone()
            } else {
                f.rephrased_comment.clone()
            },
            original: f.comments.clone(),
            theme: f.category.clone(),
            sentiment: f.sentiment_label,
            sentiment_score: f.sentiment_score,
            date: f.submission_date.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSummary {
    pub total_mentions: usize,
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
    pub themes: usize,
}

pub fn feedback_summary(feedbacks: &[Feedback], range: DateRange, today: NaiveDate) -> FeedbackSummary {
    let window: Vec<&Feedback> = feedbacks.iter().filter(|f| in_range(f, range, today)).collect();
    let count = |label: SentimentLabel| window.iter().filter(|f| f.sentiment_label == label).count();
    let mut themes: Vec<&str> = window
        .iter()
        .map(|f| f.category.as_str())
        .filter(|c| !c.is_empty())
        .collect();
    themes.sort_unstable();
    themes.dedup();

    FeedbackSummary {
        total_mentions: window.len(),
        positive: count(SentimentLabel::Positive),
        negative: count(SentimentLabel::Negative),
        neutral: count(SentimentLabel::Neutral),
        themes: themes.len(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeInsight {
    pub theme: String,
    pub frequency: usize,
    pub sentiment: SentimentLabel,
    pub trend: Trend,
    pub change_pct: Option<f64>,
    pub impact: f64,
    pub last_detected: Option<String>,
}

/// Most frequent label; ties go to the more negative one.
fn dominant_sentiment(labels: &[SentimentLabel]) -> SentimentLabel {
    let mut best = (SentimentLabel::Neutral, 0);
    for label in [SentimentLabel::Negative, SentimentLabel::Neutral, SentimentLabel::Positive] {
        let count = labels.iter().filter(|l| **l == label).count();
        if count > best.1 {
            best = (label, count);
        }
    }
    best.0
}

pub fn classify_trend(current: usize, previous: usize) -> (Trend, Option<f64>) {
    if previous == 0 {
        return (Trend::Up, None);
    }
    let change = (current as f64 - previous as f64) / previous as f64 * 100.0;
    let trend = if change > TREND_BAND_PCT {
        Trend::Up
    } else if change < -TREND_BAND_PCT {
        Trend::Down
    } else {
        Trend::Stable
    };
    (trend, Some(round_to(change, 1)))
}

/// Per-category frequency in the window, sorted by frequency.
pub fn theme_analysis(feedbacks: &[Feedback], range: DateRange, today: NaiveDate) -> Vec<ThemeInsight> {
    let mut current: BTreeMap<&str, Vec<&Feedback>> = BTreeMap::new();
    let mut previous: HashMap<&str, usize> = HashMap::new();
    for feedback in feedbacks.iter().filter(|f| !f.category.is_empty()) {
        if in_range(feedback, range, today) {
            current.entry(feedback.category.as_str()).or_default().push(feedback);
        } else if feedback
            .submitted_on()
            .is_some_and(|d| range.contains_previous(d, today))
        {
            *previous.entry(feedback.category.as_str()).or_insert(0) += 1;
        }
    }

    let total: usize = current.values().map(Vec::len).sum();
    let mut insights: Vec<ThemeInsight> = current
        .into_iter()
        .map(|(theme, items)| {
            let labels: Vec<SentimentLabel> = items.iter().map(|f| f.sentiment_label).collect();
            let (trend, change_pct) = classify_trend(items.len(), previous.get(theme).copied().unwrap_or(0));
            ThemeInsight {
                theme: theme.to_string(),
                frequency: items.len(),
                sentiment: dominant_sentiment(&labels),
                trend,
                change_pct,
                impact: round_to(items.len() as f64 / total as f64 * 100.0, 1),
                last_detected: items
                    .iter()
                    .filter_map(|f| f.submitted_on())
                    .max()
                    .map(|d| d.format("%Y-%m-%d").to_string()),
            }
        })
        .collect();
    insights.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.theme.cmp(&b.theme)));
    insights
}

pub fn top_themes(feedbacks: &[&Feedback], limit: usize) -> Vec<ThemeCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for feedback in feedbacks.iter().filter(|f| !f.category.is_empty()) {
        *counts.entry(feedback.category.as_str()).or_insert(0) += 1;
    }
    let mut themes: Vec<ThemeCount> = counts
        .into_iter()
        .map(|(name, count)| ThemeCount {
            name: name.to_string(),
            count,
        })
        .collect();
    themes.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    themes.truncate(limit);
    themes
}
