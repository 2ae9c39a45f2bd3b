use std::path::Path;

use anyhow::Context;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Deserialize;

use crate::models::{Quarter, SurveyResponse};

const SEASON_WINDOW_DAYS: i64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Holiday {
    pub date: NaiveDate,
    pub name: String,
}

/// Fixed federal holidays plus configured movable festivals.
#[derive(Debug, Clone, Default)]
pub struct HolidayCalendar {
    movable: Vec<Holiday>,
}

impl HolidayCalendar {
    pub fn new(movable: Vec<Holiday>) -> Self {
        Self { movable }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read holidays file {}", path.display()))?;
        let movable: Vec<Holiday> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse holidays file {}", path.display()))?;
        Ok(Self::new(movable))
    }

    pub fn holidays_in(&self, year: i32) -> Vec<Holiday> {
        let mut holidays = fixed_holidays(year);
        holidays.extend(self.movable.iter().filter(|h| h.date.year() == year).cloned());
        holidays.sort_by_key(|h| h.date);
        holidays
    }
}

fn fixed_holidays(year: i32) -> Vec<Holiday> {
    let fixed = [
        (1, 1, "New Year's Day"),
        (5, 1, "Labour Day"),
        (8, 31, "National Day"),
        (9, 16, "Malaysia Day"),
        (12, 25, "Christmas Day"),
    ];
    let mut holidays: Vec<Holiday> = fixed
        .iter()
        .filter_map(|(month, day, name)| {
            NaiveDate::from_ymd_opt(year, *month, *day).map(|date| Holiday {
                date,
                name: name.to_string(),
            })
        })
        .collect();
    if let Some(date) = NaiveDate::from_weekday_of_month_opt(year, 6, Weekday::Mon, 1) {
        holidays.push(Holiday {
            date,
            name: "Agong's Birthday".to_string(),
        });
    }
    holidays
}

/// Accepts `YYYY-MM-DD`, optionally followed by a `T` or space separated time.
pub fn parse_submission_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let (date_part, rest) = if raw.len() >= 10 && raw.is_char_boundary(10) {
        raw.split_at(10)
    } else {
        (raw, "")
    };
    if !(rest.is_empty() || rest.starts_with('T') || rest.starts_with(' ')) {
        return None;
    }
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

pub fn classify_season(date: NaiveDate, calendar: &HolidayCalendar) -> String {
    let labels: Vec<String> = calendar
        .holidays_in(date.year())
        .into_iter()
        .filter_map(|holiday| {
            let days_diff = (date - holiday.date).num_days();
            match days_diff {
                0 => Some(format!("festival: {}", holiday.name)),
                d if (-SEASON_WINDOW_DAYS..=-1).contains(&d) => {
                    Some(format!("pre-festival: {}", holiday.name))
                }
                d if (1..=SEASON_WINDOW_DAYS).contains(&d) => {
                    Some(format!("post-festival: {}", holiday.name))
                }
                _ => None,
            }
        })
        .collect();

    if labels.is_empty() {
        "normal day".to_string()
    } else {
        labels.join(", ")
    }
}

pub fn month_name(date: NaiveDate) -> String {
    date.format("%B").to_string()
}

/// Fills year/month/quarter/season; an unparseable date clears all four.
pub fn enrich(response: &mut SurveyResponse, calendar: &HolidayCalendar) {
    match response.submitted_on() {
        Some(date) => {
            response.year = Some(date.year());
            response.month = Some(month_name(date));
            response.quarter = Quarter::from_month(date.month());
            response.event_season = Some(classify_season(date, calendar));
        }
        None => {
            response.year = None;
            response.month = None;
            response.quarter = None;
            response.event_season = None;
        }
    }
}

/// Rolling look-back window ending today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateRange {
    Week,
    #[default]
    Month,
    Quarter,
    Year,
    All,
}

impl DateRange {
    pub fn days(self) -> Option<i64> {
        match self {
            DateRange::Week => Some(7),
            DateRange::Month => Some(30),
            DateRange::Quarter => Some(90),
            DateRange::Year => Some(365),
            DateRange::All => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DateRange::Week => "week",
            DateRange::Month => "month",
            DateRange::Quarter => "quarter",
            DateRange::Year => "year",
            DateRange::All => "all",
        }
    }

    pub fn contains(self, date: NaiveDate, today: NaiveDate) -> bool {
        match self.days() {
            Some(days) => date <= today && date >= today - Duration::days(days),
            None => true,
        }
    }

    /// The equally long window just before this one; empty for `All`.
    pub fn contains_previous(self, date: NaiveDate, today: NaiveDate) -> bool {
        match self.days() {
            Some(days) => {
                let start = today - Duration::days(days);
                date < start && date >= start - Duration::days(days)
            }
            None => false,
        }
    }
}

impl std::str::FromStr for DateRange {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "week" => Ok(DateRange::Week),
            "month" => Ok(DateRange::Month),
            "quarter" => Ok(DateRange::Quarter),
            "year" => Ok(DateRange::Year),
            "all" => Ok(DateRange::All),
            other => Err(format!(
                "invalid dateRange '{other}', expected week, month, quarter, year or all"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_dates_with_optional_time() {
        assert_eq!(parse_submission_date("2024-03-15"), Some(date(2024, 3, 15)));
        assert_eq!(parse_submission_date("2024-03-15T08:30:00"), Some(date(2024, 3, 15)));
        assert_eq!(parse_submission_date("2024-03-15 08:30"), Some(date(2024, 3, 15)));
        assert_eq!(parse_submission_date("15/03/2024"), None);
        assert_eq!(parse_submission_date("2024-03-15x"), None);
        assert_eq!(parse_submission_date(""), None);
    }

    #[test]
    fn seasons_cover_windows_around_holidays() {
        let calendar = HolidayCalendar::default();
        assert_eq!(classify_season(date(2024, 8, 31), &calendar), "festival: National Day");
        assert_eq!(classify_season(date(2024, 8, 16), &calendar), "pre-festival: National Day");
        assert_eq!(classify_season(date(2024, 8, 15), &calendar), "normal day");
        assert_eq!(
            classify_season(date(2024, 9, 10), &calendar),
            "post-festival: National Day, pre-festival: Malaysia Day"
        );
        assert_eq!(classify_season(date(2024, 3, 15), &calendar), "normal day");
    }

    #[test]
    fn movable_festivals_apply_in_their_year() {
        let calendar = HolidayCalendar::new(vec![Holiday {
            date: date(2024, 2, 10),
            name: "Chinese New Year".to_string(),
        }]);
        assert_eq!(
            classify_season(date(2024, 2, 12), &calendar),
            "post-festival: Chinese New Year"
        );
        assert_eq!(classify_season(date(2025, 2, 12), &calendar), "normal day");
    }

    #[test]
    fn agong_birthday_is_first_monday_of_june() {
        let holidays = HolidayCalendar::default().holidays_in(2024);
        assert!(holidays
            .iter()
            .any(|h| h.name == "Agong's Birthday" && h.date == date(2024, 6, 3)));
    }

    #[test]
    fn enrich_sets_and_clears_fields() {
        let calendar = HolidayCalendar::default();
        let mut response = SurveyResponse {
            submission_date: Some("2024-03-15".to_string()),
            ..SurveyResponse::default()
        };
        enrich(&mut response, &calendar);
        assert_eq!(response.year, Some(2024));
        assert_eq!(response.month.as_deref(), Some("March"));
        assert_eq!(response.quarter, Some(Quarter::Q1));
        assert_eq!(response.event_season.as_deref(), Some("normal day"));

        response.submission_date = Some("not a date".to_string());
        enrich(&mut response, &calendar);
        assert_eq!(response.year, None);
        assert_eq!(response.quarter, None);
        assert_eq!(response.event_season, None);
    }

    #[test]
    fn date_ranges_split_current_and_previous_windows() {
        let today = date(2024, 6, 30);
        assert!(DateRange::Month.contains(date(2024, 6, 1), today));
        assert!(!DateRange::Month.contains(date(2024, 5, 30), today));
        assert!(DateRange::Month.contains_previous(date(2024, 5, 30), today));
        assert!(!DateRange::Month.contains_previous(date(2024, 6, 5), today));
        assert!(DateRange::All.contains(date(1999, 1, 1), today));
        assert!(!DateRange::All.contains_previous(date(1999, 1, 1), today));
        assert!("fortnight".parse::<DateRange>().is_err());
        assert_eq!("Quarter".parse::<DateRange>(), Ok(DateRange::Quarter));
    }
}
