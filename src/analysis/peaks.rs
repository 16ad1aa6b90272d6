//! Peak-week analytics.
//!
//! Weeks start on Monday. Weekly totals are sums of the daily new-case
//! deltas from `preprocess::daily_series`, so a country's first reported day
//! contributes 0.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate};

use super::preprocess::{clean, daily_series};
use crate::model::{CaseType, DailyPoint, PeakWeek, RawObservation};

/// Number of countries returned by the ranking.
pub const PEAK_WEEKS_LIMIT: usize = 20;

/// The Monday on or before `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = date.weekday().num_days_from_monday() as u64;
    date.checked_sub_days(Days::new(offset)).unwrap_or(date)
}

/// New-case totals per week, ascending by week start.
pub fn weekly_totals(daily: &[DailyPoint]) -> Vec<(NaiveDate, u64)> {
    let mut weeks: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for d in daily {
        *weeks.entry(week_start(d.date)).or_insert(0) += d.new_cases;
    }
    weeks.into_iter().collect()
}

/// The highest week; ties go to the earliest week.
pub fn peak_week(daily: &[DailyPoint]) -> Option<(NaiveDate, u64)> {
    weekly_totals(daily)
        .into_iter()
        .fold(None, |best, (week, total)| match best {
            Some((_, best_total)) if best_total >= total => best,
            _ => Some((week, total)),
        })
}

/// Ranks countries by their single highest week of new confirmed cases.
///
/// Only country-level confirmed rows are used (province rows would double
/// count). Countries with no usable rows are left out. Ties between
/// countries are ordered by name so the ranking is stable.
pub fn peak_weeks(records: &[RawObservation], limit: usize) -> Vec<PeakWeek> {
    let mut by_country: BTreeMap<&str, Vec<RawObservation>> = BTreeMap::new();
    for r in records
        .iter()
        .filter(|r| r.case_type == CaseType::Confirmed && r.province.is_none())
    {
        by_country.entry(r.country.as_str()).or_default().push(r.clone());
    }

    let mut ranked: Vec<PeakWeek> = by_country
        .into_iter()
        .filter_map(|(country, rows)| {
            let series = clean(&rows, CaseType::Confirmed, 1).ok()?;
            let (week_start, peak_weekly_cases) = peak_week(&daily_series(&series))?;
            Some(PeakWeek {
                country: country.to_string(),
                week_start,
                peak_weekly_cases,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.peak_weekly_cases
            .cmp(&a.peak_weekly_cases)
            .then_with(|| a.country.cmp(&b.country))
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn daily(start: NaiveDate, values: &[u64]) -> Vec<DailyPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| DailyPoint {
                date: start.checked_add_days(Days::new(i as u64)).unwrap(),
                new_cases: *v,
            })
            .collect()
    }

    /// Cumulative rows built from weekly new-case totals, one row per day,
    /// with the whole week's increase landing on its Wednesday.
    fn country_rows(country: &str, weekly_new: &[u64]) -> Vec<RawObservation> {
        let monday = date(2020, 3, 2);
        let mut total = 0i64;
        let mut rows = Vec::new();
        for (w, new) in weekly_new.iter().enumerate() {
            for d in 0..7u64 {
                if d == 2 {
                    total += *new as i64;
                }
                rows.push(RawObservation {
                    country: country.to_string(),
                    province: None,
                    date: monday.checked_add_days(Days::new(w as u64 * 7 + d)).unwrap(),
                    case_type: CaseType::Confirmed,
                    cumulative_count: Some(total),
                });
            }
        }
        rows
    }

    #[test]
    fn test_week_start_is_monday() {
        assert_eq!(week_start(date(2020, 3, 2)), date(2020, 3, 2)); // Monday
        assert_eq!(week_start(date(2020, 3, 8)), date(2020, 3, 2)); // Sunday
        assert_eq!(week_start(date(2020, 3, 4)), date(2020, 3, 2));
    }

    #[test]
    fn test_weekly_totals_sum_by_week() {
        // Thursday 2020-03-05 through Wednesday 2020-03-11 spans two weeks.
        let points = daily(date(2020, 3, 5), &[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(
            weekly_totals(&points),
            vec![(date(2020, 3, 2), 10), (date(2020, 3, 9), 18)]
        );
    }

    #[test]
    fn test_peak_week_ties_break_to_earliest() {
        let points = daily(date(2020, 3, 2), &[5, 0, 0, 0, 0, 0, 0, 5]);
        assert_eq!(peak_week(&points), Some((date(2020, 3, 2), 5)));
        assert_eq!(peak_week(&[]), None);
    }

    #[test]
    fn test_peak_weeks_orders_countries_descending() {
        let mut records = country_rows("B", &[100, 500, 200]);
        records.extend(country_rows("A", &[300, 1000, 50]));

        let ranked = peak_weeks(&records, PEAK_WEEKS_LIMIT);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].country, "A");
        assert_eq!(ranked[0].peak_weekly_cases, 1000);
        assert_eq!(ranked[0].week_start, date(2020, 3, 9));
        assert_eq!(ranked[1].country, "B");
        assert_eq!(ranked[1].peak_weekly_cases, 500);
    }

    #[test]
    fn test_peak_weeks_ignores_province_and_death_rows() {
        let mut records = country_rows("A", &[10, 20]);
        let mut province = country_rows("A", &[9999]);
        for r in &mut province {
            r.province = Some("North".to_string());
        }
        records.extend(province);
        let mut deaths = country_rows("A", &[5000]);
        for r in &mut deaths {
            r.case_type = CaseType::Deaths;
        }
        records.extend(deaths);

        let ranked = peak_weeks(&records, PEAK_WEEKS_LIMIT);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].peak_weekly_cases, 20);
    }

    #[test]
    fn test_peak_weeks_truncates_to_limit() {
        let mut records = Vec::new();
        for i in 0..25u64 {
            records.extend(country_rows(&format!("C{:02}", i), &[i * 10, i * 10 + 1]));
        }
        let ranked = peak_weeks(&records, PEAK_WEEKS_LIMIT);
        assert_eq!(ranked.len(), 20);
        assert_eq!(ranked[0].country, "C24");
        assert!(ranked.windows(2).all(|w| w[0].peak_weekly_cases >= w[1].peak_weekly_cases));
    }
}
