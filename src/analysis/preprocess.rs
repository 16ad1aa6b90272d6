//! Raw records → clean cumulative series.
//!
//! All functions here are pure: no I/O, no logging, no clock.
//!
//! Gap policy: a missing date takes the previous date's cumulative value
//! (forward fill). Forward fill never breaks monotonicity, and it records
//! "no new cases reported" rather than inventing a ramp.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};

use crate::model::{CaseType, CleanedSeries, DailyPoint, PreprocessError, RawObservation, Summary};

/// Fewest distinct dates the weekly-seasonal model will accept.
pub const MIN_HISTORY_DAYS: usize = 30;

/// Cleans `records` into a gap-free, non-decreasing cumulative series for
/// one case type, requiring at least `min_points` distinct reported dates.
///
/// Steps:
///   1. keep rows of `case_type` with a present, non-negative count
///   2. collapse same-date rows to their maximum (guards double-counted rows)
///   3. forward-fill missing dates between the first and last date
///   4. carry the running maximum so late corrections never decrease the series
pub fn clean(
    records: &[RawObservation],
    case_type: CaseType,
    min_points: usize,
) -> Result<CleanedSeries, PreprocessError> {
    let mut by_date: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for r in records.iter().filter(|r| r.case_type == case_type) {
        let Some(count) = r.cumulative_count.filter(|c| *c >= 0) else {
            continue;
        };
        let slot = by_date.entry(r.date).or_insert(0);
        *slot = (*slot).max(count as u64);
    }

    if by_date.len() < min_points {
        return Err(PreprocessError::InsufficientData {
            required: min_points,
            found: by_date.len(),
        });
    }

    let country = records
        .iter()
        .find(|r| r.case_type == case_type)
        .map(|r| r.country.clone())
        .unwrap_or_default();

    let mut points: Vec<(NaiveDate, u64)> = Vec::with_capacity(by_date.len());
    for (&date, &count) in &by_date {
        if let Some(&(prev_date, prev_count)) = points.last() {
            let mut fill = prev_date;
            while let Some(next) = fill.checked_add_days(Days::new(1)) {
                if next >= date {
                    break;
                }
                points.push((next, prev_count));
                fill = next;
            }
            points.push((date, count.max(prev_count)));
        } else {
            points.push((date, count));
        }
    }

    Ok(CleanedSeries {
        country,
        case_type,
        points,
    })
}

/// Country-level rows for one country's fetch result.
///
/// Rows without a province are the country totals and win when present.
/// Countries reported only per province get their provinces summed per date
/// and case type; a missing province count contributes nothing.
pub fn country_level(records: &[RawObservation]) -> Vec<RawObservation> {
    if records.iter().any(|r| r.province.is_none()) {
        return records.iter().filter(|r| r.province.is_none()).cloned().collect();
    }

    let mut sums: BTreeMap<(NaiveDate, CaseType), Option<i64>> = BTreeMap::new();
    for r in records {
        let slot = sums.entry((r.date, r.case_type)).or_insert(None);
        if let Some(count) = r.cumulative_count.filter(|c| *c >= 0) {
            *slot = Some(slot.unwrap_or(0).saturating_add(count));
        }
    }

    let country = records.first().map(|r| r.country.clone()).unwrap_or_default();
    sums.into_iter()
        .map(|((date, case_type), cumulative_count)| RawObservation {
            country: country.clone(),
            province: None,
            date,
            case_type,
            cumulative_count,
        })
        .collect()
}

/// New cases per day. The first day has no prior value and is reported as 0.
pub fn daily_series(series: &CleanedSeries) -> Vec<DailyPoint> {
    let mut daily = Vec::with_capacity(series.len());
    let mut previous: Option<u64> = None;
    for &(date, count) in &series.points {
        let new_cases = previous.map_or(0, |p| count.saturating_sub(p));
        daily.push(DailyPoint { date, new_cases });
        previous = Some(count);
    }
    daily
}

/// Totals and mortality for a country's rows.
///
/// Totals are the maximum cumulative value seen per case type, which equals
/// the latest value for well-formed data and survives out-of-order rows.
/// Mortality is a percentage rounded to two decimals, 0 when there are no
/// cases, and capped at 100 when malformed data reports more deaths than cases.
pub fn summarize(records: &[RawObservation]) -> Summary {
    let max_for = |case_type: CaseType| -> u64 {
        records
            .iter()
            .filter(|r| r.case_type == case_type)
            .filter_map(|r| r.cumulative_count)
            .filter(|c| *c >= 0)
            .max()
            .unwrap_or(0) as u64
    };

    let total_cases = max_for(CaseType::Confirmed);
    let total_deaths = max_for(CaseType::Deaths);

    Summary {
        total_cases,
        total_deaths,
        mortality_rate: mortality_rate(total_cases, total_deaths),
    }
}

fn mortality_rate(total_cases: u64, total_deaths: u64) -> f64 {
    if total_cases == 0 {
        return 0.0;
    }
    let rate = total_deaths as f64 / total_cases as f64 * 100.0;
    (rate.min(100.0) * 100.0).round() / 100.0
}
