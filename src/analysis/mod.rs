/// Series preparation and analytics for the query service.
///
/// This module turns raw warehouse rows into model-ready series and derives
/// the summary and weekly analytics served by the API.
///
/// Submodules:
/// - `preprocess`: cleaning, daily deltas, and per-country summaries.
/// - `peaks`: weekly new-case totals and the peak-week ranking.

pub mod peaks;
pub mod preprocess;
