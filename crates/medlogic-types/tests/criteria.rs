//! Criteria Tests
//!
//! Tests for: date constraints, value filters, aggregations, structural equality,
//! and/or/not composition, the text form

use chrono::{DateTime, TimeZone, Utc};
use medlogic_diagnostics::LogicError;
use medlogic_types::{Aggregation, Duration, LogicCriteria, LogicResult, NULL_RESULT};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap()
}

/// Readings of 100, 200, 300 on March 1st, 10th and 20th
fn readings() -> LogicResult {
    LogicResult::from_results([
        LogicResult::numeric(100.0).with_result_date(day(1)),
        LogicResult::numeric(200.0).with_result_date(day(10)),
        LogicResult::numeric(300.0).with_result_date(day(20)),
    ])
}

fn apply(criteria: LogicCriteria) -> LogicResult {
    criteria.apply(&readings(), day(25)).unwrap()
}

#[rstest]
#[case(LogicCriteria::new("CD4").latest(), LogicResult::numeric(300.0))]
#[case(LogicCriteria::new("CD4").earliest(), LogicResult::numeric(100.0))]
#[case(LogicCriteria::new("CD4").count(), LogicResult::numeric(3.0))]
#[case(LogicCriteria::new("CD4").average(), LogicResult::numeric(200.0))]
#[case(LogicCriteria::new("CD4").exists(), LogicResult::boolean(true))]
#[case(LogicCriteria::new("CD4").gt(500.0).not_exists(), LogicResult::boolean(true))]
fn test_aggregations(#[case] criteria: LogicCriteria, #[case] expected: LogicResult) {
    assert_eq!(apply(criteria), expected);
}

#[test]
fn test_last_n_is_chronological() {
    let result = apply(LogicCriteria::new("CD4").last(2));
    assert_eq!(result.get(0), &LogicResult::numeric(200.0));
    assert_eq!(result.get(1), &LogicResult::numeric(300.0));

    let first = apply(LogicCriteria::new("CD4").first(5));
    assert_eq!(first.size(), 3);
}

#[test]
fn test_within_is_relative_to_index_date() {
    let result = apply(LogicCriteria::new("CD4").within(Duration::days(10.0)));
    assert_eq!(result, LogicResult::numeric(300.0));
}

#[test]
fn test_as_of_moves_index_date() {
    let result = apply(
        LogicCriteria::new("CD4")
            .as_of(day(12))
            .within(Duration::weeks(2.0)),
    );
    assert_eq!(result, LogicResult::from_results([LogicResult::numeric(100.0), LogicResult::numeric(200.0)]));
}

#[test]
fn test_before_and_after() {
    assert_eq!(
        apply(LogicCriteria::new("CD4").before(day(10))),
        LogicResult::numeric(100.0)
    );
    assert_eq!(
        apply(LogicCriteria::new("CD4").after(day(1)).count()),
        LogicResult::numeric(2.0)
    );
}

#[test]
fn test_value_filters() {
    assert_eq!(apply(LogicCriteria::new("CD4").gte(200.0).count()), LogicResult::numeric(2.0));
    assert_eq!(apply(LogicCriteria::new("CD4").lt(200.0)), LogicResult::numeric(100.0));
    assert_eq!(apply(LogicCriteria::new("CD4").equal_to(300.0)), LogicResult::numeric(300.0));
}

#[test]
fn test_max_min() {
    assert_eq!(
        apply(LogicCriteria::new("CD4").with_aggregation(Aggregation::Max)),
        LogicResult::numeric(300.0)
    );
    assert_eq!(
        apply(LogicCriteria::new("CD4").with_aggregation(Aggregation::Min)),
        LogicResult::numeric(100.0)
    );
}

#[test]
fn test_average_of_nothing_is_null() {
    let result = apply(LogicCriteria::new("CD4").gt(1000.0).average());
    assert_eq!(result, NULL_RESULT);
}

#[test]
fn test_average_propagates_format_error() {
    let texts = LogicResult::from_results([LogicResult::text("1"), LogicResult::text("x")]);
    assert!(LogicCriteria::new("NOTE").average().apply(&texts, day(1)).is_err());
}

#[test]
fn test_criteria_equality_is_structural() {
    let a = LogicCriteria::new("CD4").last(1).within(Duration::months(6.0));
    let b = LogicCriteria::new("CD4").last(1).within(Duration::months(6.0));
    assert_eq!(a, b);
    assert_ne!(a, LogicCriteria::new("CD4").last(2).within(Duration::months(6.0)));
}

#[test]
fn test_huge_within_window_keeps_everything() {
    let result = apply(LogicCriteria::new("CD4").within(Duration::years(300_000.0)));
    assert_eq!(result.size(), 3);

    let result = apply(LogicCriteria::new("CD4").within(Duration::years(f64::MAX)).count());
    assert_eq!(result, LogicResult::numeric(3.0));
}

// ============================================================================
// Composition
// ============================================================================

#[test]
fn test_or_keeps_readings_matching_either_side() {
    let outliers = LogicCriteria::new("CD4")
        .lt(150.0)
        .or(LogicCriteria::new("CD4").gt(250.0));
    assert_eq!(apply(outliers.clone()), LogicResult::from_results([
        LogicResult::numeric(100.0),
        LogicResult::numeric(300.0),
    ]));
    assert_eq!(apply(outliers.count()), LogicResult::numeric(2.0));
}

#[test]
fn test_and_narrows_to_both_sides() {
    let middle = LogicCriteria::new("CD4")
        .gt(150.0)
        .and(LogicCriteria::new("CD4").before(day(15)));
    assert_eq!(apply(middle), LogicResult::numeric(200.0));
}

#[test]
fn test_not_inverts_restrictions_so_far() {
    let not_high = !LogicCriteria::new("CD4").gt(150.0);
    assert_eq!(apply(not_high), LogicResult::numeric(100.0));

    // Restrictions added after the negation are not negated
    let recent_not_high = (!LogicCriteria::new("CD4").gt(250.0)).after(day(5));
    assert_eq!(apply(recent_not_high), LogicResult::numeric(200.0));

    assert_eq!(apply(!LogicCriteria::new("CD4")), NULL_RESULT);
}

#[test]
fn test_or_with_unrestricted_side_matches_everything() {
    let everything = LogicCriteria::new("CD4").gt(250.0).or(LogicCriteria::new("CD4"));
    assert_eq!(apply(everything.count()), LogicResult::numeric(3.0));
}

// ============================================================================
// Text Form
// ============================================================================

#[rstest]
#[case("CD4 COUNT", LogicCriteria::new("CD4 COUNT"))]
#[case("  CD4 COUNT  ", LogicCriteria::new("CD4 COUNT"))]
#[case("LAST 2 CD4 COUNT WITHIN 6 months > 200", LogicCriteria::new("CD4 COUNT").last(2).within(Duration::months(6.0)).gt(200.0))]
#[case("last {CD4 COUNT} > 200", LogicCriteria::new("CD4 COUNT").latest().gt(200.0))]
#[case("COUNT WEIGHT (KG) AFTER 2024-03-01", LogicCriteria::new("WEIGHT (KG)").count().after(day(1) - chrono::TimeDelta::hours(12)))]
#[case("COUNT {COUNT}", LogicCriteria::new("COUNT").count())]
#[case("COUNT", LogicCriteria::new("COUNT"))]
#[case("CD4 AS OF 2024-03-12T12:00:00Z", LogicCriteria::new("CD4").as_of(day(12)))]
#[case("CD4 < 150 OR > 250", LogicCriteria::new("CD4").lt(150.0).or(LogicCriteria::new("CD4").gt(250.0)))]
#[case("CD4 > 150 AND BEFORE 2024-03-15", LogicCriteria::new("CD4").gt(150.0).before(Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()))]
#[case("CD4 NOT (> 150 OR < 50)", !LogicCriteria::new("CD4").gt(150.0).or(LogicCriteria::new("CD4").lt(50.0)))]
#[case("PROBLEM ADDED CONTAINS concept:1169", LogicCriteria::new("PROBLEM ADDED").contains(1169))]
#[case("NOTE = 'patient''s own words'", LogicCriteria::new("NOTE").equal_to("patient's own words"))]
#[case("SCORE = 3", LogicCriteria::new("SCORE").equal_to(3i64))]
#[case("SCORE = 3.0", LogicCriteria::new("SCORE").equal_to(3.0))]
#[case("%%person.gender = 'F'", LogicCriteria::new("%%person.gender").equal_to("F"))]
fn test_parse(#[case] query: &str, #[case] expected: LogicCriteria) {
    assert_eq!(query.parse::<LogicCriteria>().unwrap(), expected);
}

#[rstest]
#[case(LogicCriteria::new("CD4 COUNT").last(2).within(Duration::months(6.0)).gt(200.0))]
#[case(LogicCriteria::new("CD4").lt(150.0).or(LogicCriteria::new("CD4").gt(250.0)).within(Duration::weeks(2.0)))]
#[case(!LogicCriteria::new("CD4").as_of(day(12)).equal_to(2.5).not_exists())]
#[case(LogicCriteria::new("taken as needed").distinct())]
#[case(LogicCriteria::new("VISIT").equal_to(day(3)))]
fn test_display_reads_back(#[case] criteria: LogicCriteria) {
    let text = criteria.to_string();
    assert_eq!(text.parse::<LogicCriteria>().unwrap(), criteria, "{text}");
}

#[rstest]
#[case("")]
#[case("CD4 >")]
#[case("CD4 WITHIN 6 fortnights")]
#[case("CD4 BEFORE yesterday")]
#[case("CD4 > 1 OR")]
#[case("{CD4")]
fn test_parse_errors(#[case] query: &str) {
    let err = query.parse::<LogicCriteria>().unwrap_err();
    assert!(matches!(err, LogicError::Format { .. }), "{err:?}");
}

#[test]
fn test_lenient_parse_falls_back_to_token() {
    assert_eq!(LogicCriteria::parse("CD4 >"), LogicCriteria::new("CD4 >"));
    assert_eq!(LogicCriteria::parse("LATEST CD4"), LogicCriteria::new("CD4").latest());
}
