//! Scoring aggregator behaviour over the 17-item rubric.

use std::collections::BTreeMap;

use repograde_core::{
    adjust_score_by_confidence, apply_confidence_adjustment_to_scores,
    calculate_exclusion_normalized_score, is_information_absent, score_evaluation, Confidence,
    ItemScore, ItemStatus, TOTAL_RUBRIC_ITEMS,
};

fn rubric(evaluated: usize, max_score: f64) -> BTreeMap<String, ItemScore> {
    (0..TOTAL_RUBRIC_ITEMS)
        .map(|i| {
            let id = format!("item-{i:02}");
            let status = if i < evaluated {
                ItemStatus::Evaluated
            } else {
                ItemStatus::Excluded
            };
            let item = ItemScore::new(&id, max_score, max_score, "agent", "technique")
                .with_status(status);
            (id, item)
        })
        .collect()
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn test_all_items_at_max_score_full_marks_and_coverage() {
    let summary = calculate_exclusion_normalized_score(&rubric(17, 6.0));
    assert!(approx(summary.normalized_score, 100.0));
    assert!(approx(summary.coverage_rate, 1.0));
    assert_eq!(summary.evaluated_count(), 17);
    assert!(summary.excluded_items.is_empty());
    assert!(summary.coverage_summary.contains("17/17"));
}

#[test]
fn test_exclusions_do_not_lower_normalized_score() {
    let summary = calculate_exclusion_normalized_score(&rubric(10, 5.0));
    assert!(approx(summary.raw_score, 50.0));
    assert!(approx(summary.max_possible, 50.0));
    assert!(approx(summary.normalized_score, 100.0));
    assert!(approx(summary.coverage_rate, 10.0 / 17.0));
    assert_eq!(summary.excluded_items.len(), 7);
    assert!(summary.coverage_summary.contains("10/17"));
}

#[test]
fn test_empty_scores_yield_zero_without_fault() {
    let summary = calculate_exclusion_normalized_score(&BTreeMap::new());
    assert_eq!(summary.raw_score, 0.0);
    assert_eq!(summary.max_possible, 0.0);
    assert_eq!(summary.normalized_score, 0.0);
    assert_eq!(summary.coverage_rate, 0.0);
    assert!(summary.coverage_summary.contains("0/17"));
}

#[test]
fn test_data_missing_items_are_listed_separately() {
    let mut scores = rubric(3, 4.0);
    if let Some(item) = scores.get_mut("item-16") {
        item.status = ItemStatus::DataMissing;
    }
    let summary = calculate_exclusion_normalized_score(&scores);
    assert_eq!(summary.data_missing_items, vec!["item-16".to_string()]);
    assert_eq!(summary.excluded_items.len(), 13);
}

#[test]
fn test_confidence_adjustment_reference_values() {
    assert_eq!(adjust_score_by_confidence(100.0, 100.0, Confidence::High), 100.0);
    assert!(approx(adjust_score_by_confidence(100.0, 100.0, Confidence::Medium), 85.0));
    assert!(approx(adjust_score_by_confidence(100.0, 100.0, Confidence::Low), 65.0));
}

#[test]
fn test_confidence_adjustment_clamps_out_of_range_inputs() {
    assert_eq!(adjust_score_by_confidence(150.0, 100.0, Confidence::High), 100.0);
    assert_eq!(adjust_score_by_confidence(-50.0, 100.0, Confidence::High), 0.0);
    assert!(adjust_score_by_confidence(-50.0, 100.0, Confidence::Medium) >= 0.0);
    assert!(adjust_score_by_confidence(500.0, 100.0, Confidence::Low) <= 100.0);
}

#[test]
fn test_unrecognised_label_is_treated_as_medium() {
    let from_label = Confidence::from("extremely sure");
    assert!(approx(
        adjust_score_by_confidence(100.0, 100.0, from_label),
        85.0
    ));
}

#[test]
fn test_apply_adjustment_leaves_input_and_non_evaluated_untouched() {
    let mut scores = BTreeMap::new();
    scores.insert(
        "a".to_string(),
        ItemScore::new("a", 10.0, 10.0, "x", "t").with_confidence(Confidence::Medium),
    );
    scores.insert(
        "b".to_string(),
        ItemScore::new("b", 10.0, 10.0, "x", "t")
            .with_confidence(Confidence::Low)
            .with_status(ItemStatus::Excluded),
    );
    let before = scores.clone();

    let adjusted = apply_confidence_adjustment_to_scores(&scores);
    assert_eq!(scores, before);
    assert!(approx(adjusted["a"].score, 8.5));
    assert_eq!(adjusted["b"], scores["b"]);
}

#[test]
fn test_score_evaluation_adjusts_before_normalising() {
    let mut scores = BTreeMap::new();
    scores.insert(
        "a".to_string(),
        ItemScore::new("a", 10.0, 10.0, "x", "t").with_confidence(Confidence::Medium),
    );
    let summary = score_evaluation(&scores, 17);
    assert!(approx(summary.normalized_score, 85.0));
    assert!(approx(summary.coverage_rate, 1.0 / 17.0));
}

#[test]
fn test_information_absence_markers() {
    let evidence = ["src/lib.rs:10"];
    assert!(is_information_absent(&evidence, "Tests NOT FOUND in repository"));
    assert!(is_information_absent(&evidence, "Unable to assess deployment"));
    assert!(is_information_absent(&evidence, "license file is missing"));
    assert!(!is_information_absent(&evidence, "CI runs on every push"));

    let none: [&str; 0] = [];
    assert!(is_information_absent(&none, "CI runs on every push"));
}
