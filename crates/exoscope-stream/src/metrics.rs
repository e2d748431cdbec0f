//! Normalization of heterogeneous backend metric shapes into the canonical
//! snapshot structures.

use exoscope_types::{ConfusionMatrix, EvaluationMetrics, FoldMetrics, MetricsUpdate};
use serde_json::{Map, Value};

use crate::predictions::label_index;
use crate::text::coerce_number;

const FEATURE_COUNT_ALIASES: [&str; 3] = ["num_features", "n_features", "feature_count"];
const TRAINING_SECONDS_ALIASES: [&str; 3] = [
    "training_time",
    "training_time_seconds",
    "elapsed_seconds",
];

/// Normalizes one message's `details` payload into a partial metrics update.
/// When `details` is an array only the first element is used, matching
/// observed backend behavior. Every extraction is independent and tolerant of
/// absence.
pub fn normalize_details(details: &Value) -> MetricsUpdate {
    let details = match details {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return MetricsUpdate::default(),
        },
        other => other,
    };
    let Some(object) = details.as_object() else {
        tracing::debug!("details payload is neither object nor array of objects");
        return MetricsUpdate::default();
    };

    MetricsUpdate {
        feature_count: first_number(object, &FEATURE_COUNT_ALIASES)
            .filter(|count| *count >= 0.0)
            .map(|count| count as u64),
        training_duration_ms: first_number(object, &TRAINING_SECONDS_ALIASES)
            .filter(|seconds| *seconds >= 0.0)
            .map(|seconds| (seconds * 1_000.0).round() as u64),
        fold_metrics: fold_list(object),
        test: object.get("test_metrics").and_then(evaluation_group),
        blind: object
            .get("blind_test_metrics")
            .or_else(|| object.get("holdout_metrics"))
            .and_then(evaluation_group),
    }
}

/// Converts a label-keyed confusion object into the dense canonical matrix.
/// Unrecognized labels are skipped; missing cells stay zero.
pub fn confusion_from_labelled(value: &Value) -> ConfusionMatrix {
    let mut cells = [[0u64; 3]; 3];
    if let Some(rows) = value.as_object() {
        for (row_key, row_value) in rows {
            let Some(row) = label_index(row_key) else {
                continue;
            };
            let Some(columns) = row_value.as_object() else {
                continue;
            };
            for (column_key, count) in columns {
                let Some(column) = label_index(column_key) else {
                    continue;
                };
                if let Some(count) = coerce_number(count).filter(|count| *count >= 0.0) {
                    cells[row][column] = count as u64;
                }
            }
        }
    }
    ConfusionMatrix::new(cells)
}

fn first_number(object: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    aliases
        .iter()
        .find_map(|alias| object.get(*alias).and_then(coerce_number))
}

fn fold_list(object: &Map<String, Value>) -> Option<Vec<FoldMetrics>> {
    let folds = object
        .get("cv_metrics")
        .or_else(|| object.get("folds"))?
        .as_array()?;
    Some(folds.iter().map(fold_metrics).collect())
}

fn fold_metrics(value: &Value) -> FoldMetrics {
    let Some(object) = value.as_object() else {
        return FoldMetrics::default();
    };
    FoldMetrics {
        accuracy: first_number(object, &["accuracy"]),
        precision: first_number(object, &["precision"]),
        recall: first_number(object, &["recall"]),
        f1: first_number(object, &["f1", "f1_score"]),
    }
}

fn evaluation_group(value: &Value) -> Option<EvaluationMetrics> {
    let object = value.as_object()?;
    Some(EvaluationMetrics {
        accuracy: first_number(object, &["accuracy"]),
        f1: first_number(object, &["f1", "f1_score"]),
        precision: first_number(object, &["precision"]),
        recall: first_number(object, &["recall"]),
        confusion: object.get("confusion_matrix").map(confusion_from_labelled),
    })
}

#[cfg(test)]
mod tests {
    use super::{confusion_from_labelled, normalize_details};
    use exoscope_types::{MetricsSnapshot, CANONICAL_LABELS};
    use serde_json::json;

    #[test]
    fn confusion_matrix_follows_canonical_order_with_zero_defaults() {
        let source = json!({
            "CANDIDATE":      {"CANDIDATE": 11, "CONFIRMED": 2, "FALSE POSITIVE": 3},
            "CONFIRMED":      {"CANDIDATE": 4,  "CONFIRMED": 15},
            "FALSE POSITIVE": {"FALSE POSITIVE": 19}
        });

        let matrix = confusion_from_labelled(&source);
        assert_eq!(
            matrix.labels,
            CANONICAL_LABELS.map(|label| label.to_string()).to_vec()
        );
        assert_eq!(
            matrix.cells,
            [[11, 2, 3], [4, 15, 0], [0, 0, 19]]
        );
    }

    #[test]
    fn confusion_matrix_skips_unrecognized_labels() {
        let source = json!({
            "CONFIRMED": {"CONFIRMED": 7, "UNKNOWN": 99},
            "NOISE": {"CONFIRMED": 99}
        });

        let matrix = confusion_from_labelled(&source);
        assert_eq!(matrix.cells[1][1], 7);
        assert_eq!(matrix.cells.iter().flatten().sum::<u64>(), 7);
    }

    #[test]
    fn details_extraction_uses_first_array_element_only() {
        let details = json!([
            {"num_features": 17, "training_time": 2.5},
            {"num_features": 99}
        ]);

        let update = normalize_details(&details);
        assert_eq!(update.feature_count, Some(17));
        assert_eq!(update.training_duration_ms, Some(2_500));
    }

    #[test]
    fn fold_fields_stay_absent_when_missing() {
        let details = json!({
            "cv_metrics": [
                {"accuracy": 0.91, "f1": 0.88},
                {"precision": 0.9, "recall": 0.87, "f1_score": 0.89}
            ]
        });

        let update = normalize_details(&details);
        let folds = update.fold_metrics.expect("fold list should be present");
        assert_eq!(folds.len(), 2);
        assert_eq!(folds[0].accuracy, Some(0.91));
        assert_eq!(folds[0].precision, None);
        assert_eq!(folds[1].f1, Some(0.89));
        assert_eq!(folds[1].accuracy, None);
    }

    #[test]
    fn evaluation_groups_extract_independently() {
        let details = json!({
            "test_metrics": {
                "accuracy": 0.93,
                "confusion_matrix": {"CONFIRMED": {"CONFIRMED": 5}}
            },
            "holdout_metrics": {"f1": 0.81}
        });

        let update = normalize_details(&details);
        let test = update.test.expect("test group should be present");
        assert_eq!(test.accuracy, Some(0.93));
        let confusion = test.confusion.expect("matrix should be present");
        assert_eq!(confusion.cells[1][1], 5);

        let blind = update.blind.expect("holdout alias should map to blind");
        assert_eq!(blind.f1, Some(0.81));
        assert_eq!(blind.confusion, None);
    }

    #[test]
    fn absent_fields_never_regress_a_snapshot() {
        let mut snapshot = MetricsSnapshot::default();
        snapshot.apply(normalize_details(&json!({"test_metrics": {"accuracy": 0.9}})));
        snapshot.apply(normalize_details(&json!({"test_metrics": {"f1": 0.8}})));
        snapshot.apply(normalize_details(&json!({"status_note": "no metrics here"})));

        let test = snapshot.test.expect("test metrics should survive");
        assert_eq!(test.accuracy, Some(0.9));
        assert_eq!(test.f1, Some(0.8));
    }

    #[test]
    fn non_object_details_yield_an_empty_update() {
        assert!(normalize_details(&json!("free text")).is_empty());
        assert!(normalize_details(&json!([])).is_empty());
    }
}
