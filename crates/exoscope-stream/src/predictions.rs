//! Prediction payload merging: flattening, candidate-key resolution, free-text
//! classification, probability normalization, and before/after pairing.

use std::collections::HashMap;

use exoscope_types::{CandidateRecord, Classification, ComparisonRecord};
use serde_json::{Map, Value};

use crate::text::{coerce_number, fold_for_match};

/// Identifier field aliases, ordered by source-mission convention. The first
/// non-empty value wins.
const CANDIDATE_KEY_ALIASES: [&str; 8] = [
    "kepoi_name",
    "kepler_name",
    "kepid",
    "toi",
    "tic_id",
    "epic_id",
    "pl_name",
    "id",
];

const CLASSIFICATION_ALIASES: [&str; 4] = ["classification", "prediction", "predicted_class", "label"];
const PROBABILITY_ALIASES: [&str; 3] = ["probability", "confidence", "score"];
const PUBDATE_ALIASES: [&str; 2] = ["pubdate", "pub_date"];

const CONFIRMED_KEYWORDS: [&str; 1] = ["confirm"];
const CANDIDATE_KEYWORDS: [&str; 1] = ["candidat"];
const FALSE_POSITIVE_KEYWORDS: [&str; 4] = [
    "false positive",
    "false_positive",
    "falso positivo",
    "falso_positivo",
];

/// Canonical index for a recognized class keyword, if any.
pub(crate) fn label_index(text: &str) -> Option<usize> {
    let folded = fold_for_match(text);
    if CONFIRMED_KEYWORDS.iter().any(|k| folded.contains(k)) {
        return Some(Classification::Confirmed.canonical_index());
    }
    if CANDIDATE_KEYWORDS.iter().any(|k| folded.contains(k)) {
        return Some(Classification::Candidate.canonical_index());
    }
    if FALSE_POSITIVE_KEYWORDS.iter().any(|k| folded.contains(k)) {
        return Some(Classification::FalsePositive.canonical_index());
    }
    None
}

/// Maps free-text model output onto exactly one canonical classification.
/// Text with no recognized keyword resolves to `FalsePositive`; that is the
/// documented default for unrecognized labels, not a silent failure.
pub fn classify_label(text: &str) -> Classification {
    label_index(text)
        .and_then(Classification::from_canonical_index)
        .unwrap_or(Classification::FalsePositive)
}

/// Records produced by merging one message's prediction payloads.
#[derive(Debug, Default, PartialEq)]
pub struct PredictionBatch {
    pub candidates: Vec<CandidateRecord>,
    pub comparisons: Vec<ComparisonRecord>,
}

/// One side of a before/after observation awaiting its counterpart.
#[derive(Debug, Default)]
struct PendingPair {
    old: Option<(Classification, f64)>,
    new: Option<(Classification, f64)>,
}

/// Merges the `predictions` field (array or one-level-nested array) and the
/// singular `prediction` field into candidate and comparison records. Rows
/// are appended, never deduplicated across messages.
pub fn merge_predictions(
    predictions: Option<&Value>,
    prediction: Option<&Value>,
) -> PredictionBatch {
    let mut rows: Vec<&Value> = Vec::new();
    if let Some(Value::Array(items)) = predictions {
        for item in items {
            match item {
                Value::Array(nested) => rows.extend(nested.iter()),
                other => rows.push(other),
            }
        }
    }
    if let Some(single) = prediction {
        rows.push(single);
    }

    let mut batch = PredictionBatch::default();
    let mut pairs: HashMap<String, PendingPair> = HashMap::new();
    let mut pair_order: Vec<String> = Vec::new();

    for row in rows {
        let Some(object) = row.as_object() else {
            tracing::debug!("skipping non-object prediction row");
            continue;
        };

        let key = candidate_key(object).unwrap_or_else(|| "unknown".to_string());
        let has_old = object.keys().any(|field| field.starts_with("old_"));
        let has_new = object.keys().any(|field| field.starts_with("new_"));

        match (has_old, has_new) {
            (true, true) => batch.comparisons.push(ComparisonRecord {
                id: key,
                old_classification: prefixed_classification(object, "old_"),
                old_probability: prefixed_probability(object, "old_"),
                new_classification: prefixed_classification(object, "new_"),
                new_probability: prefixed_probability(object, "new_"),
            }),
            (true, false) => {
                let entry = pending_entry(&mut pairs, &mut pair_order, key);
                entry.old = Some((
                    prefixed_classification(object, "old_"),
                    prefixed_probability(object, "old_"),
                ));
            }
            (false, true) => {
                let entry = pending_entry(&mut pairs, &mut pair_order, key);
                entry.new = Some((
                    prefixed_classification(object, "new_"),
                    prefixed_probability(object, "new_"),
                ));
            }
            (false, false) => batch.candidates.push(CandidateRecord {
                id: key,
                classification: field_text(object, &CLASSIFICATION_ALIASES)
                    .map(|text| classify_label(&text))
                    .unwrap_or(Classification::FalsePositive),
                probability: resolve_probability(object, &PROBABILITY_ALIASES),
                pubdate: field_text(object, &PUBDATE_ALIASES),
            }),
        }
    }

    for key in pair_order {
        let Some(pending) = pairs.remove(&key) else {
            continue;
        };
        match (pending.old, pending.new) {
            (Some((old_classification, old_probability)), Some((new_classification, new_probability))) => {
                batch.comparisons.push(ComparisonRecord {
                    id: key,
                    old_classification,
                    old_probability,
                    new_classification,
                    new_probability,
                });
            }
            (Some((classification, probability)), None)
            | (None, Some((classification, probability))) => {
                batch.candidates.push(CandidateRecord {
                    id: key,
                    classification,
                    probability,
                    pubdate: None,
                });
            }
            (None, None) => {}
        }
    }

    batch
}

fn pending_entry<'a>(
    pairs: &'a mut HashMap<String, PendingPair>,
    order: &mut Vec<String>,
    key: String,
) -> &'a mut PendingPair {
    if !pairs.contains_key(&key) {
        order.push(key.clone());
    }
    pairs.entry(key).or_default()
}

/// First non-empty identifier across the alias list. Numeric ids are
/// stringified.
fn candidate_key(object: &Map<String, Value>) -> Option<String> {
    for alias in CANDIDATE_KEY_ALIASES {
        let Some(value) = object.get(alias) else {
            continue;
        };
        let text = match value {
            Value::String(text) => text.trim().to_string(),
            Value::Number(number) => number.to_string(),
            _ => continue,
        };
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

fn field_text(object: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        match object.get(*alias) {
            Some(Value::String(text)) if !text.trim().is_empty() => {
                return Some(text.trim().to_string());
            }
            Some(Value::Number(number)) => return Some(number.to_string()),
            _ => continue,
        }
    }
    None
}

/// Coerces and clamps a probability into `[0, 100]`, defaulting to 0.
fn resolve_probability(object: &Map<String, Value>, aliases: &[&str]) -> f64 {
    aliases
        .iter()
        .find_map(|alias| object.get(*alias).and_then(coerce_number))
        .map(|probability| probability.clamp(0.0, 100.0))
        .unwrap_or(0.0)
}

fn prefixed_classification(object: &Map<String, Value>, prefix: &str) -> Classification {
    let aliases: Vec<String> = CLASSIFICATION_ALIASES
        .iter()
        .map(|alias| format!("{prefix}{alias}"))
        .collect();
    let aliases: Vec<&str> = aliases.iter().map(String::as_str).collect();
    field_text(object, &aliases)
        .map(|text| classify_label(&text))
        .unwrap_or(Classification::FalsePositive)
}

fn prefixed_probability(object: &Map<String, Value>, prefix: &str) -> f64 {
    let aliases: Vec<String> = PROBABILITY_ALIASES
        .iter()
        .map(|alias| format!("{prefix}{alias}"))
        .collect();
    let aliases: Vec<&str> = aliases.iter().map(String::as_str).collect();
    resolve_probability(object, &aliases)
}
