//! Case/accent folding and numeric coercion shared by the normalizers.

use serde_json::Value;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Lowercases and strips combining marks so keyword matching ignores both
/// case and diacritics.
pub(crate) fn fold_for_match(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Coerces a JSON value to a number. String values tolerate a comma decimal
/// separator. Non-coercible values yield `None`.
pub(crate) fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.replace(',', ".").parse::<f64>().ok()
        }
        _ => None,
    }
}
