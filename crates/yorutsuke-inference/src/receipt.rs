//! Normalization of model answers into [`ExtractionResult`].

use serde_json::{Map, Value};
use yorutsuke_core::airlock::coerce_amount;
use yorutsuke_core::types::{BackendKind, ExtractionResult, LineItem};

use crate::prompt::strip_code_fences;
use crate::{Error, Result};

/// Parses the JSON text an LLM produced for a receipt.
///
/// The answer may be fenced; it must be a JSON object. Values are kept as
/// loosely as possible, since the Airlock does the strict checking later.
pub(crate) fn parse_model_output(
    backend: BackendKind,
    model: &str,
    text: &str,
) -> Result<ExtractionResult> {
    let value: Value = serde_json::from_str(strip_code_fences(text))?;
    let Value::Object(object) = value else {
        return Err(Error::invalid_response("model answer is not a JSON object"));
    };

    Ok(from_object(backend, model, &object))
}

/// Maps a receipt object onto an [`ExtractionResult`].
pub(crate) fn from_object(
    backend: BackendKind,
    model: &str,
    object: &Map<String, Value>,
) -> ExtractionResult {
    let get = |keys: &[&str]| keys.iter().find_map(|key| object.get(*key)).filter(|v| !v.is_null());

    let mut result = ExtractionResult::new(backend, model);
    result.vendor = get(&["vendor", "merchant"]).and_then(text);
    result.total = get(&["total", "amount"]).and_then(coerce_amount);
    result.tax = get(&["tax"]).and_then(coerce_amount);
    result.subtotal = get(&["subtotal"]).and_then(coerce_amount);
    result.currency = get(&["currency"]).and_then(text);
    result.date = get(&["date"]).and_then(text);
    result.transaction_type = get(&["type", "transaction_type"]).and_then(text);
    result.category = get(&["category"]).and_then(text);
    result.description = get(&["description"]).and_then(text);
    result.confidence = get(&["confidence"])
        .and_then(Value::as_f64)
        .map(|c| c.clamp(0.0, 1.0));
    result.line_items = get(&["line_items", "lineItems", "items"])
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(line_item).collect())
        .unwrap_or_default();

    result
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn line_item(value: &Value) -> Option<LineItem> {
    let object = value.as_object()?;
    let get = |keys: &[&str]| keys.iter().find_map(|key| object.get(*key));

    Some(LineItem {
        description: get(&["description", "name"]).and_then(text)?,
        quantity: get(&["quantity"]).and_then(coerce_amount),
        unit_price: get(&["unit_price", "unitPrice", "price"]).and_then(coerce_amount),
        amount: get(&["amount", "total"]).and_then(coerce_amount),
    })
}
