//! Turn a raw model reply into a validated `ExtractedData`.
//!
//! Models drift from the requested format: fenced code blocks, prices as
//! strings with thousand separators, missing quantities. Everything here is
//! total; anything that cannot be salvaged becomes the empty result.

use serde_json::Value;
use tally_core::{ExtractedData, LineItem};

/// Parse a model reply. Never fails.
pub fn parse_model_output(content: &str) -> ExtractedData {
    let json_text = strip_code_fences(content);
    match serde_json::from_str::<Value>(json_text) {
        Ok(value) => from_value(&value),
        Err(e) => {
            tracing::warn!(error = %e, "Model reply is not JSON, using empty result");
            ExtractedData::empty()
        }
    }
}

/// Remove an optional opening fence and an optional closing fence.
///
/// The two are stripped independently, so a reply with only one of them
/// still yields its JSON. A fence counts as opening only when it comes
/// before the first `{` or `[`; prose ahead of it is dropped.
pub fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();
    let json_start = body.find(['{', '[']);
    if let Some(fence) = body.find("```") {
        if json_start.map_or(true, |start| fence < start) {
            let rest = &body[fence + 3..];
            body = rest.strip_prefix("json").unwrap_or(rest);
        }
    }
    if let Some(end) = body.rfind("```") {
        body = &body[..end];
    }
    body.trim()
}

/// Validate an already-parsed reply.
pub fn from_value(value: &Value) -> ExtractedData {
    let Some(obj) = value.as_object() else {
        return ExtractedData::empty();
    };

    let items = obj
        .get("items")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(line_item).collect())
        .unwrap_or_default();

    ExtractedData {
        items,
        tax: obj.get("tax").and_then(parse_amount).unwrap_or(0),
        total: obj.get("total").and_then(parse_amount).unwrap_or(0),
    }
}

fn line_item(value: &Value) -> Option<LineItem> {
    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let price = obj
        .get("price")
        .or_else(|| obj.get("unitPrice"))
        .and_then(parse_amount)
        .unwrap_or(0);

    let quantity = obj
        .get("quantity")
        .and_then(parse_amount)
        .filter(|q| *q >= 1)
        .unwrap_or(1);

    Some(LineItem::new(name, price, quantity))
}

/// Integer amount from a JSON number or an amount string.
pub fn parse_amount(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => parse_amount_text(s),
        _ => None,
    }
}

/// Normalize amount text: `"75.000"` -> 75000, `"67k"` -> 67000, `"10,000"` -> 10000,
/// `"Rp 1.250.000"` -> 1250000, `"2.5k"` -> 2500, `"25.000,00"` -> 25000,
/// `"Rp 1.250.000,-"` -> 1250000.
pub fn parse_amount_text(raw: &str) -> Option<i64> {
    let lowered = raw.trim().to_lowercase();
    let (body, multiplier) = match lowered.strip_suffix('k') {
        Some(rest) => (rest.trim(), 1000.0),
        None => (lowered.as_str(), 1.0),
    };

    let negative = body.trim_start().starts_with('-');
    let cleaned: String = body
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    // A dangling separator is an empty fraction, as in "1.250.000,-"
    let cleaned = cleaned.trim_end_matches(['.', ',']);
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let magnitude = if cleaned.contains('.') && cleaned.contains(',') {
        mixed_separators(cleaned)?
    } else {
        single_separator(cleaned)?
    };

    let amount = (magnitude * multiplier).round() as i64;
    Some(if negative { -amount } else { amount })
}

/// Only one kind of separator: 3-digit groups are thousands, otherwise a
/// single separator is the decimal mark.
fn single_separator(cleaned: &str) -> Option<f64> {
    let groups: Vec<&str> = cleaned.split(['.', ',']).collect();
    match groups.as_slice() {
        [whole] => whole.parse().ok(),
        [first, rest @ ..] if !first.is_empty() && rest.iter().all(|g| g.len() == 3) => {
            groups.concat().parse().ok()
        }
        [whole, fraction] => format!("{}.{}", whole, fraction).parse().ok(),
        _ => None,
    }
}

/// Both `.` and `,` present: the last one is the decimal mark when one or two
/// digits follow it, every other separator groups thousands.
fn mixed_separators(cleaned: &str) -> Option<f64> {
    let mark = cleaned.rfind(['.', ','])?;
    let fraction = &cleaned[mark + 1..];
    if (1..=2).contains(&fraction.len()) {
        let whole: String = cleaned[..mark]
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        format!("{}.{}", whole, fraction).parse().ok()
    } else {
        single_separator(&cleaned.replace(',', "."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amount_text_rules() {
        assert_eq!(parse_amount_text("75.000"), Some(75000));
        assert_eq!(parse_amount_text("67k"), Some(67000));
        assert_eq!(parse_amount_text("67K"), Some(67000));
        assert_eq!(parse_amount_text("10,000"), Some(10000));
        assert_eq!(parse_amount_text("Rp 1.250.000"), Some(1250000));
        assert_eq!(parse_amount_text("2.5k"), Some(2500));
        assert_eq!(parse_amount_text("12.50"), Some(13));
        assert_eq!(parse_amount_text("free"), None);
    }

    #[test]
    fn amount_text_with_decimal_part() {
        assert_eq!(parse_amount_text("25.000,00"), Some(25000));
        assert_eq!(parse_amount_text("Rp 1.250.000,-"), Some(1250000));
        assert_eq!(parse_amount_text("Rp 45.500,-"), Some(45500));
        assert_eq!(parse_amount_text("1,250.50"), Some(1251));
        assert_eq!(parse_amount_text("1,250.00"), Some(1250));
        assert_eq!(parse_amount_text("1.250,5"), Some(1251));
        assert_eq!(parse_amount_text("1,250.000"), Some(1250000));
    }

    #[test]
    fn integral_floats_are_accepted() {
        assert_eq!(parse_amount(&json!(1500.0)), Some(1500));
        assert_eq!(parse_amount(&json!(15.5)), None);
        assert_eq!(parse_amount(&json!(null)), None);
    }

    #[test]
    fn strips_fenced_blocks() {
        assert_eq!(strip_code_fences("```json\n{\"tax\":1}\n```"), "{\"tax\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {}  "), "{}");
        assert_eq!(
            strip_code_fences("Here you go:\n```json\n{\"tax\":2}\n```\nThanks"),
            "{\"tax\":2}"
        );
        assert_eq!(strip_code_fences("Sure:\n```\n[]\n```"), "[]");
    }

    #[test]
    fn lone_fences_do_not_hide_json() {
        let closing_only = parse_model_output("{\"items\":[],\"tax\":5,\"total\":9}\n```");
        assert_eq!(closing_only.tax, 5);
        assert_eq!(closing_only.total, 9);

        let opening_only = parse_model_output("```json\n{\"items\":[],\"tax\":5,\"total\":9}");
        assert_eq!(opening_only.total, 9);
    }

    #[test]
    fn normalizes_items() {
        let value = json!({
            "items": [
                {"name": "Nasi goreng", "price": "25.000"},
                {"name": "Es teh", "unitPrice": 5000, "quantity": 2},
                {"name": "", "price": 1},
                {"price": 9000},
                {"name": "Kerupuk", "price": 2000, "quantity": 0}
            ],
            "total": "37k"
        });
        let data = from_value(&value);
        assert_eq!(
            data.items,
            vec![
                LineItem::new("Nasi goreng", 25000, 1),
                LineItem::new("Es teh", 5000, 2),
                LineItem::new("Kerupuk", 2000, 1),
            ]
        );
        assert_eq!(data.tax, 0);
        assert_eq!(data.total, 37000);
    }

    #[test]
    fn non_object_reply_is_empty() {
        assert!(from_value(&json!([1, 2, 3])).is_empty());
        assert!(parse_model_output("I could not find a receipt.").is_empty());
        assert!(parse_model_output("").is_empty());
    }
}
