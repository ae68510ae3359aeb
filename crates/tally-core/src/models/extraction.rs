use serde::{Deserialize, Serialize};

/// One purchased line on a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    /// Unit price as an integer amount
    #[serde(rename = "price", alias = "unitPrice")]
    pub unit_price: i64,
    pub quantity: i64,
}

impl LineItem {
    pub fn new(name: impl Into<String>, unit_price: i64, quantity: i64) -> Self {
        Self {
            name: name.into(),
            unit_price,
            quantity,
        }
    }
}

/// Structured result of the extraction stage.
///
/// `ExtractedData::default()` is the canonical empty result
/// `{"items":[],"tax":0,"total":0}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedData {
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub tax: i64,
    #[serde(default)]
    pub total: i64,
}

impl ExtractedData {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.tax == 0 && self.total == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_has_canonical_shape() {
        let json = serde_json::to_string(&ExtractedData::empty()).unwrap();
        assert_eq!(json, r#"{"items":[],"tax":0,"total":0}"#);
    }

    #[test]
    fn unit_price_accepts_both_field_names() {
        let a: LineItem = serde_json::from_str(r#"{"name":"A","price":10,"quantity":1}"#).unwrap();
        let b: LineItem =
            serde_json::from_str(r#"{"name":"A","unitPrice":10,"quantity":1}"#).unwrap();
        assert_eq!(a, b);
        assert!(serde_json::to_string(&a).unwrap().contains("\"price\":10"));
    }
}
