use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One listing as it appears in a source shard. Only the fields the
/// normalizer reads are modelled; everything else is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductRecord {
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub main_image_id: Option<String>,
    #[serde(default)]
    pub other_image_id: Vec<String>,
    #[serde(default)]
    pub item_name: Vec<LangValue>,
    #[serde(default)]
    pub brand: Vec<LangValue>,
    #[serde(default)]
    pub color: Vec<LangValue>,
    #[serde(default)]
    pub product_type: Vec<LangValue>,
    #[serde(default)]
    pub bullet_point: Vec<LangValue>,
    #[serde(default)]
    pub offers: Vec<Offer>,
    #[serde(default)]
    pub customer_reviews: Vec<Review>,
}

impl ProductRecord {
    /// External key, if present and non-empty.
    pub fn key(&self) -> Option<&str> {
        self.item_id.as_deref().filter(|s| !s.trim().is_empty())
    }

    pub fn primary_image(&self) -> Option<&str> {
        self.main_image_id.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// A `{language_tag, value}` entry. `product_type` entries carry only `value`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LangValue {
    #[serde(default)]
    pub language_tag: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

impl LangValue {
    pub fn new(language_tag: &str, value: &str) -> Self {
        Self {
            language_tag: Some(language_tag.to_string()),
            value: Some(Value::String(value.to_string())),
        }
    }

    /// Text rendering of `value`; strings as-is, numbers/bools stringified.
    pub fn text(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn is_language(&self, language: &str) -> bool {
        self.language_tag.as_deref() == Some(language)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Offer {
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub average_rating: Option<Value>,
}
