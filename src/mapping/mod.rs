use serde_json::Value;

use crate::models::*;

pub const DEFAULT_TITLE: &str = "No Title";
pub const DEFAULT_TEXT: &str = "Unknown";
pub const DEFAULT_CURRENCY: &str = "USD";
pub const MAX_BULLET_POINTS: usize = 5;

/// Flattens a [`ProductRecord`] into the closed [`ProductPayload`] schema.
#[derive(Debug, Clone)]
pub struct MetadataNormalizer {
    preferred_language: String,
}

impl MetadataNormalizer {
    pub fn new(preferred_language: impl Into<String>) -> Self {
        Self { preferred_language: preferred_language.into() }
    }

    pub fn preferred_language(&self) -> &str {
        &self.preferred_language
    }

    /// Builds the payload for a record. `main_image_id` is the record's primary
    /// reference; the pipeline overwrites it with the reference actually used.
    pub fn normalize(&self, record: &ProductRecord) -> ProductPayload {
        let lang = self.preferred_language.as_str();
        let (price, currency) = price_info(&record.offers);
        ProductPayload {
            item_id: record.item_id.clone().unwrap_or_default(),
            main_image_id: record.main_image_id.clone().unwrap_or_default(),
            title: Some(text_field(&record.item_name, lang, DEFAULT_TITLE)),
            brand: Some(text_field(&record.brand, lang, DEFAULT_TEXT)),
            category: Some(
                record
                    .product_type
                    .first()
                    .and_then(|e| e.text())
                    .unwrap_or_else(|| DEFAULT_TEXT.to_string()),
            ),
            color: Some(text_field(&record.color, lang, DEFAULT_TEXT)),
            price,
            currency,
            rating: rating(&record.customer_reviews),
            bullet_points: bullet_points(&record.bullet_point, lang),
            source: None,
            schema_version: PAYLOAD_SCHEMA_VERSION,
        }
    }
}

/// Value in `language`, else the first entry's value, else `default`.
pub fn text_field(entries: &[LangValue], language: &str, default: &str) -> String {
    let Some(first) = entries.first() else {
        return default.to_string();
    };
    let chosen = entries.iter().find(|e| e.is_language(language)).unwrap_or(first);
    chosen.text().unwrap_or_else(|| default.to_string())
}

/// Price and currency from the first offer. A price that does not coerce to a
/// finite number is dropped; the currency defaults to USD once an offer exists.
pub fn price_info(offers: &[Offer]) -> (Option<f64>, Option<String>) {
    match offers.first() {
        Some(offer) => {
            let price = offer.price.as_ref().and_then(coerce_number);
            let currency = offer
                .currency
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
            (price, Some(currency))
        }
        None => (None, None),
    }
}

pub fn rating(reviews: &[Review]) -> Option<f64> {
    reviews.first()?.average_rating.as_ref().and_then(coerce_number)
}

/// Up to five bullets in `language`, falling back to every bullet when none match.
pub fn bullet_points(entries: &[LangValue], language: &str) -> Vec<String> {
    let preferred: Vec<String> = entries
        .iter()
        .filter(|e| e.is_language(language))
        .filter_map(|e| e.text())
        .collect();
    let mut out = if preferred.is_empty() {
        entries.iter().filter_map(|e| e.text()).collect()
    } else {
        preferred
    };
    out.truncate(MAX_BULLET_POINTS);
    out
}

fn coerce_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    // NaN/inf would serialize as null
    n.is_finite().then_some(n)
}
