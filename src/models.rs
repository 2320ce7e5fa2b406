use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Placeholder written for any scalar field that could not be extracted.
pub const SENTINEL: &str = "N/A";

/// One product listing read from a single container on a results page.
///
/// Every scalar field is optional; absence is persisted as [`SENTINEL`] and
/// a missing badge list as `[]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    #[serde(with = "sentinel")]
    pub name: Option<String>,
    #[serde(with = "sentinel")]
    pub price: Option<String>,
    #[serde(with = "sentinel")]
    pub original_price: Option<String>,
    #[serde(with = "sentinel")]
    pub discount: Option<String>,
    #[serde(with = "sentinel")]
    pub rating: Option<String>,
    #[serde(with = "sentinel")]
    pub reviews_count: Option<String>,
    #[serde(with = "sentinel")]
    pub image_url: Option<String>,
    #[serde(with = "sentinel")]
    pub product_url: Option<String>,
    #[serde(with = "sentinel")]
    pub brand: Option<String>,
    #[serde(with = "sentinel")]
    pub category: Option<String>,
    #[serde(with = "sentinel")]
    pub shipping_info: Option<String>,
    #[serde(default)]
    pub badges: Vec<String>,
}

impl Product {
    /// Display name, falling back to the sentinel.
    pub fn name_or_sentinel(&self) -> &str {
        self.name.as_deref().unwrap_or(SENTINEL)
    }

    pub fn price_or_sentinel(&self) -> &str {
        self.price.as_deref().unwrap_or(SENTINEL)
    }
}

mod sentinel {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.as_deref().unwrap_or(SENTINEL))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.filter(|v| v != SENTINEL))
    }
}
