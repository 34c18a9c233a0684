use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum_macros::EnumString;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Ingredient {
    pub name: String,
    #[serde(default, deserialize_with = "lenient::number")]
    pub confidence: f64,
}

/// Recipe difficulty. Labels outside easy/medium/hard are kept verbatim.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default, EnumString)]
#[serde(from = "String", into = "String")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
    #[strum(default)]
    Other(String),
}

impl Difficulty {
    pub fn as_str(&self) -> &str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Other(label) => label,
        }
    }
}

impl From<String> for Difficulty {
    fn from(value: String) -> Self {
        Difficulty::from_str(value.trim()).unwrap_or(Difficulty::Other(value))
    }
}

impl From<Difficulty> for String {
    fn from(value: Difficulty) -> Self {
        match value {
            Difficulty::Other(label) => label,
            known => known.as_str().to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub title: String,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub used_ingredients: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default, deserialize_with = "lenient::minutes")]
    pub time_minutes: u32,
}

/// Body of a successful `POST /api/analyze`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AnalysisResponse {
    pub ingredients: Vec<Ingredient>,
    pub recipes: Vec<Recipe>,
}

/// Body of every error response.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ErrorDetail {
    pub detail: String,
}

/// Deserializers for model-written fields, which are often strings where
/// numbers belong or a bare string where a list belongs.
mod lenient {
    use serde::de::IgnoredAny;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose<T> {
        Exact(T),
        Text(String),
        Other(IgnoredAny),
    }

    fn leading_number(text: &str) -> Option<f64> {
        let text = text.trim();
        let end = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        text[..end].parse().ok()
    }

    pub fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(match Loose::<f64>::deserialize(deserializer)? {
            Loose::Exact(value) => value,
            Loose::Text(text) => leading_number(&text).unwrap_or_default(),
            Loose::Other(_) => 0.0,
        })
    }

    pub fn minutes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let minutes = number(deserializer)?;
        Ok(minutes.round().clamp(0.0, u32::MAX as f64) as u32)
    }

    pub fn string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        Ok(match Loose::<Vec<String>>::deserialize(deserializer)? {
            Loose::Exact(items) => items,
            Loose::Text(text) => vec![text],
            Loose::Other(_) => Vec::new(),
        })
    }
}
