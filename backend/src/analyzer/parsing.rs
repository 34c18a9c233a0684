use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{Difficulty, Ingredient, Recipe};

/// Finds the JSON in a free-text model reply.
///
/// Tries the slice from the first `[` to the last `]`, then the whole text.
/// A reply with an unrelated `]` after the array therefore fails to parse.
fn find_json(text: &str) -> Option<Value> {
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&text[start..=end]) {
                return Some(value);
            }
        }
    }
    serde_json::from_str(text.trim()).ok()
}

/// Pulls a list of `T` out of a model reply. `None` only when the reply holds
/// no JSON at all; entries that cannot be read as `T` are skipped.
pub fn extract_json_array<T: DeserializeOwned>(text: &str) -> Option<Vec<T>> {
    let entries = match find_json(text)? {
        Value::Array(entries) => entries,
        single => vec![single],
    };

    Some(
        entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(item) => Some(item),
                Err(e) => {
                    log::warn!("Skipping unreadable entry in model reply: {}", e);
                    None
                }
            })
            .collect(),
    )
}

pub fn parse_ingredients(text: &str) -> Vec<Ingredient> {
    extract_json_array(text).unwrap_or_else(|| {
        log::warn!("Failed to parse ingredients JSON from model reply: {}", text);
        ingredient_fallback()
    })
}

pub fn parse_recipes(text: &str) -> Vec<Recipe> {
    extract_json_array(text).unwrap_or_else(|| {
        log::warn!("Failed to parse recipes JSON from model reply: {}", text);
        recipe_fallback()
    })
}

pub fn ingredient_fallback() -> Vec<Ingredient> {
    vec![Ingredient {
        name: "Unable to identify ingredients".to_string(),
        confidence: 0.1,
    }]
}

pub fn recipe_fallback() -> Vec<Recipe> {
    vec![Recipe {
        title: "Unable to generate recipes".to_string(),
        used_ingredients: Vec::new(),
        instructions: vec!["Recipe generation failed".to_string()],
        difficulty: Difficulty::Easy,
        time_minutes: 0,
    }]
}
