use shared::Ingredient;

pub const INGREDIENT_TEMPERATURE: f32 = 0.1;
pub const INGREDIENT_MAX_TOKENS: u32 = 1000;

pub const RECIPE_TEMPERATURE: f32 = 0.7;
pub const RECIPE_MAX_TOKENS: u32 = 2000;

pub const INGREDIENT_INSTRUCTION: &str = "Analyze these images and identify all cooking ingredients you can see. \
Return a JSON array of objects with 'name' and 'confidence' fields. \
Only include ingredients that are clearly visible and identifiable. \
Be specific about the ingredient names (e.g., 'fresh tomatoes' not just 'tomatoes').";

pub fn recipe_prompt(ingredients: &[Ingredient]) -> String {
    let names: Vec<&str> = ingredients.iter().map(|i| i.name.as_str()).collect();

    format!(
        "Based on these ingredients: {}

Generate 3 different recipes that can be made with these ingredients. For each recipe, return a JSON object with:
- title: Recipe name
- usedIngredients: Array of ingredients from the provided list that are used
- instructions: Array of step-by-step cooking instructions
- difficulty: \"easy\", \"medium\", or \"hard\"
- timeMinutes: Estimated cooking time in minutes

Return only a JSON array of 3 recipe objects, no other text.",
        names.join(", ")
    )
}
