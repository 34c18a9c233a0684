pub mod parsing;
pub mod prompts;
pub mod validation;

use shared::{AnalysisResponse, Ingredient, Recipe};
use std::sync::Arc;

use crate::llm::{CompletionError, CompletionRequest, CompletionService, ContentPart, EncodedImage};
use prompts::{
    INGREDIENT_INSTRUCTION, INGREDIENT_MAX_TOKENS, INGREDIENT_TEMPERATURE, RECIPE_MAX_TOKENS,
    RECIPE_TEMPERATURE,
};

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("Failed to analyze images: {0}")]
    Ingredients(#[source] CompletionError),
    #[error("Failed to generate recipes: {0}")]
    Recipes(#[source] CompletionError),
}

/// Runs the two model calls: images to ingredients, ingredients to recipes.
#[derive(Clone)]
pub struct ImageAnalyzer {
    client: Arc<dyn CompletionService>,
}

impl ImageAnalyzer {
    pub fn new(client: Arc<dyn CompletionService>) -> Self {
        Self { client }
    }

    pub async fn analyze_ingredients(
        &self,
        images: Vec<EncodedImage>,
    ) -> Result<Vec<Ingredient>, AnalyzerError> {
        let mut parts = vec![ContentPart::Text(INGREDIENT_INSTRUCTION.to_string())];
        parts.extend(images.into_iter().map(ContentPart::Image));
        let request = CompletionRequest {
            parts,
            temperature: INGREDIENT_TEMPERATURE,
            max_tokens: INGREDIENT_MAX_TOKENS,
        };

        log::info!(
            "Calling {} with {} images",
            self.client.model_name(),
            request.image_count()
        );

        let reply = self
            .client
            .complete(request)
            .await
            .map_err(|e| {
                log::error!("Error analyzing ingredients: {}", e);
                AnalyzerError::Ingredients(e)
            })?;

        Ok(parsing::parse_ingredients(&reply))
    }

    pub async fn generate_recipes(
        &self,
        ingredients: &[Ingredient],
    ) -> Result<Vec<Recipe>, AnalyzerError> {
        let request = CompletionRequest::text(
            prompts::recipe_prompt(ingredients),
            RECIPE_TEMPERATURE,
            RECIPE_MAX_TOKENS,
        );

        let reply = self.client.complete(request).await.map_err(|e| {
            log::error!("Error generating recipes: {}", e);
            AnalyzerError::Recipes(e)
        })?;

        Ok(parsing::parse_recipes(&reply))
    }

    pub async fn analyze(
        &self,
        images: Vec<EncodedImage>,
    ) -> Result<AnalysisResponse, AnalyzerError> {
        let ingredients = self.analyze_ingredients(images).await?;
        let recipes = self.generate_recipes(&ingredients).await?;
        Ok(AnalysisResponse {
            ingredients,
            recipes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fake::FakeCompletionService;

    fn image(data: &str) -> EncodedImage {
        EncodedImage {
            content_type: "image/jpeg".to_string(),
            data: data.to_string(),
        }
    }

    const RECIPES: &str = r#"[{"title":"Egg Fried Rice","usedIngredients":["egg","rice"],"instructions":["Cook rice","Fry with egg"],"difficulty":"easy","timeMinutes":20}]"#;

    #[tokio::test]
    async fn ingredient_call_carries_instruction_and_every_image() {
        let fake = Arc::new(FakeCompletionService::with_replies([
            r#"[{"name":"egg","confidence":0.9}]"#,
        ]));
        let analyzer = ImageAnalyzer::new(fake.clone());

        let ingredients = analyzer
            .analyze_ingredients(vec![image("AAA"), image("BBB")])
            .await
            .unwrap();
        assert_eq!(ingredients[0].name, "egg");

        let requests = fake.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, INGREDIENT_TEMPERATURE);
        assert_eq!(requests[0].max_tokens, 1000);
        assert_eq!(requests[0].image_count(), 2);
        assert_eq!(
            requests[0].parts[0],
            ContentPart::Text(INGREDIENT_INSTRUCTION.to_string())
        );
        assert_eq!(requests[0].parts[2], ContentPart::Image(image("BBB")));
    }

    #[tokio::test]
    async fn analyze_runs_ingredients_then_recipes() {
        let fake = Arc::new(FakeCompletionService::with_replies([
            r#"Found: [{"name":"egg","confidence":0.9},{"name":"rice","confidence":0.8}]"#,
            RECIPES,
        ]));
        let analyzer = ImageAnalyzer::new(fake.clone());

        let response = analyzer.analyze(vec![image("AAA")]).await.unwrap();
        assert_eq!(response.ingredients.len(), 2);
        assert_eq!(response.recipes[0].title, "Egg Fried Rice");

        let requests = fake.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].image_count(), 1);
        assert_eq!(requests[1].image_count(), 0);
        assert_eq!(requests[1].temperature, RECIPE_TEMPERATURE);
        assert_eq!(requests[1].max_tokens, 2000);
        match &requests[1].parts[0] {
            ContentPart::Text(prompt) => assert!(prompt.contains("egg, rice")),
            other => panic!("expected text prompt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_ingredients_still_feed_recipe_stage() {
        let fake = Arc::new(FakeCompletionService::with_replies([
            "no idea, sorry",
            "also not json",
        ]));
        let analyzer = ImageAnalyzer::new(fake.clone());

        let response = analyzer.analyze(vec![image("AAA")]).await.unwrap();
        assert_eq!(response.ingredients, parsing::ingredient_fallback());
        assert_eq!(response.recipes, parsing::recipe_fallback());
        assert_eq!(fake.call_count(), 2);
    }

    #[tokio::test]
    async fn ingredient_call_failure_stops_the_pipeline() {
        let fake = Arc::new(FakeCompletionService::new());
        fake.push_error(CompletionError::Api {
            status: 429,
            message: "quota exceeded".to_string(),
        });
        let analyzer = ImageAnalyzer::new(fake.clone());

        let err = analyzer.analyze(vec![image("AAA")]).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::Ingredients(_)));
        assert_eq!(
            err.to_string(),
            "Failed to analyze images: API returned error: 429 - quota exceeded"
        );
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn recipe_call_failure_is_surfaced() {
        let fake = Arc::new(FakeCompletionService::with_replies([
            r#"[{"name":"egg","confidence":0.9}]"#,
        ]));
        fake.push_error(CompletionError::EmptyResponse);
        let analyzer = ImageAnalyzer::new(fake.clone());

        let err = analyzer.analyze(vec![image("AAA")]).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::Recipes(_)));
        assert!(err.to_string().starts_with("Failed to generate recipes:"));
    }
}
