mod analyzer;
mod config;
mod error;
mod llm;
mod routes;
mod throttle;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Logger, web};
use analyzer::ImageAnalyzer;
use config::Settings;
use llm::{ClientBuildError, CompletionService, OpenAiClient};
use routes::{AppState, configure_routes};
use std::sync::Arc;
use throttle::Throttle;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let settings = Settings::load().map_err(|e| {
        log::error!("Failed to load settings: {}", e);
        std::io::Error::other(format!("Settings error: {}", e))
    })?;

    let analyzer = match OpenAiClient::from_config(&settings.openai) {
        Ok(client) => {
            log::info!(
                "OpenAI client initialized successfully (model: {})",
                client.model_name()
            );
            let client: Arc<dyn CompletionService> = Arc::new(client);
            Some(ImageAnalyzer::new(client))
        }
        Err(ClientBuildError::MissingApiKey) => {
            log::warn!("OpenAI client NOT initialized - API key missing");
            None
        }
        Err(e) => {
            log::error!("Failed to initialize OpenAI client: {}", e);
            return Err(std::io::Error::other(format!(
                "OpenAI client initialization failed: {}",
                e
            )));
        }
    };

    let throttle = Throttle::from_config(&settings.throttle).map_err(|e| {
        log::error!("Invalid throttle configuration: {}", e);
        std::io::Error::other(e.to_string())
    })?;
    match &settings.throttle.anon_rate {
        Some(rate) => log::info!("Anonymous throttle rate: {}", rate),
        None => log::warn!("Request throttling is disabled"),
    }
    if settings.throttle.trust_forwarded {
        log::info!("Throttle keys clients by forwarded headers");
    }

    let state = web::Data::new(AppState::new(analyzer, &settings.upload));
    let bind_address = settings.bind_address();

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .configure(|cfg| configure_routes(cfg, state.clone(), throttle.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
