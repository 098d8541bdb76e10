use anyhow::Result;
use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Vision model
    pub ai_base_url: String,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub ai_timeout_seconds: u64,

    // Blueprint acquisition
    pub fetch_timeout_seconds: u64,

    // Page rendering density (dots per inch)
    pub analysis_dpi: f32,
    pub scale_detection_dpi: f32,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let env = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        // CORS
        let cors_allow_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Vision model
        let ai_base_url = env::var("AI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let ai_api_key = env::var("AI_API_KEY").ok().filter(|s| !s.is_empty());
        let ai_model = env::var("AI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let ai_timeout_seconds = env::var("AI_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(120); // 2 minutes default for vision calls

        // Blueprint fetch: single attempt, bounded
        let fetch_timeout_seconds = env::var("FETCH_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        // Rendering density. Scale detection renders hotter so small
        // title-block text stays legible.
        let analysis_dpi = env::var("ANALYSIS_DPI")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(150.0);
        let scale_detection_dpi = env::var("SCALE_DETECTION_DPI")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(200.0);

        Ok(Settings {
            env,
            server_addr,
            cors_allow_origins,
            ai_base_url,
            ai_api_key,
            ai_model,
            ai_timeout_seconds,
            fetch_timeout_seconds,
            analysis_dpi,
            scale_detection_dpi,
        })
    }

    pub fn ai_configured(&self) -> bool {
        self.ai_api_key.is_some()
    }
}
