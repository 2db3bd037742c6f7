use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    /// Shared bearer token every ingress caller must present.
    pub api_key: String,

    /// Ceiling on a single badge's criteria evaluation. One badge's
    /// evaluation must never block the ingestion call indefinitely.
    pub eval_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .expect("PORT must be a number"),
            api_key: env::var("API_KEY").expect("API_KEY must be set"),
            eval_timeout_ms: env::var("EVAL_TIMEOUT_MS")
                .unwrap_or_else(|_| "2000".into())
                .parse()
                .expect("EVAL_TIMEOUT_MS must be a number"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
