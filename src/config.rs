// config.rs
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub port: u16,
    pub redis_url: Option<String>,
    pub allowed_origins: Vec<String>,
    // Routing proxy
    pub ors_api_key: Option<String>,
    pub ors_base_url: String,
    // Object storage (uploads happen client side, we only build paths/urls)
    pub storage_public_url: String,
    // "build" makes public listings answer without touching the database
    pub app_phase: String,
    // Matching
    pub match_radius_km: f64,
    pub assignment_timeout_secs: i64,
    pub reassign_sweep_secs: u64,
    // Billing
    pub subscription_monthly_price: f64,
}

impl Config {
    pub fn init() -> Config {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let jwt_secret = std::env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let jwt_audience = std::env::var("JWT_AUDIENCE")
            .unwrap_or_else(|_| "authenticated".to_string());
        let redis_url = std::env::var("REDIS_URL").ok().filter(|url| !url.is_empty());

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let ors_api_key = std::env::var("ORS_API_KEY").ok().filter(|key| !key.is_empty());
        let ors_base_url = std::env::var("ORS_BASE_URL")
            .unwrap_or_else(|_| "https://api.openrouteservice.org".to_string());

        let storage_public_url = std::env::var("STORAGE_PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:54321".to_string());

        let app_phase = std::env::var("APP_PHASE").unwrap_or_else(|_| "runtime".to_string());

        Config {
            database_url,
            jwt_secret,
            jwt_audience,
            port: env_or("PORT", 8000),
            redis_url,
            allowed_origins,
            ors_api_key,
            ors_base_url,
            storage_public_url,
            app_phase,
            match_radius_km: env_or("MATCH_RADIUS_KM", 10.0),
            assignment_timeout_secs: env_or("ASSIGNMENT_TIMEOUT_SECS", 120),
            reassign_sweep_secs: env_or("REASSIGN_SWEEP_SECS", 30),
            subscription_monthly_price: env_or("SUBSCRIPTION_MONTHLY_PRICE", 1000.0),
        }
    }

    pub fn is_build_phase(&self) -> bool {
        self.app_phase.eq_ignore_ascii_case("build")
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}, using default", key);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
impl Config {
    /// Configuration used by unit tests; never touches the environment.
    pub fn for_tests() -> Config {
        Config {
            database_url: "postgres://localhost/fixlink".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_audience: "authenticated".to_string(),
            port: 8000,
            redis_url: None,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            ors_api_key: None,
            ors_base_url: "http://127.0.0.1:9".to_string(),
            storage_public_url: "https://storage.example.com".to_string(),
            app_phase: "runtime".to_string(),
            match_radius_km: 10.0,
            assignment_timeout_secs: 120,
            reassign_sweep_secs: 30,
            subscription_monthly_price: 1000.0,
        }
    }
}
