use std::path::PathBuf;

/// Which store backs the query layer. Resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Embedded { path: String },
    Managed { database_url: String, ssl: bool },
    Hosted { url: String, api_key: String },
}

impl BackendConfig {
    /// Resolves the backend from a key lookup.
    ///
    /// An explicit `DB_BACKEND` wins. Otherwise production picks the hosted
    /// backend when its credentials are present, then the managed server when
    /// `DATABASE_URL` is set. Everything else runs on the embedded file.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let embedded = || BackendConfig::Embedded {
            path: get("SQLITE_PATH").unwrap_or_else(|| "critique.db".to_string()),
        };
        let managed = || -> Result<BackendConfig, String> {
            let database_url = get("DATABASE_URL").ok_or("DATABASE_URL must be set")?;
            let ssl = get("DATABASE_SSL")
                .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "require"))
                .unwrap_or(false);
            Ok(BackendConfig::Managed { database_url, ssl })
        };
        let hosted = || -> Result<BackendConfig, String> {
            let url = get("SUPABASE_URL").ok_or("SUPABASE_URL must be set")?;
            let api_key = get("SUPABASE_KEY").ok_or("SUPABASE_KEY must be set")?;
            Ok(BackendConfig::Hosted {
                url: url.trim_end_matches('/').to_string(),
                api_key,
            })
        };

        if let Some(explicit) = get("DB_BACKEND") {
            return match explicit.to_lowercase().as_str() {
                "sqlite" | "embedded" => Ok(embedded()),
                "postgres" | "managed" => managed(),
                "hosted" | "supabase" => hosted(),
                other => Err(format!("unknown DB_BACKEND: {}", other)),
            };
        }

        let production = ["NODE_ENV", "APP_ENV"]
            .iter()
            .any(|k| get(k).map_or(false, |v| v.eq_ignore_ascii_case("production")));

        if production && get("SUPABASE_URL").is_some() && get("SUPABASE_KEY").is_some() {
            hosted()
        } else if production && get("DATABASE_URL").is_some() {
            managed()
        } else {
            Ok(embedded())
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub upload_folder: PathBuf,
    pub max_upload_bytes: usize,
    pub host: String,
    pub port: u16,
}

/// Megabytes to bytes, clamped instead of overflowing.
fn upload_limit_bytes(megabytes: usize) -> usize {
    megabytes.saturating_mul(1024 * 1024)
}

impl Config {
    /// Request body cap: the upload limit plus room for the other form fields.
    pub fn body_limit(&self) -> usize {
        self.max_upload_bytes.saturating_add(64 * 1024)
    }

    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        dotenvy::dotenv().ok();

        let backend = BackendConfig::from_lookup(|k| std::env::var(k).ok())?;

        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let upload_folder = base_dir.join(
            std::env::var("UPLOAD_FOLDER").unwrap_or_else(|_| "uploads".to_string())
        );

        let max_upload_mb: usize = std::env::var("MAX_UPLOAD_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .unwrap_or(3000);

        Ok(Self {
            backend,
            upload_folder,
            max_upload_bytes: upload_limit_bytes(max_upload_mb),
            host,
            port,
        })
    }
}
