use std::path::PathBuf;
use std::sync::Arc;

use crate::authz::{PermissionRules, PrerequisiteMode};
use crate::errors::AppError;
use crate::jwt::JwtConfig;

/// Process configuration, read from the environment.
///
/// | variable | default |
/// |---|---|
/// | `JWT_SECRET` | required |
/// | `JWT_EXP_HOURS` | 24 |
/// | `APP_PORT` | 8000 |
/// | `PERMISSION_RULES_PATH` | built-in `config/permission_rules.json` |
/// | `PREREQUISITE_MODE` | `advisory` |
#[derive(Debug, Clone)]
pub struct Settings {
    pub jwt: JwtConfig,
    pub port: u16,
    pub rules: Arc<PermissionRules>,
    pub prerequisite_mode: PrerequisiteMode,
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        let jwt = JwtConfig::from_env()?;

        let port = std::env::var("APP_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8000);

        let rules = match std::env::var("PERMISSION_RULES_PATH") {
            Ok(path) if !path.trim().is_empty() => PermissionRules::load(&PathBuf::from(path))?,
            _ => PermissionRules::builtin()?,
        };

        Ok(Self {
            jwt,
            port,
            rules: Arc::new(rules),
            prerequisite_mode: PrerequisiteMode::from_env(),
        })
    }

    /// Settings with built-in rules and the given secret.
    pub fn with_secret(secret: &str) -> Result<Self, AppError> {
        Ok(Self {
            jwt: JwtConfig::new(secret, 24),
            port: 8000,
            rules: Arc::new(PermissionRules::builtin()?),
            prerequisite_mode: PrerequisiteMode::Advisory,
        })
    }

    pub fn with_prerequisite_mode(mut self, mode: PrerequisiteMode) -> Self {
        self.prerequisite_mode = mode;
        self
    }
}

/// Loads `.env` from the working directory, falling back to the crate's own.
pub fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}
