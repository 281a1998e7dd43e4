use anyhow::{Context, Result, bail};
use std::{path::PathBuf, str::FromStr};

use super::config_model::{
    Auth, BackendServer, Database, DotEnvyConfig, GooglePlay, Ops, Trial,
};
use crates::domain::value_objects::trials::DEFAULT_TRIAL_DURATION_DAYS;

const DEFAULT_BODY_LIMIT_MIB: u64 = 1;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_AUDIENCE: &str = "authenticated";

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();
    load_from(|key| std::env::var(key).ok())
}

pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<DotEnvyConfig> {
    let env = Env { lookup };

    let backend_server = BackendServer {
        port: env.required_parsed("SERVER_PORT_BACKEND")?,
        body_limit: env.parsed_or("SERVER_BODY_LIMIT", DEFAULT_BODY_LIMIT_MIB)?,
        timeout: env.parsed_or("SERVER_TIMEOUT", DEFAULT_TIMEOUT_SECS)?,
    };

    let database = Database {
        url: env.required("DATABASE_URL")?,
    };

    let audiences = env
        .optional("AUTH_JWT_AUDIENCE")
        .unwrap_or_else(|| DEFAULT_AUDIENCE.to_string())
        .split(',')
        .map(|aud| aud.trim().to_string())
        .filter(|aud| !aud.is_empty())
        .collect::<Vec<_>>();
    let auth = Auth {
        jwt_secret: env.required("AUTH_JWT_SECRET")?,
        audiences,
    };

    let duration_days: i64 = env.parsed_or("TRIAL_DURATION_DAYS", DEFAULT_TRIAL_DURATION_DAYS)?;
    if duration_days <= 0 {
        bail!("TRIAL_DURATION_DAYS must be positive, got {duration_days}");
    }

    let google_play = GooglePlay {
        package_name: env.required("GOOGLE_PLAY_PACKAGE_NAME")?,
        service_account_key_path: PathBuf::from(env.required("GOOGLE_SERVICE_ACCOUNT_KEY_PATH")?),
    };

    let ops = Ops {
        enable_reset_endpoint: env.parsed_or("ENABLE_RESET_ENDPOINT", false)?,
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        auth,
        trial: Trial { duration_days },
        google_play,
        ops,
    })
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .with_context(|| format!("{key} is missing"))
    }

    fn required_parsed<T: FromStr>(&self, key: &str) -> Result<T> {
        let raw = self.required(key)?;
        raw.trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} is invalid: {raw}"))
    }

    fn parsed_or<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.optional(key) {
            Some(_) => self.required_parsed(key),
            None => Ok(default),
        }
    }
}
