use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub database: Database,
    pub auth: Auth,
    pub trial: Trial,
    pub google_play: GooglePlay,
    pub ops: Ops,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    /// MiB.
    pub body_limit: u64,
    /// Seconds.
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Auth {
    pub jwt_secret: String,
    pub audiences: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Trial {
    pub duration_days: i64,
}

#[derive(Debug, Clone)]
pub struct GooglePlay {
    pub package_name: String,
    pub service_account_key_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Ops {
    pub enable_reset_endpoint: bool,
}
