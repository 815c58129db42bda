use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for every cache and session TTL: one year.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub vector: VectorConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Primary ticket/session store. `url = None` runs on the file fallback only.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub timeout_secs: u64,
    pub operation_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub ticket_file: String,
    pub vector_file: String,
}

impl StorageConfig {
    pub fn ticket_path(&self) -> PathBuf {
        self.data_dir.join(&self.ticket_file)
    }

    pub fn vector_path(&self) -> PathBuf {
        self.data_dir.join(&self.vector_file)
    }
}

#[derive(Clone, Debug)]
pub struct VectorConfig {
    pub remote_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_ms: u64,
    pub top_k: usize,
    pub seed_defaults: bool,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub response_ttl_secs: u64,
    pub intent_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub chat_ttl_secs: u64,
    pub call_ttl_secs: u64,
}

impl CacheConfig {
    pub fn response_ttl(&self) -> chrono::Duration {
        bounded_ttl(self.response_ttl_secs)
    }

    pub fn intent_ttl(&self) -> chrono::Duration {
        bounded_ttl(self.intent_ttl_secs)
    }
}

impl SessionConfig {
    pub fn chat_ttl(&self) -> chrono::Duration {
        bounded_ttl(self.chat_ttl_secs)
    }

    pub fn call_ttl(&self) -> chrono::Duration {
        bounded_ttl(self.call_ttl_secs)
    }
}

/// Seconds to a signed duration, clamped to `MAX_TTL_SECS` for configs built without `validate`.
pub fn bounded_ttl(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs.min(MAX_TTL_SECS)).unwrap_or(i64::MAX);
    chrono::Duration::seconds(secs)
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
}

impl LlmConfig {
    pub fn effective_base_url(&self) -> String {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, LlmProvider::OpenAi) => "https://api.openai.com/v1".to_string(),
            (None, LlmProvider::Ollama) => "http://localhost:11434/v1".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_chat_model: Option<String>,
    pub vector_remote_url: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
                timeout_secs: 30,
                operation_timeout_ms: 5_000,
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("data"),
                ticket_file: "tickets.json".to_string(),
                vector_file: "vector_db.json".to_string(),
            },
            vector: VectorConfig {
                remote_url: None,
                api_key: None,
                timeout_ms: 5_000,
                top_k: 3,
                seed_defaults: true,
            },
            cache: CacheConfig { response_ttl_secs: 600, intent_ttl_secs: 1_800 },
            session: SessionConfig { chat_ttl_secs: 86_400, call_ttl_secs: 3_600 },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                chat_model: "llama3.1".to_string(),
                embedding_model: "nomic-embed-text".to_string(),
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 3000,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("helpline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = non_empty(url);
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
            if let Some(operation_timeout_ms) = database.operation_timeout_ms {
                self.database.operation_timeout_ms = operation_timeout_ms;
            }
        }

        if let Some(storage) = patch.storage {
            if let Some(data_dir) = storage.data_dir {
                self.storage.data_dir = data_dir;
            }
            if let Some(ticket_file) = storage.ticket_file {
                self.storage.ticket_file = ticket_file;
            }
            if let Some(vector_file) = storage.vector_file {
                self.storage.vector_file = vector_file;
            }
        }

        if let Some(vector) = patch.vector {
            if let Some(remote_url) = vector.remote_url {
                self.vector.remote_url = non_empty(remote_url);
            }
            if let Some(api_key) = vector.api_key {
                self.vector.api_key = Some(secret_value(api_key));
            }
            if let Some(timeout_ms) = vector.timeout_ms {
                self.vector.timeout_ms = timeout_ms;
            }
            if let Some(top_k) = vector.top_k {
                self.vector.top_k = top_k;
            }
            if let Some(seed_defaults) = vector.seed_defaults {
                self.vector.seed_defaults = seed_defaults;
            }
        }

        if let Some(cache) = patch.cache {
            if let Some(response_ttl_secs) = cache.response_ttl_secs {
                self.cache.response_ttl_secs = response_ttl_secs;
            }
            if let Some(intent_ttl_secs) = cache.intent_ttl_secs {
                self.cache.intent_ttl_secs = intent_ttl_secs;
            }
        }

        if let Some(session) = patch.session {
            if let Some(chat_ttl_secs) = session.chat_ttl_secs {
                self.session.chat_ttl_secs = chat_ttl_secs;
            }
            if let Some(call_ttl_secs) = session.call_ttl_secs {
                self.session.call_ttl_secs = call_ttl_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = non_empty(base_url);
            }
            if let Some(chat_model) = llm.chat_model {
                self.llm.chat_model = chat_model;
            }
            if let Some(embedding_model) = llm.embedding_model {
                self.llm.embedding_model = embedding_model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("HELPLINE_DATABASE_URL") {
            self.database.url = Some(value);
        }
        if let Some(value) = read_env("HELPLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("HELPLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("HELPLINE_DATABASE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_DATABASE_OPERATION_TIMEOUT_MS") {
            self.database.operation_timeout_ms =
                parse_u64("HELPLINE_DATABASE_OPERATION_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("HELPLINE_STORAGE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("HELPLINE_STORAGE_TICKET_FILE") {
            self.storage.ticket_file = value;
        }
        if let Some(value) = read_env("HELPLINE_STORAGE_VECTOR_FILE") {
            self.storage.vector_file = value;
        }

        if let Some(value) = read_env("HELPLINE_VECTOR_REMOTE_URL") {
            self.vector.remote_url = Some(value);
        }
        if let Some(value) = read_env("HELPLINE_VECTOR_API_KEY") {
            self.vector.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("HELPLINE_VECTOR_TIMEOUT_MS") {
            self.vector.timeout_ms = parse_u64("HELPLINE_VECTOR_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_VECTOR_TOP_K") {
            self.vector.top_k = parse_usize("HELPLINE_VECTOR_TOP_K", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_VECTOR_SEED_DEFAULTS") {
            self.vector.seed_defaults = parse_bool("HELPLINE_VECTOR_SEED_DEFAULTS", &value)?;
        }

        if let Some(value) = read_env("HELPLINE_CACHE_RESPONSE_TTL_SECS") {
            self.cache.response_ttl_secs = parse_u64("HELPLINE_CACHE_RESPONSE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_CACHE_INTENT_TTL_SECS") {
            self.cache.intent_ttl_secs = parse_u64("HELPLINE_CACHE_INTENT_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("HELPLINE_SESSION_CHAT_TTL_SECS") {
            self.session.chat_ttl_secs = parse_u64("HELPLINE_SESSION_CHAT_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_SESSION_CALL_TTL_SECS") {
            self.session.call_ttl_secs = parse_u64("HELPLINE_SESSION_CALL_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("HELPLINE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("HELPLINE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("HELPLINE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("HELPLINE_LLM_CHAT_MODEL") {
            self.llm.chat_model = value;
        }
        if let Some(value) = read_env("HELPLINE_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = value;
        }
        if let Some(value) = read_env("HELPLINE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("HELPLINE_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HELPLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("HELPLINE_SERVER_PORT") {
            self.server.port = parse_u16("HELPLINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("HELPLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("HELPLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("HELPLINE_LOGGING_LEVEL").or_else(|| read_env("HELPLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("HELPLINE_LOGGING_FORMAT").or_else(|| read_env("HELPLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = non_empty(database_url);
        }
        if let Some(data_dir) = overrides.data_dir {
            self.storage.data_dir = data_dir;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_chat_model) = overrides.llm_chat_model {
            self.llm.chat_model = llm_chat_model;
        }
        if let Some(vector_remote_url) = overrides.vector_remote_url {
            self.vector.remote_url = non_empty(vector_remote_url);
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_storage(&self.storage)?;
        validate_vector(&self.vector)?;
        validate_cache(&self.cache)?;
        validate_session(&self.session)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("helpline.toml"), PathBuf::from("config/helpline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    if let Some(url) = &database.url {
        let url = url.trim();
        let sqlite_url =
            url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
        if !sqlite_url {
            return Err(ConfigError::Validation(
                "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                    .to_string(),
            ));
        }
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if database.operation_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "database.operation_timeout_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.data_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("storage.data_dir must not be empty".to_string()));
    }
    for (field, value) in
        [("storage.ticket_file", &storage.ticket_file), ("storage.vector_file", &storage.vector_file)]
    {
        if value.trim().is_empty() || value.contains('/') || value.contains('\\') {
            return Err(ConfigError::Validation(format!(
                "{field} must be a plain file name inside storage.data_dir"
            )));
        }
    }
    if storage.ticket_file == storage.vector_file {
        return Err(ConfigError::Validation(
            "storage.ticket_file and storage.vector_file must differ".to_string(),
        ));
    }
    Ok(())
}

fn validate_vector(vector: &VectorConfig) -> Result<(), ConfigError> {
    if let Some(remote_url) = &vector.remote_url {
        if !remote_url.starts_with("http://") && !remote_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "vector.remote_url must start with http:// or https://".to_string(),
            ));
        }
        let missing_key = vector
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_key {
            return Err(ConfigError::Validation(
                "vector.api_key is required when vector.remote_url is set".to_string(),
            ));
        }
    }

    if vector.timeout_ms == 0 || vector.timeout_ms > 60_000 {
        return Err(ConfigError::Validation(
            "vector.timeout_ms must be in range 1..=60000".to_string(),
        ));
    }

    if vector.top_k == 0 {
        return Err(ConfigError::Validation("vector.top_k must be greater than zero".to_string()));
    }

    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    let bounds = 1..=MAX_TTL_SECS;
    if !bounds.contains(&cache.response_ttl_secs) || !bounds.contains(&cache.intent_ttl_secs) {
        return Err(ConfigError::Validation(format!(
            "cache.response_ttl_secs and cache.intent_ttl_secs must be in range 1..={MAX_TTL_SECS}"
        )));
    }
    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    let bounds = 1..=MAX_TTL_SECS;
    if !bounds.contains(&session.chat_ttl_secs) || !bounds.contains(&session.call_ttl_secs) {
        return Err(ConfigError::Validation(format!(
            "session.chat_ttl_secs and session.call_ttl_secs must be in range 1..={MAX_TTL_SECS}"
        )));
    }
    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.chat_model.trim().is_empty() || llm.embedding_model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "llm.chat_model and llm.embedding_model must not be empty".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    storage: Option<StoragePatch>,
    vector: Option<VectorPatch>,
    cache: Option<CachePatch>,
    session: Option<SessionPatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    operation_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    data_dir: Option<PathBuf>,
    ticket_file: Option<String>,
    vector_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VectorPatch {
    remote_url: Option<String>,
    api_key: Option<String>,
    timeout_ms: Option<u64>,
    top_k: Option<usize>,
    seed_defaults: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct CachePatch {
    response_ttl_secs: Option<u64>,
    intent_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    chat_ttl_secs: Option<u64>,
    call_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    chat_model: Option<String>,
    embedding_model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
