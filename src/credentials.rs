//! Credential service: unified secret lookup over environment and files.
//!
//! Resolves a symbolic service name (e.g. `"openrouter"`, `"gemini"`) to a
//! secret string. Lookup order:
//!
//! 1. environment variable, via a fixed name mapping (the process
//!    environment first, then `~/.openclaw/secrets/.env`)
//! 2. the master secrets file `~/.openclaw/secrets/credentials.json`
//! 3. a per-service token file `~/.openclaw/secrets/<name>.json`
//!    (OAuth-style tokens that rotate)
//!
//! Results are cached for 60 seconds. The service never performs network
//! access; token refresh belongs to the adapters that own the tokens.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{CoreError, CoreResult};

/// Fixed mapping from symbolic service names to environment variables.
const ENV_MAPPING: &[(&str, &str)] = &[
    ("openrouter", "OPENROUTER_API_KEY"),
    ("gemini", "GEMINI_API_KEY"),
    ("deepseek", "DEEPSEEK_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("telegram", "TELEGRAM_BOT_TOKEN"),
    ("twilio", "TWILIO_AUTH_TOKEN"),
    ("elevenlabs", "ELEVENLABS_API_KEY"),
    ("hume", "HUME_API_KEY"),
];

/// How long a resolved credential stays cached.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// JSON keys accepted inside per-service token files.
const TOKEN_FILE_KEYS: &[&str] = &["api_key", "token", "access_token"];

struct CachedSecret {
    value: Option<String>,
    fetched_at: Instant,
}

/// Unified credential lookup with a 60 s in-memory cache.
pub struct CredentialService {
    secrets_dir: PathBuf,
    cache: Mutex<BTreeMap<String, CachedSecret>>,
}

impl std::fmt::Debug for CredentialService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialService")
            .field("secrets_dir", &self.secrets_dir)
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl CredentialService {
    /// Create a service reading secret files from the given directory.
    pub fn new(secrets_dir: impl Into<PathBuf>) -> Self {
        Self {
            secrets_dir: secrets_dir.into(),
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    /// Resolve a credential, returning `None` on miss.
    pub fn get(&self, name: &str) -> Option<String> {
        if let Some(hit) = self.cache_lookup(name) {
            return hit;
        }
        let resolved = self.resolve(name);
        self.cache_store(name, resolved.clone());
        resolved
    }

    /// Resolve a credential or fail with [`CoreError::MissingCredential`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingCredential`] when no source provides a
    /// value for `name`.
    pub fn require(&self, name: &str) -> CoreResult<String> {
        self.get(name)
            .ok_or_else(|| CoreError::MissingCredential(name.to_owned()))
    }

    /// Null-safe existence check.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Return all credentials whose symbolic name starts with `prefix`.
    ///
    /// Covers the fixed env mapping and the master secrets file; token files
    /// are not enumerated (their names are service-specific).
    pub fn get_all(&self, prefix: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (name, _) in ENV_MAPPING {
            if name.starts_with(prefix) {
                if let Some(value) = self.get(name) {
                    out.insert((*name).to_owned(), value);
                }
            }
        }
        for name in self.master_file_names() {
            if name.starts_with(prefix) && !out.contains_key(&name) {
                if let Some(value) = self.get(&name) {
                    out.insert(name, value);
                }
            }
        }
        out
    }

    /// Drop all cached values. Called after a credential update on disk.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    // ── resolution ──────────────────────────────────────────────

    fn resolve(&self, name: &str) -> Option<String> {
        if let Some(value) = self.lookup_env(name) {
            debug!(name, "credential resolved from environment");
            return Some(value);
        }
        if let Some(value) = self.lookup_master_file(name) {
            debug!(name, "credential resolved from master secrets file");
            return Some(value);
        }
        if let Some(value) = self.lookup_token_file(name) {
            debug!(name, "credential resolved from token file");
            return Some(value);
        }
        None
    }

    /// Environment-variable step: the process environment first, then the
    /// `.env` file in the secrets directory, both keyed by the fixed
    /// mapping.
    fn lookup_env(&self, name: &str) -> Option<String> {
        let var = ENV_MAPPING
            .iter()
            .find(|(symbolic, _)| *symbolic == name)
            .map(|(_, var)| *var)?;

        if let Some(value) = std::env::var(var).ok().filter(|v| !v.trim().is_empty()) {
            return Some(value);
        }

        let env_file = self.secrets_dir.join(".env");
        if !env_file.exists() {
            return None;
        }
        let iter = match dotenvy::from_path_iter(&env_file) {
            Ok(iter) => iter,
            Err(e) => {
                warn!(path = %env_file.display(), error = %e, "cannot read .env file");
                return None;
            }
        };
        for item in iter {
            let Ok((key, value)) = item else { continue };
            if key == var && !value.trim().is_empty() {
                return Some(value);
            }
        }
        None
    }

    fn lookup_master_file(&self, name: &str) -> Option<String> {
        let parsed = self.read_master_file()?;
        extract_secret(parsed.get(name)?)
    }

    fn lookup_token_file(&self, name: &str) -> Option<String> {
        let path = self.secrets_dir.join(format!("{name}.json"));
        let parsed = read_json_file(&path)?;
        for key in TOKEN_FILE_KEYS {
            if let Some(value) = parsed.get(key).and_then(Value::as_str) {
                if !value.trim().is_empty() {
                    return Some(value.to_owned());
                }
            }
        }
        None
    }

    fn read_master_file(&self) -> Option<Value> {
        read_json_file(&self.secrets_dir.join("credentials.json"))
    }

    fn master_file_names(&self) -> Vec<String> {
        let Some(Value::Object(map)) = self.read_master_file() else {
            return Vec::new();
        };
        map.keys().cloned().collect()
    }

    // ── cache ───────────────────────────────────────────────────

    fn cache_lookup(&self, name: &str) -> Option<Option<String>> {
        let cache = self.cache.lock().ok()?;
        let entry = cache.get(name)?;
        if entry.fetched_at.elapsed() < CACHE_TTL {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn cache_store(&self, name: &str, value: Option<String>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                name.to_owned(),
                CachedSecret {
                    value,
                    fetched_at: Instant::now(),
                },
            );
        }
    }
}

fn read_json_file(path: &Path) -> Option<Value> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read secrets file");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed secrets file");
            None
        }
    }
}

/// Accept either a plain string secret or an object carrying one of the
/// recognised token keys.
fn extract_secret(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => TOKEN_FILE_KEYS.iter().find_map(|key| {
            map.get(*key)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_owned)
        }),
        _ => None,
    }
}
