//! Project configuration: `mlld-config.json`, `mlld-lock.json`, and the
//! `MLLD_` environment surface.
//!
//! The directory containing `mlld-config.json` is the project root, which
//! `@base`/`@root` resolve to. Process environment variables are captured
//! once at startup; only `MLLD_`-prefixed names (further filtered by the
//! lock file's `allowedEnv`) are importable via `@input`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::MlldError;
use crate::runtime::FileSystem;

pub const CONFIG_FILE: &str = "mlld-config.json";
pub const LOCK_FILE: &str = "mlld-lock.json";
pub const ENV_PREFIX: &str = "MLLD_";

/// `security` section of `mlld-config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    /// When false, `with { guards: false }` is refused outright.
    #[serde(default = "default_true")]
    pub allow_guard_bypass: bool,
    #[serde(default)]
    pub url: Value,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_guard_bypass: true,
            url: Value::Null,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Parsed `mlld-config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MlldConfig {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub policy_imports: Vec<String>,
    #[serde(default)]
    pub policy_environment: Option<Value>,
    #[serde(default)]
    pub modules: Value,
}

/// `security` section of `mlld-lock.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSecurity {
    #[serde(default)]
    pub allowed_env: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleLock {
    pub integrity: String,
}

/// Parsed `mlld-lock.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MlldLock {
    #[serde(default)]
    pub security: LockSecurity,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleLock>,
}

impl MlldLock {
    /// Check a module source against its recorded `sha256-<hex>` integrity.
    ///
    /// Unlisted modules pass; a listed module with a different digest fails.
    pub fn verify_integrity(&self, reference: &str, source: &str) -> bool {
        match self.modules.get(reference) {
            None => true,
            Some(lock) => lock.integrity == integrity_of(source),
        }
    }
}

/// `sha256-<hex>` digest used in lock entries.
pub fn integrity_of(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("sha256-{:x}", hasher.finalize())
}

/// Evaluation-mode switches carried through the environment.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Strict parsing and strict directive placement rules.
    pub strict: bool,
    /// Permit absolute paths outside the project root.
    pub allow_absolute: bool,
    /// Skip lock-file persistence; imports are verified but not recorded.
    pub ephemeral: bool,
    /// Suppress `stream:chunk` events even when requested per-operation.
    pub no_stream: bool,
    pub approve_all_imports: bool,
    /// Emit `debug:*` events.
    pub debug: bool,
    /// Emit a `debug:var` event for every binding.
    pub debug_vars: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            strict: true,
            allow_absolute: false,
            ephemeral: false,
            no_stream: false,
            approve_all_imports: false,
            debug: false,
            debug_vars: false,
        }
    }
}

impl EngineOptions {
    /// Apply `MLLD_DEBUG` / `MLLD_NO_STREAM` toggles from a captured
    /// environment map.
    #[must_use]
    pub fn with_env_toggles(mut self, env: &FxHashMap<String, String>) -> Self {
        if env.get("MLLD_DEBUG").is_some_and(|v| v != "0" && !v.is_empty()) {
            self.debug = true;
        }
        if env
            .get("MLLD_DEBUG_VARS")
            .is_some_and(|v| v != "0" && !v.is_empty())
        {
            self.debug_vars = true;
        }
        if env
            .get("MLLD_NO_STREAM")
            .is_some_and(|v| v != "0" && !v.is_empty())
        {
            self.no_stream = true;
        }
        self
    }
}

/// Walk up from `start` looking for the directory containing
/// `mlld-config.json`. Falls back to `start` itself when no config exists.
pub async fn find_project_root(fs: &dyn FileSystem, start: &Path) -> PathBuf {
    let mut current = Some(start);
    while let Some(dir) = current {
        if fs.exists(&dir.join(CONFIG_FILE)).await {
            return dir.to_path_buf();
        }
        current = dir.parent();
    }
    start.to_path_buf()
}

pub async fn load_config(fs: &dyn FileSystem, root: &Path) -> Result<MlldConfig, MlldError> {
    let path = root.join(CONFIG_FILE);
    if !fs.exists(&path).await {
        return Ok(MlldConfig::default());
    }
    let text = fs
        .read_file(&path)
        .await
        .map_err(|e| MlldError::Config(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| MlldError::Config(format!("{}: {e}", path.display())))
}

pub async fn load_lock(fs: &dyn FileSystem, root: &Path) -> Result<MlldLock, MlldError> {
    let path = root.join(LOCK_FILE);
    if !fs.exists(&path).await {
        return Ok(MlldLock::default());
    }
    let text = fs
        .read_file(&path)
        .await
        .map_err(|e| MlldError::Config(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| MlldError::Config(format!("{}: {e}", path.display())))
}

/// Filter a captured process environment down to what `@input` may see:
/// `MLLD_`-prefixed names, intersected with the lock file's `allowedEnv`
/// when that list is non-empty.
pub fn importable_env(
    captured: &FxHashMap<String, String>,
    lock: &MlldLock,
) -> FxHashMap<String, String> {
    captured
        .iter()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .filter(|(key, _)| {
            lock.security.allowed_env.is_empty() || lock.security.allowed_env.contains(*key)
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(pairs: &[(&str, &str)]) -> FxHashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn only_prefixed_vars_are_importable() {
        let env = captured(&[("MLLD_TOKEN", "abc"), ("PATH", "/usr/bin")]);
        let lock = MlldLock::default();
        let visible = importable_env(&env, &lock);
        assert_eq!(visible.len(), 1);
        assert!(visible.contains_key("MLLD_TOKEN"));
    }

    #[test]
    fn allowed_env_narrows_the_set() {
        let env = captured(&[("MLLD_TOKEN", "abc"), ("MLLD_OTHER", "x")]);
        let lock = MlldLock {
            security: LockSecurity {
                allowed_env: vec!["MLLD_TOKEN".to_string()],
            },
            ..Default::default()
        };
        let visible = importable_env(&env, &lock);
        assert_eq!(visible.len(), 1);
        assert!(visible.contains_key("MLLD_TOKEN"));
    }

    #[test]
    fn integrity_round_trips() {
        let source = "/var @x = 1\n";
        let lock = MlldLock {
            modules: BTreeMap::from([(
                "@user/mod".to_string(),
                ModuleLock {
                    integrity: integrity_of(source),
                },
            )]),
            ..Default::default()
        };
        assert!(lock.verify_integrity("@user/mod", source));
        assert!(!lock.verify_integrity("@user/mod", "tampered"));
        assert!(lock.verify_integrity("@other/mod", "anything"));
    }
}
