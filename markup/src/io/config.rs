//! Engine configuration (`markup.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::guard::{GuardConfig, GuardOverrides, normalize_prefix};

/// Engine configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to values that
/// suit a single frontend app under `frontend/`. Secrets never live here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub guard: GuardSettings,
    pub resolver: ResolverSettings,
    pub timeouts: TimeoutSettings,
    pub preview: PreviewSettings,
    pub git: GitSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuardSettings {
    /// The single prefix edits must live under.
    pub frontend_root: String,
    /// Allowed prefixes; empty means `[frontend_root]`.
    pub allowed_prefixes: Vec<String>,
    /// Always rejected, even under an allowed prefix.
    pub denylist_prefixes: Vec<String>,
    /// Scan replacement bodies for server-side code and secrets.
    pub content_scan: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResolverSettings {
    /// Candidate cap for the first planning/patching attempt.
    pub initial_file_cap: usize,
    /// Candidate cap for the forced-edit retry.
    pub wide_file_cap: usize,
    /// Files larger than this are left out of the agent context entirely.
    pub max_file_bytes: usize,
    /// Remote keyword searches per request.
    pub search_token_cap: usize,
    pub entry_file_cap: usize,
    /// Extra files pulled in by import expansion.
    pub expansion_cap: usize,
    /// Paths listed to the agent as "available".
    pub max_listed_paths: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutSettings {
    /// End-to-end deadline for a planning or patching phase.
    pub phase_secs: u64,
    /// Per-request timeout for generation agent calls.
    pub agent_request_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PreviewSettings {
    pub attempts: u32,
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitSettings {
    pub base_branch: String,
    pub branch_prefix: String,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            frontend_root: "frontend".to_string(),
            allowed_prefixes: Vec::new(),
            denylist_prefixes: vec![
                ".github".to_string(),
                ".gitlab".to_string(),
                "infra".to_string(),
                "backend".to_string(),
            ],
            content_scan: true,
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            initial_file_cap: 12,
            wide_file_cap: 24,
            max_file_bytes: 60_000,
            search_token_cap: 4,
            entry_file_cap: 4,
            expansion_cap: 8,
            max_listed_paths: 400,
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            phase_secs: 180,
            agent_request_secs: 120,
        }
    }
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay_secs: 15,
        }
    }
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            branch_prefix: "markup/".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            guard: GuardSettings::default(),
            resolver: ResolverSettings::default(),
            timeouts: TimeoutSettings::default(),
            preview: PreviewSettings::default(),
            git: GitSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if normalize_prefix(&self.guard.frontend_root).is_empty() {
            return Err(anyhow!("guard.frontend_root must be a non-empty path"));
        }
        let r = &self.resolver;
        if r.initial_file_cap == 0 {
            return Err(anyhow!("resolver.initial_file_cap must be > 0"));
        }
        if r.wide_file_cap < r.initial_file_cap {
            return Err(anyhow!(
                "resolver.wide_file_cap must be >= resolver.initial_file_cap"
            ));
        }
        if r.max_file_bytes == 0 {
            return Err(anyhow!("resolver.max_file_bytes must be > 0"));
        }
        if r.max_listed_paths == 0 {
            return Err(anyhow!("resolver.max_listed_paths must be > 0"));
        }
        if self.timeouts.phase_secs == 0 || self.timeouts.agent_request_secs == 0 {
            return Err(anyhow!("timeouts must be > 0"));
        }
        if self.git.base_branch.trim().is_empty() {
            return Err(anyhow!("git.base_branch must be non-empty"));
        }
        Ok(())
    }

    /// Guard policy for one validation call.
    pub fn guard_config(&self, overrides: &GuardOverrides) -> GuardConfig {
        GuardConfig::new(
            &self.guard.frontend_root,
            &self.guard.allowed_prefixes,
            &self.guard.denylist_prefixes,
        )
        .with_overrides(overrides)
    }

    /// Normalized frontend root.
    pub fn frontend_root(&self) -> String {
        normalize_prefix(&self.guard.frontend_root)
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.phase_secs)
    }

    pub fn agent_request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.agent_request_secs)
    }

    pub fn preview_delay(&self) -> Duration {
        Duration::from_secs(self.preview.delay_secs)
    }

    /// Apply `MARKUP_*` overrides from an environment lookup, then revalidate.
    ///
    /// List values are comma-separated.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("MARKUP_FRONTEND_ROOT") {
            self.guard.frontend_root = root;
        }
        if let Some(raw) = lookup("MARKUP_ALLOWED_PREFIXES") {
            self.guard.allowed_prefixes = split_csv(&raw);
        }
        if let Some(raw) = lookup("MARKUP_DENYLIST_PREFIXES") {
            self.guard.denylist_prefixes = split_csv(&raw);
        }
        if let Some(branch) = lookup("MARKUP_BASE_BRANCH") {
            self.git.base_branch = branch;
        }
        self.validate()
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
