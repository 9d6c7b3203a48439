//! Path guard for proposed edits.
//!
//! Every edit is checked against a [`GuardConfig`]: it must live under an
//! allowed prefix, must not escape the repository, and must not touch a
//! denylisted prefix. Validation never short-circuits across edits so a caller
//! can report every problem in one pass.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::FileEdit;

/// Violation classes reported by [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    PathEmpty,
    PathTraversal,
    PathOutsideFrontend,
    PathDenylisted,
}

impl ViolationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationCode::PathEmpty => "PATH_EMPTY",
            ViolationCode::PathTraversal => "PATH_TRAVERSAL",
            ViolationCode::PathOutsideFrontend => "PATH_OUTSIDE_FRONTEND",
            ViolationCode::PathDenylisted => "PATH_DENYLISTED",
        }
    }
}

impl fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardViolation {
    pub code: ViolationCode,
    pub path: String,
    pub message: String,
}

/// Result of [`validate`]: `ok` is true iff `violations` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardReport {
    pub ok: bool,
    pub violations: Vec<GuardViolation>,
}

/// Aggregated failure raised by [`assert_valid`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render_failure(.violations))]
pub struct GuardFailure {
    pub violations: Vec<GuardViolation>,
}

fn render_failure(violations: &[GuardViolation]) -> String {
    let lines: Vec<String> = violations
        .iter()
        .map(|v| format!("{} {}: {}", v.code, v.path, v.message))
        .collect();
    format!("guard rejected {} edit(s):\n- {}", violations.len(), lines.join("\n- "))
}

/// Validation policy. Prefixes are stored normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    frontend_root: String,
    allowed_prefixes: Vec<String>,
    denylist_prefixes: Vec<String>,
}

/// Explicit per-call overrides applied on top of the process configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardOverrides {
    pub frontend_root: Option<String>,
    pub allowed_prefixes: Option<Vec<String>>,
    pub denylist_prefixes: Option<Vec<String>>,
}

impl GuardConfig {
    /// Build a config. Empty `allowed` falls back to `[frontend_root]`.
    pub fn new(frontend_root: &str, allowed: &[String], denylist: &[String]) -> Self {
        let frontend_root = normalize_prefix(frontend_root);
        let mut allowed_prefixes = normalize_prefixes(allowed);
        if allowed_prefixes.is_empty() && !frontend_root.is_empty() {
            allowed_prefixes.push(frontend_root.clone());
        }
        Self {
            frontend_root,
            allowed_prefixes,
            denylist_prefixes: normalize_prefixes(denylist),
        }
    }

    /// Rebuild with `overrides`. A new root without new allowed prefixes
    /// resets the allow-list to that root.
    pub fn with_overrides(&self, overrides: &GuardOverrides) -> Self {
        let root = overrides
            .frontend_root
            .as_deref()
            .unwrap_or(&self.frontend_root);
        let allowed = match (&overrides.allowed_prefixes, &overrides.frontend_root) {
            (Some(allowed), _) => allowed.clone(),
            (None, Some(_)) => Vec::new(),
            (None, None) => self.allowed_prefixes.clone(),
        };
        let denylist = overrides
            .denylist_prefixes
            .clone()
            .unwrap_or_else(|| self.denylist_prefixes.clone());
        Self::new(root, &allowed, &denylist)
    }

    pub fn frontend_root(&self) -> &str {
        &self.frontend_root
    }

    pub fn allowed_prefixes(&self) -> &[String] {
        &self.allowed_prefixes
    }

    pub fn denylist_prefixes(&self) -> &[String] {
        &self.denylist_prefixes
    }
}

/// Canonical repository-relative form of an edit path.
///
/// Backslashes become `/`, surrounding whitespace is trimmed, and leading `./`
/// and `/` are stripped until none remain, so the function is idempotent.
pub fn normalize_path(raw: &str) -> String {
    let replaced = raw.replace('\\', "/");
    let mut path = replaced.trim();
    while let Some(rest) = path.strip_prefix("./").or_else(|| path.strip_prefix('/')) {
        path = rest.trim_start();
    }
    path.to_string()
}

/// Normalize a configured prefix: path normalization plus trailing slashes removed.
pub fn normalize_prefix(raw: &str) -> String {
    normalize_path(raw).trim_end_matches('/').to_string()
}

fn normalize_prefixes(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|p| normalize_prefix(p))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Segment-exact prefix test: `frontend` matches `frontend/x`, not `frontend2/x`.
pub fn is_under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Classify every edit against `config`.
pub fn validate(edits: &[FileEdit], config: &GuardConfig) -> GuardReport {
    let mut violations = Vec::new();
    for edit in edits {
        check_path(&edit.path, config, &mut violations);
    }
    GuardReport {
        ok: violations.is_empty(),
        violations,
    }
}

/// Strict wrapper around [`validate`] used as the commit-time gate.
pub fn assert_valid(edits: &[FileEdit], config: &GuardConfig) -> Result<(), GuardFailure> {
    let report = validate(edits, config);
    if report.ok {
        return Ok(());
    }
    Err(GuardFailure {
        violations: report.violations,
    })
}

fn check_path(raw: &str, config: &GuardConfig, out: &mut Vec<GuardViolation>) {
    let path = normalize_path(raw);
    if path.is_empty() {
        out.push(GuardViolation {
            code: ViolationCode::PathEmpty,
            path,
            message: "edit path is empty".to_string(),
        });
        return;
    }
    if path.split('/').any(|segment| segment == "..") {
        out.push(GuardViolation {
            code: ViolationCode::PathTraversal,
            message: format!("path '{path}' contains a '..' segment"),
            path,
        });
        return;
    }
    if let Some(prefix) = config
        .denylist_prefixes
        .iter()
        .find(|prefix| is_under(&path, prefix))
    {
        out.push(GuardViolation {
            code: ViolationCode::PathDenylisted,
            message: format!("path '{path}' is under denylisted prefix '{prefix}'"),
            path: path.clone(),
        });
    }
    if !config
        .allowed_prefixes
        .iter()
        .any(|prefix| is_under(&path, prefix))
    {
        out.push(GuardViolation {
            code: ViolationCode::PathOutsideFrontend,
            message: format!(
                "path '{path}' is outside the allowed prefixes ({})",
                config.allowed_prefixes.join(", ")
            ),
            path,
        });
    }
}
