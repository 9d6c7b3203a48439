//! Content checks applied to replacement file bodies at commit time.
//!
//! The path guard decides where an edit may land; this scan rejects edits whose
//! body pulls server-side capabilities or secrets into frontend code, and file
//! types that never belong to a frontend change.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::core::guard::normalize_path;
use crate::core::types::FileEdit;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentFinding {
    pub path: String,
    pub rule: &'static str,
    pub description: String,
}

struct ContentRule {
    name: &'static str,
    description: &'static str,
    pattern: Regex,
}

fn rule(name: &'static str, description: &'static str, pattern: &str) -> ContentRule {
    ContentRule {
        name,
        description,
        pattern: RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("content rule pattern should be valid"),
    }
}

static CONTENT_RULES: LazyLock<Vec<ContentRule>> = LazyLock::new(|| {
    vec![
        rule(
            "fs_access",
            "Node.js filesystem access",
            r#"(?:require\(\s*|from\s+)['"](?:node:)?fs(?:/promises)?['"]"#,
        ),
        rule(
            "child_process",
            "child process execution",
            r#"(?:require\(\s*|from\s+)['"](?:node:)?child_process['"]|\bexecSync\s*\(|\bspawnSync\s*\("#,
        ),
        rule(
            "dynamic_eval",
            "dynamic code evaluation",
            r"\beval\s*\(|\bnew\s+Function\s*\(",
        ),
        rule(
            "hardcoded_secret",
            "hard-coded secret",
            r#"\b(?:password|secret|api_?key|access_?token)\s*[:=]\s*['"][^'"]{4,}['"]"#,
        ),
        rule(
            "env_access",
            "environment variable access",
            r"\bprocess\.env\.",
        ),
        rule(
            "sql_statement",
            "SQL statement",
            r"\b(?:DROP\s+TABLE|DELETE\s+FROM|INSERT\s+INTO)\b",
        ),
    ]
});

/// File names and suffixes that never belong to a frontend edit.
const BLOCKED_SUFFIXES: &[&str] = &[
    ".env", ".sh", ".sql", ".py", ".rb", ".go", ".java", ".yml", ".yaml", ".tf",
];
const BLOCKED_NAMES: &[&str] = &["Dockerfile", "docker-compose.yml", "docker-compose.yaml"];

/// Scan every edit; returns all findings (empty when clean).
pub fn scan(edits: &[FileEdit]) -> Vec<ContentFinding> {
    let mut findings = Vec::new();
    for edit in edits {
        let path = normalize_path(&edit.path);
        let name = path.rsplit('/').next().unwrap_or(&path);
        if BLOCKED_NAMES.contains(&name)
            || name.starts_with(".env")
            || BLOCKED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        {
            findings.push(ContentFinding {
                path: path.clone(),
                rule: "blocked_file_type",
                description: format!("'{name}' is not a frontend file type"),
            });
        }
        for rule in &*CONTENT_RULES {
            if rule.pattern.is_match(&edit.content) {
                findings.push(ContentFinding {
                    path: path.clone(),
                    rule: rule.name,
                    description: rule.description.to_string(),
                });
            }
        }
    }
    findings
}
