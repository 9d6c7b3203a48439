//! Heuristic import-graph expansion.
//!
//! References are extracted with regular expressions rather than a parser.
//! Misresolution only widens or narrows what the agent sees; committed output
//! is still gated by the path guard.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

/// Extensions tried, in order, when a reference omits one.
const RESOLVE_EXTENSIONS: &[&str] = &[
    "tsx", "ts", "jsx", "js", "mjs", "vue", "svelte", "css", "scss",
];

/// Prefixes treated as aliases for the frontend root.
const ROOT_ALIASES: &[&str] = &["@/", "~/"];

static IMPORT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // import x from "y"; import { a } from 'y'; export * from "y"
        r#"(?m)\b(?:import|export)\s[^'";]*?\bfrom\s*['"]([^'"]+)['"]"#,
        // import "y";
        r#"(?m)\bimport\s*['"]([^'"]+)['"]"#,
        // import("y")
        r#"\bimport\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
        // require("y")
        r#"\brequire\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
        // @import "y"; @import url(y);
        r#"@import\s+(?:url\(\s*)?['"]?([^'")\s;]+)"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("import pattern should be valid"))
    .collect()
});

/// Every module specifier referenced by `source`, in first-seen order.
pub fn parse_references(source: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for pattern in &*IMPORT_PATTERNS {
        for caps in pattern.captures_iter(source) {
            if let Some(m) = caps.get(1) {
                found.push((m.start(), m.as_str().to_string()));
            }
        }
    }
    found.sort_by_key(|(offset, _)| *offset);
    let mut refs: Vec<String> = Vec::new();
    for (_, reference) in found {
        if !refs.contains(&reference) {
            refs.push(reference);
        }
    }
    refs
}

/// Resolve `reference` made from `importer` against the known listing.
///
/// Relative references resolve against the importer's directory, alias
/// references against `frontend_root` (and its `src/`). Bare package
/// specifiers and anything not in `known` resolve to `None`.
pub fn resolve_reference(
    importer: &str,
    reference: &str,
    frontend_root: &str,
    known: &BTreeSet<String>,
) -> Option<String> {
    let reference = reference.split(['?', '#']).next().unwrap_or(reference);
    if reference.starts_with("./") || reference.starts_with("../") {
        let dir = importer.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let joined = join_normalized(dir, reference)?;
        return find_known(&joined, known);
    }
    for alias in ROOT_ALIASES {
        if let Some(rest) = reference.strip_prefix(alias) {
            let bases = [frontend_root.to_string(), join_root(frontend_root, "src")];
            return bases
                .iter()
                .filter_map(|base| join_normalized(base, rest))
                .find_map(|candidate| find_known(&candidate, known));
        }
    }
    None
}

/// Paths referenced by `files` that are known and not already in `files`.
pub fn expand_imports<'a>(
    files: impl IntoIterator<Item = (&'a str, &'a str)>,
    frontend_root: &str,
    known: &BTreeSet<String>,
) -> Vec<String> {
    let files: Vec<(&str, &str)> = files.into_iter().collect();
    let mut added: Vec<String> = Vec::new();
    for (path, source) in &files {
        for reference in parse_references(source) {
            let Some(resolved) = resolve_reference(path, &reference, frontend_root, known) else {
                continue;
            };
            let already_present = files.iter().any(|(p, _)| *p == resolved);
            if !already_present && !added.contains(&resolved) {
                added.push(resolved);
            }
        }
    }
    added
}

fn find_known(base: &str, known: &BTreeSet<String>) -> Option<String> {
    if known.contains(base) {
        return Some(base.to_string());
    }
    for ext in RESOLVE_EXTENSIONS {
        let candidate = format!("{base}.{ext}");
        if known.contains(&candidate) {
            return Some(candidate);
        }
    }
    for ext in RESOLVE_EXTENSIONS {
        let candidate = format!("{base}/index.{ext}");
        if known.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Join `rest` onto `dir`, folding `.` and `..`. Escaping above the
/// repository root yields `None`.
fn join_normalized(dir: &str, rest: &str) -> Option<String> {
    let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

fn join_root(root: &str, child: &str) -> String {
    if root.is_empty() {
        child.to_string()
    } else {
        format!("{root}/{child}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn parses_supported_forms_in_source_order() {
        let source = r#"
import React from "react";
import { Button, Card } from './ui';
import './global.css';
export { default as Nav } from "../nav/Nav";
const Lazy = React.lazy(() => import("./Lazy"));
const legacy = require('../legacy/util');
@import url("../styles/base.css");
"#;
        assert_eq!(
            parse_references(source),
            vec![
                "react",
                "./ui",
                "./global.css",
                "../nav/Nav",
                "./Lazy",
                "../legacy/util",
                "../styles/base.css",
            ]
        );
    }

    #[test]
    fn parses_multiline_named_imports() {
        let source = "import {\n  Header,\n  Footer,\n} from \"../components/layout\";\n";
        assert_eq!(parse_references(source), vec!["../components/layout"]);
    }

    #[test]
    fn relative_reference_resolves_with_extension_fallback() {
        let listing = known(&["frontend/components/Hero.tsx", "frontend/pages/Home.tsx"]);
        assert_eq!(
            resolve_reference(
                "frontend/pages/Home.tsx",
                "../components/Hero",
                "frontend",
                &listing
            ),
            Some("frontend/components/Hero.tsx".to_string())
        );
    }

    #[test]
    fn unknown_reference_is_dropped() {
        let listing = known(&["frontend/pages/Home.tsx"]);
        assert_eq!(
            resolve_reference(
                "frontend/pages/Home.tsx",
                "../components/Hero",
                "frontend",
                &listing
            ),
            None
        );
        assert_eq!(
            resolve_reference("frontend/pages/Home.tsx", "react", "frontend", &listing),
            None
        );
    }

    #[test]
    fn directory_reference_falls_back_to_index() {
        let listing = known(&["frontend/components/Nav/index.ts"]);
        assert_eq!(
            resolve_reference("frontend/App.tsx", "./components/Nav", "frontend", &listing),
            Some("frontend/components/Nav/index.ts".to_string())
        );
    }

    #[test]
    fn alias_resolves_against_root_then_src() {
        let listing = known(&["frontend/src/lib/theme.ts", "frontend/hooks/useCart.ts"]);
        assert_eq!(
            resolve_reference("frontend/src/App.tsx", "@/lib/theme", "frontend", &listing),
            Some("frontend/src/lib/theme.ts".to_string())
        );
        assert_eq!(
            resolve_reference("frontend/src/App.tsx", "~/hooks/useCart", "frontend", &listing),
            Some("frontend/hooks/useCart.ts".to_string())
        );
    }

    #[test]
    fn escaping_repository_root_is_dropped() {
        let listing = known(&["x.ts"]);
        assert_eq!(
            resolve_reference("frontend/a.ts", "../../../x", "frontend", &listing),
            None
        );
    }

    #[test]
    fn expansion_returns_only_new_known_paths() {
        let listing = known(&[
            "frontend/pages/Home.tsx",
            "frontend/components/Hero.tsx",
            "frontend/components/Cta.tsx",
        ]);
        let home = "import Hero from \"../components/Hero\";\nimport Cta from '../components/Cta';\nimport Missing from '../components/Missing';";
        let hero = "import Cta from './Cta';";
        let added = expand_imports(
            [
                ("frontend/pages/Home.tsx", home),
                ("frontend/components/Hero.tsx", hero),
            ],
            "frontend",
            &listing,
        );
        assert_eq!(added, vec!["frontend/components/Cta.tsx"]);
    }
}
