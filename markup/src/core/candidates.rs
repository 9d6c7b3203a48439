//! Candidate file selection for the generation agent.
//!
//! No structural index of the target codebase exists, so selection is a set of
//! cheap heuristics over the path listing. Each heuristic contributes an
//! ordered list; [`select_candidates`] merges them by priority, deduplicates,
//! and caps the result. Selection never comes back empty for a non-empty
//! listing.

use crate::core::guard::is_under;
use crate::core::tokens::expand_synonyms;

/// Extensions considered frontend source or style files.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "tsx", "ts", "jsx", "js", "mjs", "vue", "svelte", "css", "scss", "sass", "less", "html",
];

/// Conventional app and router entry names (matched on the file stem).
const ENTRY_STEMS: &[&str] = &["app", "main", "index", "routes", "router"];

/// Path fragments that usually indicate a routed page.
const ROUTE_HINTS: &[&str] = &["page", "product", "route", "view", "screen"];

/// Last-resort substrings when no signal token matches any path.
const GENERIC_KEYWORDS: &[&str] = &[
    "app", "page", "layout", "home", "index", "header", "main", "style", "component",
];

const TOKEN_WEIGHT: usize = 2;
const HINT_WEIGHT: usize = 1;

/// Inputs for one selection pass.
#[derive(Debug, Clone, Copy)]
pub struct CandidateInputs<'a> {
    /// Signal tokens from the request (see `tokens::signal_tokens`).
    pub signal: &'a [String],
    /// Source listing under the frontend root.
    pub paths: &'a [String],
    /// Paths that must come first (plan targets), filtered to the listing.
    pub priority: &'a [String],
    /// Remote keyword search hits, in search order.
    pub search_hits: &'a [String],
    pub max_files: usize,
    pub entry_file_cap: usize,
}

/// Keep listing entries under `root` with a frontend source extension.
pub fn source_paths(paths: &[String], root: &str) -> Vec<String> {
    paths
        .iter()
        .filter(|path| root.is_empty() || is_under(path, root))
        .filter(|path| has_source_extension(path))
        .cloned()
        .collect()
}

pub fn has_source_extension(path: &str) -> bool {
    let name = file_name(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        _ => false,
    }
}

/// Merge all heuristics into one ordered, deduplicated, capped set.
pub fn select_candidates(inputs: &CandidateInputs<'_>) -> Vec<String> {
    let in_listing = |path: &&String| inputs.paths.contains(path);
    let priority: Vec<String> = inputs.priority.iter().filter(in_listing).cloned().collect();
    let hits: Vec<String> = inputs.search_hits.iter().filter(in_listing).cloned().collect();

    let groups = [
        priority,
        hits,
        entry_files(inputs.paths, inputs.entry_file_cap),
        name_matches(inputs.paths, inputs.signal),
        scored_paths(inputs.paths, inputs.signal, inputs.max_files),
    ];

    let mut selected: Vec<String> = Vec::new();
    for path in groups.into_iter().flatten() {
        if selected.len() >= inputs.max_files {
            break;
        }
        if !selected.contains(&path) {
            selected.push(path);
        }
    }
    selected
}

/// Files whose stem is a conventional entry name, shallowest first.
pub fn entry_files(paths: &[String], cap: usize) -> Vec<String> {
    let mut entries: Vec<&String> = paths
        .iter()
        .filter(|path| ENTRY_STEMS.contains(&file_stem(path).as_str()))
        .collect();
    entries.sort_by_key(|path| path.matches('/').count());
    entries.into_iter().take(cap).cloned().collect()
}

/// Files whose name contains a signal token or one of its synonyms.
///
/// Direct token matches rank ahead of synonym matches. For `index.*` files the
/// parent directory name stands in for the stem.
pub fn name_matches(paths: &[String], signal: &[String]) -> Vec<String> {
    let expanded: Vec<(String, bool)> = signal
        .iter()
        .flat_map(|token| {
            expand_synonyms(token)
                .into_iter()
                .enumerate()
                .map(|(i, term)| (term, i == 0))
        })
        .filter(|(term, _)| term.len() >= 3)
        .collect();

    let mut ranked: Vec<(usize, &String)> = Vec::new();
    for path in paths {
        let names = match_names(path);
        let mut best: Option<usize> = None;
        for (term, direct) in &expanded {
            if names.iter().any(|name| name.contains(term.as_str())) {
                let rank = if *direct { 0 } else { 1 };
                best = Some(best.map_or(rank, |b| b.min(rank)));
            }
        }
        if let Some(rank) = best {
            ranked.push((rank, path));
        }
    }
    ranked.sort_by_key(|(rank, _)| *rank);
    ranked.into_iter().map(|(_, path)| path.clone()).collect()
}

/// Score-ranked paths with the generic and prefix fallbacks.
pub fn scored_paths(paths: &[String], signal: &[String], limit: usize) -> Vec<String> {
    let mut scored: Vec<(usize, &String)> = paths
        .iter()
        .map(|path| (score_path(path, signal), path))
        .filter(|(score, _)| *score > 0)
        .collect();
    if !scored.is_empty() {
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        return scored
            .into_iter()
            .take(limit)
            .map(|(_, path)| path.clone())
            .collect();
    }

    let generic: Vec<String> = paths
        .iter()
        .filter(|path| {
            let lower = path.to_lowercase();
            GENERIC_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .take(limit)
        .cloned()
        .collect();
    if !generic.is_empty() {
        return generic;
    }

    paths.iter().take(limit).cloned().collect()
}

/// Weighted count of signal tokens and route hints contained in `path`.
pub fn score_path(path: &str, signal: &[String]) -> usize {
    let lower = path.to_lowercase();
    let token_hits = signal
        .iter()
        .filter(|token| lower.contains(token.as_str()))
        .count();
    let hint_hits = ROUTE_HINTS.iter().filter(|hint| lower.contains(*hint)).count();
    token_hits * TOKEN_WEIGHT + hint_hits * HINT_WEIGHT
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn file_stem(path: &str) -> String {
    let name = file_name(path);
    name.split('.').next().unwrap_or(name).to_lowercase()
}

fn match_names(path: &str) -> Vec<String> {
    let stem = file_stem(path);
    let mut names = vec![stem.clone()];
    if stem == "index" {
        let mut segments = path.rsplit('/');
        segments.next();
        if let Some(parent) = segments.next() {
            names.push(parent.to_lowercase());
        }
    }
    names
}
