//! Request tokenization for file targeting.

/// Generic request verbs and fillers that never identify a file.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "onto", "that", "this", "these", "those",
    "make", "change", "update", "modify", "edit", "set", "put", "use", "add", "remove",
    "delete", "replace", "move", "show", "hide", "display", "want", "would", "could",
    "should", "please", "can", "you", "our", "your", "its", "all", "some", "more", "less",
    "bit", "little", "new", "old", "now", "instead", "also", "just", "like", "look",
    "looks", "feel", "better", "nicer", "bigger", "smaller", "larger", "site", "website",
    "app", "thing", "there", "here", "when", "what", "where", "which", "will", "need",
    "needs", "have", "has", "are", "was", "not", "but", "any", "every", "each", "them",
];

/// UI region vocabulary: a request word on the left also matches file names
/// containing any of the words on the right.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("navbar", &["header", "nav", "menu", "topbar", "layout", "navigation"]),
    ("navigation", &["nav", "header", "menu", "sidebar"]),
    ("nav", &["header", "menu", "topbar", "navigation"]),
    ("header", &["nav", "navbar", "topbar", "layout"]),
    ("topbar", &["header", "nav", "navbar"]),
    ("menu", &["nav", "dropdown", "header"]),
    ("footer", &["bottom", "layout"]),
    ("sidebar", &["aside", "drawer", "sidenav", "layout"]),
    ("hero", &["banner", "landing", "jumbotron", "home"]),
    ("banner", &["hero", "announcement", "alert"]),
    ("homepage", &["home", "landing", "index", "hero"]),
    ("home", &["landing", "index", "hero"]),
    ("landing", &["home", "hero", "index"]),
    ("button", &["btn", "cta"]),
    ("cta", &["button", "btn"]),
    ("modal", &["dialog", "popup", "overlay"]),
    ("popup", &["modal", "dialog"]),
    ("card", &["tile", "item"]),
    ("form", &["input", "field", "signup", "login"]),
    ("login", &["signin", "auth"]),
    ("signup", &["register", "auth"]),
    ("logo", &["brand", "header"]),
    ("theme", &["tailwind", "globals", "colors", "styles"]),
    ("font", &["typography", "globals", "styles"]),
    ("pricing", &["plans", "price"]),
    ("cart", &["basket", "checkout"]),
];

/// Lowercase `text`, split on non-alphanumeric runs, drop tokens under 3 chars.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= 3)
        .map(str::to_string)
        .collect()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Signal tokens for a request: deduplicated, stopwords removed.
///
/// Falls back to the first `fallback_cap` unfiltered tokens when filtering
/// leaves nothing.
pub fn signal_tokens(request: &str, fallback_cap: usize) -> Vec<String> {
    let tokens = dedup(tokenize(request));
    let signal: Vec<String> = tokens
        .iter()
        .filter(|token| !is_stopword(token))
        .cloned()
        .collect();
    if signal.is_empty() {
        return tokens.into_iter().take(fallback_cap).collect();
    }
    signal
}

/// The token itself followed by its synonyms, without duplicates.
pub fn expand_synonyms(token: &str) -> Vec<String> {
    let mut terms = vec![token.to_string()];
    if let Some((_, extra)) = SYNONYMS.iter().find(|(word, _)| *word == token) {
        for term in *extra {
            if !terms.iter().any(|t| t == term) {
                terms.push((*term).to_string());
            }
        }
    }
    terms
}

fn dedup(tokens: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if !out.contains(&token) {
            out.push(token);
        }
    }
    out
}
