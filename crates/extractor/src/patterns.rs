//! Pattern groups and the technical-term lexicon.
//!
//! Each group carries a weight and maps to one artifact category. During
//! scoring a group contributes its weight **at most once** no matter how
//! many of its patterns match; the per-group match count still feeds
//! categorization.

use durandal_core::ArtifactType;
use regex_lite::Regex;
use tracing::warn;

/// A compiled family of related patterns.
pub struct PatternGroup {
    /// Group name, used as a tag and in `patterns_matched`.
    pub name: &'static str,

    /// Score contribution when at least one pattern matches.
    pub weight: f64,

    /// The artifact category this group votes for.
    pub category: ArtifactType,

    patterns: Vec<Regex>,
}

impl PatternGroup {
    /// Compile a group, skipping any pattern whose source fails to compile.
    fn compile(
        name: &'static str,
        weight: f64,
        category: ArtifactType,
        sources: &[&str],
    ) -> Self {
        let patterns = sources
            .iter()
            .filter_map(|src| match Regex::new(src) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(group = name, pattern = src, "Skipping invalid pattern: {e}");
                    None
                }
            })
            .collect();
        Self {
            name,
            weight,
            category,
            patterns,
        }
    }

    /// How many patterns in this group match the content.
    pub fn match_count(&self, content: &str) -> usize {
        self.patterns.iter().filter(|re| re.is_match(content)).count()
    }
}

/// Compile the full fixed family of pattern groups.
pub fn compile_groups() -> Vec<PatternGroup> {
    vec![
        PatternGroup::compile(
            "solutions",
            3.0,
            ArtifactType::Solution,
            &[
                r"(?i)\bsolution\b",
                r"(?i)\bfix(?:ed|es)?\b",
                r"(?i)\bresolved?\b",
                r"(?i)\bworkaround\b",
                r"(?i)\bthis (?:solves|fixes)\b",
            ],
        ),
        PatternGroup::compile(
            "explanations",
            2.0,
            ArtifactType::Explanation,
            &[
                r"(?i)\bbecause\b",
                r"(?i)\bthe reason\b",
                r"(?i)\bthis (?:means|works by)\b",
                r"(?i)\bin other words\b",
                r"(?i)\bunder the hood\b",
            ],
        ),
        PatternGroup::compile(
            "recommendations",
            2.0,
            ArtifactType::Recommendation,
            &[
                r"(?i)\byou should\b",
                r"(?i)\bI(?:'d| would)? recommend\b",
                r"(?i)\bsuggest(?:ed|ion)?\b",
                r"(?i)\bprefer(?:red|able)?\b",
                r"(?i)\bavoid\b",
            ],
        ),
        PatternGroup::compile(
            "configurations",
            3.0,
            ArtifactType::Configuration,
            &[
                r"(?i)\bconfig(?:uration)?\b",
                r"(?i)\bsettings?\b",
                r"(?i)\benvironment variable\b",
                r"(?i)\.(?:toml|ya?ml|json|ini|env)\b",
                r"(?i)\bset [A-Z_]{2,}=",
            ],
        ),
        PatternGroup::compile(
            "procedures",
            2.0,
            ArtifactType::Procedure,
            &[
                r"(?m)^\s*\d+[.)]\s",
                r"(?i)\bstep(?:s| \d)\b",
                r"(?i)\bfirst\b[\s\S]{0,200}\bthen\b",
                r"(?i)\bhow to\b",
                r"(?i)\bprocedure\b",
            ],
        ),
        PatternGroup::compile(
            "code_examples",
            3.0,
            ArtifactType::Code,
            &[
                r"```",
                r"(?m)^\s{4,}\S",
                r"(?i)\bfunction\s+\w+\s*\(",
                r"\bfn\s+\w+\s*\(",
                r"(?i)\b(?:const|let|var)\s+\w+\s*=",
            ],
        ),
        PatternGroup::compile(
            "errors_debugging",
            3.0,
            ArtifactType::Debugging,
            &[
                r"(?i)\berror\b",
                r"(?i)\bexception\b",
                r"(?i)\bstack trace\b",
                r"(?i)\bdebug(?:ging|ged)?\b",
                r"(?i)\bpanic(?:ked|s)?\b",
                r"(?i)\bfail(?:ed|ure|s)?\b",
            ],
        ),
        PatternGroup::compile(
            "important_notes",
            2.0,
            ArtifactType::ImportantNote,
            &[
                r"(?i)\bimportant\b",
                r"(?i)\bnote(?: that)?:",
                r"(?i)\bwarning\b",
                r"(?i)\bcaution\b",
                r"(?i)\bkeep in mind\b",
                r"(?i)\bremember\b",
            ],
        ),
    ]
}

/// Fixed tie-break order for categorization: earlier wins on equal counts.
pub const CATEGORY_ORDER: [ArtifactType; 9] = [
    ArtifactType::Solution,
    ArtifactType::Configuration,
    ArtifactType::Code,
    ArtifactType::Debugging,
    ArtifactType::Explanation,
    ArtifactType::Recommendation,
    ArtifactType::Procedure,
    ArtifactType::ImportantNote,
    ArtifactType::General,
];

/// The technical-term lexicon. Matched as whole lowercase word tokens.
pub const TECHNICAL_TERMS: [&str; 48] = [
    "api",
    "async",
    "authentication",
    "backend",
    "branch",
    "cache",
    "channel",
    "compiler",
    "concurrency",
    "container",
    "database",
    "deadlock",
    "debugger",
    "dependency",
    "deployment",
    "docker",
    "encryption",
    "endpoint",
    "framework",
    "frontend",
    "grpc",
    "http",
    "https",
    "index",
    "json",
    "kubernetes",
    "latency",
    "linux",
    "memory",
    "migration",
    "mutex",
    "oauth",
    "performance",
    "pointer",
    "query",
    "queue",
    "regex",
    "runtime",
    "schema",
    "server",
    "sql",
    "thread",
    "timeout",
    "tls",
    "token",
    "transaction",
    "websocket",
    "yaml",
];

/// Lowercase word tokens of a text (alphanumeric plus underscore runs).
pub fn word_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Technical terms appearing in the text, in lexicon order, deduplicated.
pub fn matched_technical_terms(text: &str) -> Vec<&'static str> {
    let tokens: std::collections::HashSet<String> = word_tokens(text).into_iter().collect();
    TECHNICAL_TERMS
        .iter()
        .filter(|term| tokens.contains(**term))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_groups_compile() {
        let groups = compile_groups();
        assert_eq!(groups.len(), 8);
        for group in &groups {
            assert!(
                group.match_count("") == 0,
                "empty content should match nothing in {}",
                group.name
            );
        }
    }

    #[test]
    fn solutions_group_matches_fix_language() {
        let groups = compile_groups();
        let solutions = groups.iter().find(|g| g.name == "solutions").unwrap();
        assert!(solutions.match_count("Here's the fix: set X=1") >= 1);
        assert!(solutions.match_count("the weather is nice") == 0);
    }

    #[test]
    fn procedures_group_matches_numbered_steps() {
        let groups = compile_groups();
        let procedures = groups.iter().find(|g| g.name == "procedures").unwrap();
        assert!(procedures.match_count("1. install\n2. configure\n3. run") >= 1);
    }

    #[test]
    fn code_group_matches_fenced_block() {
        let groups = compile_groups();
        let code = groups.iter().find(|g| g.name == "code_examples").unwrap();
        assert!(code.match_count("```rust\nfn main() {}\n```") >= 2);
    }

    #[test]
    fn technical_terms_match_whole_words() {
        let terms = matched_technical_terms("The database query hit a timeout.");
        assert!(terms.contains(&"database"));
        assert!(terms.contains(&"query"));
        assert!(terms.contains(&"timeout"));
        // "queryx" is not "query"
        assert!(matched_technical_terms("queryx").is_empty());
    }

    #[test]
    fn word_tokens_lowercase_and_split() {
        assert_eq!(word_tokens("Set DATABASE_URL=x!"), vec!["set", "database_url", "x"]);
    }
}
