//! Title synthesis for extracted artifacts.

use durandal_core::ArtifactType;
use regex_lite::Regex;
use std::sync::OnceLock;

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#{1,6}\s+(.+)$").expect("static pattern"))
}

fn fix_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:solution|fix)\s*:\s*([^\n]{5,})").expect("static pattern"))
}

/// Pick a title for an artifact, first match wins:
///
/// 1. an explicit markdown header line
/// 2. a `solution:` / `fix:` phrase, truncated to 50 chars
/// 3. the user input, when 100 chars or shorter
/// 4. the first sentence between 20 and 100 chars
/// 5. `<type>: extracted <timestamp>`
pub fn suggest_title(
    content: &str,
    user_input: Option<&str>,
    artifact_type: ArtifactType,
) -> String {
    if let Some(caps) = header_re().captures(content) {
        let header = caps[1].trim();
        if !header.is_empty() {
            return truncate(header, 100);
        }
    }

    if let Some(caps) = fix_phrase_re().captures(content) {
        return truncate(caps[1].trim(), 50);
    }

    if let Some(input) = user_input {
        let input = input.trim();
        if !input.is_empty() && input.chars().count() <= 100 {
            return input.to_string();
        }
    }

    if let Some(sentence) = first_sentence(content) {
        return sentence;
    }

    format!(
        "{}: extracted {}",
        artifact_type,
        chrono::Utc::now().format("%Y-%m-%d %H:%M")
    )
}

/// The first sentence whose trimmed length lands in 20..=100 chars.
fn first_sentence(content: &str) -> Option<String> {
    content
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .find(|s| (20..=100).contains(&s.chars().count()))
        .map(String::from)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_wins() {
        let title = suggest_title(
            "# Fixing the build\nsolution: do the thing",
            Some("help"),
            ArtifactType::Solution,
        );
        assert_eq!(title, "Fixing the build");
    }

    #[test]
    fn fix_phrase_truncated_to_fifty() {
        let long_tail = "x".repeat(120);
        let content = format!("The fix: {long_tail}");
        let title = suggest_title(&content, None, ArtifactType::Solution);
        assert_eq!(title.chars().count(), 50);
        assert!(title.starts_with("xxx"));
    }

    #[test]
    fn short_user_input_used() {
        let title = suggest_title(
            "nothing here resembles a header or a sentence of the right shape",
            Some("how do I configure the cache?"),
            ArtifactType::Configuration,
        );
        assert_eq!(title, "how do I configure the cache?");
    }

    #[test]
    fn first_sentence_fallback() {
        let title = suggest_title(
            "tiny. This sentence is long enough to serve as a title. rest",
            None,
            ArtifactType::General,
        );
        assert_eq!(title, "This sentence is long enough to serve as a title");
    }

    #[test]
    fn timestamp_fallback_names_the_type() {
        let title = suggest_title("short", None, ArtifactType::Debugging);
        assert!(title.starts_with("debugging: extracted "));
    }
}
