use std::sync::OnceLock;

use regex::Regex;

fn cloze_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{c\d+::(.*?)\}\}").unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Case-fold, unwrap cloze markers, strip punctuation, collapse whitespace.
/// Both the fingerprint and the similarity measure run on this form, so a
/// punctuation-only edit never changes card identity.
pub fn normalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let unclozed = cloze_marker_re().replace_all(&lowered, "$1");
    let stripped: String = unclozed
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    whitespace_re().replace_all(&stripped, " ").trim().to_string()
}

pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut slug = String::new();
    let mut last_was_sep = true;
    for c in lowered.chars() {
        if c.is_alphanumeric() {
            slug.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    let slug = slug.trim_end_matches('_');
    slug.chars().take(30).collect::<String>().trim_end_matches('_').to_string()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Single-row Levenshtein. Operates on chars, not bytes.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous_row: Vec<usize> = (0..=b.len()).collect();
    for (i, c1) in a.iter().enumerate() {
        let mut current_row = vec![i + 1];
        for (j, c2) in b.iter().enumerate() {
            let insertions = previous_row[j + 1] + 1;
            let deletions = current_row[j] + 1;
            let substitutions = previous_row[j] + usize::from(c1 != c2);
            current_row.push(insertions.min(deletions).min(substitutions));
        }
        previous_row = current_row;
    }

    previous_row[b.len()]
}

/// 0.0 = completely different, 1.0 = identical.
pub fn similarity_ratio(s1: &str, s2: &str) -> f32 {
    if s1.is_empty() && s2.is_empty() {
        return 1.0;
    }
    if s1.is_empty() || s2.is_empty() {
        return 0.0;
    }

    let distance = levenshtein_distance(s1, s2);
    let max_len = s1.chars().count().max(s2.chars().count());
    1.0 - (distance as f32 / max_len as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_text("Hello World!"), "hello world");
        assert_eq!(normalize_text("  Multiple   Spaces  "), "multiple spaces");
    }

    #[test]
    fn normalize_unwraps_cloze_markers() {
        assert_eq!(normalize_text("{{c1::cloze}}"), "cloze");
        assert_eq!(normalize_text("The {{c1::mitochondria}} is small"), "the mitochondria is small");
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("abc", "abd"), 1);
        assert_eq!(levenshtein_distance("abc", "abcd"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity_ratio("", ""), 1.0);
        assert_eq!(similarity_ratio("abc", "abc"), 1.0);
        assert_eq!(similarity_ratio("abc", ""), 0.0);
        let sim = similarity_ratio("hello", "hallo");
        assert!(sim > 0.0 && sim < 1.0);
    }

    #[test]
    fn slugify_truncates_and_cleans() {
        assert_eq!(slugify("The Origin of Species"), "the_origin_of_species");
        assert_eq!(slugify("  Chapter: One!  "), "chapter_one");
        assert!(slugify("a very long chapter title that keeps going on").len() <= 30);
    }
}
