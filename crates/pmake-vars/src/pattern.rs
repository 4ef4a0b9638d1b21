//! Shell-style word patterns for `:M`, `:N` and `make(...)`.
//!
//! `*` and `?` match any characters including `/`, `[...]` is a character
//! class (negated with `!` or `^`) and a backslash matches the next
//! character exactly. Braces have no special meaning.

use globset::{GlobBuilder, GlobMatcher};

#[derive(Debug, Clone)]
pub struct WordPattern {
    matcher: Option<GlobMatcher>,
    text: String,
}

impl WordPattern {
    pub fn new(pattern: &str) -> Self {
        let translated = translate(pattern);
        let built = GlobBuilder::new(&translated)
            .literal_separator(false)
            .backslash_escape(true)
            .build();
        let matcher = match built {
            Ok(glob) => Some(glob.compile_matcher()),
            Err(e) => {
                // Malformed classes only ever match themselves.
                tracing::debug!(pattern, error = %e, "pattern compared literally");
                None
            }
        };
        Self {
            matcher,
            text: pattern.to_string(),
        }
    }

    pub fn matches(&self, word: &str) -> bool {
        match &self.matcher {
            Some(m) => m.is_match(word),
            None => word == self.text,
        }
    }
}

/// Rewrite a make pattern into globset syntax.
fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;
    while let Some(c) = chars.next() {
        match c {
            '\\' if !in_class => {
                out.push('\\');
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '*' if !in_class => {
                out.push('*');
                while chars.peek() == Some(&'*') {
                    chars.next();
                }
            }
            '{' | '}' if !in_class => {
                out.push('\\');
                out.push(c);
            }
            '[' if !in_class => {
                in_class = true;
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('!');
                }
            }
            ']' if in_class => {
                in_class = false;
                out.push(']');
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(pattern: &str, word: &str) -> bool {
        WordPattern::new(pattern).matches(word)
    }

    #[test]
    fn star_crosses_slashes() {
        assert!(m("*.c", "src/main.c"));
        assert!(m("src/*", "src/a/b.c"));
        assert!(!m("*.c", "main.h"));
    }

    #[test]
    fn question_mark_and_classes() {
        assert!(m("a?c", "abc"));
        assert!(m("[ab]x", "bx"));
        assert!(!m("[!ab]x", "ax"));
        assert!(m("[^ab]x", "cx"));
        assert!(m("[a-c]", "b"));
    }

    #[test]
    fn braces_are_literal() {
        assert!(m("{a,b}", "{a,b}"));
        assert!(!m("{a,b}", "a"));
    }

    #[test]
    fn backslash_escapes() {
        assert!(m("a\\*", "a*"));
        assert!(!m("a\\*", "ab"));
    }

    #[test]
    fn repeated_stars_behave_as_one() {
        assert!(m("a**b", "axyzb"));
        assert!(m("**", ""));
    }

    #[test]
    fn malformed_class_matches_itself() {
        assert!(m("[abc", "[abc"));
        assert!(!m("[abc", "a"));
    }
}
