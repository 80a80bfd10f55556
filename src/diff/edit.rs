//! Word-level diff for IRC "edit" rendering (spec §4.3).
//!
//! Used purely for human-readable output — unlike [`crate::diff`]'s
//! teacher-grade file patch application, nothing here mutates state. Built
//! on `diffy`, the same diff crate the rest of this codebase's lineage uses
//! for unified file patches, applied instead to one-word-per-line input so
//! hunks fall on word boundaries.

use diffy::{create_patch, Line};

/// `diffy::Patch`/`Line` operate on newline-delimited lines, the way the
/// teacher's file-patch engine uses them; one word per line is what makes
/// the hunks here fall on word boundaries instead of whole-sentence ones.
fn one_word_per_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join("\n")
}

/// True when `old` and `new` tokenize to the same word sequence.
///
/// Matches the testable property `diff(a, a) = ∅`.
#[must_use]
pub fn is_unchanged(old: &str, new: &str) -> bool {
    let old_lines = one_word_per_line(old);
    let new_lines = one_word_per_line(new);
    create_patch(&old_lines, &new_lines).hunks().is_empty()
}

/// Render an edited message as `[edit] <context> **old → new** <context>`.
///
/// Tokenises on whitespace, aligns against the prior version, and collapses
/// to the shortest contiguous change window with one word of unchanged
/// context on either side. Returns `None` when the two strings tokenize
/// identically.
#[must_use]
pub fn render_edit(old: &str, new: &str) -> Option<String> {
    let old_lines = one_word_per_line(old);
    let new_lines = one_word_per_line(new);
    let patch = create_patch(&old_lines, &new_lines);
    let hunk = patch.hunks().first()?;

    let mut before_context: Option<&str> = None;
    let mut after_context: Option<&str> = None;
    let mut removed: Vec<&str> = Vec::new();
    let mut inserted: Vec<&str> = Vec::new();
    let mut past_change = false;

    for line in hunk.lines() {
        match line {
            Line::Context(word) => {
                if removed.is_empty() && inserted.is_empty() {
                    before_context = Some(word);
                } else if after_context.is_none() {
                    after_context = Some(word);
                    past_change = true;
                } else if !past_change {
                    // Multiple context lines before the change: keep only
                    // the one immediately adjacent to it.
                    before_context = Some(word);
                }
            }
            Line::Delete(word) => removed.push(word),
            Line::Insert(word) => inserted.push(word),
        }
    }

    if removed.is_empty() && inserted.is_empty() {
        return None;
    }

    let mut out = String::from("[edit] ");
    if let Some(word) = before_context {
        out.push_str(word);
        out.push(' ');
    }
    out.push_str("**");
    out.push_str(&removed.join(" "));
    out.push_str(" \u{2192} ");
    out.push_str(&inserted.join(" "));
    out.push_str("**");
    if let Some(word) = after_context {
        out.push(' ');
        out.push_str(word);
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_has_no_diff() {
        assert!(is_unchanged("the quick brown fox", "the quick brown fox"));
        assert!(render_edit("the quick brown fox", "the quick brown fox").is_none());
    }

    #[test]
    fn single_word_substitution_renders_with_context() {
        let rendered = render_edit("the quick brown fox", "the quick red fox").unwrap();
        assert_eq!(rendered, "[edit] quick **brown \u{2192} red** fox");
    }

    #[test]
    fn change_at_the_start_has_no_leading_context() {
        let rendered = render_edit("hello world", "goodbye world").unwrap();
        assert_eq!(rendered, "[edit] **hello \u{2192} goodbye** world");
    }

    #[test]
    fn change_at_the_end_has_no_trailing_context() {
        let rendered = render_edit("see you later", "see you soon").unwrap();
        assert_eq!(rendered, "[edit] you **later \u{2192} soon**");
    }
}
