//! Document assembly from the effect log.

use super::effect::Effect;

/// Fold the effect log into the final document.
///
/// Only `doc` and `both` effects contribute, in emission order. Because the
/// log is the single source of truth, rendering the same log twice yields
/// the same document.
pub fn render_document(effects: &[Effect], normalize_blank_lines: bool) -> String {
    let mut out = String::new();
    for effect in effects {
        if effect.is_doc() {
            out.push_str(&effect.content);
        }
    }

    if normalize_blank_lines {
        out = collapse_blank_runs(&out);
    }

    // A Markdown document ends with exactly one newline.
    let trimmed = out.trim_end_matches('\n');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

/// Collapse runs of 3+ newlines to a single blank line.
fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newline_run = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                out.push('\n');
            }
        } else {
            newline_run = 0;
            out.push(ch);
        }
    }
    out
}
