//! Shell boundary checks and quoting helpers.

/// Operators a `cmd { ... }` body may not contain; compositions belong in
/// `sh` bodies where the full shell is explicit.
const SHELL_OPERATORS: &[&str] = &["&&", "||", "2>&1", "|", ">", "<", ";"];

/// Scan literal command text for shell operators, ignoring quoted regions.
///
/// Interpolated values are escaped before they land in the command, so only
/// the template's own text can smuggle an operator in.
pub fn contains_shell_operator(text: &str) -> Option<&'static str> {
    let mut in_single = false;
    let mut in_double = false;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let ch = bytes[i] as char;
        match ch {
            '\\' if !in_single => {
                i += 2;
                continue;
            }
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            _ if !in_single && !in_double => {
                for op in SHELL_OPERATORS {
                    if text[i..].starts_with(op) {
                        return Some(op);
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Reject `cmd { ... }` templates whose literal text smuggles an operator.
pub fn check_command_template(template: &crate::ast::TemplateLiteral) -> crate::error::Result<()> {
    for segment in &template.segments {
        if let crate::ast::TemplateSegment::Text(text) = segment {
            if let Some(operator) = contains_shell_operator(text) {
                return Err(crate::error::MlldError::TypeMismatch {
                    expected: "a simple command (use an sh body for shell operators)".to_string(),
                    found: format!("shell operator `{operator}`"),
                    location: None,
                });
            }
        }
    }
    Ok(())
}

/// Single-quote a value for use as a positional shell argument.
///
/// Embedded single quotes close, escape, and reopen (`'\''`), matching how
/// shells themselves print safe words.
pub fn shell_quote_positional(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '/' | '.' | ':' | '-' | '=' | ','))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_outside_quotes_are_caught() {
        assert_eq!(contains_shell_operator("ls | wc -l"), Some("|"));
        assert_eq!(contains_shell_operator("a && b"), Some("&&"));
        assert_eq!(contains_shell_operator("cmd > out.txt"), Some(">"));
        assert_eq!(contains_shell_operator("run; other"), Some(";"));
    }

    #[test]
    fn quoted_operators_pass() {
        assert!(contains_shell_operator(r#"echo "a | b""#).is_none());
        assert!(contains_shell_operator("echo 'x > y'").is_none());
        assert!(contains_shell_operator("plain command").is_none());
    }

    #[test]
    fn positional_quoting_handles_embedded_quotes() {
        assert_eq!(shell_quote_positional("simple"), "simple");
        assert_eq!(shell_quote_positional("two words"), "'two words'");
        assert_eq!(shell_quote_positional("it's"), r#"'it'\''s'"#);
    }
}
