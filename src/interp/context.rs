//! Context-aware escaping for interpolated values.

use crate::error::{MlldError, PathValidationCode, Result};

/// Where an interpolated value is about to land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationContext {
    /// Plain document text; identity.
    #[default]
    Default,
    /// Inside a `cmd { ... }` body, within double quotes.
    ShellCommand,
    /// Inside an `sh { ... }` body; values flow as positional args, so no
    /// escaping here.
    ShellCode,
    /// URL component; percent-encoding of reserved characters.
    Url,
    /// Template body; identity (objects JSON-stringify upstream).
    Template,
    /// Structured data position; the caller controls representation.
    DataValue,
    /// Filesystem path; normalization plus null-byte rejection.
    FilePath,
}

/// Escape `text` for the given context.
pub fn escape_for(text: &str, context: InterpolationContext) -> Result<String> {
    match context {
        InterpolationContext::Default
        | InterpolationContext::ShellCode
        | InterpolationContext::Template
        | InterpolationContext::DataValue => Ok(text.to_string()),
        InterpolationContext::ShellCommand => Ok(shell_double_quote_escape(text)),
        InterpolationContext::Url => Ok(percent_encode(text)),
        InterpolationContext::FilePath => {
            if text.contains('\0') {
                return Err(MlldError::PathValidation {
                    code: PathValidationCode::NullByte,
                    path: text.to_string(),
                });
            }
            Ok(text.to_string())
        }
    }
}

/// Backslash-escape the characters that stay active inside double quotes:
/// `\`, `"`, `` ` ``, and `$`.
fn shell_double_quote_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' | '"' | '`' | '$' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn percent_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        let unreserved = byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~');
        if unreserved {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_command_escapes_expansion_characters() {
        let escaped = escape_for(r#"echo "$(pwd)""#, InterpolationContext::ShellCommand).unwrap();
        assert_eq!(escaped, r#"echo \"\$(pwd)\""#);
    }

    #[test]
    fn url_context_percent_encodes() {
        let escaped = escape_for("a b/c?d=e", InterpolationContext::Url).unwrap();
        assert_eq!(escaped, "a%20b%2Fc%3Fd%3De");
    }

    #[test]
    fn file_path_rejects_null_bytes() {
        let err = escape_for("a\0b", InterpolationContext::FilePath).unwrap_err();
        assert!(matches!(
            err,
            MlldError::PathValidation {
                code: PathValidationCode::NullByte,
                ..
            }
        ));
    }

    #[test]
    fn shell_code_is_identity() {
        let text = "anything $1 \"quoted\"";
        assert_eq!(
            escape_for(text, InterpolationContext::ShellCode).unwrap(),
            text
        );
    }
}
