//! The parser contract, plus the minimal line parser the CLI ships with.
//!
//! The full grammar and AST construction live outside this crate; the
//! engine consumes the [`Parser`] interface. [`LineParser`] covers a small
//! line-oriented subset (`/var`, `/let`, `/show`, `/run {...}`, `/export`,
//! comments, plain Markdown) so the shipped binary can evaluate simple
//! documents without the external toolchain; anything richer needs a real
//! parser wired through the runtime handles.

use serde_json::Value;

use crate::ast::{
    Directive, Document, Expression, FieldAccess, Node, SourceLocation, TemplateLiteral,
    TemplateSegment, VariableReference, WithOptions,
};
use crate::error::MlldError;

/// `strict` requires every directive to be well-formed; `loose` permits
/// recovery for editor tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    #[default]
    Strict,
    Loose,
}

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl From<ParseError> for MlldError {
    fn from(error: ParseError) -> Self {
        MlldError::Parse {
            message: error.message,
            location: error.location,
        }
    }
}

pub trait Parser: Send + Sync + std::fmt::Debug {
    fn parse(&self, source: &str, mode: ParseMode) -> Result<Document, ParseError>;
}

/// Placeholder for embedders that supply pre-built documents; any attempt
/// to parse module source text fails cleanly.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullParser;

impl Parser for NullParser {
    fn parse(&self, _source: &str, _mode: ParseMode) -> Result<Document, ParseError> {
        Err(ParseError {
            message: "no parser wired into the runtime".to_string(),
            location: None,
        })
    }
}

/// Minimal line-oriented parser.
///
/// One directive per line; values are JSON literals, backtick or `[[...]]`
/// templates with `@var` interpolation, `@name` references with dotted
/// fields, or `<path>` loads. In strict mode a directive line this subset
/// cannot parse is an error; loose mode passes it through as text.
#[derive(Debug, Default, Clone, Copy)]
pub struct LineParser;

impl Parser for LineParser {
    fn parse(&self, source: &str, mode: ParseMode) -> Result<Document, ParseError> {
        let mut nodes = Vec::new();
        let mut offset = 0usize;
        for (index, line) in source.lines().enumerate() {
            let location = SourceLocation::new(index as u32 + 1, 1, offset);
            offset += line.len() + 1;
            let trimmed = line.trim_start();

            if trimmed.starts_with(">>") {
                nodes.push(Node::Comment {
                    content: trimmed.trim_start_matches(">>").trim().to_string(),
                    location,
                });
                continue;
            }
            if trimmed.starts_with('/') {
                match parse_directive_line(trimmed, location.clone()) {
                    Ok(directive) => {
                        nodes.push(Node::Directive(directive));
                        continue;
                    }
                    Err(error) if mode == ParseMode::Strict => return Err(error),
                    Err(_) => {}
                }
            }
            nodes.push(Node::Text {
                content: format!("{line}\n"),
                location,
            });
        }
        Ok(Document::new(nodes))
    }
}

fn parse_directive_line(line: &str, location: SourceLocation) -> Result<Directive, ParseError> {
    let fail = |message: String| ParseError {
        message,
        location: Some(location.clone()),
    };

    if let Some(rest) = line.strip_prefix("/var ") {
        let (name, labels, expr) = parse_binding(rest, &location)?;
        return Ok(Directive::Var {
            name,
            labels,
            expr,
            location,
        });
    }
    if let Some(rest) = line.strip_prefix("/let ") {
        let (name, labels, expr) = parse_binding(rest, &location)?;
        return Ok(Directive::Let {
            name,
            labels,
            expr,
            location,
        });
    }
    if let Some(rest) = line.strip_prefix("/show ") {
        let expr = parse_value(rest, &location)?;
        return Ok(Directive::Show {
            expr,
            options: WithOptions::default(),
            location,
        });
    }
    if let Some(rest) = line.strip_prefix("/run ") {
        let body = rest.trim();
        let inner = body
            .strip_prefix('{')
            .and_then(|b| b.strip_suffix('}'))
            .ok_or_else(|| fail("/run expects a braced command: /run {cmd}".to_string()))?;
        return Ok(Directive::Run {
            expr: Expression::Command(scan_template(inner.trim())),
            options: WithOptions::default(),
            location,
        });
    }
    if let Some(rest) = line.strip_prefix("/export ") {
        let inner = rest
            .trim()
            .strip_prefix('{')
            .and_then(|b| b.strip_suffix('}'))
            .ok_or_else(|| fail("/export expects a name list: /export { a, b }".to_string()))?;
        let names = inner
            .split(',')
            .map(|n| n.trim().trim_start_matches('@').to_string())
            .filter(|n| !n.is_empty())
            .collect();
        return Ok(Directive::Export { names, location });
    }

    let keyword = line.split_whitespace().next().unwrap_or(line);
    Err(fail(format!(
        "the line parser does not support `{keyword}`; wire a full parser for this document"
    )))
}

/// `[labels...] @name = value`.
fn parse_binding(
    rest: &str,
    location: &SourceLocation,
) -> Result<(String, Vec<String>, Expression), ParseError> {
    let (lhs, rhs) = rest.split_once('=').ok_or_else(|| ParseError {
        message: "expected `@name = value`".to_string(),
        location: Some(location.clone()),
    })?;

    let mut words: Vec<&str> = lhs.split_whitespace().collect();
    let name = match words.pop() {
        Some(word) if word.starts_with('@') && word.len() > 1 => {
            word.trim_start_matches('@').to_string()
        }
        _ => {
            return Err(ParseError {
                message: "the bound name must be written as @name".to_string(),
                location: Some(location.clone()),
            });
        }
    };
    let labels = words.into_iter().map(str::to_string).collect();
    let expr = parse_value(rhs, location)?;
    Ok((name, labels, expr))
}

fn parse_value(text: &str, location: &SourceLocation) -> Result<Expression, ParseError> {
    let text = text.trim();

    if let Some(inner) = text.strip_prefix('`').and_then(|t| t.strip_suffix('`')) {
        return Ok(Expression::Template(scan_template(inner)));
    }
    if let Some(inner) = text.strip_prefix("[[").and_then(|t| t.strip_suffix("]]")) {
        return Ok(Expression::Template(scan_template(inner)));
    }
    if let Some(inner) = text.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        return Ok(Expression::Alligator(crate::ast::AlligatorPath::new(inner)));
    }
    if text.starts_with('@') {
        let template = scan_template(text);
        if let [TemplateSegment::Interpolation(reference)] = template.segments.as_slice() {
            return Ok(Expression::VarRef(reference.clone()));
        }
    }
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(Expression::Literal(value));
    }

    Err(ParseError {
        message: format!("cannot parse value: {text}"),
        location: Some(location.clone()),
    })
}

/// Split template text into literal and `@var` interpolation segments.
///
/// `@@` stays in the text (the renderer unescapes it); a dot continues
/// into a field only when a bare identifier follows.
fn scan_template(text: &str) -> TemplateLiteral {
    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut buf = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '@' {
            if i + 1 < chars.len() && chars[i + 1] == '@' {
                buf.push_str("@@");
                i += 2;
                continue;
            }
            if i + 1 < chars.len() && is_ident_start(chars[i + 1]) {
                if !buf.is_empty() {
                    segments.push(TemplateSegment::Text(std::mem::take(&mut buf)));
                }
                i += 1;
                let identifier = read_ident(&chars, &mut i);
                let mut fields = Vec::new();
                while i + 1 < chars.len() && chars[i] == '.' && is_ident_start(chars[i + 1]) {
                    i += 1;
                    fields.push(FieldAccess::Field(read_ident(&chars, &mut i)));
                }
                segments.push(TemplateSegment::Interpolation(
                    VariableReference { identifier, fields },
                ));
                continue;
            }
        }
        buf.push(chars[i]);
        i += 1;
    }
    if !buf.is_empty() {
        segments.push(TemplateSegment::Text(buf));
    }
    TemplateLiteral::new(segments)
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn read_ident(chars: &[char], i: &mut usize) -> String {
    let mut ident = String::new();
    while *i < chars.len() && (chars[*i].is_ascii_alphanumeric() || chars[*i] == '_') {
        ident.push(chars[*i]);
        *i += 1;
    }
    ident
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bindings_shows_and_text() {
        let source = "# Title\n/var @name = \"World\"\n/show `Hi, @name!`\n";
        let document = LineParser.parse(source, ParseMode::Strict).unwrap();
        assert_eq!(document.nodes.len(), 3);
        assert!(matches!(document.nodes[0], Node::Text { .. }));
        assert!(matches!(
            document.nodes[1],
            Node::Directive(Directive::Var { .. })
        ));
        assert!(matches!(
            document.nodes[2],
            Node::Directive(Directive::Show { .. })
        ));
    }

    #[test]
    fn labels_sit_before_the_name() {
        let source = "/var secret @token = \"hunter2\"\n";
        let document = LineParser.parse(source, ParseMode::Strict).unwrap();
        match &document.nodes[0] {
            Node::Directive(Directive::Var { name, labels, .. }) => {
                assert_eq!(name, "token");
                assert_eq!(labels, &["secret"]);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn templates_interpolate_fields_and_escapes() {
        let template = scan_template("hint:@ctx.hint at user@@host");
        assert_eq!(template.segments.len(), 3);
        match &template.segments[1] {
            TemplateSegment::Interpolation(reference) => {
                assert_eq!(reference.identifier, "ctx");
                assert_eq!(reference.fields, vec![FieldAccess::Field("hint".into())]);
            }
            other => panic!("unexpected segment {other:?}"),
        }
        match &template.segments[2] {
            TemplateSegment::Text(text) => assert_eq!(text, " at user@@host"),
            other => panic!("unexpected segment {other:?}"),
        }
    }

    #[test]
    fn run_requires_braces() {
        let err = LineParser
            .parse("/run echo hi\n", ParseMode::Strict)
            .unwrap_err();
        assert!(err.message.contains("braced"));
        assert_eq!(err.location.as_ref().map(|l| l.line), Some(1));
    }

    #[test]
    fn unsupported_directives_error_in_strict_and_pass_in_loose() {
        let source = "/guard @g before op:show = allow\n";
        let err = LineParser.parse(source, ParseMode::Strict).unwrap_err();
        assert!(err.message.contains("/guard"));

        let document = LineParser.parse(source, ParseMode::Loose).unwrap();
        assert!(matches!(document.nodes[0], Node::Text { .. }));
    }

    #[test]
    fn exports_split_names() {
        let document = LineParser
            .parse("/export { a, @b }\n", ParseMode::Strict)
            .unwrap();
        match &document.nodes[0] {
            Node::Directive(Directive::Export { names, .. }) => {
                assert_eq!(names, &["a", "b"]);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }
}
