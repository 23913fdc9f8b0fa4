//! Human-readable error rendering and tracing setup.

use crate::error::MlldError;

/// Initialize the global tracing subscriber.
///
/// Filtering follows `RUST_LOG` when set; otherwise `debug` selects
/// engine-wide debug output and everything else stays at `warn`.
pub fn init_tracing(debug: bool) {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let default_filter = if debug { "mlld=debug" } else { "mlld=warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(ErrorLayer::default())
        .try_init();
}

/// Render an error with its source location and a snippet when the source
/// text is available.
pub fn render_error(error: &MlldError, source: Option<&str>) -> String {
    let mut out = format!("error: {error}");

    if let MlldError::Execution { stderr_tail, .. } = error {
        if !stderr_tail.is_empty() {
            out.push_str("\n--- stderr (tail) ---\n");
            out.push_str(stderr_tail.trim_end());
        }
    }

    let Some(location) = error.location() else {
        return out;
    };
    out.push_str(&format!("\n  at {location}"));

    if let Some(source) = source {
        if let Some(line) = source.lines().nth(location.line.saturating_sub(1) as usize) {
            out.push_str(&format!("\n  | {line}"));
            let caret_pad = " ".repeat(location.column.saturating_sub(1) as usize);
            out.push_str(&format!("\n  | {caret_pad}^"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourceLocation;

    #[test]
    fn renders_location_and_snippet() {
        let error = MlldError::VariableNotFound {
            name: "missing".into(),
            location: Some(SourceLocation::new(2, 6, 0)),
        };
        let source = "line one\n/show @missing\n";
        let rendered = render_error(&error, Some(source));
        assert!(rendered.contains("@missing"));
        assert!(rendered.contains("at 2:6"));
        assert!(rendered.contains("/show @missing"));
        assert!(rendered.contains("     ^"));
    }

    #[test]
    fn execution_errors_attach_stderr_tail() {
        let error = MlldError::Execution {
            exit: 2,
            stderr_tail: "boom\n".into(),
            command: "false".into(),
        };
        let rendered = render_error(&error, None);
        assert!(rendered.contains("stderr (tail)"));
        assert!(rendered.contains("boom"));
    }
}
