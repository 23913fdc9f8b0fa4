//! Thin CLI over the evaluation engine.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser as ClapParser, ValueEnum};

use mlld::config::EngineOptions;
use mlld::diagnostics;
use mlld::interpreter::{Interpreter, InterpreterOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Markdown,
    Xml,
}

#[derive(ClapParser)]
#[command(name = "mlld")]
#[command(about = "Evaluate an mlld document")]
#[command(version)]
struct Cli {
    /// Source document to evaluate
    file: PathBuf,

    /// Output format for the final document
    #[arg(long, value_enum, default_value = "markdown")]
    format: OutputFormat,

    /// Write the document only to stdout, skipping any configured output
    /// destinations
    #[arg(long)]
    stdout: bool,

    /// Permissive parsing for editor tooling
    #[arg(long)]
    loose: bool,

    /// Permit absolute paths outside the project root
    #[arg(long)]
    allow_absolute: bool,

    /// Skip lock-file persistence
    #[arg(long)]
    ephemeral: bool,

    /// Trust all imports without prompting
    #[arg(long)]
    approve_all_imports: bool,

    /// Suppress stream:chunk events
    #[arg(long)]
    no_stream: bool,
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read {}: {err}", cli.file.display());
            return ExitCode::from(1);
        }
    };

    let options = InterpreterOptions {
        engine: EngineOptions {
            strict: !cli.loose,
            allow_absolute: cli.allow_absolute,
            ephemeral: cli.ephemeral,
            no_stream: cli.no_stream,
            approve_all_imports: cli.approve_all_imports,
            ..EngineOptions::default()
        },
        ..InterpreterOptions::default()
    };

    let start_dir = cli
        .file
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let interp = match Interpreter::bootstrap(&start_dir, options).await {
        Ok(interp) => interp,
        Err(err) => {
            eprintln!("{}", diagnostics::render_error(&err, None));
            return ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1));
        }
    };
    diagnostics::init_tracing(interp.handles().options.debug);

    if cli.stdout {
        // Only the final document goes to stdout; live stdout effects are
        // swallowed so they don't appear twice.
        interp
            .handles()
            .effects
            .set_stdio(Box::new(std::io::sink()), Box::new(std::io::stderr()));
    }

    match interp.run_source(&source).await {
        Ok(outcome) => {
            let rendered = match cli.format {
                OutputFormat::Markdown => outcome.document,
                OutputFormat::Xml => {
                    format!("<document>{}</document>\n", xml_escape(&outcome.document))
                }
            };
            print!("{rendered}");
            interp.shutdown().await;
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}", diagnostics::render_error(&err, Some(&source)));
            interp.shutdown().await;
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}
