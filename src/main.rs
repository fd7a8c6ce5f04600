use clap::{ArgAction, Parser};
use miette::IntoDiagnostic;
use ncalc::session::{is_submission_complete, render_diagnostics};
use ncalc::{Backend, Outcome, Session, SessionOptions};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

/// Interactive ncalc prompt.
#[derive(Debug, Parser)]
#[command(name = "ncalc", version)]
struct Cli {
    /// How accepted submissions are executed
    #[arg(long, value_enum, default_value_t = Backend::Interpreter)]
    backend: Backend,

    /// Print the lowered form of every accepted submission
    #[arg(long)]
    dump_hlir: bool,

    /// Increase logging verbosity (-v: debug, -vv+: trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn directive_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "ncalc=debug",
        _ => "ncalc=trace",
    }
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(directive_for_verbosity(cli.verbose))),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut session = Session::new(SessionOptions {
        backend: cli.backend,
        dump_hlir: cli.dump_hlir,
    });
    let mut editor = DefaultEditor::new().into_diagnostic()?;
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { ">>> " } else { "... " };
        match editor.readline(prompt) {
            Ok(line) => {
                if buffer.is_empty() && line.trim().is_empty() {
                    continue;
                }
                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(&line);
                if !is_submission_complete(&buffer) {
                    continue;
                }

                let _ = editor.add_history_entry(buffer.as_str());
                let text = std::mem::take(&mut buffer);
                run(&mut session, &text);
            }
            Err(ReadlineError::Interrupted) => buffer.clear(),
            Err(ReadlineError::Eof) => break,
            Err(error) => return Err(error).into_diagnostic(),
        }
    }

    Ok(())
}

fn run(session: &mut Session, text: &str) {
    match session.submit(text) {
        Ok(Outcome::Evaluated(value)) => {
            if let Some(form) = session.last_form() {
                println!("{}", form);
            }
            println!("{}", value);
        }
        Ok(Outcome::Rejected(diagnostics)) => {
            eprint!("{}", render_diagnostics(text, &diagnostics));
        }
        Ok(Outcome::Unrecognized) => eprintln!("error: unrecognized input"),
        Err(error) => eprintln!("error: {}", error),
    }
}
