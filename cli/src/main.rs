mod prompt;
mod test_runner;

use std::io::Write;
use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use codespan_reporting::diagnostic::Diagnostic;
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use tracing_subscriber::EnvFilter;

use questmark::{Document, SourceError};
use questvm::{Discard, ResolveError, Session, SessionOutcome, Snapshot, Value, Vm, quest_natives};

use crate::prompt::StdinChoices;

const SUBCOMMANDS: &[&str] = &["run", "test", "help"];

#[derive(Parser)]
#[command(name = "questmark", version, about = "Questmark story compiler and player")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile and play a story (.md / .qmd) or resume a VM snapshot (.json)
    Run(RunArgs),

    /// Run .test.md story tests
    Test(TestArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Story source or VM snapshot to load
    file: String,

    /// Write the loaded VM state as snapshot JSON to this path
    #[arg(short, long)]
    output: Option<String>,

    /// Load (and optionally write --output) without playing
    #[arg(long)]
    no_run: bool,

    /// Compile only, don't play (exit 0 if valid)
    #[arg(long)]
    check: bool,

    /// Print the compiled program listing
    #[arg(long)]
    listing: bool,

    /// List all state names in the story
    #[arg(long)]
    list_states: bool,

    /// Seed for randInt, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Suppress story output (choices are still prompted)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.md file or directory containing them
    path: String,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse_from(with_default_subcommand(std::env::args().collect()));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_ansi(!cli.no_color)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match cli.command {
        Command::Run(run_args) => do_run(run_args, cli.no_color).await,
        Command::Test(test_args) => {
            let path = Path::new(&test_args.path);
            if test_args.list_categories {
                test_runner::list_categories(path);
                return;
            }
            test_runner::run_tests(path, cli.no_color, &test_args.category).await
        }
    };
    process::exit(exit_code);
}

/// Inject "run" when the first positional arg is not a known subcommand, so
/// `questmark story.md` works like `questmark run story.md`.
fn with_default_subcommand(mut args: Vec<String>) -> Vec<String> {
    if let Some(pos) = args
        .iter()
        .skip(1)
        .position(|a| !a.starts_with('-'))
        .map(|p| p + 1)
    {
        if !SUBCOMMANDS.contains(&args[pos].as_str()) {
            args.insert(pos, "run".to_string());
        }
    }
    args
}

/// What a run input file holds, judged by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Source,
    Snapshot,
}

impl InputKind {
    fn of(path: &str) -> Option<Self> {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".json") {
            return Some(InputKind::Snapshot);
        }
        let stem = lower.strip_suffix(".html").unwrap_or(&lower);
        (stem.ends_with(".md") || stem.ends_with(".qmd")).then_some(InputKind::Source)
    }
}

async fn do_run(args: RunArgs, no_color: bool) -> i32 {
    let color_choice = if no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };
    let writer = StandardStream::stderr(color_choice);
    let config = term::Config::default();

    let Some(kind) = InputKind::of(&args.file) else {
        eprintln!(
            "error: '{}' needs a .md / .qmd (optionally .html) or .json extension",
            args.file
        );
        return 1;
    };

    let source = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", args.file, e);
            return 1;
        }
    };

    let mut files = SimpleFiles::new();
    let file_id = files.add(args.file.clone(), source.clone());
    let emit = |diagnostic: &Diagnostic<usize>| {
        let _ = term::emit_to_write_style(&mut writer.lock(), &config, &files, diagnostic);
    };

    let natives = Arc::new(quest_natives());
    let (vm, document) = match kind {
        InputKind::Source => {
            let (compiled, document) = match compile(&source, file_id) {
                Ok(pair) => pair,
                Err(error) => {
                    error.to_diagnostics(file_id).iter().for_each(emit);
                    return 1;
                }
            };
            for warning in &compiled.warnings {
                emit(&warning.to_diagnostic(file_id));
            }
            match Vm::new(Arc::new(compiled.program), natives) {
                Ok(vm) => (vm, Some(document)),
                Err(e) => {
                    eprintln!("error: {}", e);
                    return 1;
                }
            }
        }
        InputKind::Snapshot => {
            let loaded =
                Snapshot::from_json(&source).and_then(|snapshot| Vm::from_snapshot(snapshot, natives));
            match loaded {
                Ok(vm) => (vm, None),
                Err(e) => {
                    eprintln!("error: cannot load snapshot '{}': {}", args.file, e);
                    return 1;
                }
            }
        }
    };

    if args.check {
        eprintln!("ok: {} loaded successfully", args.file);
        return 0;
    }

    if args.listing {
        print!("{}", vm.program());
        return 0;
    }

    if args.list_states {
        match &document {
            Some(document) => print_states(document),
            None => {
                for (label, offset) in vm.program().labels() {
                    println!("{:>6}  {}", offset, label);
                }
            }
        }
        return 0;
    }

    if let Some(output) = &args.output {
        let written = vm
            .snapshot()
            .to_json()
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(output, json).map_err(|e| e.to_string()));
        if let Err(e) = written {
            eprintln!("error: cannot write '{}': {}", output, e);
            return 1;
        }
        tracing::debug!(path = %output, "wrote snapshot");
    }

    if args.no_run {
        return 0;
    }

    let vm = match args.seed {
        Some(seed) => vm.with_seed(seed),
        None => vm,
    };
    let vm = if args.quiet {
        vm.with_sink(Discard)
    } else {
        vm.with_sink(|value: Value| {
            let mut stdout = std::io::stdout().lock();
            let _ = write!(stdout, "{}", value);
            let _ = stdout.flush();
        })
    };

    let mut session = Session::new(vm, StdinChoices::new());
    match session.play().await {
        Ok(SessionOutcome::Completed) => 0,
        Ok(SessionOutcome::Aborted(ResolveError::Cancelled)) => {
            eprintln!();
            eprintln!("story cancelled");
            0
        }
        Ok(SessionOutcome::Aborted(reason)) => {
            eprintln!("error: {}", reason);
            1
        }
        Err(error) => {
            eprintln!("runtime error: {}", error);
            1
        }
    }
}

fn compile(source: &str, file_id: usize) -> Result<(questmark::Compiled, Document), SourceError> {
    let document = questmark::Parser::new(source.to_string(), file_id)
        .parse()
        .map_err(SourceError::Parse)?;
    let compiled = questmark::compile(&document)?;
    Ok((compiled, document))
}

fn print_states(document: &Document) {
    for state in &document.states {
        let options = state.options.len();
        if options == 0 {
            println!("# {}", state.name);
        } else {
            println!("# {} ({} option{})", state.name, options, if options == 1 { "" } else { "s" });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(with_default_subcommand(
            args.iter().map(|a| a.to_string()).collect(),
        ))
    }

    #[test]
    fn no_color_is_known_before_the_subcommand_runs() {
        let cli = parse(&["questmark", "--no-color", "story.md"]);
        assert!(cli.no_color);
        assert!(matches!(cli.command, Command::Run(ref run) if run.file == "story.md"));

        let cli = parse(&["questmark", "test", "stories", "--no-color"]);
        assert!(cli.no_color);
        assert!(matches!(cli.command, Command::Test(ref test) if test.path == "stories"));

        assert!(!parse(&["questmark", "story.md"]).no_color);
    }

    #[test]
    fn input_kind_follows_the_extension() {
        assert_eq!(InputKind::of("story.md"), Some(InputKind::Source));
        assert_eq!(InputKind::of("story.QMD"), Some(InputKind::Source));
        assert_eq!(InputKind::of("story.qmd.html"), Some(InputKind::Source));
        assert_eq!(InputKind::of("state.json"), Some(InputKind::Snapshot));
        assert_eq!(InputKind::of("state.json.html"), None);
        assert_eq!(InputKind::of("story.txt"), None);
    }
}
