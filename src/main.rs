//! delib CLI: run chain scripts against an operator library.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use deliberator::config::CoreConfig;
use deliberator::io::{Input, JsonSink, Source};
use deliberator::kernel::TimerKernel;
use deliberator::library::Library;
use deliberator::scheduler::Scheduler;
use deliberator::trace::LineTracer;

#[derive(Parser)]
#[command(name = "delib", version, about = "Deliberative action interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a chain script against a library.
    Run {
        /// Operator/rule library file.
        #[arg(long)]
        library: PathBuf,

        /// Chain script submitted as user input.
        #[arg(long)]
        script: PathBuf,

        /// TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Maximum number of ticks.
        #[arg(long, default_value = "1000")]
        ticks: u64,

        /// Write the directive trace to stdout.
        #[arg(long)]
        trace: bool,

        /// Write one JSON status line per tick to stdout.
        #[arg(long)]
        json: bool,

        /// Grounding functions served by a timer kernel (comma-separated).
        #[arg(long, default_value = "")]
        functions: String,

        /// Print definitions learned during the run.
        #[arg(long)]
        dump_learned: bool,
    },

    /// Parse a library and check that it re-renders identically.
    Check {
        #[arg(long)]
        library: PathBuf,
    },

    /// Re-render every definition of a library.
    Dump {
        #[arg(long)]
        library: PathBuf,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            library,
            script,
            config,
            ticks,
            trace,
            json,
            functions,
            dump_learned,
        } => {
            let config = match config {
                Some(path) => CoreConfig::load(&path)?,
                None => CoreConfig::default(),
            };
            let lib = Library::load(&library)?;
            let text = std::fs::read_to_string(&script).into_diagnostic()?;

            let mut core = Scheduler::new(config, lib)?;
            if trace {
                core = core.with_tracer(Box::new(LineTracer::new(std::io::stdout())));
            }
            if json {
                core = core.with_sink(Box::new(JsonSink::new(std::io::stdout())));
            }
            let names: Vec<&str> = functions
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            if !names.is_empty() {
                core.register_kernel(Box::new(TimerKernel::new(&names, 3)));
            }

            let id = core.submit(Input::chain(Source::User, text))?;
            let used = core.run_until_idle(ticks);
            match core.verdict(id) {
                Some(status) => eprintln!("finished after {used} ticks: {status:?}"),
                None => eprintln!("still running after {used} ticks"),
            }
            if dump_learned {
                print!("{}", core.context().lib.dump_learned());
            }
        }

        Commands::Check { library } => {
            let text = std::fs::read_to_string(&library).into_diagnostic()?;
            let lib = Library::parse(&text)?;
            if lib.render() != text {
                miette::bail!("library does not round trip: {}", library.display());
            }
            println!(
                "{}: {} operators, {} rules, round trip ok",
                library.display(),
                lib.op_count(),
                lib.rule_count()
            );
        }

        Commands::Dump { library } => {
            let lib = Library::load(&library)?;
            print!("{}", lib.render());
        }
    }

    Ok(())
}
