//! CLI binary for running dependency graphs and debugging expansions.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use pmake_job::{reraise, Build, Graph, SignalBridge};
use pmake_shell::Shell;
use pmake_types::{BuildConfig, MakeError};
use pmake_vars::{EvalMode, ScopeKind, Vars};

#[derive(Parser)]
#[command(name = "pmake", version, about = "Parallel make execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Make targets from a JSON graph description
    Build {
        /// Path to the graph .json file
        graph: PathBuf,

        /// Targets to make, and NAME=value command-line assignments
        args: Vec<String>,

        /// Maximum number of jobs to run at once
        #[arg(short, long, env = "PMAKE_JOBS")]
        jobs: Option<usize>,

        /// Keep going with unrelated targets after an error
        #[arg(short, long)]
        keep_going: bool,

        /// Run one command at a time (compat mode)
        #[arg(short = 'B', long)]
        compat: bool,

        /// Print commands without running them
        #[arg(short = 'n', long)]
        no_execute: bool,

        /// Do not echo commands
        #[arg(short, long)]
        silent: bool,

        /// Ignore command failures
        #[arg(short, long)]
        ignore_errors: bool,

        /// Environment variables override makefile variables
        #[arg(short = 'e', long)]
        env_first: bool,

        /// Undefined variables in commands are errors
        #[arg(long)]
        strict: bool,

        /// Remove the target of a failed command
        #[arg(long)]
        delete_on_error: bool,

        /// Keep job scripts instead of unlinking them
        #[arg(long)]
        keep_script: bool,

        /// Directory for job scripts
        #[arg(long, env = "TMPDIR")]
        temp_dir: Option<PathBuf>,
    },

    /// Expand a template and print the result
    Expand {
        /// Text to expand, e.g. '${SRCS:.c=.o}'
        template: String,

        /// Global variable assignment
        #[arg(short = 'D', value_name = "NAME=value")]
        define: Vec<String>,

        /// Undefined variables are errors
        #[arg(long)]
        strict: bool,
    },

    /// Print a shell description as JSON
    Shell {
        /// A `.SHELL` specification such as `name=ksh`; the default shell if omitted
        spec: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing; logs go to stderr so they never mix with job output.
    let filter = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Build {
            graph,
            args,
            jobs,
            keep_going,
            compat,
            no_execute,
            silent,
            ignore_errors,
            env_first,
            strict,
            delete_on_error,
            keep_script,
            temp_dir,
        } => {
            let mut config = BuildConfig::default();
            if let Ok(makeflags) = std::env::var("MAKEFLAGS") {
                config.apply_makeflags(&makeflags);
            }
            if let Some(jobs) = jobs {
                config.jobs = jobs.max(1);
            }
            config.keep_going |= keep_going;
            config.compat |= compat;
            config.no_execute |= no_execute;
            config.silent |= silent;
            config.ignore_errors |= ignore_errors;
            config.check_env_first |= env_first;
            config.strict |= strict;
            config.delete_on_error |= delete_on_error;
            config.keep_script |= keep_script;
            config.temp_dir = temp_dir;
            cmd_build(&graph, &args, config).await?;
        }
        Commands::Expand {
            template,
            define,
            strict,
        } => {
            cmd_expand(&template, &define, strict)?;
        }
        Commands::Shell { spec } => {
            cmd_shell(spec.as_deref())?;
        }
    }

    Ok(())
}

/// Split `NAME=value`. Anything else (including `=value`) is not an
/// assignment.
fn split_assignment(arg: &str) -> Option<(&str, &str)> {
    let (name, value) = arg.split_once('=')?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name, value))
}

async fn cmd_build(path: &Path, args: &[String], mut config: BuildConfig) -> anyhow::Result<()> {
    let graph = Graph::load(path).with_context(|| format!("cannot load {}", path.display()))?;

    let mut vars = Vars::from_process_env();
    vars.set_check_env_first(config.check_env_first);
    let mut targets = Vec::new();
    for arg in args {
        match split_assignment(arg) {
            Some((name, value)) => vars.set(ScopeKind::Cmdline, name, value),
            None => targets.push(arg.clone()),
        }
    }
    graph.apply_settings(&mut vars)?;
    if let Some(prefix) = vars.lookup(".MAKE.JOB.PREFIX", None) {
        config.job_prefix = prefix;
    }
    vars.dump();

    let signals = SignalBridge::install()?;
    let mut build = Build::new(config, graph, vars).with_signals(signals);
    match build.run(&targets).await {
        Ok(()) => Ok(()),
        Err(MakeError::Interrupted { signal }) => {
            reraise(signal);
            std::process::exit(128 + signal);
        }
        Err(e) => {
            match &e {
                MakeError::BuildFailed { stopped_in, .. } => {
                    eprintln!("pmake: stopped in {}", stopped_in.display());
                }
                other => {
                    tracing::error!(error = %other, "build aborted");
                    eprintln!("pmake: {other}");
                }
            }
            std::process::exit(e.exit_code());
        }
    }
}

fn cmd_expand(template: &str, define: &[String], strict: bool) -> anyhow::Result<()> {
    let mut vars = Vars::from_process_env();
    for def in define {
        let (name, value) =
            split_assignment(def).with_context(|| format!("not an assignment: {def}"))?;
        vars.set(ScopeKind::Global, name, value);
    }
    let mode = if strict {
        EvalMode::EvalDefined
    } else {
        EvalMode::Eval
    };
    let result = vars.subst_checked(template, None, mode);
    for diagnostic in vars.take_diagnostics() {
        eprintln!("pmake: {diagnostic}");
    }
    match result {
        Ok(text) => {
            println!("{text}");
            Ok(())
        }
        Err(e) => std::process::exit(e.exit_code()),
    }
}

fn cmd_shell(spec: Option<&str>) -> anyhow::Result<()> {
    let shell = match spec {
        Some(spec) => Shell::parse_spec(spec)?,
        None => Vars::new().shell().clone(),
    };
    println!("{}", serde_json::to_string_pretty(&shell)?);
    Ok(())
}
