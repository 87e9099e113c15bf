//! fsgrade CLI entrypoint.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

use fsgrade::{
    CmdRunner, Config, ExitStatus, GradeOptions, LaunchTemplate, ScenarioResult, find_group, grade,
    run_empty_workdir, run_scenario,
};

#[derive(Debug, Parser)]
#[command(name = "fsgrade")]
#[command(about = "model-based conformance grading for file-serving HTTP servers")]
struct Cli {
    /// Path to config file. Missing configs are treated as "defaults".
    #[arg(long, global = true, default_value = "fsgrade.toml")]
    config: PathBuf,

    /// Log level.
    #[arg(long, global = true, default_value = "info")]
    log: String,

    /// Machine-readable output to stdout (JSON).
    #[arg(long, global = true)]
    json: bool,

    /// Launch template override.
    #[arg(long, global = true)]
    template: Option<PathBuf>,

    /// Run the tested server in a container.
    #[arg(long, global = true)]
    container: bool,

    /// Discard the tested server's stdout/stderr.
    #[arg(long, global = true)]
    quiet_server: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full grading ladder
    Grade {
        /// Substring filter on group names (e.g. "G4").
        #[arg(long)]
        filter: Option<String>,

        /// Offset added to every scenario seed; 0 is the canonical run.
        #[arg(long, default_value_t = 0)]
        seed_offset: u64,
    },

    /// Run a single scenario with a group's generator profile
    Run {
        /// Group name, e.g. "G4".
        #[arg(long)]
        group: String,

        /// Scenario seed.
        #[arg(long)]
        seed: u64,
    },

    /// Check the empty-working-directory exit contract
    EmptyWorkdir {
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Generate an environment and print its stats
    Env {
        /// Group name whose environment profile to use, e.g. "G1".
        #[arg(long)]
        group: String,

        #[arg(long)]
        seed: u64,

        /// Also materialize the tree under this directory.
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_tracing(&cli.log) {
        // Tracing is best-effort; if it fails, we still continue.
        eprintln!("warning: failed to init tracing: {err:#}");
    }

    let mut config = Config::load_optional(&cli.config);
    if let Some(template) = &cli.template {
        if cli.container {
            config.container_tmpl = template.clone();
        } else {
            config.launch_tmpl = template.clone();
        }
    }
    if cli.container {
        config.use_container = true;
    }
    if cli.quiet_server {
        config.suppress_server_output = true;
    }

    match run_command(&cli, &config) {
        Ok(code) => code,
        Err(err) => print_error_and_exit(&cli, err),
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn load_runner(config: &Config) -> anyhow::Result<CmdRunner> {
    let template = LaunchTemplate::load(config.template_path())?;
    Ok(CmdRunner::new(
        template,
        config.use_container,
        config.suppress_server_output,
    ))
}

fn run_command(cli: &Cli, config: &Config) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Command::Grade {
            filter,
            seed_offset,
        } => {
            let runner = load_runner(config)?;
            let summary = grade(
                config,
                &runner,
                &GradeOptions {
                    filter: filter.clone(),
                    seed_offset: *seed_offset,
                },
            )?;
            if cli.json {
                print_json(&summary)?;
            } else {
                println!("{}", summary.pretty());
            }
            Ok(exit_code_for_status(summary.status))
        }

        Command::Run { group, seed } => {
            let spec = find_group(group, config.use_container)
                .ok_or_else(|| anyhow::anyhow!("unknown group {group:?}"))?;
            let runner = load_runner(config)?;
            let result = run_scenario(config, &runner, &spec.env, &spec.queries, *seed)?;
            print_scenario_result(cli, &result)?;
            Ok(exit_code_for_status(result.status))
        }

        Command::EmptyWorkdir { seed } => {
            let runner = load_runner(config)?;
            let result = run_empty_workdir(&runner, *seed)?;
            print_scenario_result(cli, &result)?;
            Ok(exit_code_for_status(result.status))
        }

        Command::Env { group, seed, write } => {
            let spec = find_group(group, config.use_container)
                .ok_or_else(|| anyhow::anyhow!("unknown group {group:?}"))?;
            let env = spec.env.generate(*seed);
            if let Some(root) = write {
                env.write_to_disk(root)?;
            }
            let stats = env.stats();
            let out = serde_json::json!({
                "seed": seed,
                "files": stats.files,
                "dirs": stats.dirs,
                "totalSize": stats.size,
                "filePaths": stats.file_paths,
                "dirPaths": stats.dir_paths,
            });
            print_json(&out)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_scenario_result(cli: &Cli, result: &ScenarioResult) -> anyhow::Result<()> {
    if cli.json {
        print_json(result)?;
        return Ok(());
    }
    println!(
        "scenario {}: {:?} ({} queries run, {} skipped)",
        result.seed, result.status, result.queries_run, result.queries_skipped
    );
    for finding in &result.findings {
        println!("- {:?}: {}: {}", finding.kind, finding.title, finding.message);
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_error_and_exit(cli: &Cli, err: anyhow::Error) -> ExitCode {
    let msg = format!("{err:#}");
    if cli.json {
        let out = serde_json::json!({
            "status": "error",
            "message": msg,
        });
        println!("{out}");
    } else {
        eprintln!("{msg}");
    }
    ExitCode::from(2)
}

fn exit_code_for_status(status: ExitStatus) -> ExitCode {
    match status {
        ExitStatus::Pass => ExitCode::SUCCESS,
        ExitStatus::Fail => ExitCode::from(1),
        ExitStatus::Error => ExitCode::from(2),
    }
}
