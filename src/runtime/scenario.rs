//! One scenario end-to-end: generate → materialize → launch → probe →
//! replay queries → teardown.

use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng as _;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{
    CmdRunner, Config, Env, EnvGen, ExitSlot, ExitStatus, Finding, FindingKind, HarnessResult,
    QueriesGen, Query, RunOpts, ScenarioResult, free_port, gen_filename, probe_ready, rand_below,
    rand_index, send_query,
};

/// Domains a scenario may require the tested server to verify. The empty
/// entries keep domain verification off for most seeds.
const POSSIBLE_DOMAINS: &[&str] = &[
    "",
    "",
    "example.com",
    "files.example.org",
    "localhost",
    "static.test.net",
];

/// Removes the materialized tree at scenario end on every exit path.
struct TempTree {
    path: PathBuf,
}

impl Drop for TempTree {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Runs one full scenario. Setup failures abort with an error; verification
/// and readiness failures are findings in the returned result.
pub fn run_scenario(
    config: &Config,
    runner: &CmdRunner,
    env_gen: &EnvGen,
    queries_gen: &QueriesGen,
    seed: u64,
) -> HarnessResult<ScenarioResult> {
    let mut env = env_gen.generate(seed);
    let mut r = ChaCha20Rng::seed_from_u64(seed);

    let query_seeds: Vec<u64> = (0..queries_gen.count)
        .map(|_| rand_below(&mut r, 100_000))
        .collect();

    std::fs::create_dir_all(&config.temp_dir)?;
    let env_dir = config.temp_dir.join(gen_filename(&mut r, 16));
    if env_dir.exists() {
        // Stale leftovers from an aborted run.
        std::fs::remove_dir_all(&env_dir)?;
    }
    env.write_to_disk(&env_dir)?;
    let _cleanup = TempTree {
        path: env_dir.clone(),
    };
    let env_dir = std::fs::canonicalize(&env_dir)?;

    let port = free_port()?;
    let mut opts = RunOpts {
        port,
        working_directory: env_dir.to_string_lossy().to_string(),
        listen_addr: "0.0.0.0".to_string(),
        server_domain: String::new(),
        ..RunOpts::default()
    };
    if queries_gen.all_headers {
        opts.server_domain =
            POSSIBLE_DOMAINS[rand_index(&mut r, POSSIBLE_DOMAINS.len())].to_string();
    }

    let queries = queries_gen.generate(
        &env,
        env_gen,
        &query_seeds,
        &opts.server_domain,
        &env_dir,
    )?;

    opts.generate_run_config(&mut r, env_gen);
    let _server = runner.run(&opts)?;
    let address = opts.address(&config.solution_host);

    let mut result = ScenarioResult {
        seed,
        status: ExitStatus::Pass,
        queries_run: 0,
        queries_skipped: 0,
        findings: Vec::new(),
    };

    if let Err(finding) = probe_ready(&address, config.probe_attempts) {
        tracing::warn!(seed, "server didn't get up in time, aborting");
        result.status = ExitStatus::Fail;
        result.queries_skipped = queries.len() as u64;
        result.findings.push(finding);
        return Ok(result);
    }

    for (idx, query) in queries.iter().enumerate() {
        result.queries_run += 1;
        if let Err(finding) = run_query(&mut env, &env_dir, &opts, &address, query) {
            tracing::warn!(
                skipped = queries.len() - 1 - idx,
                failed = query.seed,
                "skipping next queries because of the failed query"
            );
            result.status = ExitStatus::Fail;
            result.queries_skipped = (queries.len() - 1 - idx) as u64;
            result.findings.push(finding);
            break;
        }
    }

    Ok(result)
}

/// Runs a single query with the four-phase verification contract around the
/// real request. The model is mutated only after the disk state checked out.
pub fn run_query(
    env: &mut Env,
    workdir: &Path,
    opts: &RunOpts,
    address: &str,
    query: &Query,
) -> Result<(), Finding> {
    tracing::debug!(
        seed = query.seed,
        method = %query.method,
        path = %query.path,
        "sending query"
    );

    let action = query.action(env, &opts.server_domain, workdir);

    if let Some(action) = &action {
        action.verify_before(workdir)?;
    }

    let resp = send_query(address, query)?;
    query.common_validate(&resp)?;

    if let Some(action) = action {
        action.verify_response(resp)?;
        action.verify_after(workdir)?;
        action.apply_env(env)?;
    }

    Ok(())
}

/// Degenerate scenario: launched with an empty working directory, the tested
/// server must exit with code 1 within 10 seconds.
pub fn run_empty_workdir(runner: &CmdRunner, seed: u64) -> HarnessResult<ScenarioResult> {
    let mut r = ChaCha20Rng::seed_from_u64(seed);

    let port = free_port()?;
    let (exit_tx, exit_rx) = ExitSlot::new();
    let mut opts = RunOpts {
        port,
        working_directory: String::new(),
        listen_addr: "0.0.0.0".to_string(),
        server_domain: String::new(),
        exit_slot: Some(exit_tx),
        ..RunOpts::default()
    };
    opts.generate_run_config(&mut r, &EnvGen::default());

    let _server = runner.run(&opts)?;

    let mut result = ScenarioResult {
        seed,
        status: ExitStatus::Pass,
        queries_run: 0,
        queries_skipped: 0,
        findings: Vec::new(),
    };

    match exit_rx.wait_timeout(Duration::from_secs(10)) {
        Some(1) => {}
        Some(code) => {
            result.status = ExitStatus::Fail;
            result.findings.push(Finding {
                kind: FindingKind::Process,
                title: "exit_code".to_string(),
                message: format!("server exited with code {code}, expected 1"),
            });
        }
        None => {
            result.status = ExitStatus::Fail;
            result.findings.push(Finding {
                kind: FindingKind::Process,
                title: "exit_timeout".to_string(),
                message: "server didn't exit(1) in 10 seconds".to_string(),
            });
        }
    }

    Ok(result)
}
