//! Query sequence generation against a simulated evolving model.

use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng as _;

use std::path::Path;

use crate::{
    Env, EnvGen, HarnessError, HarnessResult, Query, gen_filename, one_in, rand_below, rand_index,
};

/// Host header sent when deliberately provoking a domain mismatch.
const WRONG_HOST: &str = "other.example.org";

/// Which parts of the tested server's surface a scenario exercises.
#[derive(Debug, Clone, Default)]
pub struct QueriesGen {
    /// Number of queries to generate.
    pub count: usize,

    pub get_file: bool,
    /// Disable GET requests for non-existing paths.
    pub get_file_no_errors: bool,
    pub get_directory: bool,
    /// Verify full directory listings.
    pub get_directory_full: bool,
    /// Allow compression negotiation on GET.
    pub compression: bool,
    pub post: bool,
    pub put: bool,
    pub delete: bool,
    /// Verify extra headers and exercise Host mismatches.
    pub all_headers: bool,
}

impl QueriesGen {
    /// Generates one query per seed. Queries are resolved against a clone of
    /// `env` and applied immediately, so each query observes the mutations of
    /// every query before it. Seeds whose candidate path pool comes up empty
    /// are skipped.
    pub fn generate(
        &self,
        env: &Env,
        gen: &EnvGen,
        seeds: &[u64],
        server_domain: &str,
        workdir: &Path,
    ) -> HarnessResult<Vec<Query>> {
        let mut env = env.clone_env();
        let mut stats = env.stats();

        let mut methods: Vec<&str> = Vec::new();
        if self.get_file || self.get_directory {
            methods.push("GET");
        }
        if self.post {
            methods.push("POST");
        }
        if self.put {
            methods.push("PUT");
        }
        if self.delete {
            methods.push("DELETE");
        }
        if methods.is_empty() {
            return Err(HarnessError::InvalidArgument(
                "query generation profile allows no methods".to_string(),
            ));
        }

        let mut queries = Vec::with_capacity(seeds.len());
        for &seed in seeds {
            let mut r = ChaCha20Rng::seed_from_u64(seed);
            let method = methods[rand_index(&mut r, methods.len())];

            let mut gen_paths: Vec<String> = Vec::new();
            if !stats.dir_paths.is_empty() && !(method == "GET" && !self.get_directory) {
                gen_paths.push(stats.dir_paths[rand_index(&mut r, stats.dir_paths.len())].clone());
                gen_paths.push(stats.dir_paths[rand_index(&mut r, stats.dir_paths.len())].clone());
            }
            if !stats.file_paths.is_empty() && !(method == "GET" && !self.get_file) {
                gen_paths
                    .push(stats.file_paths[rand_index(&mut r, stats.file_paths.len())].clone());
                gen_paths
                    .push(stats.file_paths[rand_index(&mut r, stats.file_paths.len())].clone());
            }
            if !(method == "GET" && self.get_file_no_errors) {
                let random_path = format!(
                    "{}/{}",
                    gen_filename(&mut r, gen.filename_max_len),
                    gen_filename(&mut r, gen.filename_max_len)
                );
                gen_paths.push(random_path);

                if !stats.dir_paths.is_empty() {
                    // Collision-prone children of an existing dir; POST gets
                    // extra ones to hit both create and conflict outcomes.
                    let random_dir =
                        stats.dir_paths[rand_index(&mut r, stats.dir_paths.len())].clone();
                    let num = if method == "POST" { 4 } else { 2 };
                    for _ in 0..num {
                        gen_paths.push(format!(
                            "{random_dir}/{}",
                            gen_filename(&mut r, gen.filename_max_len)
                        ));
                    }
                }
            }

            if gen_paths.is_empty() {
                continue;
            }

            let mut host_header = server_domain.to_string();
            if self.all_headers && one_in(&mut r, 5) {
                // Provoke a 400.
                host_header = WRONG_HOST.to_string();
            }

            let path = gen_paths[rand_index(&mut r, gen_paths.len())].clone();
            let mut query = Query {
                seed,
                method: method.to_string(),
                path,
                gzip: self.compression && rand_below(&mut r, 2) == 1,
                create_directory: method == "POST" && rand_below(&mut r, 2) == 1,
                remove_directory: method == "DELETE" && rand_below(&mut r, 2) == 1,
                host_header,
                verify_directory_full: self.get_directory_full,
                verify_headers: self.all_headers,
                file_content: None,
            };

            if (method == "POST" && !query.create_directory) || method == "PUT" {
                query.file_content = Some(gen.generate_file(&mut r));
            }

            let action = query.action(&env, server_domain, workdir);
            queries.push(query);

            if let Some(action) = action {
                let changed = action.apply_env(&mut env).map_err(|finding| {
                    HarnessError::Setup(format!(
                        "query generation diverged from the model: {}",
                        finding.message
                    ))
                })?;
                if changed {
                    stats = env.stats();
                }
            }
        }

        Ok(queries)
    }
}
