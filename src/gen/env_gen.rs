//! Randomized environment generation.

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore as _, SeedableRng as _};

use crate::{Env, EnvFile, EnvNode, gen_filename, rand_below, rand_index};

/// Generation profile for a test environment.
///
/// Budgets are best-effort: an attempt that hits a name collision or a
/// max-depth parent is skipped, so realized counts may undershoot the
/// configured maxima.
#[derive(Debug, Clone, Default)]
pub struct EnvGen {
    /// No subdirectory deeper than this.
    pub max_depth: u32,
    /// At most this many subdirectories.
    pub max_dirs: usize,
    /// At most this many files.
    pub max_files: usize,
    /// Generate text files only.
    pub text_only: bool,
    /// Maximum file size in KB (exclusive).
    pub max_file_size_kb: u64,
    /// Maximum length of generated file/dir names.
    pub filename_max_len: usize,
    /// Allow configuring the tested server through environment variables.
    pub allow_env: bool,
}

impl EnvGen {
    /// A fresh file with random content seed and size.
    pub fn generate_file(&self, rng: &mut ChaCha20Rng) -> EnvFile {
        EnvFile {
            gen_seed: rng.next_u64(),
            size: rand_below(rng, 1024 * self.max_file_size_kb),
            text_only: self.text_only,
        }
    }

    /// Generates the whole tree for `seed`.
    pub fn generate(&self, seed: u64) -> Env {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut env = Env::new();
        let mut dir_paths: Vec<String> = vec![String::new()];

        for _ in 0..self.max_dirs {
            let parent = dir_paths[rand_index(&mut rng, dir_paths.len())].clone();
            let Some(dir) = env.lookup_dir_mut(&parent) else {
                continue;
            };
            if dir.depth >= self.max_depth {
                continue;
            }

            let name = gen_filename(&mut rng, self.filename_max_len);
            if dir.create_dir(&name).is_none() {
                continue;
            }
            dir_paths.push(if parent.is_empty() {
                name
            } else {
                format!("{parent}/{name}")
            });
        }

        for _ in 0..self.max_files {
            let parent = dir_paths[rand_index(&mut rng, dir_paths.len())].clone();
            let name = gen_filename(&mut rng, self.filename_max_len);
            let file = self.generate_file(&mut rng);

            let Some(dir) = env.lookup_dir_mut(&parent) else {
                continue;
            };
            if dir.listing.contains_key(&name) {
                continue;
            }
            dir.listing.insert(name, EnvNode::File(file));
        }

        env
    }
}
