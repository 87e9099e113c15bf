//! Virtual test environment: an in-memory file tree used as ground truth.
//!
//! File content is never stored. A file is `(gen_seed, size, text_only)` and
//! its bytes are defined as the first `size` bytes of the seeded generator
//! stream, so the model can verify disk and response content byte-for-byte
//! without materializing anything.

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore as _, SeedableRng as _};

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::Path;

/// In-memory file tree. Ground truth for a scenario.
#[derive(Debug, Clone)]
pub struct Env {
    pub root: EnvDir,
}

impl Env {
    pub fn new() -> Self {
        Self {
            root: EnvDir::new(0),
        }
    }

    /// Resolves `path` ("foo/bar/baz") to its parent directory and node.
    ///
    /// Returns `(None, None)` when any non-terminal segment is missing or is
    /// not a directory, and `(Some(parent), None)` when only the leaf is
    /// missing.
    pub fn lookup<'a>(&'a self, path: &str) -> (Option<&'a EnvDir>, Option<&'a EnvNode>) {
        let (dirs, name) = split_path(path);

        let mut parent = &self.root;
        for seg in dirs {
            match parent.listing.get(seg) {
                Some(EnvNode::Dir(dir)) => parent = dir,
                _ => return (None, None),
            }
        }

        (Some(parent), parent.listing.get(name))
    }

    /// Resolves `path` to a directory for mutation. Empty path is the root.
    pub fn lookup_dir_mut(&mut self, path: &str) -> Option<&mut EnvDir> {
        let mut dir = &mut self.root;
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            match dir.listing.get_mut(seg) {
                Some(EnvNode::Dir(next)) => dir = next,
                _ => return None,
            }
        }
        Some(dir)
    }

    /// Deep copy; the clone shares no containers with the original.
    pub fn clone_env(&self) -> Self {
        self.clone()
    }

    pub fn write_to_disk(&self, root: &Path) -> io::Result<()> {
        self.root.write_to_disk(root)
    }

    /// Recomputed on demand, normalized.
    pub fn stats(&self) -> Stats {
        let mut stats = Stats::default();
        self.root.stats("", &mut stats);
        stats.normalize();
        stats
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

/// A node in the virtual tree.
#[derive(Debug, Clone)]
pub enum EnvNode {
    Dir(EnvDir),
    File(EnvFile),
}

impl EnvNode {
    pub fn write_to_disk(&self, path: &Path) -> io::Result<()> {
        match self {
            EnvNode::Dir(dir) => dir.write_to_disk(path),
            EnvNode::File(file) => file.write_to_disk(path),
        }
    }

    fn stats(&self, path: &str, stats: &mut Stats) {
        match self {
            EnvNode::Dir(dir) => dir.stats(path, stats),
            EnvNode::File(file) => file.stats(path, stats),
        }
    }
}

/// Virtual directory. Child names are unique; `depth` is the distance from
/// the tree root.
#[derive(Debug, Clone)]
pub struct EnvDir {
    pub listing: BTreeMap<String, EnvNode>,
    pub depth: u32,
}

impl EnvDir {
    pub fn new(depth: u32) -> Self {
        Self {
            listing: BTreeMap::new(),
            depth,
        }
    }

    /// Inserts an empty subdirectory if `name` is free. Returns `None` on a
    /// name collision without mutating; callers treat that as a no-op.
    pub fn create_dir(&mut self, name: &str) -> Option<&mut EnvDir> {
        if self.listing.contains_key(name) {
            return None;
        }
        let child = EnvDir::new(self.depth + 1);
        self.listing.insert(name.to_string(), EnvNode::Dir(child));
        match self.listing.get_mut(name) {
            Some(EnvNode::Dir(dir)) => Some(dir),
            _ => unreachable!("just inserted a directory"),
        }
    }

    pub fn write_to_disk(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir(path)?;
        for (name, node) in &self.listing {
            node.write_to_disk(&path.join(name))?;
        }
        Ok(())
    }

    fn stats(&self, path: &str, stats: &mut Stats) {
        stats.dirs += 1;
        stats.dir_paths.push(path.to_string());
        for (name, node) in &self.listing {
            node.stats(&join_rel(path, name), stats);
        }
    }
}

/// Virtual file: a content seed, a byte size and a text-only flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvFile {
    pub gen_seed: u64,
    pub size: u64,
    pub text_only: bool,
}

impl EnvFile {
    /// Deterministic content stream: identical `(gen_seed, size, text_only)`
    /// always yields the identical byte sequence.
    pub fn open(&self) -> ContentReader {
        ContentReader::new(self.gen_seed, self.size, self.text_only)
    }

    pub fn write_to_disk(&self, path: &Path) -> io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        let mut reader = self.open();
        io::copy(&mut reader, &mut file)?;
        Ok(())
    }

    fn stats(&self, path: &str, stats: &mut Stats) {
        stats.files += 1;
        stats.size += self.size;
        stats.file_paths.push(path.to_string());
    }
}

/// Aggregate listing of an environment.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub files: u64,
    pub dirs: u64,
    pub size: u64,
    pub file_paths: Vec<String>,
    pub dir_paths: Vec<String>,
}

impl Stats {
    /// Sorts both path lists and drops the synthetic root entry. Idempotent.
    pub fn normalize(&mut self) {
        self.file_paths.sort();
        self.dir_paths.sort();
        if self.dir_paths.first().is_some_and(|p| p.is_empty()) {
            self.dir_paths.remove(0);
        }
    }
}

/// Streams the generated content of an [`EnvFile`].
///
/// Generation happens in fixed-size blocks so the produced byte sequence does
/// not depend on the caller's read chunk sizes. With `text_only`, the raw
/// stream is filtered down to printable ASCII plus newline and re-read until
/// enough qualifying bytes accumulate; termination for adversarial seeds is
/// not guaranteed by construction.
pub struct ContentReader {
    rng: ChaCha20Rng,
    remaining: u64,
    text_only: bool,
    buf: Vec<u8>,
    pos: usize,
}

const GEN_BLOCK: usize = 1024;

impl ContentReader {
    fn new(seed: u64, size: u64, text_only: bool) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
            remaining: size,
            text_only,
            buf: Vec::new(),
            pos: 0,
        }
    }

    fn refill(&mut self) {
        let mut raw = [0u8; GEN_BLOCK];
        loop {
            self.rng.fill_bytes(&mut raw);
            let kept: Vec<u8> = if self.text_only {
                raw.iter().copied().filter(|&b| is_text_byte(b)).collect()
            } else {
                raw.to_vec()
            };
            if kept.is_empty() {
                continue;
            }
            self.buf = kept;
            self.pos = 0;
            return;
        }
    }
}

fn is_text_byte(b: u8) -> bool {
    b == b'\n' || (32..=126).contains(&b)
}

impl Read for ContentReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || out.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.buf.len() {
            self.refill();
        }

        let available = self.buf.len() - self.pos;
        let n = out
            .len()
            .min(available)
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        self.remaining -= n as u64;
        Ok(n)
    }
}

fn split_path(path: &str) -> (Vec<&str>, &str) {
    match path.rsplit_once('/') {
        Some((dirs, name)) => (dirs.split('/').filter(|s| !s.is_empty()).collect(), name),
        None => (Vec::new(), path),
    }
}

fn join_rel(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}
