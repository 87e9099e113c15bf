//! Disk-state assertions. Each helper verifies one expectation against the
//! materialized tree and reports a [`Finding`] on mismatch.

use std::io::Read;
use std::path::Path;

use crate::{EnvFile, Finding};

/// Asserts that the file at `workdir/rel` exists with the exact generated
/// size and content of `file`.
pub fn require_file_content(workdir: &Path, rel: &str, file: &EnvFile) -> Result<(), Finding> {
    let full = workdir.join(rel);
    let disk = std::fs::File::open(&full).map_err(|err| {
        Finding::assertion(
            "file_missing",
            format!("failed to open {rel}, expected it on disk: {err}"),
        )
    })?;

    let meta = disk.metadata().map_err(|err| {
        Finding::assertion("file_stat", format!("failed to stat {rel}: {err}"))
    })?;
    if meta.len() != file.size {
        return Err(Finding::assertion(
            "file_size",
            format!("{rel} has size {}, expected {}", meta.len(), file.size),
        ));
    }

    compare_content(disk, file)
        .map_err(|f| Finding::assertion(&f.title, format!("{rel}: {}", f.message)))
}

/// Compares the first `file.size` bytes of `actual` against the generator
/// stream. Trailing bytes beyond the expected size are not read.
pub fn compare_content<R: Read>(mut actual: R, file: &EnvFile) -> Result<(), Finding> {
    let mut expected = file.open();
    let mut want = [0u8; 8192];
    let mut got = [0u8; 8192];
    let mut offset = 0u64;

    loop {
        let n = expected
            .read(&mut want)
            .map_err(|err| Finding::assertion("content_read", format!("generator error: {err}")))?;
        if n == 0 {
            return Ok(());
        }

        let mut filled = 0;
        while filled < n {
            let read = actual.read(&mut got[filled..n]).map_err(|err| {
                Finding::assertion(
                    "content_read",
                    format!("read error at byte {}: {err}", offset + filled as u64),
                )
            })?;
            if read == 0 {
                return Err(Finding::assertion(
                    "content_short",
                    format!(
                        "content ended at byte {}, expected {} bytes",
                        offset + filled as u64,
                        file.size
                    ),
                ));
            }
            filled += read;
        }

        if want[..n] != got[..n] {
            let at = want[..n]
                .iter()
                .zip(&got[..n])
                .position(|(a, b)| a != b)
                .unwrap_or(0);
            return Err(Finding::assertion(
                "content_mismatch",
                format!(
                    "position {}, expected byte {}, got {}",
                    offset + at as u64,
                    want[at],
                    got[at]
                ),
            ));
        }
        offset += n as u64;
    }
}

pub fn require_dir(workdir: &Path, rel: &str) -> Result<(), Finding> {
    let full = workdir.join(rel);
    match std::fs::metadata(&full) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Finding::assertion(
            "not_a_directory",
            format!("expected {rel} to be a directory"),
        )),
        Err(err) => Err(Finding::assertion(
            "dir_missing",
            format!("failed to stat directory {rel}, expected it on disk: {err}"),
        )),
    }
}

pub fn require_exists(workdir: &Path, rel: &str) -> Result<(), Finding> {
    let full = workdir.join(rel);
    match std::fs::metadata(&full) {
        Ok(_) => Ok(()),
        Err(err) => Err(Finding::assertion(
            "path_missing",
            format!("failed to stat {rel}, expected it on disk: {err}"),
        )),
    }
}

pub fn require_not_exists(workdir: &Path, rel: &str) -> Result<(), Finding> {
    let full = workdir.join(rel);
    match std::fs::metadata(&full) {
        Ok(_) => Err(Finding::assertion(
            "path_exists",
            format!("expected {rel} to not exist on disk"),
        )),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Finding::assertion(
            "path_stat",
            format!("failed to stat {rel}: {err}"),
        )),
    }
}
