//! Query descriptors and the expected-behavior contract.
//!
//! A [`Query`] describes one HTTP request. Resolving it against the current
//! environment yields the [`Action`] the tested server is expected to
//! perform, or `None` for requests that are sent but deliberately left
//! unverified (writes against a missing parent or target).

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::{
    Env, EnvFile, EnvNode, Finding, FindingKind, HttpResponse, compare_content, require_dir,
    require_exists, require_file_content, require_not_exists,
};

/// One request to the tested server. The seed doubles as the query id in
/// logs and reports.
#[derive(Debug, Clone)]
pub struct Query {
    pub seed: u64,
    pub method: String,
    /// Slash-delimited tree path, e.g. "foo/bar/baz".
    pub path: String,
    /// Negotiate gzip on GET.
    pub gzip: bool,
    /// Send `Create-Directory: True` (POST).
    pub create_directory: bool,
    /// Send `Remove-Directory: True` (DELETE).
    pub remove_directory: bool,
    /// Host header override; empty means none.
    pub host_header: String,
    /// Verify the full directory listing (size + mtime + name per entry).
    pub verify_directory_full: bool,
    /// Verify Server/Content-Length/Content-Type headers.
    pub verify_headers: bool,
    /// Payload for write requests.
    pub file_content: Option<EnvFile>,
}

impl Query {
    pub fn new(seed: u64, method: &str, path: &str) -> Self {
        Self {
            seed,
            method: method.to_string(),
            path: path.to_string(),
            gzip: false,
            create_directory: false,
            remove_directory: false,
            host_header: String::new(),
            verify_directory_full: false,
            verify_headers: false,
            file_content: None,
        }
    }

    pub fn get(seed: u64, path: &str) -> Self {
        Self::new(seed, "GET", path)
    }

    /// Header checks that apply to every response, verified action or not.
    pub fn common_validate(&self, resp: &HttpResponse) -> Result<(), Finding> {
        if self.verify_headers && resp.server.as_deref().is_none_or(str::is_empty) {
            return Err(Finding::assertion("server_header", "missing Server header"));
        }
        Ok(())
    }

    /// Resolves the expected outcome for this query against `env`.
    ///
    /// Total over (method, domain match, parent/target existence, target
    /// kind); `None` means fire-and-forget.
    pub fn action(&self, env: &Env, server_domain: &str, workdir: &Path) -> Option<Action> {
        if !server_domain.is_empty() && self.host_header != server_domain {
            return Some(Action::HttpError { status: 400 });
        }

        let (parent, child) = env.lookup(&self.path);

        match self.method.as_str() {
            "GET" => match child {
                None => Some(Action::HttpError { status: 404 }),
                Some(EnvNode::File(file)) => Some(Action::GetFile {
                    path: self.path.clone(),
                    file: *file,
                    compression: self.gzip,
                }),
                Some(EnvNode::Dir(dir)) => Some(Action::GetDir {
                    path: self.path.clone(),
                    children: dir.listing.keys().cloned().collect(),
                    full_verify: self.verify_directory_full,
                    disk_path: workdir.join(&self.path),
                }),
            },
            "POST" => {
                if child.is_some() {
                    return Some(Action::HttpError { status: 409 });
                }
                parent?;
                let (parent_path, name) = split_parent(&self.path);
                if self.create_directory {
                    Some(Action::CreateDir {
                        path: self.path.clone(),
                        parent: parent_path.to_string(),
                        name: name.to_string(),
                        disk_path: workdir.join(&self.path),
                    })
                } else {
                    Some(Action::CreateFile {
                        path: self.path.clone(),
                        parent: parent_path.to_string(),
                        name: name.to_string(),
                        content: self.file_content?,
                    })
                }
            }
            "PUT" => match child? {
                EnvNode::Dir(_) => Some(Action::HttpError { status: 409 }),
                EnvNode::File(old) => {
                    let (parent_path, name) = split_parent(&self.path);
                    Some(Action::ReplaceFile {
                        path: self.path.clone(),
                        parent: parent_path.to_string(),
                        name: name.to_string(),
                        old: *old,
                        new: self.file_content?,
                    })
                }
            },
            "DELETE" => {
                let node = child?;
                if matches!(node, EnvNode::Dir(_)) && !self.remove_directory {
                    return Some(Action::HttpError { status: 406 });
                }
                let (parent_path, name) = split_parent(&self.path);
                Some(Action::Delete {
                    path: self.path.clone(),
                    parent: parent_path.to_string(),
                    name: name.to_string(),
                })
            }
            _ => None,
        }
    }
}

/// Expected behavior for one query. Variants own snapshots of the model
/// state they verify against; `apply_env` re-resolves the parent directory
/// by path, so no variant holds references into the environment.
#[derive(Debug, Clone)]
pub enum Action {
    HttpError {
        status: u16,
    },
    GetFile {
        path: String,
        file: EnvFile,
        compression: bool,
    },
    GetDir {
        path: String,
        children: Vec<String>,
        full_verify: bool,
        disk_path: PathBuf,
    },
    CreateDir {
        path: String,
        parent: String,
        name: String,
        disk_path: PathBuf,
    },
    CreateFile {
        path: String,
        parent: String,
        name: String,
        content: EnvFile,
    },
    ReplaceFile {
        path: String,
        parent: String,
        name: String,
        old: EnvFile,
        new: EnvFile,
    },
    Delete {
        path: String,
        parent: String,
        name: String,
    },
}

impl Action {
    /// Asserts the disk pre-state expected by the model.
    pub fn verify_before(&self, workdir: &Path) -> Result<(), Finding> {
        match self {
            Action::HttpError { .. } => Ok(()),
            Action::GetFile { path, file, .. } => require_file_content(workdir, path, file),
            Action::GetDir { path, .. } => require_dir(workdir, path),
            Action::CreateDir { path, .. } | Action::CreateFile { path, .. } => {
                require_not_exists(workdir, path)
            }
            Action::ReplaceFile { path, old, .. } => require_file_content(workdir, path, old),
            Action::Delete { path, .. } => require_exists(workdir, path),
        }
    }

    /// Asserts status, headers and body of the server's response.
    pub fn verify_response(&self, resp: HttpResponse) -> Result<(), Finding> {
        match self {
            Action::HttpError { status } => expect_status(*status, &resp),
            Action::GetFile {
                file, compression, ..
            } => {
                expect_status(200, &resp)?;
                check_media_type(resp.content_type.as_deref())?;
                if *compression {
                    let body = resp.into_compressed_body()?;
                    compare_content(body, file)
                } else {
                    match resp.content_length {
                        Some(len) if len == file.size => {}
                        other => {
                            return Err(Finding::assertion(
                                "content_length",
                                format!("expected Content-Length {}, got {other:?}", file.size),
                            ));
                        }
                    }
                    compare_content(resp.into_raw_body(), file)
                }
            }
            Action::GetDir {
                children,
                full_verify,
                disk_path,
                ..
            } => {
                expect_status(200, &resp)?;
                let mut raw = Vec::new();
                resp.into_body().read_to_end(&mut raw).map_err(|err| {
                    Finding::assertion("listing_read", format!("failed to read listing: {err}"))
                })?;
                let listing = String::from_utf8_lossy(&raw);

                for name in children {
                    if !listing.contains(name.as_str()) {
                        return Err(Finding::assertion(
                            "listing_child",
                            format!("expected dir listing to contain child {name}"),
                        ));
                    }
                }
                if *full_verify {
                    verify_full_listing(disk_path, &listing)?;
                }
                Ok(())
            }
            Action::CreateDir { .. } | Action::CreateFile { .. } | Action::ReplaceFile { .. } => {
                // No status contract for writes; the disk check is authoritative.
                Ok(())
            }
            Action::Delete { .. } => expect_status(200, &resp),
        }
    }

    /// Asserts the disk post-state.
    pub fn verify_after(&self, workdir: &Path) -> Result<(), Finding> {
        match self {
            Action::HttpError { .. } => Ok(()),
            Action::GetFile { path, file, .. } => require_file_content(workdir, path, file),
            Action::GetDir { path, .. } => require_dir(workdir, path),
            Action::CreateDir {
                path, disk_path, ..
            } => {
                require_dir(workdir, path)?;
                let entries = std::fs::read_dir(disk_path).map_err(|err| {
                    Finding::assertion(
                        "dir_read",
                        format!("failed to read created dir {path}: {err}"),
                    )
                })?;
                if entries.count() != 0 {
                    return Err(Finding::assertion(
                        "dir_not_empty",
                        format!("expected created dir {path} to be empty"),
                    ));
                }
                Ok(())
            }
            Action::CreateFile { path, content, .. } => require_file_content(workdir, path, content),
            Action::ReplaceFile { path, new, .. } => require_file_content(workdir, path, new),
            Action::Delete { path, .. } => require_not_exists(workdir, path),
        }
    }

    /// Mutates the model to match the now-real disk state. Returns whether a
    /// structural change occurred.
    pub fn apply_env(&self, env: &mut Env) -> Result<bool, Finding> {
        match self {
            Action::HttpError { .. } | Action::GetFile { .. } | Action::GetDir { .. } => Ok(false),
            Action::CreateDir { parent, name, .. } => {
                let dir = parent_dir_mut(env, parent)?;
                if dir.create_dir(name).is_none() {
                    return Err(checker(format!(
                        "applying CreateDir: {parent:?} already has child {name:?}"
                    )));
                }
                Ok(true)
            }
            Action::CreateFile {
                parent,
                name,
                content,
                ..
            } => {
                let dir = parent_dir_mut(env, parent)?;
                dir.listing
                    .insert(name.clone(), EnvNode::File(*content));
                Ok(true)
            }
            Action::ReplaceFile {
                parent, name, new, ..
            } => {
                let dir = parent_dir_mut(env, parent)?;
                dir.listing.insert(name.clone(), EnvNode::File(*new));
                Ok(true)
            }
            Action::Delete { parent, name, .. } => {
                let dir = parent_dir_mut(env, parent)?;
                dir.listing.remove(name);
                Ok(true)
            }
        }
    }
}

fn parent_dir_mut<'a>(env: &'a mut Env, parent: &str) -> Result<&'a mut crate::EnvDir, Finding> {
    env.lookup_dir_mut(parent)
        .ok_or_else(|| checker(format!("parent dir {parent:?} vanished from the model")))
}

fn checker(message: String) -> Finding {
    Finding {
        kind: FindingKind::Checker,
        title: "model_inconsistency".to_string(),
        message,
    }
}

fn expect_status(expected: u16, resp: &HttpResponse) -> Result<(), Finding> {
    if resp.status != expected {
        return Err(Finding::assertion(
            "status_code",
            format!("expected http status {expected}, got {}", resp.status),
        ));
    }
    Ok(())
}

fn check_media_type(content_type: Option<&str>) -> Result<(), Finding> {
    let invalid = || {
        Finding::assertion(
            "content_type",
            format!("expected valid content type, got {content_type:?}"),
        )
    };
    let essence = content_type.ok_or_else(invalid)?;
    let essence = essence.split(';').next().unwrap_or("").trim();
    match essence.split_once('/') {
        Some((main, sub))
            if !main.is_empty()
                && !sub.is_empty()
                && !main.contains(' ')
                && !sub.contains(' ') =>
        {
            Ok(())
        }
        _ => Err(invalid()),
    }
}

/// Every on-disk entry must appear in the listing as
/// `<size> <YYYY-MM-DD HH:MM:SS> <name>` (timestamps in UTC).
fn verify_full_listing(disk_path: &Path, listing: &str) -> Result<(), Finding> {
    let entries = std::fs::read_dir(disk_path).map_err(|err| {
        Finding::assertion(
            "dir_read",
            format!("failed to read dir {}: {err}", disk_path.display()),
        )
    })?;

    for entry in entries {
        let entry = entry.map_err(|err| {
            Finding::assertion("dir_read", format!("failed to read dir entry: {err}"))
        })?;
        let meta = entry.metadata().map_err(|err| {
            Finding::assertion(
                "entry_stat",
                format!("failed to stat entry {:?}: {err}", entry.file_name()),
            )
        })?;
        let modified = meta.modified().map_err(|err| {
            Finding::assertion(
                "entry_stat",
                format!("failed to read mtime of {:?}: {err}", entry.file_name()),
            )
        })?;

        let line = format!(
            "{} {} {}",
            meta.len(),
            format_mtime(modified)?,
            entry.file_name().to_string_lossy()
        );
        if !listing.contains(&line) {
            return Err(Finding::assertion(
                "listing_entry",
                format!("expected dir listing to contain entry {line:?} with full info"),
            ));
        }
    }
    Ok(())
}

fn format_mtime(t: SystemTime) -> Result<String, Finding> {
    let fmt =
        time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let dt: time::OffsetDateTime = t.into();
    dt.format(fmt)
        .map_err(|err| checker(format!("failed to format mtime: {err}")))
}

fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_env() -> Env {
        let mut env = Env::new();
        let docs = env.root.create_dir("docs").expect("docs");
        docs.listing.insert(
            "readme".to_string(),
            EnvNode::File(EnvFile {
                gen_seed: 42,
                size: 200,
                text_only: true,
            }),
        );
        env
    }

    fn payload() -> EnvFile {
        EnvFile {
            gen_seed: 5,
            size: 32,
            text_only: false,
        }
    }

    fn workdir() -> PathBuf {
        PathBuf::from("/tmp/unused")
    }

    #[test]
    fn domain_mismatch_wins_over_everything() {
        let env = sample_env();
        let mut query = Query::get(1, "docs/readme");
        query.host_header = "wrong.example.org".to_string();
        let action = query.action(&env, "files.example.org", &workdir());
        assert!(matches!(action, Some(Action::HttpError { status: 400 })));

        // Matching host resolves normally.
        query.host_header = "files.example.org".to_string();
        let action = query.action(&env, "files.example.org", &workdir());
        assert!(matches!(action, Some(Action::GetFile { .. })));
    }

    #[test]
    fn get_resolution() {
        let env = sample_env();
        let action = Query::get(1, "ghost").action(&env, "", &workdir());
        assert!(matches!(action, Some(Action::HttpError { status: 404 })));

        let action = Query::get(2, "docs/readme").action(&env, "", &workdir());
        assert!(matches!(action, Some(Action::GetFile { compression: false, .. })));

        let action = Query::get(3, "docs").action(&env, "", &workdir());
        match action {
            Some(Action::GetDir { children, .. }) => {
                assert_eq!(children, vec!["readme".to_string()]);
            }
            other => panic!("expected GetDir, got {other:?}"),
        }
    }

    #[test]
    fn post_resolution() {
        let env = sample_env();

        let mut query = Query::new(1, "POST", "docs/readme");
        query.file_content = Some(payload());
        let action = query.action(&env, "", &workdir());
        assert!(matches!(action, Some(Action::HttpError { status: 409 })));

        // Missing parent: fire-and-forget.
        let mut query = Query::new(2, "POST", "ghost/child");
        query.file_content = Some(payload());
        assert!(query.action(&env, "", &workdir()).is_none());

        let mut query = Query::new(3, "POST", "docs/newdir");
        query.create_directory = true;
        let action = query.action(&env, "", &workdir());
        match action {
            Some(Action::CreateDir { parent, name, .. }) => {
                assert_eq!(parent, "docs");
                assert_eq!(name, "newdir");
            }
            other => panic!("expected CreateDir, got {other:?}"),
        }

        let mut query = Query::new(4, "POST", "docs/newfile");
        query.file_content = Some(payload());
        let action = query.action(&env, "", &workdir());
        assert!(matches!(action, Some(Action::CreateFile { .. })));
    }

    #[test]
    fn put_resolution() {
        let env = sample_env();

        let mut query = Query::new(1, "PUT", "ghost");
        query.file_content = Some(payload());
        assert!(query.action(&env, "", &workdir()).is_none());

        let mut query = Query::new(2, "PUT", "docs");
        query.file_content = Some(payload());
        let action = query.action(&env, "", &workdir());
        assert!(matches!(action, Some(Action::HttpError { status: 409 })));

        let mut query = Query::new(3, "PUT", "docs/readme");
        query.file_content = Some(payload());
        let action = query.action(&env, "", &workdir());
        match action {
            Some(Action::ReplaceFile { old, new, .. }) => {
                assert_eq!(old.gen_seed, 42);
                assert_eq!(new.gen_seed, 5);
            }
            other => panic!("expected ReplaceFile, got {other:?}"),
        }
    }

    #[test]
    fn delete_resolution() {
        let env = sample_env();

        assert!(Query::new(1, "DELETE", "ghost").action(&env, "", &workdir()).is_none());

        let action = Query::new(2, "DELETE", "docs").action(&env, "", &workdir());
        assert!(matches!(action, Some(Action::HttpError { status: 406 })));

        let mut query = Query::new(3, "DELETE", "docs");
        query.remove_directory = true;
        let action = query.action(&env, "", &workdir());
        assert!(matches!(action, Some(Action::Delete { .. })));

        let action = Query::new(4, "DELETE", "docs/readme").action(&env, "", &workdir());
        match action {
            Some(Action::Delete { parent, name, .. }) => {
                assert_eq!(parent, "docs");
                assert_eq!(name, "readme");
            }
            other => panic!("expected Delete, got {other:?}"),
        }
    }

    #[test]
    fn apply_env_mutates_structurally() {
        let mut env = sample_env();
        let workdir = workdir();

        let mut query = Query::new(1, "POST", "docs/newdir");
        query.create_directory = true;
        let action = query.action(&env, "", &workdir).expect("action");
        assert!(action.apply_env(&mut env).expect("apply"));
        let (_, node) = env.lookup("docs/newdir");
        assert!(matches!(node, Some(EnvNode::Dir(_))));

        let action = Query::get(2, "docs/newdir")
            .action(&env, "", &workdir)
            .expect("action");
        assert!(!action.apply_env(&mut env).expect("apply"), "reads do not mutate");

        let mut query = Query::new(3, "PUT", "docs/readme");
        query.file_content = Some(payload());
        let action = query.action(&env, "", &workdir).expect("action");
        assert!(action.apply_env(&mut env).expect("apply"));
        match env.lookup("docs/readme").1 {
            Some(EnvNode::File(file)) => assert_eq!(file.gen_seed, 5),
            other => panic!("expected replaced file, got {other:?}"),
        }

        let mut query = Query::new(4, "DELETE", "docs");
        query.remove_directory = true;
        let action = query.action(&env, "", &workdir).expect("action");
        assert!(action.apply_env(&mut env).expect("apply"));
        assert!(env.lookup("docs").1.is_none());
    }

    #[test]
    fn get_file_response_checks_headers_and_body() {
        let file = EnvFile {
            gen_seed: 42,
            size: 200,
            text_only: true,
        };
        let mut body = Vec::new();
        file.open().read_to_end(&mut body).expect("generate");

        let action = Action::GetFile {
            path: "docs/readme".to_string(),
            file,
            compression: false,
        };

        let ok = HttpResponse::stub(200, Some(200), Some("text/plain"), None, None, body.clone());
        action.verify_response(ok).expect("matching response");

        let wrong_status =
            HttpResponse::stub(404, Some(200), Some("text/plain"), None, None, body.clone());
        assert_eq!(
            action.verify_response(wrong_status).unwrap_err().title,
            "status_code"
        );

        let wrong_len =
            HttpResponse::stub(200, Some(100), Some("text/plain"), None, None, body.clone());
        assert_eq!(
            action.verify_response(wrong_len).unwrap_err().title,
            "content_length"
        );

        let bad_type = HttpResponse::stub(200, Some(200), Some("nonsense"), None, None, body);
        assert_eq!(
            action.verify_response(bad_type).unwrap_err().title,
            "content_type"
        );
    }

    #[test]
    fn compressed_get_requires_gzip_encoding() {
        let file = EnvFile {
            gen_seed: 7,
            size: 64,
            text_only: false,
        };
        let action = Action::GetFile {
            path: "blob".to_string(),
            file,
            compression: true,
        };

        let identity = HttpResponse::stub(200, None, Some("a/b"), None, None, Vec::new());
        assert_eq!(
            action.verify_response(identity).unwrap_err().title,
            "content_encoding"
        );

        let mut raw = Vec::new();
        file.open().read_to_end(&mut raw).expect("generate");
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        std::io::Write::write_all(&mut encoder, &raw).expect("compress");
        let compressed = encoder.finish().expect("finish");

        let gz = HttpResponse::stub(200, None, Some("a/b"), Some("gzip"), None, compressed);
        action.verify_response(gz).expect("compressed body matches");
    }

    #[test]
    fn dir_listing_must_mention_every_child() {
        let action = Action::GetDir {
            path: "docs".to_string(),
            children: vec!["alpha".to_string(), "beta".to_string()],
            full_verify: false,
            disk_path: workdir(),
        };

        let ok = HttpResponse::stub(200, None, None, None, None, b"alpha\nbeta\n".to_vec());
        action.verify_response(ok).expect("all children listed");

        let missing = HttpResponse::stub(200, None, None, None, None, b"alpha\n".to_vec());
        assert_eq!(
            action.verify_response(missing).unwrap_err().title,
            "listing_child"
        );
    }

    #[test]
    fn full_listing_checks_disk_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = EnvFile {
            gen_seed: 3,
            size: 40,
            text_only: true,
        };
        file.write_to_disk(&dir.path().join("entry")).expect("write");

        let meta = std::fs::metadata(dir.path().join("entry")).expect("stat");
        let stamp = format_mtime(meta.modified().expect("mtime")).expect("format");
        let listing = format!("40 {stamp} entry\n");

        let action = Action::GetDir {
            path: "d".to_string(),
            children: vec!["entry".to_string()],
            full_verify: true,
            disk_path: dir.path().to_path_buf(),
        };

        let ok = HttpResponse::stub(200, None, None, None, None, listing.into_bytes());
        action.verify_response(ok).expect("full listing matches");

        let stale = HttpResponse::stub(200, None, None, None, None, b"entry\n".to_vec());
        assert_eq!(
            action.verify_response(stale).unwrap_err().title,
            "listing_entry"
        );
    }

    #[test]
    fn common_validate_requires_server_header() {
        let mut query = Query::get(1, "x");
        query.verify_headers = true;

        let with = HttpResponse::stub(200, None, None, None, Some("stub/1.0"), Vec::new());
        query.common_validate(&with).expect("server header present");

        let without = HttpResponse::stub(200, None, None, None, None, Vec::new());
        assert_eq!(
            query.common_validate(&without).unwrap_err().title,
            "server_header"
        );
    }
}
