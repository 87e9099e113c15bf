//! End-to-end flows against a minimal in-process file server that honors the
//! graded HTTP contract, plus a subprocess scenario run when python3 is
//! available.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};

use fsgrade::{
    CmdRunner, Config, Env, EnvFile, EnvGen, EnvNode, ExitStatus, LaunchTemplate, QueriesGen,
    Query, RunOpts, run_query, run_scenario,
};

fn temp_workspace(name: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(&format!("fsgrade-{name}-"))
        .tempdir()
        .expect("create temp workspace")
}

/// Serves the on-disk tree under `root` with the semantics the harness
/// grades: GET files/listings, POST create, PUT replace, DELETE remove,
/// `Create-Directory`/`Remove-Directory` headers, 404/406/409 errors.
fn spawn_file_server(root: PathBuf) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
    let port = listener.local_addr().expect("local addr").port();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let _ = handle_request(stream, &root);
                }
                Err(_) => break,
            }
        }
    });
    port
}

fn handle_request(mut stream: TcpStream, root: &Path) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let target = parts.next().unwrap_or("/").to_string();

    let mut content_length = 0usize;
    let mut create_dir = false;
    let mut remove_dir = false;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header)?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        let Some((name, value)) = header.split_once(':') else {
            continue;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => content_length = value.trim().parse().unwrap_or(0),
            "create-directory" => create_dir = value.trim() == "True",
            "remove-directory" => remove_dir = value.trim() == "True",
            _ => {}
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    let full = root.join(target.trim_start_matches('/'));

    let (status, payload) = match method.as_str() {
        "GET" => {
            if full.is_dir() {
                let mut names: Vec<String> = std::fs::read_dir(&full)?
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect();
                names.sort();
                (200, names.join("\n").into_bytes())
            } else if full.is_file() {
                (200, std::fs::read(&full)?)
            } else {
                (404, Vec::new())
            }
        }
        "POST" => {
            if full.exists() {
                (409, Vec::new())
            } else if !full.parent().is_some_and(|p| p.is_dir()) {
                (404, Vec::new())
            } else if create_dir {
                std::fs::create_dir(&full)?;
                (200, Vec::new())
            } else {
                std::fs::write(&full, &body)?;
                (200, Vec::new())
            }
        }
        "PUT" => {
            if !full.exists() {
                (404, Vec::new())
            } else if full.is_dir() {
                (409, Vec::new())
            } else {
                std::fs::write(&full, &body)?;
                (200, Vec::new())
            }
        }
        "DELETE" => {
            if !full.exists() {
                (404, Vec::new())
            } else if full.is_dir() && !remove_dir {
                (406, Vec::new())
            } else if full.is_dir() {
                std::fs::remove_dir_all(&full)?;
                (200, Vec::new())
            } else {
                std::fs::remove_file(&full)?;
                (200, Vec::new())
            }
        }
        _ => (405, Vec::new()),
    };

    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        406 => "Not Acceptable",
        409 => "Conflict",
        _ => "Error",
    };
    write!(
        stream,
        "HTTP/1.1 {status} {reason}\r\nServer: stub/0.1\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        payload.len()
    )?;
    stream.write_all(&payload)?;
    Ok(())
}

struct Harness {
    _ws: tempfile::TempDir,
    env: Env,
    workdir: PathBuf,
    opts: RunOpts,
    address: String,
}

fn start(env: Env, name: &str) -> Harness {
    let ws = temp_workspace(name);
    let workdir = ws.path().join("tree");
    env.write_to_disk(&workdir).expect("materialize tree");

    let port = spawn_file_server(workdir.clone());
    let opts = RunOpts {
        port,
        working_directory: workdir.to_string_lossy().to_string(),
        ..RunOpts::default()
    };
    let address = format!("http://127.0.0.1:{port}");

    Harness {
        _ws: ws,
        env,
        workdir,
        opts,
        address,
    }
}

impl Harness {
    fn run(&mut self, query: &Query) -> Result<(), fsgrade::Finding> {
        run_query(&mut self.env, &self.workdir, &self.opts, &self.address, query)
    }
}

#[test]
fn get_existing_text_file_is_verified_end_to_end() {
    let mut env = Env::new();
    env.root.listing.insert(
        "DATA".to_string(),
        EnvNode::File(EnvFile {
            gen_seed: 42,
            size: 200,
            text_only: true,
        }),
    );

    let mut harness = start(env, "get");
    harness.run(&Query::get(1, "DATA")).expect("GET existing file");

    // A model that disagrees with the disk is caught before the request.
    harness.env.root.listing.insert(
        "DATA".to_string(),
        EnvNode::File(EnvFile {
            gen_seed: 42,
            size: 100,
            text_only: true,
        }),
    );
    let finding = harness.run(&Query::get(2, "DATA")).unwrap_err();
    assert_eq!(finding.title, "file_size");
}

#[test]
fn post_create_directory_then_get_empty_listing() {
    let mut env = Env::new();
    env.root.create_dir("DOCS").expect("dir");

    let mut harness = start(env, "post-dir");

    let mut post = Query::new(1, "POST", "DOCS/NEWDIR");
    post.create_directory = true;
    harness.run(&post).expect("POST create directory");

    // The model was mutated to match the new disk state.
    assert!(matches!(
        harness.env.lookup("DOCS/NEWDIR").1,
        Some(EnvNode::Dir(_))
    ));
    assert!(harness.workdir.join("DOCS/NEWDIR").is_dir());

    harness
        .run(&Query::get(2, "DOCS/NEWDIR"))
        .expect("GET empty listing of the created dir");
}

#[test]
fn delete_non_empty_dir_without_flag_yields_406_and_keeps_dir() {
    let mut env = Env::new();
    let docs = env.root.create_dir("DOCS").expect("dir");
    docs.listing.insert(
        "F".to_string(),
        EnvNode::File(EnvFile {
            gen_seed: 3,
            size: 50,
            text_only: true,
        }),
    );

    let mut harness = start(env, "delete");

    harness
        .run(&Query::new(1, "DELETE", "DOCS"))
        .expect("DELETE without flag resolves to an expected 406");
    assert!(harness.workdir.join("DOCS").is_dir(), "dir must survive");
    assert!(harness.env.lookup("DOCS").1.is_some());

    let mut delete = Query::new(2, "DELETE", "DOCS");
    delete.remove_directory = true;
    harness.run(&delete).expect("DELETE with flag");
    assert!(!harness.workdir.join("DOCS").exists());
    assert!(harness.env.lookup("DOCS").1.is_none());
}

#[test]
fn put_replaces_file_content_on_disk_and_over_http() {
    let mut env = Env::new();
    env.root.listing.insert(
        "DATA".to_string(),
        EnvNode::File(EnvFile {
            gen_seed: 1,
            size: 100,
            text_only: false,
        }),
    );

    let mut harness = start(env, "put");

    let mut put = Query::new(1, "PUT", "DATA");
    put.file_content = Some(EnvFile {
        gen_seed: 9,
        size: 150,
        text_only: false,
    });
    harness.run(&put).expect("PUT replace");

    match harness.env.lookup("DATA").1 {
        Some(EnvNode::File(file)) => {
            assert_eq!(file.gen_seed, 9);
            assert_eq!(file.size, 150);
        }
        other => panic!("expected replaced file in model, got {other:?}"),
    }

    // The follow-up GET verifies the new bytes over HTTP and on disk.
    harness.run(&Query::get(2, "DATA")).expect("GET new content");
}

#[test]
fn fire_and_forget_writes_are_sent_but_unverified() {
    let mut env = Env::new();
    env.root.create_dir("DOCS").expect("dir");

    let mut harness = start(env, "unverified");

    // PUT to a missing target resolves to no action; the 404 from the server
    // is deliberately not asserted.
    let mut put = Query::new(1, "PUT", "GHOST");
    put.file_content = Some(EnvFile {
        gen_seed: 2,
        size: 10,
        text_only: true,
    });
    harness.run(&put).expect("fire-and-forget PUT");

    // POST under a missing parent likewise.
    let mut post = Query::new(2, "POST", "GHOST/CHILD");
    post.file_content = Some(EnvFile {
        gen_seed: 2,
        size: 10,
        text_only: true,
    });
    harness.run(&post).expect("fire-and-forget POST");
}

fn python3_available() -> bool {
    std::process::Command::new("python3")
        .arg("-c")
        .arg("import http.server")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[test]
fn scenario_against_a_real_subprocess_server_passes() {
    if !python3_available() {
        eprintln!("python3 unavailable; skipping subprocess scenario test");
        return;
    }

    let ws = temp_workspace("scenario");
    let config = Config {
        base_dir: ws.path().join(".fsgrade"),
        temp_dir: ws.path().join("tmp"),
        suppress_server_output: true,
        ..Config::default()
    };

    let template = LaunchTemplate::parse(
        "python3 -m http.server {port} --bind 0.0.0.0 --directory \"{working_directory}\"",
    )
    .expect("template");
    let runner = CmdRunner::new(template, false, true);

    let env_gen = EnvGen {
        max_depth: 1,
        max_dirs: 2,
        max_files: 6,
        text_only: true,
        max_file_size_kb: 8,
        filename_max_len: 8,
        allow_env: false,
    };
    let queries_gen = QueriesGen {
        count: 8,
        get_file: true,
        get_file_no_errors: true,
        ..QueriesGen::default()
    };

    let result =
        run_scenario(&config, &runner, &env_gen, &queries_gen, 1337).expect("scenario run");
    assert_eq!(
        result.status,
        ExitStatus::Pass,
        "findings: {:?}",
        result.findings
    );
    assert_eq!(result.queries_skipped, 0);
}
