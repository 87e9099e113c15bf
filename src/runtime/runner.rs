//! Launching and supervising the tested server as a subprocess.

use rand_chacha::ChaCha20Rng;

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{EnvGen, HarnessError, HarnessResult, rand_below, rand_index};

/// One-shot exit-code slot. The runner's wait thread fills it; a scenario
/// consumes it with a timeout.
pub struct ExitSlot;

impl ExitSlot {
    pub fn new() -> (ExitSender, ExitWaiter) {
        let (tx, rx) = sync_channel(1);
        (ExitSender(tx), ExitWaiter(rx))
    }
}

#[derive(Debug, Clone)]
pub struct ExitSender(SyncSender<i32>);

impl ExitSender {
    pub fn send(&self, code: i32) {
        // The slot holds one value; later sends (and sends nobody waits
        // for) are dropped.
        let _ = self.0.try_send(code);
    }
}

#[derive(Debug)]
pub struct ExitWaiter(Receiver<i32>);

impl ExitWaiter {
    pub fn wait_timeout(&self, timeout: Duration) -> Option<i32> {
        self.0.recv_timeout(timeout).ok()
    }
}

/// Launch configuration for one scenario, rendered into the command
/// template.
#[derive(Debug, Clone, Default)]
pub struct RunOpts {
    pub port: u16,
    pub working_directory: String,
    pub listen_addr: String,
    pub server_domain: String,

    /// Rendered command-line arguments for the tested server.
    pub command_line_args: String,
    /// `KEY=VALUE` pairs for the tested server's environment.
    pub env: Vec<String>,

    /// Containerized equivalents.
    pub container_command_line_args: String,
    pub container_env_args: String,
    pub container_port_args: String,
    pub container_volume_args: String,

    /// Filled by the runner's wait thread with the server's exit code.
    pub exit_slot: Option<ExitSender>,
}

impl RunOpts {
    pub fn address(&self, host: &str) -> String {
        format!("http://{host}:{}", self.port)
    }

    /// Decides, per configurable field, how the tested server learns it:
    /// omitted (documented default), environment variable (when the profile
    /// allows it), or command-line flag — optionally paired with a wrong
    /// decoy env var of the same name, which the flag must override.
    pub fn build_config(&self, rng: &mut ChaCha20Rng, allow_env: bool) -> (String, Vec<String>) {
        let mut args = String::new();
        let mut env = Vec::new();

        if self.listen_addr == "0.0.0.0" && rand_below(rng, 2) == 1 {
            // documented default, omit
        } else if allow_env && rand_below(rng, 3) == 1 {
            env.push(format!("SERVER_HOST={}", self.listen_addr));
        } else if !self.listen_addr.is_empty() {
            args.push_str(&format!(" \"--host={}\"", self.listen_addr));
            if rand_below(rng, 2) == 1 {
                env.push("SERVER_HOST=8.8.8.8".to_string());
            }
        }

        if self.port == 8080 && rand_below(rng, 2) == 1 {
            // documented default, omit
        } else if allow_env && rand_below(rng, 3) == 1 {
            env.push(format!("SERVER_PORT={}", self.port));
        } else {
            args.push_str(&format!(" \"--port={}\"", self.port));
            if rand_below(rng, 2) == 1 {
                env.push("SERVER_PORT=80".to_string());
            }
        }

        if self.working_directory.is_empty() && rand_below(rng, 2) == 1 {
            // unset, omit
        } else if allow_env && rand_below(rng, 3) == 1 {
            env.push(format!(
                "SERVER_WORKING_DIRECTORY={}",
                self.working_directory
            ));
        } else if !self.working_directory.is_empty() {
            args.push_str(&format!(
                " \"--working-directory={}\"",
                self.working_directory
            ));
            if rand_below(rng, 2) == 1 {
                env.push("SERVER_WORKING_DIRECTORY=/".to_string());
            }
        }

        if self.server_domain.is_empty() && rand_below(rng, 2) == 1 {
            // unset, omit
        } else if allow_env && rand_below(rng, 3) == 1 {
            env.push(format!("SERVER_DOMAIN={}", self.server_domain));
        } else if !self.server_domain.is_empty() {
            args.push_str(&format!(" \"--server-domain={}\"", self.server_domain));
            if rand_below(rng, 2) == 1 {
                env.push("SERVER_DOMAIN=example.com".to_string());
            }
        }

        (args, env)
    }

    /// Fills the full run config: bare-process args/env plus the container
    /// volume/port/env equivalents.
    pub fn generate_run_config(&mut self, rng: &mut ChaCha20Rng, gen: &EnvGen) {
        let (args, env) = self.build_config(rng, gen.allow_env);
        self.command_line_args = args;
        self.env = env;

        let dirs_in_container = ["/files", "/files0", "/files1", "/files2", "/files3"];
        let mut dir_in_container =
            dirs_in_container[rand_index(rng, dirs_in_container.len())].to_string();

        if self.working_directory.is_empty() {
            dir_in_container = String::new();
        } else {
            self.container_volume_args = format!(
                "-v \"{}:{}\"",
                self.working_directory, dir_in_container
            );
        }
        self.container_port_args = format!("-p {}:{}", self.port, self.port);

        let container_opts = RunOpts {
            listen_addr: self.listen_addr.clone(),
            port: self.port,
            working_directory: dir_in_container,
            server_domain: self.server_domain.clone(),
            ..RunOpts::default()
        };
        let (container_args, container_env) = container_opts.build_config(rng, gen.allow_env);

        self.container_env_args = container_env
            .iter()
            .map(|pair| format!("--env \"{pair}\" "))
            .collect();
        self.container_command_line_args = container_args;
    }
}

/// Launch command template with `{field}` placeholders.
#[derive(Debug, Clone)]
pub struct LaunchTemplate {
    source: String,
}

const TEMPLATE_FIELDS: &[&str] = &[
    "port",
    "working_directory",
    "listen_addr",
    "server_domain",
    "command_line_args",
    "container_command_line_args",
    "container_env_args",
    "container_port_args",
    "container_volume_args",
];

impl LaunchTemplate {
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|err| {
            HarnessError::Template(format!(
                "failed to read template {}: {err}",
                path.display()
            ))
        })?;
        Self::parse(&source)
    }

    pub fn parse(source: &str) -> HarnessResult<Self> {
        let mut rest = source;
        while let Some(open) = rest.find('{') {
            let tail = &rest[open + 1..];
            let close = tail.find('}').ok_or_else(|| {
                HarnessError::Template("unclosed placeholder in launch template".to_string())
            })?;
            let name = &tail[..close];
            if !TEMPLATE_FIELDS.contains(&name) {
                return Err(HarnessError::Template(format!(
                    "unknown placeholder {{{name}}} in launch template (known: {})",
                    TEMPLATE_FIELDS.join(", ")
                )));
            }
            rest = &tail[close + 1..];
        }
        Ok(Self {
            source: source.to_string(),
        })
    }

    pub fn render(&self, opts: &RunOpts) -> String {
        let mut out = self.source.clone();
        let fields = [
            ("{port}", opts.port.to_string()),
            ("{working_directory}", opts.working_directory.clone()),
            ("{listen_addr}", opts.listen_addr.clone()),
            ("{server_domain}", opts.server_domain.clone()),
            ("{command_line_args}", opts.command_line_args.clone()),
            (
                "{container_command_line_args}",
                opts.container_command_line_args.clone(),
            ),
            ("{container_env_args}", opts.container_env_args.clone()),
            ("{container_port_args}", opts.container_port_args.clone()),
            ("{container_volume_args}", opts.container_volume_args.clone()),
        ];
        for (token, value) in fields {
            out = out.replace(token, &value);
        }
        out
    }
}

/// Runs the tested server from a launch template.
pub struct CmdRunner {
    template: LaunchTemplate,
    use_container: bool,
    suppress_output: bool,
}

impl CmdRunner {
    pub fn new(template: LaunchTemplate, use_container: bool, suppress_output: bool) -> Self {
        Self {
            template,
            use_container,
            suppress_output,
        }
    }

    /// Spawns the rendered command. The returned guard force-kills the
    /// subprocess when dropped, so teardown runs on every exit path.
    pub fn run(&self, opts: &RunOpts) -> HarnessResult<ServerGuard> {
        let cmd_string = self.template.render(opts).trim().to_string();

        // In container mode the environment travels inside the template via
        // the --env arguments.
        let env_pairs: Vec<String> = if self.use_container {
            Vec::new()
        } else {
            opts.env.clone()
        };

        tracing::info!(command = %cmd_string, env = ?env_pairs, "running command");

        let mut command = Command::new("bash");
        command.arg("-c").arg(&cmd_string);
        for pair in &env_pairs {
            if let Some((key, value)) = pair.split_once('=') {
                command.env(key, value);
            }
        }
        if self.suppress_output {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            // The harness's own stdout carries reports; the server's output
            // goes to stderr.
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = command
            .spawn()
            .map_err(|err| HarnessError::Setup(format!("failed to run command: {err}")))?;

        if !self.suppress_output {
            if let Some(stdout) = child.stdout.take() {
                spawn_proxy(stdout);
            }
            if let Some(stderr) = child.stderr.take() {
                spawn_proxy(stderr);
            }
        }

        let child = Arc::new(Mutex::new(child));
        spawn_exit_waiter(Arc::clone(&child), opts.exit_slot.clone());

        Ok(ServerGuard { child })
    }
}

fn spawn_proxy(mut from: impl std::io::Read + Send + 'static) {
    std::thread::spawn(move || {
        let _ = std::io::copy(&mut from, &mut std::io::stderr());
    });
}

/// Waits for the subprocess in the background; the wait thread is the only
/// reaper. Clean exit deposits 0, an explicit code is passed through, death
/// by signal deposits -1.
fn spawn_exit_waiter(child: Arc<Mutex<Child>>, exit_slot: Option<ExitSender>) {
    std::thread::spawn(move || {
        loop {
            {
                let Ok(mut guard) = child.lock() else {
                    return;
                };
                match guard.try_wait() {
                    Ok(Some(status)) => {
                        let code = if status.success() {
                            0
                        } else {
                            tracing::warn!(%status, "command finished with error");
                            status.code().unwrap_or(-1)
                        };
                        if let Some(slot) = &exit_slot {
                            slot.send(code);
                        }
                        return;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(%err, "failed to poll command");
                        return;
                    }
                }
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    });
}

/// Scoped teardown for the tested server.
pub struct ServerGuard {
    child: Arc<Mutex<Child>>,
}

impl ServerGuard {
    pub fn stop(&self) {
        if let Ok(mut child) = self.child.lock() {
            if let Err(err) = child.kill() {
                // Normal when the server already exited (empty-workdir runs).
                tracing::debug!(%err, "kill after command exit");
            }
        }
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Asks the kernel for a free port.
pub fn free_port() -> HarnessResult<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}
