use crate::{
    config::Config,
    errors::AppError,
    mcp::registry::{str_param, Tool},
    sandbox::{looks_like_path, PathResolver},
};
use async_trait::async_trait;
use axum::body::Body;
use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use std::{collections::BTreeMap, ffi::OsString, path::PathBuf, process::Stdio, time::Instant};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    time::{timeout, Duration},
};
use tracing::{info, warn};

/// Descriptions for the commands the default whitelist ships with.
const CATALOG: &[(&str, &str, &str)] = &[
    ("tree", "Display directory tree structure", "tree . -L 2"),
    ("cat", "Display file contents", "cat file.txt"),
    ("ls", "List directory contents", "ls -la ."),
    ("pwd", "Print working directory", "pwd"),
];

#[derive(Debug, Clone, Serialize)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
    pub example: String,
}

pub struct ExecTool {
    programs: BTreeMap<String, PathBuf>,
    resolver: PathResolver,
    pass_env: Vec<String>,
    timeout: Duration,
    max_output: usize,
}

struct Prepared {
    command: String,
    program: PathBuf,
    args: Vec<OsString>,
    cwd: PathBuf,
    timeout: Duration,
}

impl ExecTool {
    pub fn new(cfg: &Config, resolver: PathResolver) -> anyhow::Result<Self> {
        Ok(Self {
            programs: resolve_cmds(&cfg.exec.allowed_cmds)?,
            resolver,
            pass_env: cfg.exec.pass_env.clone(),
            timeout: cfg.limits.exec_timeout,
            max_output: cfg.limits.max_stdout_kb * 1024,
        })
    }

    pub fn commands(&self) -> Vec<CommandInfo> {
        self.programs
            .keys()
            .map(|name| {
                let (description, example) = CATALOG
                    .iter()
                    .find(|(n, _, _)| n == name)
                    .map(|(_, d, e)| (d.to_string(), e.to_string()))
                    .unwrap_or_else(|| (String::new(), name.clone()));
                CommandInfo { name: name.clone(), description, example }
            })
            .collect()
    }

    /// Checks the command against the whitelist and sends every path-like
    /// argument through the resolver. Nothing is spawned if any check fails.
    fn prepare(&self, params: &serde_json::Value) -> Result<Prepared, AppError> {
        let command = str_param(params, "command")?;
        let program = self
            .programs
            .get(command)
            .ok_or_else(|| AppError::ExecDenied(format!("command not allowed: {command}")))?;
        let raw: Vec<&str> = match params.get("args") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|x| x.as_str().ok_or_else(|| AppError::ToolError("args must be strings".into())))
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(AppError::ToolError("args must be an array".into())),
        };
        let timeout = params
            .get("timeout_s")
            .and_then(|v| v.as_u64())
            .map(|t| Duration::from_secs(t).min(self.timeout))
            .unwrap_or(self.timeout);

        let cwd = self.resolver.root().get();
        let mut args = Vec::with_capacity(raw.len());
        for arg in raw {
            if looks_like_path(arg, &cwd) {
                let resolved = self.resolver.validate(arg).map_err(|e| {
                    AppError::ExecDenied(format!("access denied for argument '{arg}': {}", AppError::from(e)))
                })?;
                args.push(resolved.into_os_string());
            } else {
                args.push(OsString::from(arg));
            }
        }
        Ok(Prepared { command: command.to_string(), program: program.clone(), args, cwd, timeout })
    }

    fn command(&self, prepared: &Prepared) -> Command {
        let mut command = Command::new(&prepared.program);
        command.args(&prepared.args);
        command.current_dir(&prepared.cwd);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);
        // env policy: clear then insert pass_env
        command.env_clear();
        for k in &self.pass_env {
            if let Ok(v) = std::env::var(k) {
                command.env(k, v);
            }
        }
        command
    }
}

/// Whitelisted names to programs on `PATH`. Missing programs are left out
/// so one absent tool does not stop the server.
fn resolve_cmds(cmds: &[String]) -> anyhow::Result<BTreeMap<String, PathBuf>> {
    let mut map = BTreeMap::new();
    for c in cmds {
        if c.contains('/') || c.contains('\\') {
            anyhow::bail!("allowed_cmds entries must be bare command names: {c}");
        }
        match which::which(c) {
            Ok(path) => {
                map.insert(c.clone(), path);
            }
            Err(e) => warn!(command = %c, error = %e, "whitelisted command not found, skipping"),
        }
    }
    Ok(map)
}

/// Keeps at most `limit` bytes and drains the rest so the child never
/// blocks on a full pipe.
struct Capture {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self { buf: Vec::new(), limit, truncated: false }
    }

    async fn fill<R: AsyncRead + Unpin>(&mut self, reader: &mut R) {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Err(e) => {
                    warn!(error = %e, "reading child output failed, output may be incomplete");
                    self.truncated = true;
                    break;
                }
                Ok(n) => {
                    let room = self.limit.saturating_sub(self.buf.len());
                    if n > room {
                        self.truncated = true;
                    }
                    self.buf.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &'static str { "exec" }
    fn description(&self) -> &'static str { "Execute a whitelisted shell command" }
    fn capabilities(&self) -> serde_json::Value {
        json!({"input": {"type":"object","required":["command"],"properties": {"command": {"type":"string"},"args":{"type":"array","items":{"type":"string"}},"timeout_s":{"type":"integer"}}}, "output": {"type":"object","properties": {"exit_code":{"type":["integer","null"]},"stdout":{"type":"string"},"stderr":{"type":"string"},"duration_ms":{"type":"integer"},"truncated":{"type":"boolean"},"timed_out":{"type":"boolean"}}}})
    }

    async fn call(&self, params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        let prepared = self.prepare(&params)?;
        info!(command = %prepared.command, args = ?prepared.args, "exec");

        let start = Instant::now();
        let mut child = self
            .command(&prepared)
            .spawn()
            .map_err(|e| AppError::Internal(format!("failed to spawn: {}", e.kind())))?;
        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(AppError::Internal("output pipes missing".into()));
        };

        let mut out = Capture::new(self.max_output);
        let mut err = Capture::new(self.max_output);
        let waited = timeout(prepared.timeout, async {
            let (_, _, status) = tokio::join!(out.fill(&mut stdout), err.fill(&mut stderr), child.wait());
            status
        })
        .await;

        let (status, timed_out) = match waited {
            Ok(status) => (status, false),
            Err(_) => {
                let _ = child.kill().await;
                (child.wait().await, true)
            }
        };
        let status = status.map_err(|e| AppError::Internal(format!("wait failed: {}", e.kind())))?;

        Ok(json!({
            "exit_code": status.code(),
            "stdout": String::from_utf8_lossy(&out.buf),
            "stderr": String::from_utf8_lossy(&err.buf),
            "duration_ms": start.elapsed().as_millis() as u64,
            "truncated": out.truncated || err.truncated,
            "timed_out": timed_out,
        }))
    }

    async fn call_stream(
        &self,
        params: serde_json::Value,
    ) -> Result<crate::server::StreamBody, AppError> {
        use futures::StreamExt;
        use tokio::sync::mpsc;
        use tokio_stream::wrappers::ReceiverStream;

        let prepared = self.prepare(&params)?;
        info!(command = %prepared.command, args = ?prepared.args, stream = true, "exec");
        let mut command = self.command(&prepared);
        let max_bytes = self.max_output;
        let to = prepared.timeout;

        let (tx, rx) = mpsc::channel::<Bytes>(32);
        tokio::spawn(async move {
            let _ = tx.send(line(json!({"event":"start","tool":"exec"}))).await;
            let mut child = match command.spawn() {
                Ok(c) => c,
                Err(_) => {
                    let _ = tx.send(line(json!({"event":"error","error":{"code":"Internal","message":"failed to spawn"}}))).await;
                    return;
                }
            };
            let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
                let _ = tx.send(line(json!({"event":"error","error":{"code":"Internal","message":"output pipes missing"}}))).await;
                return;
            };
            let start = Instant::now();
            let mut truncated = false;
            let pump = async {
                let mut buf_out = [0u8; 4096];
                let mut buf_err = [0u8; 4096];
                let (mut out_open, mut err_open) = (true, true);
                let (mut out_total, mut err_total) = (0usize, 0usize);
                while out_open || err_open {
                    tokio::select! {
                        r = stdout.read(&mut buf_out), if out_open => match r {
                            Ok(n) if n > 0 => {
                                let keep = n.min(max_bytes - out_total);
                                out_total += keep;
                                if keep > 0 {
                                    let b64 = base64::engine::general_purpose::STANDARD.encode(&buf_out[..keep]);
                                    let _ = tx.send(line(json!({"event":"stdout","chunk_b64": b64}))).await;
                                }
                                if keep < n { truncated = true; break; }
                            }
                            _ => out_open = false,
                        },
                        r = stderr.read(&mut buf_err), if err_open => match r {
                            Ok(n) if n > 0 => {
                                let keep = n.min(max_bytes - err_total);
                                err_total += keep;
                                if keep > 0 {
                                    let b64 = base64::engine::general_purpose::STANDARD.encode(&buf_err[..keep]);
                                    let _ = tx.send(line(json!({"event":"stderr","chunk_b64": b64}))).await;
                                }
                                if keep < n { truncated = true; break; }
                            }
                            _ => err_open = false,
                        },
                    }
                }
            };
            let timed_out = timeout(to, pump).await.is_err();
            if timed_out || truncated {
                let _ = child.kill().await;
            }
            match child.wait().await {
                Ok(status) => {
                    let _ = tx.send(line(json!({"event":"end","result": {"exit_code": status.code(), "duration_ms": start.elapsed().as_millis() as u64, "truncated": truncated, "timed_out": timed_out}}))).await;
                }
                Err(_) => {
                    let _ = tx.send(line(json!({"event":"error","error":{"code":"Internal","message":"wait failed"}}))).await;
                }
            }
        });

        let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, std::io::Error>));
        Ok(body)
    }
}

fn line(v: serde_json::Value) -> Bytes {
    Bytes::from(format!("{v}\n"))
}

/// Lists the whitelisted commands that are available on this host.
pub struct ExecListTool {
    commands: Vec<CommandInfo>,
}

impl ExecListTool {
    pub fn new(commands: Vec<CommandInfo>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl Tool for ExecListTool {
    fn name(&self) -> &'static str { "exec_list" }
    fn description(&self) -> &'static str { "List available shell commands" }
    fn capabilities(&self) -> serde_json::Value {
        json!({"input": {"type":"object","properties": {}}, "output": {"type":"object","properties": {"commands":{"type":"array","items":{"type":"object","properties":{"name":{"type":"string"},"description":{"type":"string"},"example":{"type":"string"}}}}}}})
    }
    async fn call(&self, _params: serde_json::Value) -> Result<serde_json::Value, AppError> {
        Ok(json!({"commands": self.commands}))
    }
}
