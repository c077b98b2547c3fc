//! Scripted sandbox runtime for tests.
//!
//! Models a sandbox as an in-memory filesystem plus an interpreter for the
//! handful of shell shapes the control plane actually issues. Lets the
//! preparation, backup, and workflow paths run end-to-end without a real
//! runtime.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::error::{SandboxError, SandboxResult};
use super::runtime::{
    ExecOutput, ExecRequest, GitCloneRequest, SandboxRuntime, StartProcessRequest,
};

/// In-memory sandbox double.
#[derive(Default)]
pub struct ScriptedSandbox {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    commands: Mutex<Vec<String>>,
    processes: Mutex<Vec<StartProcessRequest>>,
    stopped: Mutex<Vec<String>>,
    clones: Mutex<Vec<GitCloneRequest>>,
    ensured: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&self, path: &str) {
        self.dirs.lock().unwrap().insert(path.to_string());
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.lock().unwrap().contains(path)
    }

    pub fn file_string(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn ran_command_containing(&self, needle: &str) -> bool {
        self.commands.lock().unwrap().iter().any(|c| c.contains(needle))
    }

    pub fn started_processes(&self) -> Vec<String> {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.process_id.clone())
            .collect()
    }

    pub fn stopped_processes(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn clone_requests(&self) -> Vec<GitCloneRequest> {
        self.clones.lock().unwrap().clone()
    }

    fn run_stage(&self, stage: &str) -> i32 {
        let stage = stage.trim();

        if let Some(path) = stage.strip_prefix("test -d ") {
            return if self.has_dir(path.trim()) { 0 } else { 1 };
        }

        if let Some(rest) = stage.strip_prefix("grep -q ") {
            let mut parts = rest.splitn(2, ' ');
            let needle = parts.next().unwrap_or_default();
            let file = parts.next().unwrap_or_default().trim();
            let files = self.files.lock().unwrap();
            return match files.get(file) {
                Some(bytes) if String::from_utf8_lossy(bytes).contains(needle) => 0,
                _ => 1,
            };
        }

        if stage.starts_with("echo '") && stage.contains(" >> ") {
            if let Some((line, file)) = parse_quoted_redirect(stage, "echo ") {
                let mut files = self.files.lock().unwrap();
                let entry = files.entry(file).or_default();
                entry.extend_from_slice(line.as_bytes());
                entry.push(b'\n');
                return 0;
            }
            return 1;
        }

        if stage.starts_with("printf %s '") && stage.contains(" >> ") {
            if let Some((chunk, file)) = parse_quoted_redirect(stage, "printf %s ") {
                let mut files = self.files.lock().unwrap();
                files.entry(file).or_default().extend_from_slice(chunk.as_bytes());
                return 0;
            }
            return 1;
        }

        if let Some(rest) = stage.strip_prefix("base64 -d ") {
            let mut parts = rest.splitn(2, " > ");
            let src = parts.next().unwrap_or_default().trim().to_string();
            let dst = parts.next().unwrap_or_default().trim().to_string();
            let mut files = self.files.lock().unwrap();
            let Some(encoded) = files.get(&src).cloned() else {
                return 1;
            };
            let Ok(decoded) = BASE64.decode(encoded) else {
                return 1;
            };
            files.insert(dst, decoded);
            return 0;
        }

        if let Some(path) = stage.strip_prefix("mkdir -p ") {
            self.add_dir(path.trim());
            return 0;
        }

        if let Some(rest) = stage.strip_prefix("tar -xzf ") {
            let mut parts = rest.splitn(2, " -C ");
            let archive = parts.next().unwrap_or_default().trim();
            let dest = parts.next().unwrap_or_default().trim();
            if !self.files.lock().unwrap().contains_key(archive) {
                return 1;
            }
            self.add_dir(dest);
            self.add_dir(&format!("{dest}/storage"));
            return 0;
        }

        if let Some(rest) = stage.strip_prefix("tar -czf ") {
            let mut parts = rest.splitn(2, " -C ");
            let archive = parts.next().unwrap_or_default().trim().to_string();
            let dir_and_member = parts.next().unwrap_or_default().trim();
            let dir = dir_and_member.split(' ').next().unwrap_or_default();
            if !self.has_dir(&format!("{dir}/storage")) {
                return 1;
            }
            self.files
                .lock()
                .unwrap()
                .insert(archive, format!("targz:{dir}/storage").into_bytes());
            return 0;
        }

        if let Some(path) = stage.strip_prefix("rm -f ") {
            self.files.lock().unwrap().remove(path.trim());
            return 0;
        }

        // git config / fetch / checkout and anything else: recorded, succeeds.
        0
    }
}

fn parse_quoted_redirect(stage: &str, prefix: &str) -> Option<(String, String)> {
    let rest = stage.strip_prefix(prefix)?;
    let rest = rest.strip_prefix('\'')?;
    let close = rest.find('\'')?;
    let content = rest[..close].to_string();
    let file = rest[close + 1..].trim().strip_prefix(">>")?.trim().to_string();
    Some((content, file))
}

#[async_trait]
impl SandboxRuntime for ScriptedSandbox {
    async fn ensure_sandbox(&self, sandbox_id: &str) -> SandboxResult<()> {
        self.ensured.lock().unwrap().push(sandbox_id.to_string());
        Ok(())
    }

    async fn exec(&self, _sandbox_id: &str, request: ExecRequest) -> SandboxResult<ExecOutput> {
        self.commands.lock().unwrap().push(request.command.clone());

        let mut exit_code = 0;
        for stage in request.command.split(" && ") {
            exit_code = self.run_stage(stage);
            if exit_code != 0 {
                break;
            }
        }
        Ok(ExecOutput {
            exit_code,
            stdout: String::new(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("scripted failure: {}", request.command)
            },
        })
    }

    async fn read_file(&self, _sandbox_id: &str, path: &str) -> SandboxResult<Option<Vec<u8>>> {
        Ok(self.files.lock().unwrap().get(path).cloned())
    }

    async fn write_file(&self, _sandbox_id: &str, path: &str, bytes: &[u8]) -> SandboxResult<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn git_clone(&self, _sandbox_id: &str, request: GitCloneRequest) -> SandboxResult<()> {
        if !request.url.starts_with("https://") {
            return Err(SandboxError::Api {
                status: 400,
                message: format!("refusing to clone {}", request.url),
            });
        }
        self.add_dir(&request.dest);
        self.add_dir(&format!("{}/.git", request.dest));
        self.clones.lock().unwrap().push(request);
        Ok(())
    }

    async fn start_process(
        &self,
        _sandbox_id: &str,
        request: StartProcessRequest,
    ) -> SandboxResult<()> {
        self.processes.lock().unwrap().push(request);
        Ok(())
    }

    async fn stop_process(&self, _sandbox_id: &str, process_id: &str) -> SandboxResult<()> {
        self.stopped.lock().unwrap().push(process_id.to_string());
        Ok(())
    }

    async fn expose_port(&self, sandbox_id: &str, port: u16) -> SandboxResult<String> {
        Ok(format!("http://sandbox-{sandbox_id}.internal:{port}"))
    }
}
