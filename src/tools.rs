//! Tool catalog and mediated execution.
//!
//! Every tool invocation runs the same pipeline:
//!
//! 1. extract and coerce inputs (missing required inputs are an error result)
//! 2. reduce the action to a policy (kind, target) pair and evaluate it
//! 3. append one audit entry capturing the decision, whatever it was
//! 4. if denied, return `BLOCKED by security policy: <reason>` with the
//!    error flag
//! 5. otherwise perform the side effect and cap the output
//!
//! Tool failures never abort a turn; they come back as error results so the
//! model can observe and adapt. Temporary credential material (secure-shell
//! keys, deploy keys) is written at mode 0600 and removed on every exit
//! path.

use crate::audit::{AuditDecision, AuditLog};
use crate::policy::{ActionKind, PolicyEngine};
use crate::provider::ToolSchema;
use crate::schedule::ScheduleStore;
use crate::vault::{CredentialKind, Vault, mask};
use crate::{Error, Result};
use rand::Rng;
use regex::Regex;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Subprocess capture buffer; exceeding it kills the process.
const SUBPROCESS_BUFFER_CAP: usize = 1024 * 1024;
/// Command results are truncated to this many bytes.
const COMMAND_RESULT_CAP: usize = 10_000;
/// File reads are truncated to this many bytes.
const FILE_READ_CAP: usize = 50_000;
/// Web pages are truncated to this many characters.
const PAGE_CHAR_CAP: usize = 20_000;
/// Default subprocess timeout.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Hard ceiling on subprocess timeouts.
const MAX_TIMEOUT_MS: u64 = 120_000;
/// Web fetch timeout.
const FETCH_TIMEOUT_SECS: u64 = 30;

/// Structured result of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Capped output text.
    pub output: String,
    /// Whether the invocation failed (including policy denials).
    pub is_error: bool,
}

impl ToolOutput {
    /// A successful result.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    /// A failed result.
    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
        }
    }

    fn blocked(reason: &str) -> Self {
        Self::error(format!("BLOCKED by security policy: {}", reason))
    }
}

/// Catalog of tools plus the mediation plumbing they all share.
pub struct ToolExecutor {
    agent_id: String,
    working_dir: PathBuf,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditLog>,
    vault: Option<Arc<Vault>>,
    schedules: Option<Arc<ScheduleStore>>,
    http: reqwest::Client,
}

impl ToolExecutor {
    /// Builds an executor with the core collaborators. The vault and the
    /// schedule store attach separately; tools that need them are only
    /// cataloged when they are present.
    pub fn new(
        agent_id: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        policy: Arc<PolicyEngine>,
        audit: Arc<AuditLog>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .user_agent(concat!("tamalebot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            agent_id: agent_id.into(),
            working_dir: working_dir.into(),
            policy,
            audit,
            vault: None,
            schedules: None,
            http,
        })
    }

    /// Attaches a credential vault, enabling the `vault` and `ssh_exec`
    /// tools and deploy keys for git.
    pub fn with_vault(mut self, vault: Arc<Vault>) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Attaches a schedule store, enabling the `schedule` tool.
    pub fn with_schedules(mut self, schedules: Arc<ScheduleStore>) -> Self {
        self.schedules = Some(schedules);
        self
    }

    /// Tool schemas forwarded to the model.
    pub fn catalog(&self) -> Vec<ToolSchema> {
        let mut tools = vec![
            ToolSchema {
                name: "shell".to_string(),
                description: "Run a shell command in the agent's working directory. \
                              Output is truncated; long-running commands time out."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "command": {"type": "string", "description": "Command to run"},
                        "timeout_ms": {"type": "integer", "description": "Timeout in milliseconds (max 120000)"}
                    },
                    "required": ["command"]
                }),
            },
            ToolSchema {
                name: "file_read".to_string(),
                description: "Read a file as UTF-8 text (truncated to 50 kB).".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path to read"}
                    },
                    "required": ["path"]
                }),
            },
            ToolSchema {
                name: "file_write".to_string(),
                description: "Write text to a file, creating parent directories and \
                              overwriting any existing content."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path to write"},
                        "content": {"type": "string", "description": "File content"}
                    },
                    "required": ["path", "content"]
                }),
            },
            ToolSchema {
                name: "web_browse".to_string(),
                description: "Fetch a URL and return its visible text (scripts, styles \
                              and markup stripped)."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "url": {"type": "string", "description": "URL to fetch"}
                    },
                    "required": ["url"]
                }),
            },
            ToolSchema {
                name: "git".to_string(),
                description: "Run a git operation: clone, pull, push, status, diff, \
                              commit, log or checkout."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "action": {"type": "string", "enum": ["clone", "pull", "push", "status", "diff", "commit", "log", "checkout"]},
                        "repo": {"type": "string", "description": "Repository URL (clone)"},
                        "path": {"type": "string", "description": "Repository path (defaults to the working directory)"},
                        "message": {"type": "string", "description": "Commit message (commit)"},
                        "branch": {"type": "string", "description": "Branch name (checkout)"}
                    },
                    "required": ["action"]
                }),
            },
        ];

        if self.vault.is_some() {
            tools.push(ToolSchema {
                name: "vault".to_string(),
                description: "Manage stored credentials: set, get (masked), delete, \
                              list, generate_ssh_key."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "action": {"type": "string", "enum": ["set", "get", "delete", "list", "generate_ssh_key"]},
                        "name": {"type": "string", "description": "Credential name, e.g. MY_API_KEY"},
                        "value": {"type": "string", "description": "Credential value (set)"},
                        "type": {"type": "string", "enum": ["api_key", "ssh_key", "ssh_public_key", "token", "database_url", "generic"]},
                        "description": {"type": "string"}
                    },
                    "required": ["action"]
                }),
            });
            tools.push(ToolSchema {
                name: "ssh_exec".to_string(),
                description: "Run a command on a remote host over secure shell using a \
                              key from the vault."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "host": {"type": "string", "description": "Remote host"},
                        "command": {"type": "string", "description": "Command to run"},
                        "user": {"type": "string", "description": "Remote user (default root)"},
                        "port": {"type": "integer", "description": "Port (default 22)"},
                        "key_name": {"type": "string", "description": "Vault key name (default SSH_KEY)"},
                        "timeout_ms": {"type": "integer"}
                    },
                    "required": ["host", "command"]
                }),
            });
        }

        if self.schedules.is_some() {
            tools.push(ToolSchema {
                name: "schedule".to_string(),
                description: "Manage scheduled tasks: create (five-field cron), list, \
                              delete, pause, resume."
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "action": {"type": "string", "enum": ["create", "list", "delete", "pause", "resume"]},
                        "name": {"type": "string", "description": "Schedule name (create)"},
                        "cron": {"type": "string", "description": "Five-field cron expression (create)"},
                        "task": {"type": "string", "description": "Instruction to run (create)"},
                        "id": {"type": "string", "description": "Schedule id (delete/pause/resume)"}
                    },
                    "required": ["action"]
                }),
            });
        }

        tools
    }

    /// Runs one tool through the mediation pipeline.
    ///
    /// Only audit-journal failures raise; everything else comes back as a
    /// [`ToolOutput`] so the model can see it.
    pub async fn execute(&self, name: &str, input: &Value) -> Result<ToolOutput> {
        debug!(tool = name, "executing tool");
        match name {
            "shell" => self.run_shell(input).await,
            "file_read" => self.run_file_read(input).await,
            "file_write" => self.run_file_write(input).await,
            "web_browse" => self.run_web_browse(input).await,
            "vault" => self.run_vault(input).await,
            "ssh_exec" => self.run_ssh_exec(input).await,
            "git" => self.run_git(input).await,
            "schedule" => self.run_schedule(input).await,
            other => Ok(ToolOutput::error(format!("Unknown tool: {}", other))),
        }
    }

    /// Policy check plus the one audit entry every invocation gets.
    /// Returns the denial reason when the action may not proceed.
    fn mediate(&self, kind: ActionKind, target: &str) -> Result<Option<String>> {
        let decision = self.policy.evaluate(kind, target);
        let audit_decision = if decision.allowed {
            AuditDecision::Allowed
        } else {
            AuditDecision::Blocked
        };
        let metadata = decision
            .matched_patterns
            .as_ref()
            .map(|patterns| json!({ "matched_patterns": patterns }));
        self.audit.log(
            &self.agent_id,
            kind.as_str(),
            target,
            audit_decision,
            decision.reason.clone(),
            metadata,
        )?;
        if decision.allowed {
            Ok(None)
        } else {
            Ok(Some(
                decision.reason.unwrap_or_else(|| "denied".to_string()),
            ))
        }
    }

    // ------------------------------------------------------------------
    // shell
    // ------------------------------------------------------------------

    async fn run_shell(&self, input: &Value) -> Result<ToolOutput> {
        let Some(command) = input.get("command").and_then(Value::as_str) else {
            return Ok(ToolOutput::error("Missing required parameter: command"));
        };
        let timeout_ms = input
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .min(MAX_TIMEOUT_MS);

        if let Some(reason) = self.mediate(ActionKind::Command, command)? {
            return Ok(ToolOutput::blocked(&reason));
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .env("TAMALEBOT_AGENT_ID", &self.agent_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(run_subprocess(cmd, timeout_ms).await)
    }

    // ------------------------------------------------------------------
    // file_read / file_write
    // ------------------------------------------------------------------

    fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.working_dir.join(p)
        }
    }

    async fn run_file_read(&self, input: &Value) -> Result<ToolOutput> {
        let Some(path) = input.get("path").and_then(Value::as_str) else {
            return Ok(ToolOutput::error("Missing required parameter: path"));
        };
        if let Some(reason) = self.mediate(ActionKind::FileRead, path)? {
            return Ok(ToolOutput::blocked(&reason));
        }
        match tokio::fs::read(self.resolve_path(path)).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                Ok(ToolOutput::ok(truncate_bytes(&text, FILE_READ_CAP)))
            }
            Err(err) => Ok(ToolOutput::error(format!(
                "Failed to read {}: {}",
                path, err
            ))),
        }
    }

    async fn run_file_write(&self, input: &Value) -> Result<ToolOutput> {
        let Some(path) = input.get("path").and_then(Value::as_str) else {
            return Ok(ToolOutput::error("Missing required parameter: path"));
        };
        let Some(content) = input.get("content").and_then(Value::as_str) else {
            return Ok(ToolOutput::error("Missing required parameter: content"));
        };
        if let Some(reason) = self.mediate(ActionKind::FileWrite, path)? {
            return Ok(ToolOutput::blocked(&reason));
        }
        let resolved = self.resolve_path(path);
        if let Some(parent) = resolved.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolOutput::error(format!(
                    "Failed to create parent directories for {}: {}",
                    path, err
                )));
            }
        }
        match tokio::fs::write(&resolved, content.as_bytes()).await {
            Ok(()) => Ok(ToolOutput::ok(format!(
                "Wrote {} bytes to {}",
                content.len(),
                path
            ))),
            Err(err) => Ok(ToolOutput::error(format!(
                "Failed to write {}: {}",
                path, err
            ))),
        }
    }

    // ------------------------------------------------------------------
    // web_browse
    // ------------------------------------------------------------------

    async fn run_web_browse(&self, input: &Value) -> Result<ToolOutput> {
        let Some(url) = input.get("url").and_then(Value::as_str) else {
            return Ok(ToolOutput::error("Missing required parameter: url"));
        };
        if let Some(reason) = self.mediate(ActionKind::HttpRequest, url)? {
            return Ok(ToolOutput::blocked(&reason));
        }

        let response = match self
            .http
            .get(url)
            .header("Accept", "text/html,text/plain,*/*")
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return Ok(ToolOutput::error(format!("Fetch failed: {}", err))),
        };
        if !response.status().is_success() {
            return Ok(ToolOutput::error(format!(
                "Fetch failed with status {}",
                response.status()
            )));
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return Ok(ToolOutput::error(format!("Fetch failed: {}", err))),
        };
        Ok(ToolOutput::ok(strip_html(&body)))
    }

    // ------------------------------------------------------------------
    // vault
    // ------------------------------------------------------------------

    async fn run_vault(&self, input: &Value) -> Result<ToolOutput> {
        let Some(vault) = &self.vault else {
            return Ok(ToolOutput::error("No vault configured"));
        };
        let Some(action) = input.get("action").and_then(Value::as_str) else {
            return Ok(ToolOutput::error("Missing required parameter: action"));
        };
        let name = input.get("name").and_then(Value::as_str).unwrap_or("");
        let target = if name.is_empty() {
            action.to_string()
        } else {
            format!("{} {}", action, name)
        };
        if let Some(reason) = self.mediate(ActionKind::Vault, &target)? {
            return Ok(ToolOutput::blocked(&reason));
        }

        match action {
            "set" => {
                if name.is_empty() {
                    return Ok(ToolOutput::error("Missing required parameter: name"));
                }
                let Some(value) = input.get("value").and_then(Value::as_str) else {
                    return Ok(ToolOutput::error("Missing required parameter: value"));
                };
                let kind = input
                    .get("type")
                    .and_then(Value::as_str)
                    .map(parse_credential_kind)
                    .unwrap_or(CredentialKind::Generic);
                let description = input
                    .get("description")
                    .and_then(Value::as_str)
                    .map(String::from);
                match vault.set(name, value, kind, description).await {
                    Ok(()) => Ok(ToolOutput::ok(format!("Stored credential {}", name))),
                    Err(err) => Ok(ToolOutput::error(err.external_message())),
                }
            }
            "get" => {
                if name.is_empty() {
                    return Ok(ToolOutput::error("Missing required parameter: name"));
                }
                match vault.get(name).await? {
                    // Tool-surface reads are always masked.
                    Some(secret) => Ok(ToolOutput::ok(format!(
                        "{} = {} ({:?})",
                        name,
                        mask(&secret.value),
                        secret.meta.kind
                    ))),
                    None => Ok(ToolOutput::error(format!("Credential not found: {}", name))),
                }
            }
            "delete" => {
                if name.is_empty() {
                    return Ok(ToolOutput::error("Missing required parameter: name"));
                }
                vault.delete(name).await?;
                Ok(ToolOutput::ok(format!("Deleted credential {}", name)))
            }
            "list" => {
                let entries = vault.list().await?;
                if entries.is_empty() {
                    return Ok(ToolOutput::ok("Vault is empty"));
                }
                let lines: Vec<String> = entries
                    .iter()
                    .map(|(name, meta)| format!("{} ({:?})", name, meta.kind))
                    .collect();
                Ok(ToolOutput::ok(lines.join("\n")))
            }
            "generate_ssh_key" => {
                if name.is_empty() {
                    return Ok(ToolOutput::error("Missing required parameter: name"));
                }
                match vault.generate_ssh_key(name).await {
                    Ok(public_key) => Ok(ToolOutput::ok(format!(
                        "Generated keypair {}. Public key:\n{}",
                        name, public_key
                    ))),
                    Err(err) => Ok(ToolOutput::error(err.external_message())),
                }
            }
            other => Ok(ToolOutput::error(format!("Unknown vault action: {}", other))),
        }
    }

    // ------------------------------------------------------------------
    // ssh_exec
    // ------------------------------------------------------------------

    async fn run_ssh_exec(&self, input: &Value) -> Result<ToolOutput> {
        let Some(vault) = &self.vault else {
            return Ok(ToolOutput::error("No vault configured"));
        };
        let Some(host) = input.get("host").and_then(Value::as_str) else {
            return Ok(ToolOutput::error("Missing required parameter: host"));
        };
        let Some(command) = input.get("command").and_then(Value::as_str) else {
            return Ok(ToolOutput::error("Missing required parameter: command"));
        };
        let user = input.get("user").and_then(Value::as_str).unwrap_or("root");
        let port = input.get("port").and_then(Value::as_u64).unwrap_or(22);
        let key_name = input
            .get("key_name")
            .and_then(Value::as_str)
            .unwrap_or("SSH_KEY");
        let timeout_ms = input
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .min(MAX_TIMEOUT_MS);

        let target = format!("{}@{}:{}", user, host, port);
        if let Some(reason) = self.mediate(ActionKind::SshExec, &target)? {
            return Ok(ToolOutput::blocked(&reason));
        }

        let Some(secret) = vault.get(key_name).await? else {
            return Ok(ToolOutput::error(format!(
                "SSH key not found in vault: {}",
                key_name
            )));
        };

        let key_path = match write_temp_key(&secret.value).await {
            Ok(path) => path,
            Err(err) => return Ok(ToolOutput::error(err.external_message())),
        };

        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(&key_path)
            .arg("-p")
            .arg(port.to_string())
            // Host keys are accepted on first use and not persisted; the
            // host-key trust decision is deliberately out of this tool.
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(format!("{}@{}", user, host))
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = run_subprocess(cmd, timeout_ms).await;
        // The key file goes away on success, failure and timeout alike.
        if let Err(err) = tokio::fs::remove_file(&key_path).await {
            warn!(path = %key_path.display(), %err, "failed to remove temporary key file");
        }
        Ok(output)
    }

    // ------------------------------------------------------------------
    // git
    // ------------------------------------------------------------------

    async fn run_git(&self, input: &Value) -> Result<ToolOutput> {
        let Some(action) = input.get("action").and_then(Value::as_str) else {
            return Ok(ToolOutput::error("Missing required parameter: action"));
        };
        let repo = input.get("repo").and_then(Value::as_str);
        let path = input
            .get("path")
            .and_then(Value::as_str)
            .map(|p| self.resolve_path(p))
            .unwrap_or_else(|| self.working_dir.clone());
        let path_str = path.to_string_lossy().into_owned();

        let target = format!("{} {}", action, repo.unwrap_or(&path_str));
        if let Some(reason) = self.mediate(ActionKind::Git, &target)? {
            return Ok(ToolOutput::blocked(&reason));
        }

        let mut args: Vec<String> = Vec::new();
        match action {
            "clone" => {
                let Some(repo) = repo else {
                    return Ok(ToolOutput::error("Missing required parameter: repo"));
                };
                args.push("clone".to_string());
                args.push(repo.to_string());
                if let Some(dest) = input.get("path").and_then(Value::as_str) {
                    args.push(dest.to_string());
                }
            }
            "pull" | "push" | "status" | "diff" => {
                args.push("-C".to_string());
                args.push(path_str.clone());
                args.push(action.to_string());
            }
            "commit" => {
                let Some(message) = input.get("message").and_then(Value::as_str) else {
                    return Ok(ToolOutput::error("Missing required parameter: message"));
                };
                args.extend([
                    "-C".to_string(),
                    path_str.clone(),
                    "commit".to_string(),
                    "-a".to_string(),
                    "-m".to_string(),
                    message.to_string(),
                ]);
            }
            "log" => {
                args.extend([
                    "-C".to_string(),
                    path_str.clone(),
                    "log".to_string(),
                    "--oneline".to_string(),
                    "-20".to_string(),
                ]);
            }
            "checkout" => {
                let Some(branch) = input.get("branch").and_then(Value::as_str) else {
                    return Ok(ToolOutput::error("Missing required parameter: branch"));
                };
                args.extend([
                    "-C".to_string(),
                    path_str.clone(),
                    "checkout".to_string(),
                    branch.to_string(),
                ]);
            }
            other => {
                return Ok(ToolOutput::error(format!("Unknown git action: {}", other)));
            }
        }

        // Network operations get a deploy key when the vault holds one.
        let mut key_path: Option<PathBuf> = None;
        if matches!(action, "clone" | "pull" | "push") {
            if let Some(vault) = &self.vault {
                if let Some(secret) = vault.get("DEPLOY_KEY").await? {
                    match write_temp_key(&secret.value).await {
                        Ok(path) => key_path = Some(path),
                        Err(err) => {
                            warn!(%err, "failed to materialize deploy key; continuing without")
                        }
                    }
                }
            }
        }

        let mut cmd = Command::new("git");
        cmd.args(&args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(path) = &key_path {
            cmd.env(
                "GIT_SSH_COMMAND",
                format!(
                    "ssh -i {} -o StrictHostKeyChecking=accept-new -o UserKnownHostsFile=/dev/null -o BatchMode=yes",
                    path.display()
                ),
            );
        }

        let output = run_subprocess(cmd, DEFAULT_TIMEOUT_MS).await;
        if let Some(path) = key_path {
            if let Err(err) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), %err, "failed to remove deploy key file");
            }
        }
        Ok(output)
    }

    // ------------------------------------------------------------------
    // schedule
    // ------------------------------------------------------------------

    async fn run_schedule(&self, input: &Value) -> Result<ToolOutput> {
        let Some(schedules) = &self.schedules else {
            return Ok(ToolOutput::error("No storage backend configured"));
        };
        let Some(action) = input.get("action").and_then(Value::as_str) else {
            return Ok(ToolOutput::error("Missing required parameter: action"));
        };
        let target = format!(
            "{} {}",
            action,
            input
                .get("name")
                .or_else(|| input.get("id"))
                .and_then(Value::as_str)
                .unwrap_or("")
        );
        if let Some(reason) = self.mediate(ActionKind::Schedule, target.trim())? {
            return Ok(ToolOutput::blocked(&reason));
        }

        match action {
            "create" => {
                let Some(name) = input.get("name").and_then(Value::as_str) else {
                    return Ok(ToolOutput::error("Missing required parameter: name"));
                };
                let Some(cron) = input.get("cron").and_then(Value::as_str) else {
                    return Ok(ToolOutput::error("Missing required parameter: cron"));
                };
                let Some(task) = input.get("task").and_then(Value::as_str) else {
                    return Ok(ToolOutput::error("Missing required parameter: task"));
                };
                match schedules.create(name, cron, task, &self.agent_id).await {
                    Ok(entry) => Ok(ToolOutput::ok(format!(
                        "Created schedule {} ({}) with cron '{}'",
                        entry.name, entry.id, entry.cron
                    ))),
                    Err(err) => Ok(ToolOutput::error(err.external_message())),
                }
            }
            "list" => {
                let entries = schedules.list().await?;
                if entries.is_empty() {
                    return Ok(ToolOutput::ok("No schedules"));
                }
                let lines: Vec<String> = entries
                    .iter()
                    .map(|e| {
                        format!(
                            "{} {} '{}' {}",
                            e.id,
                            e.name,
                            e.cron,
                            if e.enabled { "enabled" } else { "paused" }
                        )
                    })
                    .collect();
                Ok(ToolOutput::ok(lines.join("\n")))
            }
            "delete" => {
                let Some(id) = input.get("id").and_then(Value::as_str) else {
                    return Ok(ToolOutput::error("Missing required parameter: id"));
                };
                schedules.delete(id).await?;
                Ok(ToolOutput::ok(format!("Deleted schedule {}", id)))
            }
            "pause" | "resume" => {
                let Some(id) = input.get("id").and_then(Value::as_str) else {
                    return Ok(ToolOutput::error("Missing required parameter: id"));
                };
                let result = if action == "pause" {
                    schedules.pause(id).await
                } else {
                    schedules.resume(id).await
                };
                match result {
                    Ok(entry) => Ok(ToolOutput::ok(format!(
                        "Schedule {} is now {}",
                        entry.id,
                        if entry.enabled { "enabled" } else { "paused" }
                    ))),
                    Err(err) => Ok(ToolOutput::error(err.external_message())),
                }
            }
            other => Ok(ToolOutput::error(format!(
                "Unknown schedule action: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("agent_id", &self.agent_id)
            .field("working_dir", &self.working_dir)
            .field("vault", &self.vault.is_some())
            .field("schedules", &self.schedules.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------
// subprocess plumbing
// ----------------------------------------------------------------------

enum CaptureError {
    Overflow,
    Io(std::io::Error),
}

async fn read_capped<R>(reader: Option<R>, cap: usize) -> std::result::Result<Vec<u8>, CaptureError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await.map_err(CaptureError::Io)?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > cap {
            return Err(CaptureError::Overflow);
        }
    }
}

/// Runs a prepared command with a timeout and bounded capture. Standard
/// error is merged after standard output behind a separator line; the
/// merged result is truncated to the command result cap.
async fn run_subprocess(mut cmd: Command, timeout_ms: u64) -> ToolOutput {
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => return ToolOutput::error(format!("Failed to start process: {}", err)),
    };
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let run = async {
        let (stdout, stderr) = futures::try_join!(
            read_capped(stdout_pipe, SUBPROCESS_BUFFER_CAP),
            read_capped(stderr_pipe, SUBPROCESS_BUFFER_CAP),
        )?;
        let status = child.wait().await.map_err(CaptureError::Io)?;
        Ok::<_, CaptureError>((stdout, stderr, status))
    };

    match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
        Err(_elapsed) => {
            let _ = child.kill().await;
            ToolOutput::error(format!("Command timed out after {} ms", timeout_ms))
        }
        Ok(Err(CaptureError::Overflow)) => {
            let _ = child.kill().await;
            ToolOutput::error("Command output exceeded 1 MiB buffer; process killed")
        }
        Ok(Err(CaptureError::Io(err))) => {
            let _ = child.kill().await;
            ToolOutput::error(format!("Failed to capture output: {}", err))
        }
        Ok(Ok((stdout, stderr, status))) => {
            let mut merged = String::from_utf8_lossy(&stdout).into_owned();
            if !stderr.is_empty() {
                if !merged.is_empty() {
                    merged.push('\n');
                }
                merged.push_str("--- stderr ---\n");
                merged.push_str(&String::from_utf8_lossy(&stderr));
            }
            let merged = truncate_bytes(merged.trim_end(), COMMAND_RESULT_CAP);
            if status.success() {
                ToolOutput::ok(merged)
            } else {
                let code = status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                let body = if merged.is_empty() {
                    format!("Command failed with exit code {}", code)
                } else {
                    format!("{}\nCommand failed with exit code {}", merged, code)
                };
                ToolOutput::error(body)
            }
        }
    }
}

/// Writes key material to a randomly named file readable only by the owner.
async fn write_temp_key(material: &str) -> Result<PathBuf> {
    let suffix: String = {
        let mut rng = rand::thread_rng();
        (0..16)
            .map(|_| {
                let n: u8 = rng.gen_range(0..16);
                char::from_digit(n as u32, 16).unwrap_or('0')
            })
            .collect()
    };
    let path = std::env::temp_dir().join(format!(".tamalebot-key-{}", suffix));
    tokio::fs::write(&path, material.as_bytes()).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(path)
}

// ----------------------------------------------------------------------
// text shaping
// ----------------------------------------------------------------------

/// Truncates to at most `cap` bytes on a character boundary.
fn truncate_bytes(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Strips scripts, styles and markup from an HTML page, collapses
/// whitespace and caps the result at the page character limit.
pub(crate) fn strip_html(body: &str) -> String {
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    static STYLE: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    static SPACE: OnceLock<Regex> = OnceLock::new();

    let script = SCRIPT.get_or_init(|| {
        Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("static pattern compiles")
    });
    let style = STYLE.get_or_init(|| {
        Regex::new(r"(?is)<style\b[^>]*>.*?</style>").expect("static pattern compiles")
    });
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("static pattern compiles"));
    let space = SPACE.get_or_init(|| Regex::new(r"\s+").expect("static pattern compiles"));

    let text = script.replace_all(body, " ");
    let text = style.replace_all(&text, " ");
    let text = tag.replace_all(&text, " ");
    let text = space.replace_all(&text, " ");
    let text = text.trim();
    text.chars().take(PAGE_CHAR_CAP).collect()
}

fn parse_credential_kind(s: &str) -> CredentialKind {
    match s {
        "api_key" => CredentialKind::ApiKey,
        "ssh_key" => CredentialKind::SshKey,
        "ssh_public_key" => CredentialKind::SshPublicKey,
        "token" => CredentialKind::Token,
        "database_url" => CredentialKind::DatabaseUrl,
        _ => CredentialKind::Generic,
    }
}
