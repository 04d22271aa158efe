//! Policy engine: the single decision point for mediated actions.
//!
//! Every side effect a model proposes, whether a subprocess, a file touch, an
//! outbound fetch, or a remote command, is reduced to an (action kind, target)
//! pair and passed through [`PolicyEngine::evaluate`] before anything
//! happens. Decisions are a pure function of configuration and input; the
//! one piece of state the engine keeps is the request counter behind the
//! optional hourly rate limit, and with no limit configured the same input
//! always produces the same decision.
//!
//! Command screening is textual on purpose. Arguments go through a shell
//! whose expansion the engine cannot predict, so patterns match anywhere in
//! the raw command string. `rm -rf /tmp/workspace/old_files` is denied
//! because it contains `rm -rf /`; that false-positive cost is accepted.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;
use url::Url;

/// Span of the rate-limit accounting window.
const RATE_WINDOW: Duration = Duration::from_secs(3600);

/// The kinds of mediated action the engine can rule on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Reading a file path.
    FileRead,
    /// Writing or creating a file path.
    FileWrite,
    /// Running a shell command.
    Command,
    /// Fetching a URL.
    HttpRequest,
    /// Executing a command over secure shell; target is `user@host:port`.
    SshExec,
    /// A version-control operation; target is `action repo-or-path`.
    Git,
    /// A credential vault operation. Mediation happens inside the tool.
    Vault,
    /// A schedule store operation. Mediation happens inside the tool.
    Schedule,
}

impl ActionKind {
    /// Snake-case name as written to the audit journal.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::FileRead => "file_read",
            ActionKind::FileWrite => "file_write",
            ActionKind::Command => "command",
            ActionKind::HttpRequest => "http_request",
            ActionKind::SshExec => "ssh_exec",
            ActionKind::Git => "git",
            ActionKind::Vault => "vault",
            ActionKind::Schedule => "schedule",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyDecision {
    /// Whether the action may proceed.
    pub allowed: bool,
    /// Human-readable denial reason. Absent when allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Full list of pattern sources that matched a command target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_patterns: Option<Vec<String>>,
}

impl PolicyDecision {
    /// An allow decision.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            matched_patterns: None,
        }
    }

    /// A deny decision with the given reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            matched_patterns: None,
        }
    }
}

/// Named policy configuration.
///
/// Empty block-lists block nothing; empty allow-lists restrict nothing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    /// Policy name, for logs and the audit trail.
    #[serde(default)]
    pub name: String,
    /// Paths denied to `file_read`. Entries ending in `/` block the subtree.
    #[serde(default)]
    pub blocked_read_paths: Vec<String>,
    /// Path prefixes denied to `file_write`.
    #[serde(default)]
    pub blocked_write_paths: Vec<String>,
    /// Regular expressions matched case-insensitively anywhere in a command.
    #[serde(default)]
    pub dangerous_commands: Vec<String>,
    /// Hostnames reachable by `http_request`. Empty means unrestricted.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    /// Hosts reachable by `ssh_exec`. Empty means unrestricted.
    #[serde(default)]
    pub allowed_ssh_hosts: Vec<String>,
    /// Substrings a remote git target must contain. Empty means unrestricted.
    #[serde(default)]
    pub allowed_git_repos: Vec<String>,
    /// Hourly budget across mediated actions. `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests_per_hour: Option<u32>,
}

impl PolicyConfig {
    /// A restrictive baseline: secret stores unreadable, system paths
    /// unwritable, destructive commands screened.
    pub fn standard() -> Self {
        Self {
            name: "standard".to_string(),
            blocked_read_paths: vec![
                "/etc/shadow".to_string(),
                "/etc/sudoers".to_string(),
                "~/.ssh/".to_string(),
                "~/.aws/".to_string(),
                "~/.gnupg/".to_string(),
            ],
            blocked_write_paths: vec![
                "/etc/".to_string(),
                "/usr/".to_string(),
                "/boot/".to_string(),
                "/bin/".to_string(),
                "/sbin/".to_string(),
            ],
            dangerous_commands: vec![
                r"rm\s+-rf\s+/".to_string(),
                r"\bsudo\b".to_string(),
                r"mkfs\.".to_string(),
                r"dd\s+if=".to_string(),
                r">\s*/dev/sd".to_string(),
                r"chmod\s+(-R\s+)?777\s+/".to_string(),
                r"curl[^|]*\|\s*(ba|z)?sh".to_string(),
                r"wget[^|]*\|\s*(ba|z)?sh".to_string(),
                r"\bshutdown\b".to_string(),
                r"\breboot\b".to_string(),
            ],
            allowed_domains: Vec::new(),
            allowed_ssh_hosts: Vec::new(),
            allowed_git_repos: Vec::new(),
            max_requests_per_hour: None,
        }
    }
}

/// Accounting window for the optional hourly request budget.
struct RateWindow {
    started: Instant,
    count: u32,
}

/// Decision function over (action kind, target).
pub struct PolicyEngine {
    config: PolicyConfig,
    /// Compiled alongside their sources so reasons can cite the original text.
    patterns: Vec<(String, Regex)>,
    home: PathBuf,
    rate: Mutex<RateWindow>,
}

impl PolicyEngine {
    /// Compiles the configuration. Invalid command patterns are dropped with
    /// a warning; everything else is kept verbatim.
    pub fn new(config: PolicyConfig) -> Self {
        let patterns = config
            .dangerous_commands
            .iter()
            .filter_map(|source| {
                match RegexBuilder::new(source).case_insensitive(true).build() {
                    Ok(re) => Some((source.clone(), re)),
                    Err(err) => {
                        warn!(pattern = %source, %err, "dropping invalid command pattern");
                        None
                    }
                }
            })
            .collect();

        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        Self {
            config,
            patterns,
            home,
            rate: Mutex::new(RateWindow {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Overrides the home directory used for `~` expansion.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    /// The configuration this engine was built from.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Expands a leading `~` against the configured home directory.
    fn expand_home(&self, path: &str) -> String {
        if let Some(rest) = path.strip_prefix("~/") {
            return self.home.join(rest).to_string_lossy().into_owned();
        }
        if path == "~" {
            return self.home.to_string_lossy().into_owned();
        }
        path.to_string()
    }

    /// Evaluates one proposed action. With no rate limit configured the
    /// decision depends only on the configuration and the input.
    pub fn evaluate(&self, kind: ActionKind, target: &str) -> PolicyDecision {
        // The vault and schedule tools mediate internally and do not count
        // against the request budget.
        if matches!(kind, ActionKind::Vault | ActionKind::Schedule) {
            return PolicyDecision::allow();
        }
        if let Some(denied) = self.consume_budget() {
            return denied;
        }
        match kind {
            ActionKind::FileRead => self.evaluate_file_read(target),
            ActionKind::FileWrite => self.evaluate_file_write(target),
            ActionKind::Command => self.evaluate_command(target),
            ActionKind::HttpRequest => self.evaluate_http(target),
            ActionKind::SshExec => self.evaluate_ssh(target),
            ActionKind::Git => self.evaluate_git(target),
            ActionKind::Vault | ActionKind::Schedule => PolicyDecision::allow(),
        }
    }

    /// Counts one mediated action against the hourly budget, returning the
    /// denial once the budget is spent. The window resets an hour after it
    /// opened.
    fn consume_budget(&self) -> Option<PolicyDecision> {
        let limit = self.config.max_requests_per_hour?;
        let mut window = self
            .rate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if window.started.elapsed() >= RATE_WINDOW {
            window.started = Instant::now();
            window.count = 0;
        }
        window.count += 1;
        if window.count > limit {
            return Some(PolicyDecision::deny(format!(
                "Request rate limit exceeded: {} per hour",
                limit
            )));
        }
        None
    }

    fn evaluate_file_read(&self, target: &str) -> PolicyDecision {
        let path = self.expand_home(target);
        for entry in &self.config.blocked_read_paths {
            let blocked = self.expand_home(entry);
            if entry.ends_with('/') {
                if path.starts_with(&blocked) {
                    return PolicyDecision::deny(format!(
                        "Access to sensitive directory denied: {}",
                        blocked
                    ));
                }
            } else if path == blocked {
                return PolicyDecision::deny(format!(
                    "Access to sensitive file denied: {}",
                    blocked
                ));
            }
        }
        PolicyDecision::allow()
    }

    fn evaluate_file_write(&self, target: &str) -> PolicyDecision {
        let path = self.expand_home(target);
        for entry in &self.config.blocked_write_paths {
            let blocked = self.expand_home(entry);
            if path.starts_with(&blocked) {
                return PolicyDecision::deny(format!(
                    "Write to protected path denied: {}",
                    blocked
                ));
            }
        }
        PolicyDecision::allow()
    }

    fn evaluate_command(&self, target: &str) -> PolicyDecision {
        let matched: Vec<String> = self
            .patterns
            .iter()
            .filter(|(_, re)| re.is_match(target))
            .map(|(source, _)| source.clone())
            .collect();

        if matched.is_empty() {
            return PolicyDecision::allow();
        }

        let cited = matched
            .iter()
            .take(2)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        PolicyDecision {
            allowed: false,
            reason: Some(format!("Dangerous command pattern matched: {}", cited)),
            matched_patterns: Some(matched),
        }
    }

    fn evaluate_http(&self, target: &str) -> PolicyDecision {
        if self.config.allowed_domains.is_empty() {
            return PolicyDecision::allow();
        }
        let host = match Url::parse(target) {
            Ok(url) => match url.host_str() {
                Some(host) => host.to_string(),
                None => return PolicyDecision::deny("Invalid URL"),
            },
            Err(_) => return PolicyDecision::deny("Invalid URL"),
        };
        if host_allowed(&host, &self.config.allowed_domains) {
            PolicyDecision::allow()
        } else {
            PolicyDecision::deny(format!("Domain not in allow-list: {}", host))
        }
    }

    fn evaluate_ssh(&self, target: &str) -> PolicyDecision {
        if self.config.allowed_ssh_hosts.is_empty() {
            return PolicyDecision::allow();
        }
        // Target form is user@host:port; both decorations are optional.
        let host_part = target.rsplit('@').next().unwrap_or(target);
        let host = host_part.split(':').next().unwrap_or(host_part);
        if host_allowed(host, &self.config.allowed_ssh_hosts) {
            PolicyDecision::allow()
        } else {
            PolicyDecision::deny(format!("SSH host not in allow-list: {}", host))
        }
    }

    fn evaluate_git(&self, target: &str) -> PolicyDecision {
        if self.config.allowed_git_repos.is_empty() {
            return PolicyDecision::allow();
        }
        let mut parts = target.split_whitespace();
        let _action = parts.next();
        let repo = match parts.next() {
            Some(repo) => repo,
            None => return PolicyDecision::allow(),
        };
        // Local paths are unrestricted; the allow-list only gates remotes.
        let looks_remote =
            repo.contains("://") || repo.contains('@') || repo.contains("github.com");
        if !looks_remote {
            return PolicyDecision::allow();
        }
        if self
            .config
            .allowed_git_repos
            .iter()
            .any(|allowed| repo.contains(allowed))
        {
            PolicyDecision::allow()
        } else {
            PolicyDecision::deny(format!("Repository not in allow-list: {}", repo))
        }
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("name", &self.config.name)
            .field("patterns", &format!("{} compiled", self.patterns.len()))
            .field("home", &self.home)
            .finish()
    }
}

/// Exact match, or suffix match at a label boundary (`api.example.com`
/// matches `example.com` but `notexample.com` does not).
fn host_allowed(host: &str, allowed: &[String]) -> bool {
    allowed
        .iter()
        .any(|entry| host == entry || host.ends_with(&format!(".{}", entry)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(config: PolicyConfig) -> PolicyEngine {
        PolicyEngine::new(config).with_home("/home/agent")
    }

    #[test]
    fn test_unrestricted_config_allows_everything() {
        let e = engine(PolicyConfig::default());
        for kind in [
            ActionKind::FileRead,
            ActionKind::FileWrite,
            ActionKind::Command,
            ActionKind::HttpRequest,
            ActionKind::SshExec,
            ActionKind::Git,
        ] {
            assert!(e.evaluate(kind, "anything").allowed, "{kind} should allow");
        }
    }

    #[test]
    fn test_file_read_exact_and_directory() {
        let e = engine(PolicyConfig {
            blocked_read_paths: vec!["/etc/shadow".to_string(), "~/.ssh/".to_string()],
            ..Default::default()
        });

        let d = e.evaluate(ActionKind::FileRead, "/etc/shadow");
        assert!(!d.allowed);
        assert!(d.reason.unwrap().contains("sensitive file"));

        let d = e.evaluate(ActionKind::FileRead, "~/.ssh/id_ed25519");
        assert!(!d.allowed);
        assert!(d.reason.unwrap().contains("sensitive directory"));

        // Prefix of a blocked file is not itself blocked.
        assert!(e.evaluate(ActionKind::FileRead, "/etc/shadow.bak").allowed);
        assert!(e.evaluate(ActionKind::FileRead, "/etc/hosts").allowed);
    }

    #[test]
    fn test_file_write_prefix() {
        let e = engine(PolicyConfig {
            blocked_write_paths: vec!["/etc/".to_string()],
            ..Default::default()
        });
        assert!(!e.evaluate(ActionKind::FileWrite, "/etc/passwd").allowed);
        assert!(e.evaluate(ActionKind::FileWrite, "/tmp/notes.txt").allowed);
    }

    #[test]
    fn test_home_expansion_applies_to_both_sides() {
        let e = engine(PolicyConfig {
            blocked_read_paths: vec!["~/.aws/".to_string()],
            ..Default::default()
        });
        assert!(
            !e.evaluate(ActionKind::FileRead, "/home/agent/.aws/credentials")
                .allowed
        );
    }

    #[test]
    fn test_command_pattern_matches_anywhere() {
        let e = engine(PolicyConfig::standard());
        // The accepted false positive: a scoped delete still trips the
        // `rm -rf /` pattern.
        let d = e.evaluate(ActionKind::Command, "rm -rf /tmp/workspace/old_files");
        assert!(!d.allowed);
        assert!(d.matched_patterns.is_some());

        assert!(e.evaluate(ActionKind::Command, "ls -la").allowed);
        assert!(e.evaluate(ActionKind::Command, "echo hello").allowed);
    }

    #[test]
    fn test_command_case_insensitive() {
        let e = engine(PolicyConfig::standard());
        assert!(!e.evaluate(ActionKind::Command, "SUDO apt install x").allowed);
    }

    #[test]
    fn test_command_reason_cites_at_most_two_patterns() {
        let e = engine(PolicyConfig {
            dangerous_commands: vec!["aaa".to_string(), "bbb".to_string(), "ccc".to_string()],
            ..Default::default()
        });
        let d = e.evaluate(ActionKind::Command, "aaa bbb ccc");
        assert!(!d.allowed);
        let reason = d.reason.unwrap();
        assert!(reason.contains("aaa") && reason.contains("bbb"));
        assert!(!reason.contains("ccc"));
        assert_eq!(d.matched_patterns.unwrap().len(), 3);
    }

    #[test]
    fn test_invalid_patterns_silently_dropped() {
        let e = engine(PolicyConfig {
            dangerous_commands: vec!["[unclosed".to_string(), "valid".to_string()],
            ..Default::default()
        });
        assert_eq!(e.patterns.len(), 1);
        assert!(!e.evaluate(ActionKind::Command, "a valid thing").allowed);
    }

    #[test]
    fn test_http_allow_list() {
        let e = engine(PolicyConfig {
            allowed_domains: vec!["api.anthropic.com".to_string(), "api.openai.com".to_string()],
            ..Default::default()
        });

        let d = e.evaluate(ActionKind::HttpRequest, "https://evil.com/exfil");
        assert!(!d.allowed);
        assert!(d.reason.unwrap().contains("evil.com"));

        assert!(
            e.evaluate(ActionKind::HttpRequest, "https://api.anthropic.com/v1/messages")
                .allowed
        );
    }

    #[test]
    fn test_http_suffix_is_label_bounded() {
        let e = engine(PolicyConfig {
            allowed_domains: vec!["example.com".to_string()],
            ..Default::default()
        });
        assert!(
            e.evaluate(ActionKind::HttpRequest, "https://api.example.com/x")
                .allowed
        );
        assert!(
            !e.evaluate(ActionKind::HttpRequest, "https://notexample.com/x")
                .allowed
        );
    }

    #[test]
    fn test_http_invalid_url() {
        let e = engine(PolicyConfig {
            allowed_domains: vec!["example.com".to_string()],
            ..Default::default()
        });
        let d = e.evaluate(ActionKind::HttpRequest, "not a url");
        assert!(!d.allowed);
        assert_eq!(d.reason.unwrap(), "Invalid URL");
    }

    #[test]
    fn test_ssh_host_extraction() {
        let e = engine(PolicyConfig {
            allowed_ssh_hosts: vec!["prod.internal".to_string()],
            ..Default::default()
        });
        assert!(
            e.evaluate(ActionKind::SshExec, "root@prod.internal:22")
                .allowed
        );
        assert!(
            e.evaluate(ActionKind::SshExec, "deploy@web1.prod.internal:2222")
                .allowed
        );
        let d = e.evaluate(ActionKind::SshExec, "root@evil.example:22");
        assert!(!d.allowed);
        assert!(d.reason.unwrap().contains("evil.example"));
    }

    #[test]
    fn test_git_only_gates_remote_targets() {
        let e = engine(PolicyConfig {
            allowed_git_repos: vec!["github.com/tamalebot".to_string()],
            ..Default::default()
        });
        // Local paths pass untouched.
        assert!(e.evaluate(ActionKind::Git, "status /tmp/checkout").allowed);
        assert!(
            e.evaluate(ActionKind::Git, "clone https://github.com/tamalebot/core.git")
                .allowed
        );
        assert!(
            !e.evaluate(ActionKind::Git, "clone https://github.com/attacker/repo.git")
                .allowed
        );
        assert!(
            !e.evaluate(ActionKind::Git, "push git@gitlab.com:x/y.git")
                .allowed
        );
    }

    #[test]
    fn test_vault_and_schedule_always_allow() {
        let e = engine(PolicyConfig::standard());
        assert!(e.evaluate(ActionKind::Vault, "set MY_KEY").allowed);
        assert!(e.evaluate(ActionKind::Schedule, "create nightly").allowed);
    }

    #[test]
    fn test_rate_limit_denies_after_budget_spent() {
        let e = engine(PolicyConfig {
            max_requests_per_hour: Some(2),
            ..Default::default()
        });
        assert!(e.evaluate(ActionKind::Command, "ls").allowed);
        assert!(e.evaluate(ActionKind::FileRead, "/tmp/a").allowed);

        let d = e.evaluate(ActionKind::Command, "ls");
        assert!(!d.allowed);
        assert!(d.reason.unwrap().contains("rate limit"));
        // Still denied on the next request; the window has not rolled over.
        assert!(!e.evaluate(ActionKind::HttpRequest, "https://x.test/").allowed);
    }

    #[test]
    fn test_rate_limit_ignores_vault_and_schedule() {
        let e = engine(PolicyConfig {
            max_requests_per_hour: Some(1),
            ..Default::default()
        });
        for _ in 0..5 {
            assert!(e.evaluate(ActionKind::Vault, "get KEY").allowed);
            assert!(e.evaluate(ActionKind::Schedule, "list").allowed);
        }
        // The budget is still intact for mediated actions.
        assert!(e.evaluate(ActionKind::Command, "ls").allowed);
        assert!(!e.evaluate(ActionKind::Command, "ls").allowed);
    }

    #[test]
    fn test_determinism() {
        let e = engine(PolicyConfig::standard());
        let a = e.evaluate(ActionKind::Command, "sudo rm -rf / --no-preserve-root");
        let b = e.evaluate(ActionKind::Command, "sudo rm -rf / --no-preserve-root");
        assert_eq!(a, b);
    }
}
