//! Sandboxed subprocess execution and input validation.
//!
//! Commands are argv vectors passed straight to the OS; nothing is ever
//! run through a shell. Every executor owns a fresh temporary directory
//! that is removed when it drops.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;
use walkdir::WalkDir;

use super::FactError;

/// Characters that would let an argument break out of its argv slot.
pub const SHELL_METACHARACTERS: [char; 9] = [';', '&', '|', '`', '$', '<', '>', '\n', '\r'];

const ALLOWED_SCHEMES: [&str; 3] = ["https", "http", "git"];

/// Commits fetched by the shallow clone; enough to judge iterative history.
const CLONE_DEPTH: &str = "50";

/// Fatal input violations. Never retried, never downgraded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("domain '{domain}' is not in the allow-list")]
    DisallowedDomain { domain: String },

    #[error("unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("path '{0}' escapes its base directory")]
    PathTraversal(String),

    #[error("shell metacharacter {character:?} in '{input}'")]
    ShellMetacharacter { character: char, input: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl SecurityError {
    fn kind(&self) -> &'static str {
        match self {
            SecurityError::DisallowedDomain { .. } => "disallowed_domain",
            SecurityError::UnsupportedScheme(_) => "unsupported_scheme",
            SecurityError::PathTraversal(_) => "path_traversal",
            SecurityError::ShellMetacharacter { .. } => "shell_metacharacter",
            SecurityError::InvalidUrl(_) => "invalid_url",
        }
    }
}

fn violation(err: SecurityError) -> SecurityError {
    warn!(security_violation = err.kind(), error = %err, "Security violation");
    err
}

/// Reject any argument carrying a shell metacharacter.
pub fn sanitize_command_arg(arg: &str) -> Result<&str, SecurityError> {
    match arg.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        Some(character) => Err(violation(SecurityError::ShellMetacharacter {
            character,
            input: arg.to_string(),
        })),
        None => Ok(arg),
    }
}

/// Validate a repository URL: metacharacters, scheme, no embedded
/// credentials, host allow-list (subdomains of an allowed domain pass), no
/// `..` segment. Returns the parsed URL; callers hand `as_str()` to git so
/// the clone targets exactly the host that was checked.
pub fn validate_git_url(url: &str, allowed_domains: &[String]) -> Result<Url, SecurityError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(violation(SecurityError::InvalidUrl("empty URL".into())));
    }
    sanitize_command_arg(url)?;

    // Url::parse resolves dot segments, so look at the raw text first
    if url.split(['/', '\\']).any(|segment| segment == ".." || segment.eq_ignore_ascii_case("%2e%2e")) {
        return Err(violation(SecurityError::PathTraversal(url.to_string())));
    }

    let parsed = Url::parse(url).map_err(|err| match err {
        // scp-style `git@host:path` and bare paths have no scheme
        url::ParseError::RelativeUrlWithoutBase => {
            violation(SecurityError::UnsupportedScheme(url.split(':').next().unwrap_or_default().to_string()))
        }
        other => violation(SecurityError::InvalidUrl(format!("'{}': {}", url, other))),
    })?;

    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(violation(SecurityError::UnsupportedScheme(parsed.scheme().to_string())));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(violation(SecurityError::InvalidUrl("credentials in repository URL".into())));
    }

    let host = match parsed.host_str() {
        Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
        _ => return Err(violation(SecurityError::InvalidUrl(format!("no host in '{}'", url)))),
    };
    let allowed = allowed_domains.iter().any(|domain| {
        let domain = domain.trim().to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{}", domain))
    });
    if !allowed {
        return Err(violation(SecurityError::DisallowedDomain { domain: host }));
    }

    debug!(host = %host, "Validated repository URL");
    Ok(parsed)
}

/// Resolve `path` against `base`, rejecting anything that escapes it.
pub fn validate_file_path(path: &Path, base: &Path) -> Result<PathBuf, SecurityError> {
    let joined = if path.is_absolute() { path.to_path_buf() } else { base.join(path) };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(violation(SecurityError::PathTraversal(path.display().to_string())));
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }

    let base_normalized: PathBuf = base.components().filter(|c| !matches!(c, Component::CurDir)).collect();
    if !normalized.starts_with(&base_normalized) {
        return Err(violation(SecurityError::PathTraversal(path.display().to_string())));
    }

    // Symlinks can still point outside; check the real locations when they exist
    if let (Ok(real), Ok(real_base)) = (normalized.canonicalize(), base.canonicalize()) {
        if !real.starts_with(&real_base) {
            return Err(violation(SecurityError::PathTraversal(path.display().to_string())));
        }
    }

    Ok(normalized)
}

/// Size of a file in bytes, failing if it exceeds `max_bytes`.
pub fn validate_file_size(path: &Path, max_bytes: u64) -> Result<u64, FactError> {
    let size = std::fs::metadata(path)?.len();
    if size > max_bytes {
        return Err(FactError::ResourceLimit(format!(
            "{} is {:.2}MB, limit is {:.2}MB",
            path.display(),
            size as f64 / 1_048_576.0,
            max_bytes as f64 / 1_048_576.0
        )));
    }
    Ok(size)
}

/// Total size of regular files under `dir`. Symlinks are not followed.
pub fn directory_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(std::io::Error::from)?.len();
        }
    }
    Ok(total)
}

/// Output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs commands inside an exclusively owned temporary directory.
pub struct SandboxedExecutor {
    workdir: TempDir,
    timeout: Duration,
}

impl SandboxedExecutor {
    pub fn new(timeout: Duration) -> Result<Self, FactError> {
        let workdir = tempfile::Builder::new().prefix("tribunal-").tempdir()?;
        debug!(path = %workdir.path().display(), "Created sandbox directory");
        Ok(Self { workdir, timeout })
    }

    pub fn path(&self) -> &Path {
        self.workdir.path()
    }

    /// Run `argv` with the sandbox (or `cwd`) as working directory.
    pub async fn run(&self, argv: &[&str], cwd: Option<&Path>) -> Result<CommandOutput, FactError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| FactError::CannotProceed("empty command".into()))?;
        for arg in argv {
            sanitize_command_arg(arg)?;
        }

        let start = Instant::now();
        let child = Command::new(program)
            .args(args)
            .current_dir(cwd.unwrap_or_else(|| self.path()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!(command = %program, timeout = ?self.timeout, "Command timed out");
                FactError::Timeout(self.timeout)
            })??;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Shallow-clone `url` into `<sandbox>/repo` after validating it.
    pub async fn clone_repository(
        &self,
        git_binary: &str,
        url: &str,
        allowed_domains: &[String],
    ) -> Result<PathBuf, FactError> {
        let url = validate_git_url(url, allowed_domains)?;
        let url = url.as_str();

        let target = self.path().join("repo");
        let target_arg = target.to_string_lossy().into_owned();
        info!(url = %url, "Cloning repository");

        let output = self
            .run(
                &[git_binary, "clone", "--depth", CLONE_DEPTH, "--single-branch", "--", url, &target_arg],
                None,
            )
            .await?;

        if !output.success() {
            return Err(FactError::CannotProceed(format!(
                "git clone failed: {}",
                output.stderr.trim()
            )));
        }
        info!(duration_ms = output.duration_ms, "Repository cloned");
        Ok(target)
    }
}
