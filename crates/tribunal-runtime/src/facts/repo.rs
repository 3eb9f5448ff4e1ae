//! Repository forensics.
//!
//! Clones the target repository into a sandbox and reports on its history,
//! layout and a fixed set of implementation signals.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use tribunal_core::{AuditInputs, Evidence, TargetArtifact};
use walkdir::{DirEntry, WalkDir};

use super::sandbox::{directory_size, SandboxedExecutor};
use super::{FactError, FactFinder};
use crate::config::SandboxConfig;
use crate::evidence::producers::REPO_INVESTIGATOR;

/// Location of the evidence item listing every file in the checkout.
pub const MANIFEST_LOCATION: &str = "repo:manifest";

const HISTORY_LOCATION: &str = "git log";

const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "rs", "ts", "tsx", "js", "jsx", "go", "java", "kt", "rb", "toml", "yaml", "yml", "json", "cfg",
];

const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target", "__pycache__", ".venv", "venv", "dist"];

/// A construct whose presence says something about the implementation.
struct Signal {
    id: &'static str,
    /// Evidence content prefix; grounding checks match on these words
    description: &'static str,
    needles: &'static [&'static str],
}

const SIGNALS: &[Signal] = &[
    Signal {
        id: "parallel_execution",
        description: "parallel execution",
        needles: &["asyncio.gather", "ThreadPoolExecutor", "tokio::join!", "JoinSet", "join_all", "Promise.all", "Send("],
    },
    Signal {
        id: "structured_output",
        description: "structured output",
        needles: &["with_structured_output", "bind_tools", "response_format", "tool_choice", "BaseModel"],
    },
    Signal {
        id: "sandboxing",
        description: "sandbox",
        needles: &["TemporaryDirectory", "tempfile", "mkdtemp", "tempdir"],
    },
    Signal {
        id: "state_reducers",
        description: "reducer",
        needles: &["operator.add", "operator.ior", "Annotated[", "reducer"],
    },
    Signal {
        id: "shell_execution_risk",
        description: "shell execution risk",
        needles: &["os.system(", "shell=True", "\"sh\", \"-c\"", "eval("],
    },
];

#[derive(Debug, Default)]
struct RepoScan {
    files: Vec<String>,
    hits: BTreeMap<&'static str, SignalHit>,
    test_files: Vec<String>,
}

#[derive(Debug)]
struct SignalHit {
    first_file: String,
    needle: &'static str,
    files: usize,
}

/// Clones and inspects the repository.
pub struct RepoInvestigator {
    sandbox: SandboxConfig,
}

impl RepoInvestigator {
    pub fn new(sandbox: SandboxConfig) -> Self {
        Self { sandbox }
    }

    /// Inspect an existing checkout. `executor` runs git inside it.
    async fn analyze_checkout(
        &self,
        executor: &SandboxedExecutor,
        repo_url: &str,
        repo: &Path,
    ) -> Result<Vec<Evidence>, FactError> {
        let max_repo = self.sandbox.max_repo_bytes();
        let max_file = self.sandbox.max_file_bytes();
        let root = repo.to_path_buf();

        let (size, scan) = tokio::task::spawn_blocking(move || -> Result<(u64, RepoScan), FactError> {
            let size = directory_size(&root)?;
            if size > max_repo {
                return Err(FactError::ResourceLimit(format!(
                    "repository is {:.2}MB, limit is {:.2}MB",
                    size as f64 / 1_048_576.0,
                    max_repo as f64 / 1_048_576.0
                )));
            }
            Ok((size, scan_repository(&root, max_file)?))
        })
        .await
        .map_err(|e| FactError::CannotProceed(format!("repository scan task failed: {}", e)))??;

        info!(size_bytes = size, files = scan.files.len(), "Repository scanned");

        let mut evidences = vec![Evidence::found(
            REPO_INVESTIGATOR,
            repo_url,
            format!("Repository cloned ({:.2}MB, {} files)", size as f64 / 1_048_576.0, scan.files.len()),
            1.0,
        )];
        evidences.push(self.history_evidence(executor, repo).await);
        evidences.extend(structure_evidence(&scan));
        evidences.extend(signal_evidence(&scan));
        evidences.push(test_suite_evidence(&scan));
        evidences.push(Evidence::new(REPO_INVESTIGATOR, MANIFEST_LOCATION, !scan.files.is_empty(), 1.0)
            .with_content(scan.files.join("\n")));

        Ok(evidences)
    }

    async fn history_evidence(&self, executor: &SandboxedExecutor, repo: &Path) -> Evidence {
        let output = executor
            .run(&[self.sandbox.git_binary.as_str(), "log", "--oneline", "--reverse"], Some(repo))
            .await;

        let output = match output {
            Ok(output) if output.success() => output,
            Ok(output) => {
                warn!(stderr = %output.stderr.trim(), "git log failed");
                return Evidence::missing(REPO_INVESTIGATOR, HISTORY_LOCATION, "Commit history unavailable", 0.0);
            }
            Err(err) => {
                warn!(error = %err, "git log failed");
                return Evidence::missing(REPO_INVESTIGATOR, HISTORY_LOCATION, "Commit history unavailable", 0.0);
            }
        };

        let messages: Vec<&str> = output
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.split_once(' ').map_or("", |(_, msg)| msg))
            .collect();
        let commits = messages.len();
        let descriptive = messages.iter().filter(|m| m.len() > 20).count();
        let shape = if commits > 3 {
            "Development appears iterative with step-by-step progression."
        } else {
            "Development appears monolithic (few commits)."
        };

        Evidence::found(
            REPO_INVESTIGATOR,
            HISTORY_LOCATION,
            format!(
                "Found {} commits, {} with descriptive messages. {} First: {}",
                commits,
                descriptive,
                shape,
                messages.iter().take(3).copied().collect::<Vec<_>>().join(" | ")
            ),
            (commits as f64 / 10.0).min(1.0),
        )
    }
}

#[async_trait]
impl FactFinder for RepoInvestigator {
    fn name(&self) -> &str {
        REPO_INVESTIGATOR
    }

    fn target_artifact(&self) -> TargetArtifact {
        TargetArtifact::Repo
    }

    async fn investigate(&self, inputs: &AuditInputs) -> Result<Vec<Evidence>, FactError> {
        let executor = SandboxedExecutor::new(self.sandbox.clone_timeout)?;
        let repo = match executor
            .clone_repository(&self.sandbox.git_binary, &inputs.repo_url, &self.sandbox.allowed_domains)
            .await
        {
            Ok(repo) => repo,
            Err(FactError::Security(err)) => return Err(FactError::Security(err)),
            Err(err) => {
                return Err(FactError::CannotProceed(format!(
                    "could not clone {}: {}",
                    inputs.repo_url, err
                )))
            }
        };

        self.analyze_checkout(&executor, &inputs.repo_url, &repo).await
    }
}

/// Walk the checkout, recording relative paths and signal hits.
fn scan_repository(root: &Path, max_file_bytes: u64) -> std::io::Result<RepoScan> {
    let mut scan = RepoScan::default();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));

    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = relative_path(root, path);
        if is_test_file(&relative) {
            scan.test_files.push(relative.clone());
        }

        let scannable = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |ext| SOURCE_EXTENSIONS.contains(&ext))
            && entry.metadata().map_err(std::io::Error::from)?.len() <= max_file_bytes;
        if scannable {
            match std::fs::read(path) {
                Ok(bytes) => record_signals(&mut scan, &relative, &String::from_utf8_lossy(&bytes)),
                Err(err) => debug!(file = %relative, error = %err, "Skipping unreadable file"),
            }
        }
        scan.files.push(relative);
    }

    scan.files.sort();
    scan.test_files.sort();
    Ok(scan)
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name().to_str().map_or(false, |name| SKIPPED_DIRS.contains(&name))
}

fn record_signals(scan: &mut RepoScan, file: &str, text: &str) {
    for signal in SIGNALS {
        if let Some(needle) = signal.needles.iter().find(|n| text.contains(**n)) {
            scan.hits
                .entry(signal.id)
                .and_modify(|hit| hit.files += 1)
                .or_insert_with(|| SignalHit {
                    first_file: file.to_string(),
                    needle: *needle,
                    files: 1,
                });
        }
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_test_file(relative: &str) -> bool {
    let name = relative.rsplit('/').next().unwrap_or(relative);
    relative.starts_with("tests/")
        || relative.contains("/tests/")
        || name.starts_with("test_")
        || name.ends_with("_test.py")
        || name.ends_with("_test.rs")
        || name.ends_with("_test.go")
        || name.contains(".test.")
        || name.contains(".spec.")
}

fn structure_evidence(scan: &RepoScan) -> Vec<Evidence> {
    let has_dir = |dir: &str| scan.files.iter().any(|f| f.starts_with(&format!("{}/", dir)));

    let source_dirs: Vec<&str> = ["src", "lib", "app", "crates"].into_iter().filter(|d| has_dir(*d)).collect();
    let configs: Vec<&str> = ["pyproject.toml", "requirements.txt", "package.json", "Cargo.toml", ".env.example"]
        .into_iter()
        .filter(|f| scan.files.iter().any(|p| p.as_str() == *f))
        .collect();
    let docs: Vec<&str> = ["README.md", "README.rst"]
        .into_iter()
        .filter(|f| scan.files.iter().any(|p| p.as_str() == *f))
        .chain(has_dir("docs").then_some("docs/"))
        .collect();

    let listed = |label: &str, items: &[&str]| format!("Found {}: {}", label, items.join(", "));

    vec![
        if source_dirs.is_empty() {
            Evidence::missing(REPO_INVESTIGATOR, "repo:source-structure", "No standard source directories found", 0.7)
        } else {
            Evidence::found(REPO_INVESTIGATOR, "repo:source-structure", listed("source directories", &source_dirs), 0.9)
        },
        if configs.is_empty() {
            Evidence::missing(REPO_INVESTIGATOR, "repo:configuration", "No dependency manifest found", 0.3)
        } else {
            Evidence::found(REPO_INVESTIGATOR, "repo:configuration", listed("config files", &configs), 0.85)
        },
        if docs.is_empty() {
            Evidence::missing(REPO_INVESTIGATOR, "repo:documentation", "No README or docs directory", 0.3)
        } else {
            Evidence::found(REPO_INVESTIGATOR, "repo:documentation", listed("documentation", &docs), 0.8)
        },
    ]
}

fn signal_evidence(scan: &RepoScan) -> Vec<Evidence> {
    SIGNALS
        .iter()
        .map(|signal| match scan.hits.get(signal.id) {
            Some(hit) => Evidence::found(
                REPO_INVESTIGATOR,
                hit.first_file.as_str(),
                format!(
                    "{} detected via `{}` ({} file{})",
                    signal.description,
                    hit.needle,
                    hit.files,
                    if hit.files == 1 { "" } else { "s" }
                ),
                0.85,
            ),
            None => Evidence::missing(
                REPO_INVESTIGATOR,
                format!("repo:{}", signal.id),
                format!("No {} constructs found", signal.description),
                0.6,
            ),
        })
        .collect()
}

fn test_suite_evidence(scan: &RepoScan) -> Evidence {
    match scan.test_files.first() {
        Some(first) => Evidence::found(
            REPO_INVESTIGATOR,
            first.as_str(),
            format!("test suite with {} test files", scan.test_files.len()),
            0.9,
        ),
        None => Evidence::missing(REPO_INVESTIGATOR, "repo:tests", "No test suite found", 0.7),
    }
}
