//! Git diff retrieval with validated refs and a discrete argument vector.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

pub const MAX_DIFF_OUTPUT_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_DIFF_LINES: usize = 10_000;

const GIT_BIN: &str = "git";
const BASE_ARGS: [&str; 4] = ["--no-pager", "diff", "--no-ext-diff", "--no-color"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiffRequest {
    pub from: String,
    pub to: Option<String>,
    /// Compare `from` against the working tree. Treated as `true` when absent.
    pub unstaged: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffSummary {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    pub diff: String,
    pub summary: DiffSummary,
    /// The command line that produced `diff`, for display.
    pub command: String,
    pub line_count: usize,
}

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("invalid git reference '{reference}': only letters, digits, and / _ . - ~ ^ are allowed, and it must not start with '-'")]
    InvalidRef { reference: String },
    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("git diff output exceeded {MAX_DIFF_OUTPUT_BYTES} bytes")]
    OutputTooLarge,
    #[error("git diff failed: {0}")]
    Git(String),
    #[error("diff has {line_count} lines, more than the {limit} line limit; narrow the range or compare fewer commits")]
    TooManyLines { line_count: usize, limit: usize },
}

fn ref_pattern() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| Regex::new(r"^[A-Za-z0-9/_.~^-]+$").expect("ref regex must compile"))
}

/// Rejects refs that could be read as options or contain shell-significant characters.
pub fn validate_ref(reference: &str) -> Result<(), DiffError> {
    if reference.starts_with('-') || !ref_pattern().is_match(reference) {
        return Err(DiffError::InvalidRef {
            reference: reference.to_string(),
        });
    }
    Ok(())
}

/// Builds the `git` argument vector for `request`, validating refs first.
pub fn build_args(request: &DiffRequest) -> Result<Vec<String>, DiffError> {
    validate_ref(&request.from)?;
    if let Some(to) = &request.to {
        validate_ref(to)?;
    }

    let mut args: Vec<String> = BASE_ARGS.iter().map(|arg| (*arg).to_string()).collect();
    args.push(request.from.clone());
    match (&request.to, request.unstaged.unwrap_or(true)) {
        (Some(to), _) => args.push(to.clone()),
        (None, true) => args.push("--".to_string()),
        (None, false) => args.push("HEAD".to_string()),
    }
    Ok(args)
}

/// Counts changed files and content lines, skipping `+++`/`---` headers.
#[must_use]
pub fn summarize(diff: &str) -> DiffSummary {
    let mut summary = DiffSummary::default();
    for line in diff.lines() {
        if line.starts_with("diff --git ") {
            summary.files_changed += 1;
        } else if line.starts_with("+++") || line.starts_with("---") {
            continue;
        } else if line.starts_with('+') {
            summary.insertions += 1;
        } else if line.starts_with('-') {
            summary.deletions += 1;
        }
    }
    summary
}

/// Runs `git diff` inside one repository directory.
#[derive(Debug, Clone)]
pub struct DiffBuilder {
    repo_dir: PathBuf,
    max_output_bytes: usize,
    max_lines: usize,
}

impl DiffBuilder {
    #[must_use]
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            max_output_bytes: MAX_DIFF_OUTPUT_BYTES,
            max_lines: MAX_DIFF_LINES,
        }
    }

    #[must_use]
    pub fn with_max_lines(mut self, max_lines: usize) -> Self {
        self.max_lines = max_lines;
        self
    }

    #[must_use]
    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    pub async fn build(&self, request: &DiffRequest) -> Result<DiffResult, DiffError> {
        let args = build_args(request)?;
        let command = format!("{GIT_BIN} {}", args.join(" "));
        tracing::debug!(%command, repo = %self.repo_dir.display(), "running git diff");

        let mut child = Command::new(GIT_BIN)
            .args(&args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(DiffError::Spawn)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            DiffError::Spawn(std::io::Error::other("failed to capture git stdout"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            DiffError::Spawn(std::io::Error::other("failed to capture git stderr"))
        })?;

        let ((stdout, truncated), (stderr, _), status) = tokio::join!(
            read_to_end_limited(stdout, self.max_output_bytes),
            read_to_end_limited(stderr, self.max_output_bytes),
            child.wait(),
        );
        let status = status.map_err(DiffError::Spawn)?;
        if truncated {
            return Err(DiffError::OutputTooLarge);
        }

        let stderr = String::from_utf8_lossy(&stderr);
        let diagnostics = stderr
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.starts_with("warning:"))
            .collect::<Vec<_>>()
            .join("\n");
        if !diagnostics.is_empty() {
            return Err(DiffError::Git(diagnostics));
        }
        if !status.success() {
            return Err(DiffError::Git(format!("git exited with {status}")));
        }

        let diff = String::from_utf8_lossy(&stdout).into_owned();
        let line_count = diff.lines().count();
        if line_count > self.max_lines {
            return Err(DiffError::TooManyLines {
                line_count,
                limit: self.max_lines,
            });
        }

        Ok(DiffResult {
            summary: summarize(&diff),
            diff,
            command,
            line_count,
        })
    }
}

impl DiffResult {
    /// Renders the diff as a context block for the engine.
    #[must_use]
    pub fn render(&self) -> String {
        if self.diff.trim().is_empty() {
            return format!("Git diff (`{}`): no changes.", self.command);
        }
        format!(
            "Git diff (`{}`): {} file(s) changed, {} insertion(s), {} deletion(s), {} line(s).\n\n```diff\n{}\n```",
            self.command,
            self.summary.files_changed,
            self.summary.insertions,
            self.summary.deletions,
            self.line_count,
            self.diff.trim_end()
        )
    }
}

async fn read_to_end_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 8192];
    let mut truncated = false;

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let remaining = max_bytes.saturating_sub(buf.len());
        let take = remaining.min(n);
        buf.extend_from_slice(&chunk[..take]);
        if take < n {
            truncated = true;
        }
    }

    (buf, truncated)
}
