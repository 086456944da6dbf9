use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};
use wait_timeout::ChildExt;
use walkdir::WalkDir;

const DEFAULT_BASH_TIMEOUT_SEC: u64 = 120;
const DEFAULT_BASH_MAX_OUTPUT_BYTES: usize = 100 * 1024;
const DEFAULT_READ_MAX_BYTES: usize = 200 * 1024;
const DEFAULT_GREP_MAX_MATCHES: usize = 500;
const GREP_SKIPPED_DIRS: [&str; 2] = [".git", "target"];

pub const READ_FILE: &str = "read_file";
pub const EDIT_FILE: &str = "edit_file";
pub const LIST_DIRECTORY: &str = "list_directory";
pub const WRITE_FILE: &str = "write_file";
pub const BASH: &str = "bash";
pub const GREP: &str = "grep";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    ReadFile {
        file_path: String,
        offset: Option<usize>,
        limit: Option<usize>,
    },
    EditFile {
        file_path: String,
        old_string: String,
        new_string: String,
    },
    ListDirectory {
        path: Option<String>,
    },
    WriteFile {
        file_path: String,
        content: String,
    },
    Bash {
        command: String,
        timeout_sec: Option<u64>,
    },
    Grep {
        pattern: String,
        path: Option<String>,
        include: Option<String>,
    },
}

impl ToolCall {
    /// Parses a `tools/call` name and argument object.
    pub fn parse(name: &str, arguments: &Value) -> Result<Self, String> {
        match name {
            READ_FILE => Ok(Self::ReadFile {
                file_path: required_string(arguments, "file_path")?,
                offset: optional_usize(arguments, "offset")?,
                limit: optional_usize(arguments, "limit")?,
            }),
            EDIT_FILE => Ok(Self::EditFile {
                file_path: required_string(arguments, "file_path")?,
                old_string: required_string(arguments, "old_string")?,
                new_string: required_string(arguments, "new_string")?,
            }),
            LIST_DIRECTORY => Ok(Self::ListDirectory {
                path: optional_string(arguments, "path")?,
            }),
            WRITE_FILE => Ok(Self::WriteFile {
                file_path: required_string(arguments, "file_path")?,
                content: required_string(arguments, "content")?,
            }),
            BASH => Ok(Self::Bash {
                command: required_string(arguments, "command")?,
                timeout_sec: optional_usize(arguments, "timeout_sec")?.map(|value| value as u64),
            }),
            GREP => Ok(Self::Grep {
                pattern: required_string(arguments, "pattern")?,
                path: optional_string(arguments, "path")?,
                include: optional_string(arguments, "include")?,
            }),
            other => Err(format!("Unknown tool: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub ok: bool,
    pub content: String,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            ok: true,
            content: content.into(),
        }
    }

    pub fn fail(content: impl Into<String>) -> Self {
        Self {
            ok: false,
            content: content.into(),
        }
    }
}

pub trait ToolExecutor {
    fn execute(&mut self, call: ToolCall) -> ToolOutput;
}

/// Executes the built-in tool set against the local filesystem.
///
/// Relative paths resolve against `root`; absolute paths are used as given.
#[derive(Debug, Clone)]
pub struct BuiltinToolExecutor {
    root: PathBuf,
    default_bash_timeout_sec: u64,
    bash_max_output_bytes: usize,
    read_max_bytes: usize,
    grep_max_matches: usize,
}

impl BuiltinToolExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, String> {
        let root = root.into();
        let canonical_root = root
            .canonicalize()
            .map_err(|err| format!("Failed to resolve root directory: {err}"))?;

        if !canonical_root.is_dir() {
            return Err("Root must be a directory".to_string());
        }

        Ok(Self {
            root: canonical_root,
            default_bash_timeout_sec: DEFAULT_BASH_TIMEOUT_SEC,
            bash_max_output_bytes: DEFAULT_BASH_MAX_OUTPUT_BYTES,
            read_max_bytes: DEFAULT_READ_MAX_BYTES,
            grep_max_matches: DEFAULT_GREP_MAX_MATCHES,
        })
    }

    #[must_use]
    pub fn with_default_bash_timeout_sec(mut self, timeout_sec: u64) -> Self {
        self.default_bash_timeout_sec = timeout_sec;
        self
    }

    #[must_use]
    pub fn with_grep_max_matches(mut self, max_matches: usize) -> Self {
        self.grep_max_matches = max_matches;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn execute_bash(&self, command: String, timeout_sec: Option<u64>) -> ToolOutput {
        let timeout = timeout_sec.unwrap_or(self.default_bash_timeout_sec);
        let mut child = match Command::new("bash")
            .arg("-lc")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(error) => {
                return ToolOutput::fail(format!("Failed to launch bash command: {error}"));
            }
        };

        // Drain both pipes while waiting so a chatty command cannot fill them and stall.
        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());

        let (timed_out, status) = match child.wait_timeout(Duration::from_secs(timeout)) {
            Ok(Some(status)) => (false, status),
            Ok(None) => {
                let _ = child.kill();
                match child.wait() {
                    Ok(status) => (true, status),
                    Err(error) => {
                        return ToolOutput::fail(format!(
                            "Command timed out after {timeout}s and wait failed: {error}"
                        ));
                    }
                }
            }
            Err(error) => {
                let _ = child.kill();
                return ToolOutput::fail(format!("Failed waiting for bash command: {error}"));
            }
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        let status_label = if timed_out {
            format!("timeout after {timeout}s")
        } else {
            format_exit_status(status)
        };

        let content = truncate_to_byte_limit(
            format!(
                "status: {status_label}\nstdout:\n{}\nstderr:\n{}",
                String::from_utf8_lossy(&stdout),
                String::from_utf8_lossy(&stderr)
            ),
            self.bash_max_output_bytes,
        );

        ToolOutput {
            ok: !timed_out && status.success(),
            content,
        }
    }

    fn execute_read_file(
        &self,
        file_path: String,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> ToolOutput {
        let resolved = match self.resolve(&file_path) {
            Ok(path) => path,
            Err(error) => return ToolOutput::fail(error),
        };

        let bytes = match fs::read(&resolved) {
            Ok(bytes) => bytes,
            Err(error) => {
                return ToolOutput::fail(format!(
                    "Failed to read file {}: {error}",
                    resolved.display()
                ));
            }
        };

        if bytes.len() > self.read_max_bytes {
            return ToolOutput::fail(format!(
                "File exceeds max read size ({} bytes > {} bytes); use offset and limit",
                bytes.len(),
                self.read_max_bytes
            ));
        }

        let Ok(content) = String::from_utf8(bytes) else {
            return ToolOutput::fail("File is not valid UTF-8 text".to_string());
        };

        ToolOutput::ok(number_lines(&content, offset.unwrap_or(1), limit))
    }

    fn execute_edit_file(
        &self,
        file_path: String,
        old_string: String,
        new_string: String,
    ) -> ToolOutput {
        let resolved = match self.resolve(&file_path) {
            Ok(path) => path,
            Err(error) => return ToolOutput::fail(error),
        };

        if old_string.is_empty() {
            if resolved.exists() {
                return ToolOutput::fail(
                    "old_string must not be empty when the file already exists".to_string(),
                );
            }
            return self.write_creating_parents(&resolved, new_string, "Created");
        }

        let current_content = match fs::read_to_string(&resolved) {
            Ok(content) => content,
            Err(error) => {
                return ToolOutput::fail(format!(
                    "Failed to read file {}: {error}",
                    resolved.display()
                ));
            }
        };

        let occurrence_count = current_content.match_indices(&old_string).count();
        if occurrence_count != 1 {
            return ToolOutput::fail(format!(
                "edit_file requires exactly one match; found {occurrence_count}"
            ));
        }

        let updated_content = current_content.replacen(&old_string, &new_string, 1);
        if let Err(error) = fs::write(&resolved, updated_content) {
            return ToolOutput::fail(format!(
                "Failed to write file {}: {error}",
                resolved.display()
            ));
        }

        ToolOutput::ok(format!("Updated {}", resolved.display()))
    }

    fn execute_list_directory(&self, path: Option<String>) -> ToolOutput {
        let resolved = match path.as_deref() {
            Some(path) => match self.resolve(path) {
                Ok(path) => path,
                Err(error) => return ToolOutput::fail(error),
            },
            None => self.root.clone(),
        };

        let read_dir = match fs::read_dir(&resolved) {
            Ok(read_dir) => read_dir,
            Err(error) => {
                return ToolOutput::fail(format!(
                    "Failed to list directory {}: {error}",
                    resolved.display()
                ));
            }
        };

        let mut names = Vec::new();
        for entry in read_dir.flatten() {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        if names.is_empty() {
            return ToolOutput::ok(format!("{} is empty", resolved.display()));
        }
        ToolOutput::ok(names.join("\n"))
    }

    fn execute_write_file(&self, file_path: String, content: String) -> ToolOutput {
        let resolved = match self.resolve(&file_path) {
            Ok(path) => path,
            Err(error) => return ToolOutput::fail(error),
        };

        self.write_creating_parents(&resolved, content, "Wrote")
    }

    fn execute_grep(
        &self,
        pattern: String,
        path: Option<String>,
        include: Option<String>,
    ) -> ToolOutput {
        let regex = match Regex::new(&pattern) {
            Ok(regex) => regex,
            Err(error) => return ToolOutput::fail(format!("Invalid pattern: {error}")),
        };
        let search_root = match path.as_deref() {
            Some(path) => match self.resolve(path) {
                Ok(path) => path,
                Err(error) => return ToolOutput::fail(error),
            },
            None => self.root.clone(),
        };
        if !search_root.exists() {
            return ToolOutput::fail(format!("Path does not exist: {}", search_root.display()));
        }

        let mut matches = Vec::new();
        let mut truncated = false;
        let walker = WalkDir::new(&search_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !(entry.file_type().is_dir()
                        && GREP_SKIPPED_DIRS
                            .iter()
                            .any(|skipped| entry.file_name() == *skipped))
            });

        'files: for entry in walker.flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if let Some(include) = include.as_deref() {
                if !matches_include(&file_name, include) {
                    continue;
                }
            }
            // Binary and non-UTF-8 files are skipped.
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };

            for (index, line) in content.lines().enumerate() {
                if !regex.is_match(line) {
                    continue;
                }
                if matches.len() == self.grep_max_matches {
                    truncated = true;
                    break 'files;
                }
                matches.push(format!("{}:{}:{line}", entry.path().display(), index + 1));
            }
        }

        if matches.is_empty() {
            return ToolOutput::ok(format!("No matches for {pattern}"));
        }

        let mut content = matches.join("\n");
        if truncated {
            content.push_str(&format!(
                "\n[truncated after {} matches]",
                self.grep_max_matches
            ));
        }
        ToolOutput::ok(content)
    }

    fn write_creating_parents(&self, path: &Path, content: String, verb: &str) -> ToolOutput {
        if let Some(parent) = path.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                return ToolOutput::fail(format!(
                    "Failed to create parent directories {}: {error}",
                    parent.display()
                ));
            }
        }

        if let Err(error) = fs::write(path, content) {
            return ToolOutput::fail(format!(
                "Failed to write file {}: {error}",
                path.display()
            ));
        }

        ToolOutput::ok(format!("{verb} {}", path.display()))
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        if path.trim().is_empty() {
            return Err("Path must not be empty".to_string());
        }

        let path = Path::new(path);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.root.join(path))
        }
    }
}

impl ToolExecutor for BuiltinToolExecutor {
    fn execute(&mut self, call: ToolCall) -> ToolOutput {
        match call {
            ToolCall::ReadFile {
                file_path,
                offset,
                limit,
            } => self.execute_read_file(file_path, offset, limit),
            ToolCall::EditFile {
                file_path,
                old_string,
                new_string,
            } => self.execute_edit_file(file_path, old_string, new_string),
            ToolCall::ListDirectory { path } => self.execute_list_directory(path),
            ToolCall::WriteFile { file_path, content } => {
                self.execute_write_file(file_path, content)
            }
            ToolCall::Bash {
                command,
                timeout_sec,
            } => self.execute_bash(command, timeout_sec),
            ToolCall::Grep {
                pattern,
                path,
                include,
            } => self.execute_grep(pattern, path, include),
        }
    }
}

/// Schema entries for `tools/list`.
#[must_use]
pub fn tool_definitions() -> Value {
    json!([
        {
            "name": READ_FILE,
            "description": "Read a UTF-8 text file. Lines are numbered from 1.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": { "type": "string" },
                    "offset": { "type": "integer", "description": "First line to return (1-based)" },
                    "limit": { "type": "integer", "description": "Maximum number of lines" }
                },
                "required": ["file_path"]
            }
        },
        {
            "name": EDIT_FILE,
            "description": "Replace exactly one occurrence of old_string with new_string. An empty old_string creates a new file.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": { "type": "string" },
                    "old_string": { "type": "string" },
                    "new_string": { "type": "string" }
                },
                "required": ["file_path", "old_string", "new_string"]
            }
        },
        {
            "name": LIST_DIRECTORY,
            "description": "List directory entries; directories end with '/'.",
            "inputSchema": {
                "type": "object",
                "properties": { "path": { "type": "string" } }
            }
        },
        {
            "name": WRITE_FILE,
            "description": "Write a file, creating parent directories.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "file_path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["file_path", "content"]
            }
        },
        {
            "name": BASH,
            "description": "Run a command with `bash -lc`.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "timeout_sec": { "type": "integer" }
                },
                "required": ["command"]
            }
        },
        {
            "name": GREP,
            "description": "Regex search over files, reporting file:line:text.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "pattern": { "type": "string" },
                    "path": { "type": "string" },
                    "include": { "type": "string", "description": "File name filter such as *.rs" }
                },
                "required": ["pattern"]
            }
        }
    ])
}

fn required_string(arguments: &Value, key: &str) -> Result<String, String> {
    match arguments.get(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(format!("Argument `{key}` must be a string")),
        None => Err(format!("Missing required argument `{key}`")),
    }
}

fn optional_string(arguments: &Value, key: &str) -> Result<Option<String>, String> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) if value.trim().is_empty() => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(format!("Argument `{key}` must be a string")),
    }
}

fn optional_usize(arguments: &Value, key: &str) -> Result<Option<usize>, String> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|value| usize::try_from(value).ok())
            .map(Some)
            .ok_or_else(|| format!("Argument `{key}` must be a non-negative integer")),
    }
}

fn number_lines(content: &str, first_line: usize, limit: Option<usize>) -> String {
    let first_line = first_line.max(1);
    let lines: Vec<&str> = content.lines().collect();
    let end = match limit {
        Some(limit) => (first_line - 1).saturating_add(limit).min(lines.len()),
        None => lines.len(),
    };
    if first_line > end {
        return String::new();
    }

    let width = end.to_string().len();
    lines[first_line - 1..end]
        .iter()
        .enumerate()
        .map(|(index, line)| format!("{:>width$}\t{line}", first_line + index))
        .collect::<Vec<_>>()
        .join("\n")
}

fn matches_include(file_name: &str, include: &str) -> bool {
    match include.split_once('*') {
        Some((prefix, suffix)) => {
            file_name.len() >= prefix.len() + suffix.len()
                && file_name.starts_with(prefix)
                && file_name.ends_with(suffix)
        }
        None => file_name == include,
    }
}

fn spawn_pipe_reader<R>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut bytes);
        }
        bytes
    })
}

fn truncate_to_byte_limit(content: String, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content;
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !content.is_char_boundary(cutoff) {
        cutoff -= 1;
    }

    let mut truncated = content[..cutoff].to_string();
    truncated.push_str("\n[truncated]");
    truncated
}

fn format_exit_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit_code={code}"),
        None => "exit_code=terminated_by_signal".to_string(),
    }
}
