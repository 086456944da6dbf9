use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;
use tool_server::rpc::RpcRequest;
use tool_server::tools::{BuiltinToolExecutor, ToolCall, ToolExecutor};

fn new_executor(root: &Path) -> BuiltinToolExecutor {
    BuiltinToolExecutor::new(root).expect("root should be valid")
}

fn read(executor: &mut BuiltinToolExecutor, file_path: &str) -> String {
    let output = executor.execute(ToolCall::ReadFile {
        file_path: file_path.to_string(),
        offset: None,
        limit: None,
    });
    assert!(output.ok, "read_file should succeed: {}", output.content);
    output.content
}

#[test]
fn write_read_edit_round_trip() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let write_result = executor.execute(ToolCall::WriteFile {
        file_path: "notes/hello.txt".to_string(),
        content: "hello\nworld\n".to_string(),
    });
    assert!(write_result.ok, "write_file should succeed: {}", write_result.content);
    assert_eq!(read(&mut executor, "notes/hello.txt"), "1\thello\n2\tworld");

    let edit_result = executor.execute(ToolCall::EditFile {
        file_path: "notes/hello.txt".to_string(),
        old_string: "world".to_string(),
        new_string: "there".to_string(),
    });
    assert!(edit_result.ok, "edit_file should succeed: {}", edit_result.content);

    let absolute = workspace.path().join("notes/hello.txt");
    assert_eq!(
        fs::read_to_string(&absolute).expect("file readable"),
        "hello\nthere\n"
    );
    assert_eq!(
        read(&mut executor, absolute.to_str().expect("utf-8 path")),
        "1\thello\n2\tthere"
    );
}

#[test]
fn read_file_window_and_failures() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("lines.txt"), "a\nb\nc\nd\ne\n").expect("seed file");
    fs::write(workspace.path().join("blob.bin"), [0xff_u8, 0xfe, 0x00]).expect("seed blob");
    let mut executor = new_executor(workspace.path());

    let window = executor.execute(ToolCall::ReadFile {
        file_path: "lines.txt".to_string(),
        offset: Some(2),
        limit: Some(2),
    });
    assert!(window.ok);
    assert_eq!(window.content, "2\tb\n3\tc");

    let missing = executor.execute(ToolCall::ReadFile {
        file_path: "nope.txt".to_string(),
        offset: None,
        limit: None,
    });
    assert!(!missing.ok);
    assert!(missing.content.contains("Failed to read file"), "{}", missing.content);

    let binary = executor.execute(ToolCall::ReadFile {
        file_path: "blob.bin".to_string(),
        offset: None,
        limit: None,
    });
    assert!(!binary.ok);
    assert_eq!(binary.content, "File is not valid UTF-8 text");
}

#[test]
fn edit_requires_exactly_one_match() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("dup.txt"), "x x").expect("seed file");
    let mut executor = new_executor(workspace.path());

    let ambiguous = executor.execute(ToolCall::EditFile {
        file_path: "dup.txt".to_string(),
        old_string: "x".to_string(),
        new_string: "y".to_string(),
    });
    assert!(!ambiguous.ok);
    assert_eq!(ambiguous.content, "edit_file requires exactly one match; found 2");

    let absent = executor.execute(ToolCall::EditFile {
        file_path: "dup.txt".to_string(),
        old_string: "z".to_string(),
        new_string: "y".to_string(),
    });
    assert!(!absent.ok);
    assert_eq!(fs::read_to_string(workspace.path().join("dup.txt")).expect("read"), "x x");
}

#[test]
fn edit_with_empty_old_string_creates_only_new_files() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let created = executor.execute(ToolCall::EditFile {
        file_path: "fresh/new.txt".to_string(),
        old_string: String::new(),
        new_string: "content".to_string(),
    });
    assert!(created.ok, "{}", created.content);
    assert_eq!(
        fs::read_to_string(workspace.path().join("fresh/new.txt")).expect("read"),
        "content"
    );

    let refused = executor.execute(ToolCall::EditFile {
        file_path: "fresh/new.txt".to_string(),
        old_string: String::new(),
        new_string: "other".to_string(),
    });
    assert!(!refused.ok);
}

#[test]
fn list_directory_sorts_and_marks_directories() {
    let workspace = tempdir().expect("temp workspace");
    fs::create_dir(workspace.path().join("src")).expect("mkdir");
    fs::write(workspace.path().join("b.txt"), "").expect("seed");
    fs::write(workspace.path().join("a.txt"), "").expect("seed");
    let mut executor = new_executor(workspace.path());

    let listing = executor.execute(ToolCall::ListDirectory { path: None });
    assert!(listing.ok);
    assert_eq!(listing.content, "a.txt\nb.txt\nsrc/");

    let empty = executor.execute(ToolCall::ListDirectory {
        path: Some("src".to_string()),
    });
    assert!(empty.ok);
    assert!(empty.content.ends_with("is empty"), "{}", empty.content);
}

#[test]
fn bash_reports_status_and_failure() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let success = executor.execute(ToolCall::Bash {
        command: "printf 'bash-ok'".to_string(),
        timeout_sec: None,
    });
    assert!(success.ok, "{}", success.content);
    assert!(success.content.starts_with("status: exit_code=0\nstdout:\nbash-ok"));

    let failure = executor.execute(ToolCall::Bash {
        command: "echo oops >&2; exit 3".to_string(),
        timeout_sec: None,
    });
    assert!(!failure.ok);
    assert!(failure.content.contains("exit_code=3"), "{}", failure.content);
    assert!(failure.content.contains("oops"), "{}", failure.content);

    let timed_out = executor.execute(ToolCall::Bash {
        command: "sleep 5".to_string(),
        timeout_sec: Some(1),
    });
    assert!(!timed_out.ok);
    assert!(timed_out.content.contains("timeout after 1s"), "{}", timed_out.content);
}

#[test]
fn bash_output_larger_than_a_pipe_buffer_does_not_stall() {
    let workspace = tempdir().expect("temp workspace");
    let mut executor = new_executor(workspace.path());

    let output = executor.execute(ToolCall::Bash {
        command: "head -c 300000 /dev/zero | tr '\\0' x; head -c 300000 /dev/zero >&2".to_string(),
        timeout_sec: Some(10),
    });

    assert!(output.ok, "{}", &output.content[..output.content.len().min(200)]);
    assert!(output.content.starts_with("status: exit_code=0\nstdout:\nxxxx"));
}

#[test]
fn grep_skips_vcs_and_build_directories() {
    let workspace = tempdir().expect("temp workspace");
    let root = workspace.path();
    fs::create_dir_all(root.join("src")).expect("mkdir src");
    fs::create_dir_all(root.join(".git")).expect("mkdir .git");
    fs::create_dir_all(root.join("target")).expect("mkdir target");
    fs::write(root.join("src/lib.rs"), "fn alpha() {}\nfn beta() {}\n").expect("seed");
    fs::write(root.join("notes.md"), "alpha notes\n").expect("seed");
    fs::write(root.join(".git/config"), "alpha").expect("seed");
    fs::write(root.join("target/out.rs"), "alpha").expect("seed");
    let mut executor = new_executor(root);

    let all = executor.execute(ToolCall::Grep {
        pattern: "alpha".to_string(),
        path: None,
        include: None,
    });
    assert!(all.ok);
    let canonical = root.canonicalize().expect("canonical root");
    assert_eq!(
        all.content,
        format!(
            "{}:1:alpha notes\n{}:1:fn alpha() {{}}",
            canonical.join("notes.md").display(),
            canonical.join("src/lib.rs").display()
        )
    );

    let rust_only = executor.execute(ToolCall::Grep {
        pattern: "^fn b".to_string(),
        path: None,
        include: Some("*.rs".to_string()),
    });
    assert!(rust_only.content.ends_with("src/lib.rs:2:fn beta() {}"), "{}", rust_only.content);

    let invalid = executor.execute(ToolCall::Grep {
        pattern: "(".to_string(),
        path: None,
        include: None,
    });
    assert!(!invalid.ok);
}

#[test]
fn grep_caps_match_count() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("many.txt"), "hit\n".repeat(10)).expect("seed");
    let mut executor = new_executor(workspace.path()).with_grep_max_matches(3);

    let output = executor.execute(ToolCall::Grep {
        pattern: "hit".to_string(),
        path: None,
        include: None,
    });
    assert!(output.ok);
    assert_eq!(output.content.lines().count(), 4);
    assert!(output.content.ends_with("[truncated after 3 matches]"));
}

#[test]
fn handle_request_wraps_tool_output_in_mcp_shape() {
    let workspace = tempdir().expect("temp workspace");
    fs::write(workspace.path().join("a.txt"), "one\n").expect("seed");
    let mut executor = new_executor(workspace.path());

    let ok = tool_server::handle_request(
        &mut executor,
        &RpcRequest::new(
            1,
            "tools/call",
            json!({"name": "read_file", "arguments": {"file_path": "a.txt"}}),
        ),
    )
    .expect("tools/call should succeed");
    assert_eq!(
        ok,
        json!({"content": [{"type": "text", "text": "1\tone"}], "isError": false})
    );

    let unknown_tool = tool_server::handle_request(
        &mut executor,
        &RpcRequest::new(2, "tools/call", json!({"name": "rm", "arguments": {}})),
    )
    .expect("unknown tool is reported in-band");
    assert_eq!(unknown_tool["isError"], true);

    let unknown_method = tool_server::handle_request(
        &mut executor,
        &RpcRequest::new(3, "resources/list", json!({})),
    )
    .expect_err("unknown method is a protocol error");
    assert_eq!(unknown_method.code, tool_server::rpc::METHOD_NOT_FOUND);

    let listed = tool_server::handle_request(&mut executor, &RpcRequest::new(4, "tools/list", json!({})))
        .expect("tools/list");
    assert_eq!(listed["tools"].as_array().map(Vec::len), Some(6));
}
