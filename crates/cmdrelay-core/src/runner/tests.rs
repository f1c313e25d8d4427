use super::*;
use crate::chunk::OutputChunk;
use crate::session::SessionId;

fn session(command: &str) -> Arc<Session> {
    Arc::new(Session::new(SessionId::generate(), command, 0))
}

async fn run_to_end(runner: &ProcessRunner, command: &str) -> Vec<OutputChunk> {
    let session = session(command);
    runner.run(&session).await.unwrap();
    assert!(session.is_complete());
    session.buffer().snapshot_from(0, usize::MAX).await
}

fn collect(chunks: &[OutputChunk], want_stdout: bool) -> String {
    chunks
        .iter()
        .filter_map(|c| match (&c.kind, want_stdout) {
            (ChunkKind::Stdout(t), true) | (ChunkKind::Stderr(t), false) => Some(t.as_str()),
            _ => None,
        })
        .collect()
}

#[cfg(unix)]
#[tokio::test]
async fn test_echo_hello() {
    let runner = ProcessRunner::default();
    let chunks = run_to_end(&runner, "echo hello").await;

    assert_eq!(
        chunks.iter().map(|c| c.kind.clone()).collect::<Vec<_>>(),
        vec![ChunkKind::Stdout("hello\n".into()), ChunkKind::Exit(0)]
    );
    assert_eq!(chunks[0].offset, 0);
    assert_eq!(chunks[1].offset, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_stderr_and_exit_code() {
    let runner = ProcessRunner::default();
    let chunks = run_to_end(&runner, "echo out; echo err 1>&2; exit 3").await;

    assert_eq!(collect(&chunks, true), "out\n");
    assert_eq!(collect(&chunks, false), "err\n");
    assert_eq!(chunks.last().unwrap().kind, ChunkKind::Exit(3));
}

#[cfg(unix)]
#[tokio::test]
async fn test_missing_program_is_spawn_failure() {
    let runner = ProcessRunner::default();
    let session = session("definitely-not-a-real-program-xyz --flag");
    runner.run(&session).await.unwrap();

    let chunks = session.buffer().snapshot_from(0, usize::MAX).await;
    assert_eq!(chunks.len(), 1);
    match &chunks[0].kind {
        ChunkKind::Error(message) => assert!(message.contains("command not found")),
        other => panic!("unexpected chunk: {other:?}"),
    }
    assert!(session.is_complete());
    assert_eq!(session.exit_code().await, None);
}

#[cfg(unix)]
#[tokio::test]
async fn test_missing_program_without_preflight_reaches_shell() {
    let runner = ProcessRunner::new(RunnerConfig::new().with_preflight(false));
    let chunks = run_to_end(&runner, "definitely-not-a-real-program-xyz").await;

    assert_eq!(chunks.last().unwrap().kind, ChunkKind::Exit(127));
    assert!(!collect(&chunks, false).is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_background_child_does_not_delay_exit() {
    let runner = ProcessRunner::default();
    let started = std::time::Instant::now();
    let chunks = run_to_end(&runner, "sleep 3 & echo hi").await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(collect(&chunks, true), "hi\n");
    assert_eq!(chunks.last().unwrap().kind, ChunkKind::Exit(0));
}

#[test]
fn test_runner_config_accessor() {
    let runner = ProcessRunner::new(
        RunnerConfig::new()
            .with_preflight(false)
            .with_drain_grace(Duration::from_secs(1)),
    );
    assert!(!runner.config().preflight);
    assert_eq!(runner.config().drain_grace, Duration::from_secs(1));
    assert_eq!(RunnerConfig::default().drain_grace, DEFAULT_DRAIN_GRACE);
}

#[tokio::test]
async fn test_missing_shell_is_spawn_failure() {
    let config = RunnerConfig::new()
        .with_shell("/nonexistent/shell-binary")
        .with_preflight(false);
    let runner = ProcessRunner::new(config);
    let session = session("echo hi");
    runner.run(&session).await.unwrap();

    let chunks = session.buffer().snapshot_from(0, usize::MAX).await;
    assert_eq!(chunks.len(), 1);
    assert!(matches!(chunks[0].kind, ChunkKind::Error(_)));
    assert_eq!(session.exit_code().await, None);
}

#[cfg(unix)]
#[tokio::test]
async fn test_runner_starts_once() {
    let runner = ProcessRunner::default();
    let session = session("true");
    runner.run(&session).await.unwrap();

    let err = runner.run(&session).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyStarted(_)));
    assert_eq!(session.buffer().len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_signal_exit_code() {
    let runner = ProcessRunner::default();
    let chunks = run_to_end(&runner, "kill -TERM $$").await;
    assert_eq!(chunks.last().unwrap().kind, ChunkKind::Exit(143));
}

#[cfg(unix)]
#[tokio::test]
async fn test_large_output_is_complete_and_ordered() {
    let runner = ProcessRunner::new(RunnerConfig::new().with_read_buffer(64));
    let chunks = run_to_end(&runner, "seq 1 2000").await;

    let expected: String = (1..=2000).map(|i| format!("{i}\n")).collect();
    assert_eq!(collect(&chunks, true), expected);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.offset, i as u64);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ProcessRunner::new(RunnerConfig::new().with_working_dir(dir.path()));
    let chunks = run_to_end(&runner, "pwd").await;

    let printed = collect(&chunks, true);
    let expected = dir.path().canonicalize().unwrap();
    assert_eq!(
        Path::new(printed.trim()).canonicalize().unwrap(),
        expected
    );
}

#[cfg(unix)]
#[test]
fn test_preflight_accepts_builtins_and_path_programs() {
    assert!(preflight("echo hello", None).is_ok());
    assert!(preflight("cd /tmp && ls", None).is_ok());
    assert!(preflight("ls -la", None).is_ok());
    assert!(preflight("FOO=1 definitely-not-real", None).is_ok());
    assert!(preflight("$(which ls)", None).is_ok());
    assert!(preflight("'unbalanced", None).is_ok());
    assert!(preflight("", None).is_ok());
}

#[cfg(unix)]
#[test]
fn test_preflight_accepts_bash_builtins() {
    for command in ["mapfile -t lines", "readarray x", "coproc cat", "help"] {
        assert!(preflight(command, None).is_ok(), "{command}");
    }
}

#[test]
fn test_preflight_rejects_unknown_programs() {
    let err = preflight("definitely-not-real arg", None).unwrap_err();
    assert!(matches!(err, Error::Spawn(_)));

    let err = preflight("/no/such/dir/tool", None).unwrap_err();
    assert!(err.to_string().contains("No such file or directory"));
}

#[test]
fn test_preflight_relative_path_uses_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("script.sh"), "echo hi\n").unwrap();

    assert!(preflight("./script.sh", Some(dir.path())).is_ok());
    assert!(preflight("./missing.sh", Some(dir.path())).is_err());
}

#[test]
fn test_shell_spec_flags() {
    assert_eq!(ShellSpec::from_program("/bin/bash").flag, "-c");
    assert_eq!(ShellSpec::from_program("cmd").flag, "/C");
    assert_eq!(ShellSpec::from_program("C:\\Windows\\System32\\cmd.exe").flag, "/C");
}

#[test]
fn test_utf8_decoder_carries_split_character() {
    let mut decoder = Utf8Decoder::default();
    let bytes = "héllo".as_bytes();
    // 'é' is two bytes; split between them
    let first = decoder.decode(&bytes[..2]);
    let second = decoder.decode(&bytes[2..]);
    assert_eq!(first, "h");
    assert_eq!(second, "éllo");
    assert!(decoder.finish().is_empty());
}

#[test]
fn test_utf8_decoder_replaces_invalid_bytes() {
    let mut decoder = Utf8Decoder::default();
    let text = decoder.decode(&[b'a', 0xff, b'b']);
    assert_eq!(text, "a\u{FFFD}b");

    let tail = decoder.decode(&[0xe2, 0x82]);
    assert!(tail.is_empty());
    assert_eq!(decoder.finish(), "\u{FFFD}");
}
