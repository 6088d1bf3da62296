//! Shared helpers for integration tests
//!
//! Tests drive a real child process: a small shell script speaking the
//! worker wire protocol, written into a per-test temp directory. Each
//! variant below tweaks one behavior (withheld responses, crashes,
//! progress streaming, slow startup) to exercise a specific manager path.
//! Every variant appends to `spawns.log` next to the script, so tests can
//! count how many workers were actually started.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

use vazal_agent::ManagerConfig;

/// Answers every mode immediately with canned results.
pub const ECHO_WORKER: &str = r#"#!/usr/bin/env bash
echo spawn >> "$(dirname "$0")/spawns.log"
echo '{"type":"ready"}'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -E 's/.*"requestId":"([^"]*)".*/\1/')
  mode=$(printf '%s' "$line" | sed -E 's/.*"mode":"([^"]*)".*/\1/')
  case "$mode" in
    classify)
      printf '{"requestId":"%s","result":{"type":"CHAT","response":"Hello!"}}\n' "$id"
      ;;
    plan)
      printf '{"requestId":"%s","result":{"plan":["Step 1","Step 2"],"estimated_time":"30 seconds"}}\n' "$id"
      ;;
    execute)
      printf '{"requestId":"%s","result":"Done. Saved report.pdf"}\n' "$id"
      ;;
  esac
done
"#;

/// Answers classify/plan but never replies to execute.
pub const SILENT_EXECUTE_WORKER: &str = r#"#!/usr/bin/env bash
echo spawn >> "$(dirname "$0")/spawns.log"
echo '{"type":"ready"}'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -E 's/.*"requestId":"([^"]*)".*/\1/')
  mode=$(printf '%s' "$line" | sed -E 's/.*"mode":"([^"]*)".*/\1/')
  case "$mode" in
    classify)
      printf '{"requestId":"%s","result":{"type":"CHAT","response":"Hello!"}}\n' "$id"
      ;;
    plan)
      printf '{"requestId":"%s","result":{"plan":["Step 1"],"estimated_time":"10 seconds"}}\n' "$id"
      ;;
    execute)
      :
      ;;
  esac
done
"#;

/// Dies with a nonzero exit the moment an execute request arrives.
pub const CRASH_ON_EXECUTE_WORKER: &str = r#"#!/usr/bin/env bash
echo spawn >> "$(dirname "$0")/spawns.log"
echo '{"type":"ready"}'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -E 's/.*"requestId":"([^"]*)".*/\1/')
  mode=$(printf '%s' "$line" | sed -E 's/.*"mode":"([^"]*)".*/\1/')
  case "$mode" in
    classify)
      printf '{"requestId":"%s","result":{"type":"CHAT","response":"Hello!"}}\n' "$id"
      ;;
    execute)
      exit 3
      ;;
  esac
done
"#;

/// Streams two progress lines (one structured, one free text) before the
/// execute result, with a short pause before finishing.
pub const STREAMING_WORKER: &str = r#"#!/usr/bin/env bash
echo spawn >> "$(dirname "$0")/spawns.log"
echo '{"type":"ready"}'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -E 's/.*"requestId":"([^"]*)".*/\1/')
  mode=$(printf '%s' "$line" | sed -E 's/.*"mode":"([^"]*)".*/\1/')
  case "$mode" in
    classify)
      printf '{"requestId":"%s","result":{"type":"CHAT","response":"Hello!"}}\n' "$id"
      ;;
    execute)
      printf '{"type":"progress","requestId":"%s","message":"working on it"}\n' "$id"
      echo 'Analyzing sources...'
      sleep 0.3
      printf '{"requestId":"%s","result":"Done. Saved report.pdf"}\n' "$id"
      ;;
  esac
done
"#;

/// Takes far too long to signal readiness.
pub const SLOW_START_WORKER: &str = r#"#!/usr/bin/env bash
echo spawn >> "$(dirname "$0")/spawns.log"
sleep 3
echo '{"type":"ready"}'
cat > /dev/null
"#;

/// Legacy-style worker: free-text readiness banner on stderr, no
/// structured ready event.
pub const SENTINEL_WORKER: &str = r#"#!/usr/bin/env bash
echo spawn >> "$(dirname "$0")/spawns.log"
echo 'Vazal ready!' >&2
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -E 's/.*"requestId":"([^"]*)".*/\1/')
  printf '{"requestId":"%s","result":{"type":"CHAT","response":"Hello!"}}\n' "$id"
done
"#;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Write a stub worker script into `dir` and build a config running it
pub fn stub_config(dir: &TempDir, script: &str) -> ManagerConfig {
    let path = dir.path().join("stub_worker.sh");
    fs::write(&path, script).expect("write stub worker");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod stub worker");

    ManagerConfig {
        program: PathBuf::from("bash"),
        program_args: Vec::new(),
        wrapper: path,
        runtime_dir: dir.path().to_path_buf(),
        startup_timeout: Duration::from_secs(10),
        classify_timeout: Duration::from_secs(5),
        plan_timeout: Duration::from_secs(5),
        execute_timeout: Duration::from_secs(5),
        // Keep the sweep quiet unless a test opts in.
        idle_timeout: Duration::from_secs(600),
        sweep_interval: Duration::from_secs(3600),
        ..ManagerConfig::default()
    }
}

/// Number of worker processes the stub script has started
pub fn spawn_count(dir: &TempDir) -> usize {
    fs::read_to_string(dir.path().join("spawns.log"))
        .map(|log| log.lines().count())
        .unwrap_or(0)
}
