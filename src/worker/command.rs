//! Worker command construction

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::VERSION;
use crate::config::{DANGEROUS_ENV_VARS, ManagerConfig};
use crate::error::{AgentError, Result};

/// Resolve the configured interpreter to an absolute path
///
/// Bare program names are looked up on `PATH`; explicit paths are used
/// as-is.
///
/// # Errors
/// Returns `SpawnFailure` if a bare name cannot be found on `PATH`
pub(super) fn resolve_program(program: &Path) -> Result<PathBuf> {
    if program.components().count() > 1 {
        return Ok(program.to_path_buf());
    }
    which::which(program).map_err(|e| {
        AgentError::spawn_failure(format!("{} not found on PATH: {e}", program.display()))
    })
}

/// Build the worker process command from the manager configuration
///
/// The worker runs with the runtime install directory as its working
/// directory and sees it as `VAZAL_PATH`, matching what the wrapper script
/// expects. All three stdio streams are piped; stderr in particular must
/// not inherit the parent terminal.
///
/// # Errors
/// Returns `SpawnFailure` if the interpreter cannot be resolved
pub(super) fn build_command(config: &ManagerConfig) -> Result<Command> {
    let program = resolve_program(&config.program)?;

    let mut cmd = Command::new(program);
    cmd.args(&config.program_args);
    cmd.arg(&config.wrapper);

    // Inherited environment plus user-provided vars, minus loader variables.
    let mut process_env = std::env::vars().collect::<HashMap<_, _>>();
    for (key, value) in &config.env {
        if !DANGEROUS_ENV_VARS.contains(&key.as_str()) {
            process_env.insert(key.clone(), value.clone());
        }
    }
    process_env.insert(
        "VAZAL_PATH".to_string(),
        config.runtime_dir.to_string_lossy().to_string(),
    );
    process_env.insert("VAZAL_MANAGER_VERSION".to_string(), VERSION.to_string());
    // Keep the interpreter's diagnostics unbuffered; protocol lines are
    // flushed by the wrapper itself.
    process_env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());

    if config.runtime_dir.exists() {
        process_env.insert(
            "PWD".to_string(),
            config.runtime_dir.to_string_lossy().to_string(),
        );
        cmd.current_dir(&config.runtime_dir);
    }

    cmd.envs(process_env);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Backstop for handles dropped without an explicit kill.
    cmd.kill_on_drop(true);

    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_paths_are_not_looked_up() {
        let path = PathBuf::from("/opt/custom/python3.12");
        assert_eq!(resolve_program(&path).unwrap(), path);
    }

    #[test]
    fn missing_bare_program_is_a_spawn_failure() {
        let err = resolve_program(Path::new("definitely-not-a-real-binary-7f3a")).unwrap_err();
        assert!(matches!(err, AgentError::SpawnFailure(_)));
    }
}
