//! Shell command runner for project build commands.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use super::TaskError;

/// Run `cmd` through the shell in `cwd`.
///
/// The caller's environment is inherited. `out` is set to `out_dir` and `env`
/// is merged on top. The child is killed if the returned future is dropped,
/// so an aborted task does not leave the command running.
///
/// Returns the trimmed stdout.
pub async fn run_shell(
  cmd: &str,
  cwd: &Path,
  out_dir: &Path,
  env: &BTreeMap<String, String>,
  shell: Option<&str>,
) -> Result<String, TaskError> {
  info!(cmd = %cmd, cwd = ?cwd, "executing command");

  let (shell_cmd, shell_args) = get_shell(shell);
  let mut command = Command::new(&shell_cmd);
  command
    .args(&shell_args)
    .arg(cmd)
    .current_dir(cwd)
    .env("out", out_dir)
    .envs(env)
    .stdin(Stdio::null())
    .kill_on_drop(true);

  let output = command.output().await.map_err(|source| TaskError::Spawn {
    program: shell_cmd.clone(),
    source,
  })?;

  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
  let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
  if !output.status.success() {
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }
    return Err(TaskError::CommandFailed {
      cmd: cmd.to_string(),
      code: output.status.code(),
      stderr,
    });
  }
  if !stderr.is_empty() {
    debug!(stderr = %stderr, "command stderr");
  }
  Ok(stdout)
}

/// Shell executable and the flags that make it run one command string.
///
/// Without an override this is `/bin/sh -c` (or PowerShell on Windows) rather
/// than `$SHELL`, which may source interactive profiles.
pub(crate) fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[tokio::test]
  async fn runs_in_working_directory() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");

    let result = run_shell("pwd", temp.path(), &out, &BTreeMap::new(), None).await.unwrap();
    assert_eq!(
      dunce::canonicalize(result).unwrap(),
      dunce::canonicalize(temp.path()).unwrap()
    );
  }

  #[tokio::test]
  async fn exposes_out_and_extra_env() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    let env = BTreeMap::from([("GREETING".to_string(), "hi".to_string())]);

    let result = run_shell("echo \"$GREETING $out\"", temp.path(), &out, &env, None)
      .await
      .unwrap();
    assert_eq!(result, format!("hi {}", out.display()));
  }

  #[tokio::test]
  async fn failure_carries_exit_code_and_stderr() {
    let temp = TempDir::new().unwrap();

    let err = run_shell("echo broken >&2; exit 3", temp.path(), temp.path(), &BTreeMap::new(), None)
      .await
      .unwrap_err();
    match err {
      TaskError::CommandFailed { code, stderr, .. } => {
        assert_eq!(code, Some(3));
        assert_eq!(stderr, "broken");
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn shell_override_picks_flags() {
    assert_eq!(get_shell(Some("bash")).1, vec!["-c"]);
    assert_eq!(get_shell(Some("pwsh")).1, vec!["-NoProfile", "-Command"]);
    assert_eq!(get_shell(None).0, "/bin/sh");
  }
}
