//! Long-lived helper processes shared by tasks of one run.
//!
//! A daemon is keyed by its command line. It is started when the first task
//! that needs it launches and killed once no waiting or running task needs it.

use std::collections::{BTreeMap, BTreeSet};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::build::TaskError;
use crate::build::cmd::get_shell;

#[derive(Debug, Default)]
pub struct DaemonPool {
  daemons: BTreeMap<String, Child>,
  shell: Option<String>,
}

impl DaemonPool {
  pub fn new(shell: Option<String>) -> Self {
    Self {
      daemons: BTreeMap::new(),
      shell,
    }
  }

  /// The pid of the daemon for `key`, starting it if needed.
  pub fn prepare(&mut self, key: &str) -> Result<Option<u32>, TaskError> {
    if let Some(child) = self.daemons.get_mut(key) {
      match child.try_wait() {
        Ok(None) => return Ok(child.id()),
        Ok(Some(status)) => warn!(daemon = %key, status = %status, "shared daemon exited, restarting"),
        Err(e) => warn!(daemon = %key, error = %e, "cannot poll shared daemon, restarting"),
      }
    }

    let (shell, args) = get_shell(self.shell.as_deref());
    // replace the shell so killing the child kills the daemon itself
    let script = if args == ["-c"] { format!("exec {key}") } else { key.to_string() };
    let child = Command::new(&shell)
      .args(&args)
      .arg(script)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .kill_on_drop(true)
      .spawn()
      .map_err(|source| TaskError::Spawn { program: shell, source })?;
    let pid = child.id();
    info!(daemon = %key, pid = ?pid, "started shared daemon");
    self.daemons.insert(key.to_string(), child);
    Ok(pid)
  }

  /// Stop every daemon whose key is not in `needed`.
  pub async fn retain(&mut self, needed: &BTreeSet<&str>) {
    let unneeded: Vec<String> = self
      .daemons
      .keys()
      .filter(|key| !needed.contains(key.as_str()))
      .cloned()
      .collect();
    for key in unneeded {
      if let Some(child) = self.daemons.remove(&key) {
        stop(&key, child).await;
      }
    }
  }

  pub async fn shutdown_all(&mut self) {
    for (key, child) in std::mem::take(&mut self.daemons) {
      stop(&key, child).await;
    }
  }

  pub fn len(&self) -> usize {
    self.daemons.len()
  }

  pub fn is_empty(&self) -> bool {
    self.daemons.is_empty()
  }
}

async fn stop(key: &str, mut child: Child) {
  debug!(daemon = %key, pid = ?child.id(), "stopping shared daemon");
  if let Err(e) = child.kill().await {
    warn!(daemon = %key, error = %e, "failed to stop shared daemon");
  }
}
