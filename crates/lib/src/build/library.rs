//! Libraries: a single file, downloaded when it is missing.

use std::path::PathBuf;

use super::{Staleness, TaskError};
use super::fetch::download;
use crate::util::timestamp::TimestampFile;

#[derive(Debug, Clone)]
pub struct LibraryTask {
  pub path: PathBuf,
  pub urls: Vec<String>,
  pub sha256: Option<String>,
}

impl LibraryTask {
  pub fn needs_build(&self) -> Staleness {
    if self.path.exists() {
      Staleness::Current(format!("{} exists", self.path.display()))
    } else {
      Staleness::Stale(format!("{} does not exist", self.path.display()))
    }
  }

  pub async fn build(&self) -> Result<bool, TaskError> {
    download(&self.urls, self.sha256.as_deref(), &self.path).await?;
    Ok(true)
  }

  pub fn newest_output(&self) -> Option<TimestampFile> {
    Some(TimestampFile::new(&self.path)).filter(TimestampFile::exists)
  }
}
