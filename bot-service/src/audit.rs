use salesbot_core::{CoreError, ReplyRecord};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// Directory of posted replies, one `<reply id>.log` file each holding the body verbatim.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, reply_id: &str) -> PathBuf {
        self.dir.join(format!("{reply_id}.log"))
    }

    pub async fn record(&self, record: &ReplyRecord) -> Result<PathBuf, CoreError> {
        let id = record.reply_id.as_str();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(CoreError::InvalidInput {
                message: format!("reply id {id:?} is not usable as a file name"),
            });
        }

        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(id);
        fs::write(&path, record.body.as_bytes()).await?;
        debug!(
            "Response to item {} logged as {}",
            record.parent_url,
            path.display()
        );
        Ok(path)
    }
}
