use anyhow::{anyhow, Context};
use sanitize_filename::sanitize;
use std::path::{Path, PathBuf};

pub const STUDENT_PHOTOS: &str = "student-photos";
pub const APP_ASSETS: &str = "app-assets";

const STORAGE_DIR: &str = "storage";

/// Workspace-local object storage with a public URL per object.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
    public_base: String,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub public_url: String,
}

impl ObjectStore {
    pub fn new(workspace: &Path, public_base: Option<&str>) -> Self {
        let root = workspace.join(STORAGE_DIR);
        let public_base = match public_base {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("file://{}", root.to_string_lossy().trim_end_matches('/')),
        };
        Self { root, public_base }
    }

    /// Copies `source` into `bucket` under `<user_id>/<millis>_<prefix><filename>`.
    pub fn upload(
        &self,
        bucket: &str,
        user_id: &str,
        source: &Path,
        prefix: &str,
    ) -> anyhow::Result<StoredObject> {
        if !source.is_file() {
            return Err(anyhow!("upload source not found: {}", source.to_string_lossy()));
        }
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let key = object_key(user_id, chrono::Utc::now().timestamp_millis(), prefix, &file_name);

        let dst = self.object_path(bucket, &key);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
        }
        std::fs::copy(source, &dst).with_context(|| {
            format!(
                "failed to copy {} into bucket {}",
                source.to_string_lossy(),
                bucket
            )
        })?;

        Ok(StoredObject {
            public_url: self.public_url(bucket, &key),
            key,
        })
    }

    pub fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.public_base, bucket, key)
    }

    /// Maps a public URL issued by this store back to its object key.
    pub fn key_from_url(&self, bucket: &str, url: &str) -> Option<String> {
        let prefix = format!("{}/{}/", self.public_base, bucket);
        url.strip_prefix(&prefix)
            .filter(|k| !k.is_empty() && !k.split('/').any(|seg| seg == ".."))
            .map(str::to_string)
    }

    pub fn remove(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        let path = self.object_path(bucket, key);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.to_string_lossy()))?;
        }
        Ok(())
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

fn object_key(user_id: &str, millis: i64, prefix: &str, file_name: &str) -> String {
    let mut name = sanitize(file_name);
    if name.is_empty() {
        name = "upload".to_string();
    }
    format!("{}/{}_{}{}", sanitize(user_id), millis, prefix, name)
}
