//! Finding and downloading the recognition model and its charset.
//!
//! Both files live in a per-user cache directory. Anything missing is
//! fetched over HTTPS on first use. Downloads go to a temporary file in the
//! cache directory and are renamed into place only once complete, so an
//! interrupted download never leaves a truncated model behind.

use std::time::Duration;

use tokio::io::AsyncWriteExt as _;

use crate::{
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// Where we download models from by default.
pub const DEFAULT_BASE_URL: &str = "https://huggingface.co/janakh/monocr/resolve/main";

/// Give up on a download after this long.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// A file the recognizer needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    /// The ONNX line recognition model.
    Model,
    /// The charset matching the model's output classes.
    Charset,
}

impl Resource {
    /// Every resource, in the order we fetch them.
    pub const ALL: [Resource; 2] = [Resource::Model, Resource::Charset];

    /// File name, both in the cache and on the server.
    pub fn file_name(self) -> &'static str {
        match self {
            Resource::Model => "monocr.onnx",
            Resource::Charset => "charset.txt",
        }
    }

    /// Human-readable name.
    pub fn description(self) -> &'static str {
        match self {
            Resource::Model => "recognition model",
            Resource::Charset => "charset",
        }
    }
}

/// The local model cache.
#[derive(Clone)]
pub struct ModelStore {
    ui: Ui,
    cache_dir: PathBuf,
    base_url: String,
}

impl ModelStore {
    /// Create a store rooted at `cache_dir`, downloading from `base_url`.
    pub fn new(ui: Ui, cache_dir: PathBuf, base_url: &str) -> Self {
        Self {
            ui,
            cache_dir,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// The platform cache directory for our models.
    pub fn default_cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow!("could not determine cache directory"))?;
        Ok(cache_dir.join("monocr").join("models"))
    }

    /// Our cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where `resource` lives in the cache.
    pub fn cached_path(&self, resource: Resource) -> PathBuf {
        self.cache_dir.join(resource.file_name())
    }

    /// Where we download `resource` from.
    pub fn url(&self, resource: Resource) -> String {
        format!("{}/{}", self.base_url, resource.file_name())
    }

    /// Find `resource` on disk.
    ///
    /// An explicit `override_path` must exist and is never replaced by a
    /// download. Otherwise we use the cached copy, downloading it first if
    /// needed.
    #[instrument(level = "debug", skip(self, override_path))]
    pub async fn resolve(
        &self,
        resource: Resource,
        override_path: Option<&Path>,
    ) -> Result<PathBuf> {
        if let Some(path) = override_path {
            if !path.is_file() {
                bail!("{} not found at {:?}", resource.description(), path.display());
            }
            return Ok(path.to_owned());
        }

        let path = self.cached_path(resource);
        if path.is_file() {
            debug!(path = %path.display(), "using cached {}", resource.description());
            return Ok(path);
        }
        info!(
            "{} not found in {:?}, downloading",
            resource.description(),
            self.cache_dir.display()
        );
        self.download(resource).await
    }

    /// Download `resource` into the cache, replacing any existing copy.
    #[instrument(level = "debug", skip(self))]
    pub async fn download(&self, resource: Resource) -> Result<PathBuf> {
        let url = self.url(resource);
        let dest = self.cached_path(resource);
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .with_context(|| {
                format!("failed to create cache directory {:?}", self.cache_dir.display())
            })?;

        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .context("failed to create HTTP client")?;
        let mut response = client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .with_context(|| format!("failed to download {}", url))?;

        // Dropping `partial` before `persist` deletes it, so every early
        // return below cleans up after itself.
        let partial = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.cache_dir)
            .context("failed to create temporary download file")?;
        let mut file = tokio::fs::File::from_std(
            partial
                .reopen()
                .context("failed to open temporary download file")?,
        );

        let msg = format!("Downloading {}", resource.file_name());
        let done_msg = format!("Downloaded {}", resource.file_name());
        let pb = self.ui.new_download_bar(
            &ProgressConfig {
                emoji: "⬇️",
                msg: &msg,
                done_msg: &done_msg,
            },
            response.content_length(),
        );

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("failed while downloading {}", url))?
        {
            file.write_all(&chunk)
                .await
                .context("failed to write download")?;
            written += chunk.len() as u64;
            pb.inc(chunk.len() as u64);
        }
        file.flush().await.context("failed to flush download")?;
        drop(file);
        pb.finish_using_style();

        if written == 0 {
            bail!("downloaded {} from {} was empty", resource.description(), url);
        }
        partial
            .persist(&dest)
            .with_context(|| format!("failed to save download to {:?}", dest.display()))?;
        info!(path = %dest.display(), bytes = written, "downloaded {}", resource.description());
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path, base_url: &str) -> ModelStore {
        ModelStore::new(Ui::init_for_tests(), dir.to_owned(), base_url)
    }

    #[test]
    fn builds_paths_and_urls() {
        let store = store(Path::new("/cache"), "https://example.com/models/");
        assert_eq!(
            store.cached_path(Resource::Model),
            PathBuf::from("/cache/monocr.onnx")
        );
        assert_eq!(
            store.url(Resource::Charset),
            "https://example.com/models/charset.txt"
        );
    }

    #[tokio::test]
    async fn override_paths_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), DEFAULT_BASE_URL);

        let model = dir.path().join("custom.onnx");
        std::fs::write(&model, b"model").unwrap();
        let resolved = store.resolve(Resource::Model, Some(&model)).await.unwrap();
        assert_eq!(resolved, model);

        let missing = dir.path().join("missing.onnx");
        let err = store
            .resolve(Resource::Model, Some(&missing))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("recognition model not found"));
    }

    #[tokio::test]
    async fn cached_files_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        // Unreachable, so any download attempt would fail.
        let store = store(dir.path(), "http://127.0.0.1:9");
        let cached = store.cached_path(Resource::Charset);
        std::fs::write(&cached, "abc").unwrap();

        assert_eq!(store.resolve(Resource::Charset, None).await.unwrap(), cached);
        assert_eq!(std::fs::read_to_string(&cached).unwrap(), "abc");
    }

    #[tokio::test]
    async fn failed_downloads_leave_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("models");
        let store = store(&cache, "http://127.0.0.1:9");
        assert!(store.resolve(Resource::Model, None).await.is_err());
        assert!(!store.cached_path(Resource::Model).exists());
        let leftovers = std::fs::read_dir(&cache).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    #[ignore = "downloads from the network"]
    async fn downloads_real_charset() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), DEFAULT_BASE_URL);
        let path = store.download(Resource::Charset).await.unwrap();
        let charset = crate::ocr::decode::Charset::from_file(&path).unwrap();
        assert!(!charset.is_empty());
    }
}
