//! Output utilities.
//!
//! Results go either to a file or to standard output, as plain text or JSON.
//! Everything is written through a buffered async writer which must be
//! [`OutputWriter::finish`]ed to flush it.

use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt as _, BufWriter},
};

use crate::prelude::*;

/// Create an [`AsyncWrite`] for a file or stdout.
async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("failed to create file {:?}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// A buffered writer for command output.
pub struct OutputWriter {
    writer: BufWriter<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>>,
}

impl OutputWriter {
    /// Write to `path`, or to standard output if `path` is `None`.
    pub async fn create(path: Option<&Path>) -> Result<Self> {
        Ok(Self {
            writer: BufWriter::new(create_writer(path).await?),
        })
    }

    /// Write a string as-is.
    pub async fn write_str(&mut self, text: &str) -> Result<()> {
        self.writer
            .write_all(text.as_bytes())
            .await
            .context("failed to write output")
    }

    /// Write a value as a single line of JSON.
    pub async fn write_json_line<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let mut json =
            serde_json::to_string(value).context("failed to serialize output")?;
        json.push('\n');
        self.write_str(&json).await
    }

    /// Write a value as indented JSON.
    pub async fn write_json_pretty<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let mut json =
            serde_json::to_string_pretty(value).context("failed to serialize output")?;
        json.push('\n');
        self.write_str(&json).await
    }

    /// Flush everything we've written.
    pub async fn finish(mut self) -> Result<()> {
        self.writer.flush().await.context("failed to flush output")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_text_and_json_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut writer = OutputWriter::create(Some(&path)).await.unwrap();
        writer.write_str("hello\n").await.unwrap();
        writer
            .write_json_line(&serde_json::json!({ "page": 1 }))
            .await
            .unwrap();
        writer.finish().await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "hello\n{\"page\":1}\n");
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let path = Path::new("/nonexistent/dir/out.txt");
        assert!(OutputWriter::create(Some(path)).await.is_err());
    }
}
