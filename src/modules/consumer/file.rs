use crate::core::consumer::{ConsumerStage, Sink};
use crate::core::diagnostics::StageReporter;
use crate::core::error::StageError;
use crate::core::item::PipelineItem;
use crate::core::stage::ParameterMap;
use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const GENERIC_ID: &str = "file";

/// Appends each item's display form as one line to a configured file.
/// The file is opened on first delivery; with `truncate = "true"` any
/// existing content is discarded at that point.
#[derive(Debug, Clone, Default)]
pub struct FileSink {
    path: PathBuf,
    truncate: bool,
    file: Option<Arc<Mutex<tokio::fs::File>>>,
}

pub fn template() -> ConsumerStage<FileSink> {
    ConsumerStage::new("File Consumer", "1.0.0", GENERIC_ID, "", FileSink::default())
}

impl FileSink {
    async fn open(&mut self) -> anyhow::Result<Arc<Mutex<tokio::fs::File>>> {
        if let Some(file) = &self.file {
            return Ok(file.clone());
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true);
        if self.truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }

        let file = options
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        let file = Arc::new(Mutex::new(file));
        self.file = Some(file.clone());
        Ok(file)
    }
}

#[async_trait]
impl Sink for FileSink {
    fn parameters(&self) -> ParameterMap {
        ParameterMap::from([
            ("path".to_string(), String::new()),
            ("truncate".to_string(), "false".to_string()),
        ])
    }

    fn configure(&mut self, params: &ParameterMap) -> Result<(), StageError> {
        let path = params
            .get("path")
            .filter(|path| !path.is_empty())
            .ok_or_else(|| StageError::Config {
                parameter: "path".to_string(),
                reason: "required parameter not found".to_string(),
            })?;
        self.path = PathBuf::from(path);

        self.truncate = match params.get("truncate").map(String::as_str) {
            None | Some("false") => false,
            Some("true") => true,
            Some(other) => {
                return Err(StageError::Config {
                    parameter: "truncate".to_string(),
                    reason: format!("expected 'true' or 'false', got '{other}'"),
                });
            }
        };

        Ok(())
    }

    async fn deliver(
        &mut self,
        item: PipelineItem,
        _reporter: &StageReporter,
    ) -> anyhow::Result<()> {
        let file = self.open().await?;
        let mut file = file.lock().await;
        file.write_all(format!("{item}\n").as_bytes())
            .await
            .with_context(|| format!("writing to {}", self.path.display()))?;
        Ok(())
    }

    async fn finish(&mut self) -> anyhow::Result<()> {
        if let Some(file) = &self.file {
            file.lock().await.flush().await?;
        }
        Ok(())
    }
}
