use crate::core::channel::{ItemSender, send_item};
use crate::core::diagnostics::StageReporter;
use crate::core::error::StageError;
use crate::core::item::PipelineItem;
use crate::core::producer::{Generator, ProducerStage};
use crate::core::stage::ParameterMap;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const GENERIC_ID: &str = "directory";

/// Emits one item per file under a configured directory. Each item is
/// named after the file path and carries a `file://` locator plus a
/// `directory` payload with basic metadata. Unreadable entries are
/// reported as diagnostics and skipped.
#[derive(Debug, Clone, Default)]
pub struct DirectoryGenerator {
    path: PathBuf,
    recursive: bool,
}

pub fn template() -> ProducerStage<DirectoryGenerator> {
    ProducerStage::new(
        "Directory Producer",
        "1.0.0",
        GENERIC_ID,
        "",
        DirectoryGenerator::default(),
    )
}

#[async_trait]
impl Generator for DirectoryGenerator {
    fn parameters(&self) -> ParameterMap {
        ParameterMap::from([
            ("path".to_string(), String::new()),
            ("recursive".to_string(), "false".to_string()),
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

        self.path = std::path::absolute(path).map_err(|error| StageError::Config {
            parameter: "path".to_string(),
            reason: error.to_string(),
        })?;

        self.recursive = match params.get("recursive").map(String::as_str) {
            None | Some("false") => false,
            Some("true") => true,
            Some(other) => {
                return Err(StageError::Config {
                    parameter: "recursive".to_string(),
                    reason: format!("expected 'true' or 'false', got '{other}'"),
                });
            }
        };

        Ok(())
    }

    async fn generate(
        &mut self,
        output: ItemSender,
        cancel: CancellationToken,
        reporter: StageReporter,
    ) -> anyhow::Result<()> {
        let mut pending = vec![self.path.clone()];

        while let Some(directory) = pending.pop() {
            if cancel.is_cancelled() {
                break;
            }

            let mut entries = match tokio::fs::read_dir(&directory).await {
                Ok(entries) => entries,
                Err(error) => {
                    reporter.report(
                        anyhow::Error::new(error)
                            .context(format!("reading directory {}", directory.display())),
                    );
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(error) => {
                        reporter.report(
                            anyhow::Error::new(error)
                                .context(format!("reading directory {}", directory.display())),
                        );
                        break;
                    }
                };

                let path = entry.path();
                let metadata = match entry.metadata().await {
                    Ok(metadata) => metadata,
                    Err(error) => {
                        reporter.report(
                            anyhow::Error::new(error)
                                .context(format!("inspecting {}", path.display())),
                        );
                        continue;
                    }
                };

                if metadata.is_dir() {
                    if self.recursive {
                        pending.push(path);
                    }
                    continue;
                }

                let Ok(locator) = Url::from_file_path(&path) else {
                    reporter.report(anyhow::anyhow!(
                        "cannot express {} as a file:// locator",
                        path.display()
                    ));
                    continue;
                };

                let mut item = PipelineItem::new(reporter.generic_id());
                item.set_name(path.display().to_string());
                item.add_locator(locator);
                item.add_payload("directory", json!({ "size": metadata.len() }))
                    .context("attaching directory payload")?;
                if let Ok(modified) = metadata.modified()
                    && let Ok(elapsed) = modified.duration_since(std::time::UNIX_EPOCH)
                {
                    item.set_timestamp(elapsed.as_millis() as u64);
                }

                if !send_item(&output, &cancel, item).await? {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(params: &[(&str, &str)]) -> Result<DirectoryGenerator, StageError> {
        let mut generator = DirectoryGenerator::default();
        let params: ParameterMap = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        generator.configure(&params).map(|_| generator)
    }

    #[test]
    fn requires_path() {
        let err = configured(&[]).unwrap_err();
        assert!(matches!(err, StageError::Config { parameter, .. } if parameter == "path"));
    }

    #[test]
    fn rejects_bad_recursive_flag() {
        let err = configured(&[("path", "/tmp"), ("recursive", "maybe")]).unwrap_err();
        assert!(matches!(err, StageError::Config { parameter, .. } if parameter == "recursive"));
    }

    #[test]
    fn accepts_defaults() {
        let generator = configured(&[("path", "/tmp")]).unwrap();
        assert!(!generator.recursive);
        assert!(generator.path.is_absolute());
    }
}
