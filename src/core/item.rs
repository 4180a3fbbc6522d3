use crate::core::error::StageError;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use url::Url;

/// Module-specific data attached to an item while it traverses a
/// pipeline. Keys are write-once: a stage may record data under its own
/// id but never overwrite what an earlier stage stored.
pub type PayloadMap = HashMap<String, Value>;

/// An item traversing a pipeline.
///
/// Items are created by a producer, filled in before publication and
/// treated as read-only from then on. The demultiplexer clones items to
/// replicate them; everywhere else an item has a single owner.
#[derive(Debug, Clone)]
pub struct PipelineItem {
    source_id: String,

    name: String,
    description: Option<String>,

    timestamp: u64,

    locators: Vec<Url>,

    payload: PayloadMap,
}

impl PipelineItem {
    /// Create an item stamped with the generic id of the producer that
    /// inserted it into the pipeline. The timestamp defaults to the
    /// creation time (epoch milliseconds).
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            name: String::new(),
            description: None,
            timestamp: epoch_millis(),
            locators: Vec::new(),
            payload: PayloadMap::new(),
        }
    }

    /// Generic id of the producer that created this item. Set at
    /// creation, never changes.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp;
    }

    /// Append a locator, returning the index it was stored at. Indices
    /// are stable for the lifetime of the item.
    pub fn add_locator(&mut self, locator: Url) -> usize {
        self.locators.push(locator);
        self.locators.len() - 1
    }

    /// Parse the given string as a URL and append it as a locator.
    pub fn add_locator_str(&mut self, locator: &str) -> Result<usize, url::ParseError> {
        let parsed = Url::parse(locator)?;
        Ok(self.add_locator(parsed))
    }

    pub fn locator(&self, index: usize) -> Option<&Url> {
        self.locators.get(index)
    }

    pub fn locators(&self) -> &[Url] {
        &self.locators
    }

    /// Attach payload data under the given id. A second write to the
    /// same id fails; payload entries are write-once.
    pub fn add_payload(&mut self, payload_id: &str, payload: Value) -> Result<(), StageError> {
        if self.payload.contains_key(payload_id) {
            return Err(StageError::DuplicatePayload {
                key: payload_id.to_string(),
            });
        }

        self.payload.insert(payload_id.to_string(), payload);

        Ok(())
    }

    pub fn payload(&self, payload_id: &str) -> Option<&Value> {
        self.payload.get(payload_id)
    }
}

impl fmt::Display for PipelineItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : {} : {} : {:?}",
            self.name,
            self.timestamp,
            self.description.as_deref().unwrap_or(""),
            self.locators.iter().map(Url::as_str).collect::<Vec<_>>()
        )
    }
}

fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_is_write_once() {
        let mut item = PipelineItem::new("directory");

        item.add_payload("directory", json!({"size": 42})).unwrap();
        let err = item.add_payload("directory", json!(null)).unwrap_err();

        assert!(matches!(err, StageError::DuplicatePayload { key } if key == "directory"));
        assert_eq!(item.payload("directory").unwrap()["size"], 42);
    }

    #[test]
    fn locator_indices_are_stable() {
        let mut item = PipelineItem::new("directory");

        let first = item.add_locator_str("file:///tmp/a.txt").unwrap();
        let second = item.add_locator_str("https://example.org/feed").unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, 1);
        assert_eq!(item.locator(0).unwrap().scheme(), "file");
        assert_eq!(item.locator(1).unwrap().host_str(), Some("example.org"));
        assert!(item.locator(2).is_none());
    }

    #[test]
    fn source_id_set_at_creation() {
        let item = PipelineItem::new("rss");
        assert_eq!(item.source_id(), "rss");
        assert!(item.timestamp() > 0);
    }

    #[test]
    fn rejects_malformed_locator() {
        let mut item = PipelineItem::new("directory");
        assert!(item.add_locator_str("not a url").is_err());
        assert!(item.locators().is_empty());
    }
}
