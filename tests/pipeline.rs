//! End-to-end pipeline scenarios: single chains, fan-in, fan-out,
//! filtering, cancellation and misconfiguration, driven through
//! purpose-built test stages plus the built-in module registry.

use async_trait::async_trait;
use sluice::core::channel::{ItemSender, send_item};
use sluice::core::consumer::{ConsumerStage, Sink};
use sluice::core::diagnostics::StageReporter;
use sluice::core::error::StageError;
use sluice::core::item::PipelineItem;
use sluice::core::pipeline::{Pipeline, PipelineState};
use sluice::core::processor::{Predicate, ProcessorStage};
use sluice::core::producer::{Generator, ProducerStage};
use sluice::core::registry::{self, ModuleHandle};
use sluice::core::stage::ParameterMap;
use sluice::modules::register_builtin_modules;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("test timed out")
}

/// Emits a fixed list of items, optionally with `file://` locators
/// derived from the names, then closes its output.
#[derive(Debug, Clone)]
struct ListGenerator {
    names: Vec<String>,
    with_locators: bool,
}

impl ListGenerator {
    fn new(names: &[&str], with_locators: bool) -> Self {
        Self {
            names: names.iter().map(|name| name.to_string()).collect(),
            with_locators,
        }
    }
}

#[async_trait]
impl Generator for ListGenerator {
    fn parameters(&self) -> ParameterMap {
        ParameterMap::new()
    }

    fn configure(&mut self, _params: &ParameterMap) -> Result<(), StageError> {
        Ok(())
    }

    async fn generate(
        &mut self,
        output: ItemSender,
        cancel: CancellationToken,
        reporter: StageReporter,
    ) -> anyhow::Result<()> {
        for name in &self.names {
            let mut item = PipelineItem::new(reporter.generic_id());
            item.set_name(name.clone());
            if self.with_locators {
                item.add_locator_str(&format!("file:///data/{name}"))?;
            }
            if !send_item(&output, &cancel, item).await? {
                break;
            }
        }
        Ok(())
    }
}

/// Emits numbered items forever; only cancellation stops it.
#[derive(Debug, Clone)]
struct InfiniteGenerator;

#[async_trait]
impl Generator for InfiniteGenerator {
    fn parameters(&self) -> ParameterMap {
        ParameterMap::new()
    }

    fn configure(&mut self, _params: &ParameterMap) -> Result<(), StageError> {
        Ok(())
    }

    async fn generate(
        &mut self,
        output: ItemSender,
        cancel: CancellationToken,
        reporter: StageReporter,
    ) -> anyhow::Result<()> {
        let mut sequence: u64 = 0;
        loop {
            let mut item = PipelineItem::new(reporter.generic_id());
            item.set_name(format!("tick-{sequence}"));
            if !send_item(&output, &cancel, item).await? {
                break;
            }
            sequence += 1;
        }
        Ok(())
    }
}

/// Forwards everything.
#[derive(Debug, Clone)]
struct KeepAll;

impl Predicate for KeepAll {
    fn parameters(&self) -> ParameterMap {
        ParameterMap::new()
    }

    fn configure(&mut self, _params: &ParameterMap) -> Result<(), StageError> {
        Ok(())
    }

    fn exclude(&mut self, _item: &PipelineItem, _reporter: &StageReporter) -> bool {
        false
    }
}

/// Drops everything.
#[derive(Debug, Clone)]
struct DropAll;

impl Predicate for DropAll {
    fn parameters(&self) -> ParameterMap {
        ParameterMap::new()
    }

    fn configure(&mut self, _params: &ParameterMap) -> Result<(), StageError> {
        Ok(())
    }

    fn exclude(&mut self, _item: &PipelineItem, _reporter: &StageReporter) -> bool {
        true
    }
}

/// Collects the names of delivered items into a shared list.
#[derive(Debug, Clone)]
struct CollectSink {
    collected: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Sink for CollectSink {
    fn parameters(&self) -> ParameterMap {
        ParameterMap::new()
    }

    fn configure(&mut self, _params: &ParameterMap) -> Result<(), StageError> {
        Ok(())
    }

    async fn deliver(
        &mut self,
        item: PipelineItem,
        _reporter: &StageReporter,
    ) -> anyhow::Result<()> {
        self.collected
            .lock()
            .expect("poisoned collection lock")
            .push(item.name().to_string());
        Ok(())
    }
}

fn list_producer(specific_id: &str, names: &[&str], with_locators: bool) -> ModuleHandle {
    let handle = ModuleHandle::producer(Box::new(ProducerStage::new(
        "List Producer",
        "1.0.0",
        "list",
        specific_id,
        ListGenerator::new(names, with_locators),
    )));
    handle.configure(&ParameterMap::new()).unwrap();
    handle
}

fn infinite_producer(specific_id: &str) -> ModuleHandle {
    let handle = ModuleHandle::producer(Box::new(ProducerStage::new(
        "Infinite Producer",
        "1.0.0",
        "infinite",
        specific_id,
        InfiniteGenerator,
    )));
    handle.configure(&ParameterMap::new()).unwrap();
    handle
}

fn collector(specific_id: &str) -> (ModuleHandle, Arc<Mutex<Vec<String>>>) {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let handle = ModuleHandle::consumer(Box::new(ConsumerStage::new(
        "Collect Consumer",
        "1.0.0",
        "collect",
        specific_id,
        CollectSink {
            collected: collected.clone(),
        },
    )));
    handle.configure(&ParameterMap::new()).unwrap();
    (handle, collected)
}

fn keep_all_processor(specific_id: &str) -> ModuleHandle {
    let handle = ModuleHandle::processor(Box::new(ProcessorStage::new(
        "Keep All",
        "1.0.0",
        "keep-all",
        specific_id,
        KeepAll,
    )));
    handle.configure(&ParameterMap::new()).unwrap();
    handle
}

fn drop_all_processor(specific_id: &str) -> ModuleHandle {
    let handle = ModuleHandle::processor(Box::new(ProcessorStage::new(
        "Drop All",
        "1.0.0",
        "drop-all",
        specific_id,
        DropAll,
    )));
    handle.configure(&ParameterMap::new()).unwrap();
    handle
}

fn names(collected: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    collected.lock().expect("poisoned collection lock").clone()
}

#[tokio::test(flavor = "multi_thread")]
async fn single_chain_preserves_order() {
    let mut pipeline = Pipeline::new("s1");
    pipeline
        .add_producer(list_producer("s1-producer", &["A", "B", "C"], false))
        .unwrap();
    let (consumer, collected) = collector("s1-consumer");
    pipeline.add_consumer(consumer).unwrap();

    pipeline.start().unwrap();
    within(pipeline.wait()).await;

    assert_eq!(names(&collected), ["A", "B", "C"]);
    assert_eq!(pipeline.state(), PipelineState::Done);
    assert!(!pipeline.has_fan_in());
    assert!(!pipeline.has_fan_out());
}

#[tokio::test(flavor = "multi_thread")]
async fn fan_in_merges_two_producers() {
    register_builtin_modules();

    let mut pipeline = Pipeline::new("s2-fan-in");
    pipeline
        .add_producer(list_producer("s2-first", &["A"], false))
        .unwrap();
    pipeline
        .add_producer(list_producer("s2-second", &["B"], false))
        .unwrap();
    let (consumer, collected) = collector("s2-consumer");
    pipeline.add_consumer(consumer).unwrap();

    pipeline.start().unwrap();
    within(pipeline.wait()).await;

    let mut received = names(&collected);
    received.sort();
    assert_eq!(received, ["A", "B"]);
    assert!(pipeline.has_fan_in());
    assert!(!pipeline.has_fan_out());
}

#[tokio::test(flavor = "multi_thread")]
async fn fan_out_replicates_to_two_consumers() {
    register_builtin_modules();

    let mut pipeline = Pipeline::new("s3-fan-out");
    pipeline
        .add_producer(list_producer("s3-producer", &["A"], false))
        .unwrap();
    let (first, first_collected) = collector("s3-first");
    let (second, second_collected) = collector("s3-second");
    pipeline.add_consumer(first).unwrap();
    pipeline.add_consumer(second).unwrap();

    pipeline.start().unwrap();
    within(pipeline.wait()).await;

    assert_eq!(names(&first_collected), ["A"]);
    assert_eq!(names(&second_collected), ["A"]);
    assert!(pipeline.has_fan_out());
    assert!(!pipeline.has_fan_in());
}

#[tokio::test(flavor = "multi_thread")]
async fn filter_chain_drops_unmatched_items() {
    register_builtin_modules();

    let mut pipeline = Pipeline::new("s4-filter");
    pipeline
        .add_producer(list_producer(
            "s4-producer",
            &["a.txt", "b.log", "c.txt"],
            true,
        ))
        .unwrap();

    let filter = registry::duplicate("extension", "s4-txt-only").unwrap();
    filter
        .configure(&ParameterMap::from([(
            "extension".to_string(),
            ".txt".to_string(),
        )]))
        .unwrap();
    pipeline.add_processor(filter).unwrap();

    let (consumer, collected) = collector("s4-consumer");
    pipeline.add_consumer(consumer).unwrap();

    pipeline.start().unwrap();
    within(pipeline.wait()).await;

    assert_eq!(names(&collected), ["a.txt", "c.txt"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_cancels_an_infinite_pipeline() {
    let mut pipeline = Pipeline::new("s5-cancel");
    pipeline
        .add_producer(infinite_producer("s5-producer"))
        .unwrap();
    let (consumer, collected) = collector("s5-consumer");
    pipeline.add_consumer(consumer).unwrap();

    pipeline.start().unwrap();

    within(async {
        while names(&collected).is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    pipeline.stop();
    within(pipeline.wait()).await;
    assert_eq!(pipeline.state(), PipelineState::Done);

    // Stopping again leaves the pipeline in the same terminal state.
    pipeline.stop();
    within(pipeline.wait()).await;
    assert_eq!(pipeline.state(), PipelineState::Done);
}

#[tokio::test(flavor = "multi_thread")]
async fn processor_in_producer_list_is_rejected() {
    register_builtin_modules();

    let mut pipeline = Pipeline::new("s6-mistag");
    let filter = registry::duplicate("extension", "s6-filter").unwrap();

    let err = pipeline.add_producer(filter).unwrap_err();
    assert!(matches!(err, StageError::RoleMismatch { .. }));

    // Nothing was added, so the pipeline refuses to start.
    let err = pipeline.start().unwrap_err();
    assert!(matches!(err, StageError::Underspecified { role: "producer" }));
    assert_eq!(pipeline.state(), PipelineState::Unconnected);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_producer_terminates_cleanly() {
    let mut pipeline = Pipeline::new("empty-producer");
    pipeline
        .add_producer(list_producer("empty-producer-src", &[], false))
        .unwrap();
    let (consumer, collected) = collector("empty-producer-sink");
    pipeline.add_consumer(consumer).unwrap();

    pipeline.start().unwrap();
    within(pipeline.wait()).await;

    assert!(names(&collected).is_empty());
    assert_eq!(pipeline.state(), PipelineState::Done);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_every_item_still_terminates() {
    let mut pipeline = Pipeline::new("drop-all");
    pipeline
        .add_producer(list_producer("drop-all-src", &["A", "B", "C"], false))
        .unwrap();
    pipeline
        .add_processor(drop_all_processor("drop-all-filter"))
        .unwrap();
    let (consumer, collected) = collector("drop-all-sink");
    pipeline.add_consumer(consumer).unwrap();

    pipeline.start().unwrap();
    within(pipeline.wait()).await;

    assert!(names(&collected).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn diamond_delivers_everything_to_every_consumer() {
    register_builtin_modules();

    // Two producers through fan-in, a passthrough processor, then
    // fan-out to two consumers: each consumer sees every emitted item.
    let mut pipeline = Pipeline::new("diamond");
    pipeline
        .add_producer(list_producer("diamond-first", &["A", "B"], false))
        .unwrap();
    pipeline
        .add_producer(list_producer("diamond-second", &["C", "D"], false))
        .unwrap();
    pipeline
        .add_processor(keep_all_processor("diamond-keep"))
        .unwrap();
    let (left, left_collected) = collector("diamond-left");
    let (right, right_collected) = collector("diamond-right");
    pipeline.add_consumer(left).unwrap();
    pipeline.add_consumer(right).unwrap();

    pipeline.start().unwrap();
    within(pipeline.wait()).await;

    for collected in [&left_collected, &right_collected] {
        let mut received = names(collected);
        received.sort();
        assert_eq!(received, ["A", "B", "C", "D"]);
    }
    assert!(pipeline.has_fan_in());
    assert!(pipeline.has_fan_out());
}

#[tokio::test(flavor = "multi_thread")]
async fn adding_stages_after_start_fails() {
    let mut pipeline = Pipeline::new("frozen");
    pipeline
        .add_producer(list_producer("frozen-src", &["A"], false))
        .unwrap();
    let (consumer, _collected) = collector("frozen-sink");
    pipeline.add_consumer(consumer).unwrap();

    pipeline.start().unwrap();

    let late = list_producer("frozen-late", &["B"], false);
    assert!(matches!(
        pipeline.add_producer(late),
        Err(StageError::AlreadyStarted { .. })
    ));
    assert!(matches!(
        pipeline.start(),
        Err(StageError::AlreadyStarted { .. })
    ));

    within(pipeline.wait()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unready_stage_does_not_wedge_the_pipeline() {
    // The consumer is never configured; its start fails, the wait
    // counter still drains and the producer observes the closed stream.
    let mut pipeline = Pipeline::new("unready");
    pipeline
        .add_producer(list_producer("unready-src", &["A"], false))
        .unwrap();
    let handle = ModuleHandle::consumer(Box::new(ConsumerStage::new(
        "Collect Consumer",
        "1.0.0",
        "collect",
        "unready-sink",
        CollectSink {
            collected: Arc::new(Mutex::new(Vec::new())),
        },
    )));
    pipeline.add_consumer(handle).unwrap();

    pipeline.start().unwrap();
    within(pipeline.wait()).await;
    assert_eq!(pipeline.state(), PipelineState::Done);
}

#[test]
fn default_parameters_round_trip() {
    register_builtin_modules();

    // Modules whose defaults are a complete configuration accept their
    // own parameter map unchanged.
    for generic_id in ["simulated", "print"] {
        let handle =
            registry::duplicate(generic_id, &format!("round-trip-{generic_id}")).unwrap();
        let defaults = handle.parameters();
        handle.configure(&defaults).unwrap();
        assert!(handle.is_ready(), "{generic_id} should be ready");
        assert_eq!(handle.parameters(), defaults);
    }

    // Modules with required parameters reject their bare defaults.
    for generic_id in ["directory", "extension", "file", "copy"] {
        let handle =
            registry::duplicate(generic_id, &format!("round-trip-{generic_id}")).unwrap();
        let defaults = handle.parameters();
        assert!(matches!(
            handle.configure(&defaults),
            Err(StageError::Config { .. })
        ));
        assert!(!handle.is_ready());
    }
}
