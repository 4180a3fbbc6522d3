use crate::core::channel::{ItemSender, send_item};
use crate::core::diagnostics::StageReporter;
use crate::core::error::StageError;
use crate::core::item::PipelineItem;
use crate::core::producer::{Generator, ProducerStage};
use crate::core::stage::ParameterMap;
use async_trait::async_trait;
use rand_distr::{Distribution, Normal, Uniform};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const GENERIC_ID: &str = "simulated";

/// Synthetic source: emits `count` items (0 = until cancelled) every
/// `interval_ms`, each carrying a `value` payload sampled from the
/// configured distribution over [`min_value`, `max_value`].
#[derive(Debug, Clone)]
pub struct SimulatedGenerator {
    count: u64,
    interval_ms: u64,
    distribution: String,
    min_value: f64,
    max_value: f64,
}

impl Default for SimulatedGenerator {
    fn default() -> Self {
        Self {
            count: 10,
            interval_ms: 1000,
            distribution: "uniform".to_string(),
            min_value: 0.0,
            max_value: 100.0,
        }
    }
}

pub fn template() -> ProducerStage<SimulatedGenerator> {
    ProducerStage::new(
        "Simulated Producer",
        "1.0.0",
        GENERIC_ID,
        "",
        SimulatedGenerator::default(),
    )
}

fn parse_param<T: std::str::FromStr>(
    params: &ParameterMap,
    key: &str,
    default: T,
) -> Result<T, StageError> {
    match params.get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| StageError::Config {
            parameter: key.to_string(),
            reason: format!("cannot parse '{raw}'"),
        }),
    }
}

impl SimulatedGenerator {
    fn sample(&self) -> f64 {
        // The rng is dropped before any await point so the future
        // stays Send.
        let mut rng = rand::rng();
        match self.distribution.as_str() {
            "normal" => {
                let mean = (self.min_value + self.max_value) / 2.0;
                let stddev = (self.max_value - self.min_value) / 6.0;
                Normal::new(mean, stddev)
                    .map(|normal| normal.sample(&mut rng))
                    .unwrap_or(mean)
                    .clamp(self.min_value, self.max_value)
            }
            _ => Uniform::new(self.min_value, self.max_value)
                .map(|uniform| uniform.sample(&mut rng))
                .unwrap_or(self.min_value),
        }
    }
}

#[async_trait]
impl Generator for SimulatedGenerator {
    fn parameters(&self) -> ParameterMap {
        ParameterMap::from([
            ("count".to_string(), "10".to_string()),
            ("interval_ms".to_string(), "1000".to_string()),
            ("distribution".to_string(), "uniform".to_string()),
            ("min_value".to_string(), "0".to_string()),
            ("max_value".to_string(), "100".to_string()),
        ])
    }

    fn configure(&mut self, params: &ParameterMap) -> Result<(), StageError> {
        self.count = parse_param(params, "count", self.count)?;
        self.interval_ms = parse_param(params, "interval_ms", self.interval_ms)?;
        self.min_value = parse_param(params, "min_value", self.min_value)?;
        self.max_value = parse_param(params, "max_value", self.max_value)?;

        if self.min_value >= self.max_value {
            return Err(StageError::Config {
                parameter: "min_value".to_string(),
                reason: "min_value must be less than max_value".to_string(),
            });
        }

        if let Some(distribution) = params.get("distribution") {
            if distribution != "uniform" && distribution != "normal" {
                return Err(StageError::Config {
                    parameter: "distribution".to_string(),
                    reason: format!("expected 'uniform' or 'normal', got '{distribution}'"),
                });
            }
            self.distribution = distribution.clone();
        }

        Ok(())
    }

    async fn generate(
        &mut self,
        output: ItemSender,
        cancel: CancellationToken,
        reporter: StageReporter,
    ) -> anyhow::Result<()> {
        let mut emitted: u64 = 0;

        while self.count == 0 || emitted < self.count {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.interval_ms)) => {}
                _ = cancel.cancelled() => break,
            }

            let value = self.sample();

            let mut item = PipelineItem::new(reporter.generic_id());
            item.set_name(format!("{}-{}", reporter.specific_id(), emitted));
            item.add_payload("value", json!(value))?;

            if !send_item(&output, &cancel, item).await? {
                break;
            }

            emitted += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_range() {
        let mut generator = SimulatedGenerator::default();
        let params = ParameterMap::from([
            ("min_value".to_string(), "10".to_string()),
            ("max_value".to_string(), "1".to_string()),
        ]);
        assert!(generator.configure(&params).is_err());
    }

    #[test]
    fn rejects_unknown_distribution() {
        let mut generator = SimulatedGenerator::default();
        let params = ParameterMap::from([("distribution".to_string(), "poisson".to_string())]);
        assert!(generator.configure(&params).is_err());
    }

    #[test]
    fn samples_stay_in_range() {
        let generator = SimulatedGenerator::default();
        for _ in 0..100 {
            let value = generator.sample();
            assert!((0.0..=100.0).contains(&value));
        }
    }
}
