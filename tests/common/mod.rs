#![allow(dead_code)]

#[path = "../../src/testing.rs"]
mod registry;

pub use registry::{counter_total, histogram_count, histogram_sum, metrics_named};

use prometheus::proto::Metric;
use prometheus::Registry;

pub fn label<'a>(metric: &'a Metric, name: &str) -> &'a str {
    metric
        .get_label()
        .iter()
        .find(|pair| pair.get_name() == name)
        .map(|pair| pair.get_value())
        .unwrap_or("")
}

pub fn arrivals(registry: &Registry) -> f64 {
    counter_total(registry, "api_arrival_total")
}

/// Histogram sample count for the child whose `state` label matches.
pub fn count_with_state(registry: &Registry, name: &str, state: &str) -> u64 {
    metrics_named(registry, name)
        .iter()
        .filter(|m| label(m, "state") == state)
        .map(|m| m.get_histogram().get_sample_count())
        .sum()
}
