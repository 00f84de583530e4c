// Registry inspection helpers shared by unit and integration tests
//
// Numan Thabit 2025 Nov

use prometheus::proto::Metric;
use prometheus::Registry;

pub fn metrics_named(registry: &Registry, name: &str) -> Vec<Metric> {
    registry
        .gather()
        .into_iter()
        .filter(|mf| mf.get_name() == name)
        .flat_map(|mf| mf.get_metric().to_vec())
        .collect()
}

pub fn histogram_count(registry: &Registry, name: &str) -> u64 {
    metrics_named(registry, name)
        .iter()
        .map(|m| m.get_histogram().get_sample_count())
        .sum()
}

pub fn histogram_sum(registry: &Registry, name: &str) -> f64 {
    metrics_named(registry, name)
        .iter()
        .map(|m| m.get_histogram().get_sample_sum())
        .sum()
}

pub fn counter_total(registry: &Registry, name: &str) -> f64 {
    metrics_named(registry, name)
        .iter()
        .map(|m| m.get_counter().get_value())
        .sum()
}

/// Values of `label` across every child of metric `name`, sorted.
pub fn label_values(registry: &Registry, name: &str, label: &str) -> Vec<String> {
    let mut values: Vec<String> = metrics_named(registry, name)
        .iter()
        .flat_map(|m| {
            m.get_label()
                .iter()
                .filter(|pair| pair.get_name() == label)
                .map(|pair| pair.get_value().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    values.sort();
    values
}
