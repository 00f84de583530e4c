// Monitoring configuration schema
// User metric declarations plus recording and alerting rules, read from YAML
//
// Numan Thabit 2025 Nov

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Declaration of one user metric.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricSchema {
    pub name: String,
    pub help: String,
    /// Every label the metric will ever be observed with
    #[serde(default, alias = "labelNames")]
    pub label_names: Vec<String>,
    /// Histogram bucket upper bounds; ignored for other metric types
    #[serde(default)]
    pub buckets: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSchema {
    #[serde(default)]
    pub counter: Vec<MetricSchema>,
    #[serde(default)]
    pub gauge: Vec<MetricSchema>,
    #[serde(default)]
    pub histogram: Vec<MetricSchema>,
}

/// See https://prometheus.io/docs/prometheus/latest/configuration/recording_rules/
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RecordingRule {
    pub expr: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Annotations {
    pub summary: String,
    pub description: String,
}

/// See https://prometheus.io/docs/prometheus/latest/configuration/alerting_rules/
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AlertingRule {
    pub expr: String,
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_duration: Option<String>,
    pub annotations: Annotations,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Everything a service declares about its own monitoring.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub metrics: MetricsSchema,
    /// Keyed by the recorded series name
    #[serde(default)]
    pub recording_rules: BTreeMap<String, RecordingRule>,
    /// Keyed by alert name
    #[serde(default)]
    pub alerting_rules: BTreeMap<String, AlertingRule>,
}

impl MonitoringConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }
}

#[derive(Serialize)]
struct RuleGroups<T> {
    groups: Vec<RuleGroup<T>>,
}

#[derive(Serialize)]
struct RuleGroup<T> {
    name: String,
    rules: Vec<T>,
}

#[derive(Serialize)]
struct NamedAlert<'a> {
    alert: &'a str,
    #[serde(flatten)]
    rule: &'a AlertingRule,
}

#[derive(Serialize)]
struct NamedRecord<'a> {
    record: &'a str,
    #[serde(flatten)]
    rule: &'a RecordingRule,
}

fn render_group<T: Serialize>(group_name: String, rules: Vec<T>) -> Result<String> {
    let doc = RuleGroups {
        groups: vec![RuleGroup {
            name: group_name,
            rules,
        }],
    };
    Ok(serde_yaml::to_string(&doc)?)
}

/// Alerting rules as a Prometheus rule file with one group `<service>-alert`.
pub fn alerting_rules_yaml(service: &str, rules: &BTreeMap<String, AlertingRule>) -> Result<String> {
    let named = rules
        .iter()
        .map(|(alert, rule)| NamedAlert { alert, rule })
        .collect();
    render_group(format!("{service}-alert"), named)
}

/// Recording rules as a Prometheus rule file with one group `<service>-record`.
pub fn recording_rules_yaml(
    service: &str,
    rules: &BTreeMap<String, RecordingRule>,
) -> Result<String> {
    let named = rules
        .iter()
        .map(|(record, rule)| NamedRecord { record, rule })
        .collect();
    render_group(format!("{service}-record"), named)
}
