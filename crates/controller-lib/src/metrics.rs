//! Metric snapshots from a Prometheus server
//!
//! Pulls one observation window of per-container CPU and memory samples for
//! the pods of a replication controller via the range query API.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::cluster::MetricsSource;
use crate::models::{ContainerSamples, MetricSnapshot, MetricType};

/// Nanocores per CPU core
const NANOCORES_PER_CORE: f64 = 1_000_000_000.0;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    result: Vec<RangeSeries>,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    metric: HashMap<String, String>,
    values: Vec<(f64, String)>,
}

/// Metrics source querying Prometheus
pub struct PrometheusMetricsSource {
    client: reqwest::Client,
    base_url: Url,
    window: Duration,
    step: Duration,
}

impl PrometheusMetricsSource {
    pub fn new(base_url: &str, window: Duration, step: Duration, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let base_url = Url::parse(base_url).context("Invalid Prometheus URL")?;

        Ok(Self {
            client,
            base_url,
            window,
            step,
        })
    }

    /// Label matchers for the pods of `workload`.
    ///
    /// The name is matched literally; its regex escapes are doubled for the
    /// PromQL string literal.
    fn pod_selector(namespace: &str, workload: &str) -> String {
        let literal = regex::escape(workload).replace('\\', r"\\");
        format!(
            r#"namespace="{}",pod=~"{}-[a-z0-9]{{5}}",container!="",container!="POD""#,
            namespace, literal
        )
    }

    fn query_for(metric: MetricType, namespace: &str, workload: &str) -> String {
        let selector = Self::pod_selector(namespace, workload);
        match metric {
            MetricType::Cpu => format!(
                "sum by (pod, container) (rate(container_cpu_usage_seconds_total{{{}}}[1m]))",
                selector
            ),
            MetricType::Memory => format!(
                "sum by (pod, container) (container_memory_working_set_bytes{{{}}})",
                selector
            ),
        }
    }

    async fn query_range(&self, query: &str) -> Result<Vec<RangeSeries>> {
        let url = self
            .base_url
            .join("api/v1/query_range")
            .context("Invalid query path")?;
        let end = chrono::Utc::now().timestamp();
        let start = end - self.window.as_secs() as i64;

        let response: QueryResponse = self
            .client
            .get(url)
            .query(&[
                ("query", query.to_string()),
                ("start", start.to_string()),
                ("end", end.to_string()),
                ("step", format!("{}s", self.step.as_secs().max(1))),
            ])
            .send()
            .await
            .context("Failed to query Prometheus")?
            .error_for_status()
            .context("Prometheus rejected the query")?
            .json()
            .await
            .context("Failed to parse Prometheus response")?;

        if response.status != "success" {
            anyhow::bail!(
                "Prometheus query failed: {}",
                response.error.unwrap_or_else(|| response.status.clone())
            );
        }

        Ok(response.data.map(|d| d.result).unwrap_or_default())
    }
}

/// Fold range series of several metrics into per-container samples
fn fold_series(series: Vec<(MetricType, Vec<RangeSeries>)>, window: Duration) -> MetricSnapshot {
    let mut containers: BTreeMap<String, ContainerSamples> = BTreeMap::new();

    for (metric, results) in series {
        let scale = match metric {
            MetricType::Cpu => NANOCORES_PER_CORE,
            MetricType::Memory => 1.0,
        };

        for result in results {
            let pod = result.metric.get("pod").map(String::as_str).unwrap_or("unknown");
            let container = result
                .metric
                .get("container")
                .map(String::as_str)
                .unwrap_or("unknown");
            let id = format!("{}/{}", pod, container);

            let values: Vec<i64> = result
                .values
                .iter()
                .filter_map(|(_, raw)| raw.parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .map(|v| (v * scale).round() as i64)
                .collect();

            containers
                .entry(id.clone())
                .or_insert_with(|| ContainerSamples::new(id))
                .samples
                .insert(metric, values);
        }
    }

    MetricSnapshot::new(window, containers.into_values().collect())
}

#[async_trait]
impl MetricsSource for PrometheusMetricsSource {
    async fn metric_snapshot(
        &self,
        _endpoint: &str,
        namespace: &str,
        workload: &str,
    ) -> Result<MetricSnapshot> {
        let mut series = Vec::new();
        for metric in [MetricType::Cpu, MetricType::Memory] {
            let query = Self::query_for(metric, namespace, workload);
            let results = self
                .query_range(&query)
                .await
                .with_context(|| format!("Failed to fetch {} samples for {}/{}", metric, namespace, workload))?;
            series.push((metric, results));
        }

        let snapshot = fold_series(series, self.window);
        debug!(
            namespace = %namespace,
            workload = %workload,
            containers = snapshot.containers.len(),
            "Fetched metric snapshot"
        );
        Ok(snapshot)
    }
}
