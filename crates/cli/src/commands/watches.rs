//! Watch management commands

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tabled::Tabled;

use crate::client::{ApiClient, AutoScaler, Indicator, Notifier};
use crate::output::{
    color_status, format_cooldown, format_threshold, print_info, print_json, print_list,
    print_success, watch_status, OutputFormat,
};

/// Watch variant addressed by a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchResource {
    #[value(alias = "autoscalers")]
    Autoscaler,
    #[value(alias = "notifiers")]
    Notifier,
}

impl WatchResource {
    fn collection(&self) -> &'static str {
        match self {
            WatchResource::Autoscaler => "api/v1/autoscalers",
            WatchResource::Notifier => "api/v1/notifiers",
        }
    }

    fn item(&self, namespace: &str, kind: &str, name: &str) -> String {
        format!("{}/{}/{}/{}", self.collection(), namespace, kind, name)
    }
}

/// Row for the auto-scaler table
#[derive(Tabled)]
struct AutoScalerRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Replicas")]
    replicas: String,
    #[tabled(rename = "Indicators")]
    indicators: usize,
    #[tabled(rename = "Cooldown")]
    cooldown: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&AutoScaler> for AutoScalerRow {
    fn from(spec: &AutoScaler) -> Self {
        Self {
            namespace: spec.namespace.clone(),
            kind: spec.kind.clone(),
            name: spec.name.clone(),
            replicas: format!("{}-{}", spec.min_replicas, spec.max_replicas),
            indicators: spec.indicators.len(),
            cooldown: format_cooldown(spec.remaining_cooldown_secs, spec.cooldown_duration_secs),
            status: color_status(watch_status(spec.remaining_cooldown_secs)),
        }
    }
}

/// Row for the notifier table
#[derive(Tabled)]
struct NotifierRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Channels")]
    channels: String,
    #[tabled(rename = "Indicators")]
    indicators: usize,
    #[tabled(rename = "Cooldown")]
    cooldown: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&Notifier> for NotifierRow {
    fn from(spec: &Notifier) -> Self {
        let channels: Vec<String> = spec
            .channels
            .iter()
            .map(|c| format!("{}:{}", c.kind, c.destination))
            .collect();
        Self {
            namespace: spec.namespace.clone(),
            kind: spec.kind.clone(),
            name: spec.name.clone(),
            channels: channels.join(", "),
            indicators: spec.indicators.len(),
            cooldown: format_cooldown(spec.remaining_cooldown_secs, spec.cooldown_duration_secs),
            status: color_status(watch_status(spec.remaining_cooldown_secs)),
        }
    }
}

/// Row for the indicator table of `describe`
#[derive(Tabled)]
struct IndicatorRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Above")]
    above: String,
    #[tabled(rename = "Below")]
    below: String,
}

impl From<&Indicator> for IndicatorRow {
    fn from(indicator: &Indicator) -> Self {
        let scope = |all: bool| if all { "all" } else { "one" };
        Self {
            metric: indicator.metric.clone(),
            above: format!(
                "> {} on {} for {:.0}%",
                format_threshold(&indicator.metric, indicator.above_threshold),
                scope(indicator.above_all_or_one),
                indicator.above_percentage_of_window * 100.0
            ),
            below: format!(
                "< {} on {} for {:.0}%",
                format_threshold(&indicator.metric, indicator.below_threshold),
                scope(indicator.below_all_or_one),
                indicator.below_percentage_of_window * 100.0
            ),
        }
    }
}

fn list_path(resource: WatchResource, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{}?namespace={}", resource.collection(), ns),
        None => resource.collection().to_string(),
    }
}

/// List registered watches, optionally filtered by namespace
pub async fn get_watches(
    client: &ApiClient,
    resource: WatchResource,
    namespace: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let path = list_path(resource, namespace.as_deref());

    match resource {
        WatchResource::Autoscaler => {
            let specs: Vec<AutoScaler> = client.get(&path).await?;
            let rows = specs.iter().map(AutoScalerRow::from).collect();
            print_list(&specs, rows, format);
        }
        WatchResource::Notifier => {
            let specs: Vec<Notifier> = client.get(&path).await?;
            let rows = specs.iter().map(NotifierRow::from).collect();
            print_list(&specs, rows, format);
        }
    }

    Ok(())
}

/// Show one watch in detail
pub async fn describe_watch(
    client: &ApiClient,
    resource: WatchResource,
    namespace: &str,
    kind: &str,
    name: &str,
    format: OutputFormat,
) -> Result<()> {
    let path = resource.item(namespace, kind, name);

    match resource {
        WatchResource::Autoscaler => {
            let spec: AutoScaler = client.get(&path).await?;
            if format == OutputFormat::Json {
                print_json(&spec);
                return Ok(());
            }
            print_list(&[&spec], vec![AutoScalerRow::from(&spec)], format);
            describe_target(&spec.cluster_endpoint);
            let rows: Vec<IndicatorRow> = spec.indicators.iter().map(IndicatorRow::from).collect();
            print_list(&spec.indicators, rows, format);
        }
        WatchResource::Notifier => {
            let spec: Notifier = client.get(&path).await?;
            if format == OutputFormat::Json {
                print_json(&spec);
                return Ok(());
            }
            print_list(&[&spec], vec![NotifierRow::from(&spec)], format);
            describe_target(&spec.cluster_endpoint);
            let rows: Vec<IndicatorRow> = spec.indicators.iter().map(IndicatorRow::from).collect();
            print_list(&spec.indicators, rows, format);
        }
    }

    Ok(())
}

fn describe_target(cluster_endpoint: &str) {
    if cluster_endpoint.is_empty() {
        print_info("Cluster: in-cluster");
    } else {
        print_info(&format!("Cluster: {}", cluster_endpoint));
    }
}

/// Submit a watch spec read from a JSON file
pub async fn apply_watch(
    client: &ApiClient,
    resource: WatchResource,
    file: &Path,
    format: OutputFormat,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let body: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let (key, active) = match resource {
        WatchResource::Autoscaler => {
            let spec: AutoScaler = client.put(resource.collection(), &body).await?;
            if format == OutputFormat::Json {
                print_json(&spec);
                return Ok(());
            }
            (format!("{}/{}/{}", spec.namespace, spec.kind, spec.name), spec.active)
        }
        WatchResource::Notifier => {
            let spec: Notifier = client.put(resource.collection(), &body).await?;
            if format == OutputFormat::Json {
                print_json(&spec);
                return Ok(());
            }
            (format!("{}/{}/{}", spec.namespace, spec.kind, spec.name), spec.active)
        }
    };

    if active {
        print_success(&format!("Applied {}", key));
    } else {
        print_success(&format!("Removed {} (spec is inactive)", key));
    }
    Ok(())
}

/// Disable a registered watch
pub async fn disable_watch(
    client: &ApiClient,
    resource: WatchResource,
    namespace: &str,
    kind: &str,
    name: &str,
) -> Result<()> {
    client.delete(&resource.item(namespace, kind, name)).await?;
    print_success(&format!("Disabled {}/{}/{}", namespace, kind, name));
    Ok(())
}
