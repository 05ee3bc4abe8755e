//! Flattens aggregation bucket trees into [`EntityRecord`]s.
//!
//! Buckets are decoded one at a time so that a single malformed bucket is
//! skipped with a warning instead of failing the whole batch. Only a
//! missing or empty aggregation root is fatal.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::model::{ChartSeries, EntityRecord};
use crate::query_builder::{DEVICE_AGG, DEVICE_FIELD, HOST_AGG, HOST_FIELD, TIME_FIELD};
use crate::response::{Hit, SearchHits, SearchResponse};

pub const DEFAULT_ROLE: &str = "other";
pub const DEFAULT_VENDOR: &str = "unknown";
pub const DEFAULT_HOST: &str = "unknown-ip";
pub const DEFAULT_DEVICE: &str = "unknown-device";
pub const DEFAULT_DETAIL_ROLE: &str = "unknown-role";

const VALUE_FIELD: &str = "value";
const VENDOR_FIELD: &str = "vendor";

// ------------------------------------------------------------------ //
//  Bucket shapes                                                      //
// ------------------------------------------------------------------ //

#[derive(Debug, Deserialize)]
struct BucketList {
    #[serde(default)]
    buckets: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct TopHitsResult {
    #[serde(default)]
    hits: SearchHits,
}

impl TopHitsResult {
    fn first(&self) -> Option<&Hit> {
        self.hits.hits.first()
    }
}

#[derive(Debug, Deserialize)]
struct DeviceBucket {
    #[serde(default)]
    latest_info: Option<TopHitsResult>,
    #[serde(default)]
    hostip_values: Option<BucketList>,
}

#[derive(Debug, Deserialize)]
struct HostBucket {
    #[serde(default)]
    key: Value,
    #[serde(default)]
    latest_info: Option<TopHitsResult>,
    #[serde(default)]
    all_values: Option<TopHitsResult>,
    #[serde(default)]
    time_series: Option<TopHitsResult>,
}

impl HostBucket {
    fn hostip(&self) -> String {
        match &self.key {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => DEFAULT_HOST.to_string(),
        }
    }
}

fn root_buckets(resp: &SearchResponse, name: &str) -> Result<Vec<Value>> {
    let root = resp
        .aggregation(name)
        .ok_or_else(|| PipelineError::data_shape(format!("aggregation {name} missing")))?;
    let list: BucketList = serde_json::from_value(root.clone())
        .map_err(|e| PipelineError::data_shape(format!("aggregation {name} unreadable: {e}")))?;
    if list.buckets.is_empty() {
        return Err(PipelineError::data_shape(format!("aggregation {name} is empty")));
    }
    Ok(list.buckets)
}

// ------------------------------------------------------------------ //
//  Sample coercion                                                    //
// ------------------------------------------------------------------ //

/// Numeric value of a sample. Anything that is not a finite number, or a
/// string holding one, counts as 0.
pub fn coerce_value(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Sample time in epoch seconds; `None` drops the sample.
pub fn sample_time(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}

fn sample_point(hit: &Hit, time_field: &str) -> Option<(i64, f64)> {
    let time = sample_time(hit.field(time_field))?;
    Some((time, coerce_value(hit.field(VALUE_FIELD))))
}

fn sorted_series(hits: &[Hit]) -> ChartSeries {
    let points = hits.iter().filter_map(|h| sample_point(h, TIME_FIELD));
    ChartSeries::from_unordered(points)
}

// ------------------------------------------------------------------ //
//  Flattening                                                         //
// ------------------------------------------------------------------ //

/// Device → host buckets of the grouped QPS query. Records come back sorted
/// by role, then device.
pub fn flatten_device_hosts(resp: &SearchResponse) -> Result<Vec<EntityRecord>> {
    let buckets = root_buckets(resp, DEVICE_AGG)?;
    let mut records = Vec::new();

    for (index, raw) in buckets.into_iter().enumerate() {
        let bucket: DeviceBucket = match serde_json::from_value(raw) {
            Ok(b) => b,
            Err(e) => {
                warn!(index, error = %e, "skipping malformed device bucket");
                continue;
            }
        };
        let Some(meta) = bucket.latest_info.as_ref().and_then(TopHitsResult::first) else {
            warn!(index, "device bucket has no latest sample, skipping");
            continue;
        };
        let Some(device) = meta.text(DEVICE_FIELD) else {
            warn!(index, "device bucket lacks {DEVICE_FIELD}, skipping");
            continue;
        };
        let role = match meta.field(DEVICE_FIELD) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => DEFAULT_ROLE.to_string(),
        };
        let vendor = meta.text(VENDOR_FIELD).unwrap_or_else(|| DEFAULT_VENDOR.to_string());

        let hosts = bucket.hostip_values.map(|l| l.buckets).unwrap_or_default();
        if hosts.is_empty() {
            records.push(EntityRecord {
                key: format!("device-{index}-{device}-default"),
                role,
                vendor,
                hostip: meta.text(HOST_FIELD).unwrap_or_else(|| DEFAULT_HOST.to_string()),
                device,
                chart: ChartSeries::new(),
            });
            continue;
        }

        for (host_index, raw_host) in hosts.into_iter().enumerate() {
            let host: HostBucket = match serde_json::from_value(raw_host) {
                Ok(h) => h,
                Err(e) => {
                    warn!(index, host_index, error = %e, "skipping malformed host bucket");
                    continue;
                }
            };
            let hostip = host.hostip();
            let chart = host
                .all_values
                .as_ref()
                .map(|tv| sorted_series(&tv.hits.hits))
                .unwrap_or_default();
            records.push(EntityRecord {
                key: format!("device-{index}-{device}-{hostip}-{host_index}"),
                role: role.clone(),
                vendor: vendor.clone(),
                device: device.clone(),
                hostip,
                chart,
            });
        }
    }

    records.sort_by(|a, b| a.role.cmp(&b.role).then_with(|| a.device.cmp(&b.device)));
    debug!(records = records.len(), "flattened device/host buckets");
    Ok(records)
}

/// Host buckets of the role-detail query, sorted by host address.
pub fn flatten_hosts(resp: &SearchResponse) -> Result<Vec<EntityRecord>> {
    let buckets = root_buckets(resp, HOST_AGG)?;
    let mut records = Vec::new();

    for (index, raw) in buckets.into_iter().enumerate() {
        let bucket: HostBucket = match serde_json::from_value(raw) {
            Ok(b) => b,
            Err(e) => {
                warn!(index, error = %e, "skipping malformed host bucket");
                continue;
            }
        };
        let Some(series) = bucket.time_series.as_ref() else {
            warn!(index, "host bucket has no time series, skipping");
            continue;
        };

        let hostip = bucket.hostip();
        let meta = bucket.latest_info.as_ref().and_then(TopHitsResult::first);
        let text = |field: &str| meta.and_then(|m| m.text(field));

        records.push(EntityRecord {
            key: format!("hostip-{index}-{hostip}"),
            vendor: text(VENDOR_FIELD).unwrap_or_else(|| DEFAULT_VENDOR.to_string()),
            device: text(DEVICE_FIELD).unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            role: text(DEVICE_FIELD).unwrap_or_else(|| DEFAULT_DETAIL_ROLE.to_string()),
            chart: sorted_series(&series.hits.hits),
            hostip,
        });
    }

    records.sort_by(|a, b| a.hostip.cmp(&b.hostip));
    Ok(records)
}

/// Samples of a flat hit list in the order the engine returned them.
pub fn flat_series(resp: &SearchResponse, time_field: &str) -> ChartSeries {
    ChartSeries::from_ordered(resp.hit_list().iter().filter_map(|h| sample_point(h, time_field)))
}
