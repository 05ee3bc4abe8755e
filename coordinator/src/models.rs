//! HTTP request models for the coordinator's public REST API.
//!
//! Bodies are deliberately lenient: every field is optional here and the
//! pipeline reports which required one is missing.

use perf_pipeline::service::{HostPageRequest, HostPerfRequest, OverviewRequest, RoleDetailRequest};
use perf_pipeline::time_params::TimestampParam;
use serde::{Deserialize, Serialize};

/// A value the dashboard may send either quoted or bare.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TextOrNumber {
    Number(i64),
    Text(String),
}

impl TextOrNumber {
    pub fn into_text(self) -> String {
        match self {
            TextOrNumber::Number(n) => n.to_string(),
            TextOrNumber::Text(s) => s,
        }
    }
}

// ------------------------------------------------------------------ //
//  POST /qps/overview                                                 //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OverviewBody {
    #[serde(default)]
    pub start_time: Option<TimestampParam>,
    #[serde(default)]
    pub end_time: Option<TimestampParam>,
    #[serde(default)]
    pub date: Option<TimestampParam>,
}

impl From<OverviewBody> for OverviewRequest {
    fn from(b: OverviewBody) -> Self {
        OverviewRequest {
            start_time: b.start_time,
            end_time: b.end_time,
            date: b.date,
        }
    }
}

// ------------------------------------------------------------------ //
//  POST /qps/roles                                                    //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoleDetailBody {
    /// Role (device application) code.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub start_time: Option<TimestampParam>,
    #[serde(default)]
    pub end_time: Option<TimestampParam>,
}

impl From<RoleDetailBody> for RoleDetailRequest {
    fn from(b: RoleDetailBody) -> Self {
        RoleDetailRequest {
            role: b.role,
            start_time: b.start_time,
            end_time: b.end_time,
        }
    }
}

// ------------------------------------------------------------------ //
//  POST /qps/roles/hosts/page                                         //
// ------------------------------------------------------------------ //

/// One page of a host's samples. `current: 0` only refreshes the total.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HostPageBody {
    #[serde(default)]
    pub hostip: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub start_time: Option<TimestampParam>,
    #[serde(default)]
    pub end_time: Option<TimestampParam>,
    #[serde(default)]
    pub current: Option<u64>,
    #[serde(default)]
    pub page_size: Option<u64>,
}

impl From<HostPageBody> for HostPageRequest {
    fn from(b: HostPageBody) -> Self {
        HostPageRequest {
            hostip: b.hostip,
            role: b.role,
            start_time: b.start_time,
            end_time: b.end_time,
            current: b.current,
            page_size: b.page_size,
        }
    }
}

// ------------------------------------------------------------------ //
//  POST /perf/host                                                    //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HostPerfBody {
    /// Alert occurrence time.
    #[serde(default, alias = "FirstOccurrence")]
    pub first_occurrence: Option<TimestampParam>,
    #[serde(default)]
    pub itemid: Option<TextOrNumber>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub ip_addr: Option<String>,
    /// Seconds either side of the occurrence.
    #[serde(default)]
    pub range: Option<i64>,
    #[serde(default)]
    pub start_time: Option<TimestampParam>,
    #[serde(default)]
    pub end_time: Option<TimestampParam>,
    #[serde(default)]
    pub use_direct_time_range: bool,
    #[serde(default)]
    pub current: Option<u64>,
    #[serde(default)]
    pub page_size: Option<u64>,
    #[serde(default)]
    pub sort_field: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
    #[serde(default)]
    pub prefer_table: bool,
}

impl From<HostPerfBody> for HostPerfRequest {
    fn from(b: HostPerfBody) -> Self {
        HostPerfRequest {
            first_occurrence: b.first_occurrence,
            itemid: b.itemid.map(TextOrNumber::into_text),
            source: b.source,
            ip_addr: b.ip_addr,
            range: b.range,
            start_time: b.start_time,
            end_time: b.end_time,
            use_direct_time_range: b.use_direct_time_range,
            current: b.current,
            page_size: b.page_size,
            sort_field: b.sort_field,
            sort_order: b.sort_order,
            prefer_table: b.prefer_table,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn perf_body_accepts_dashboard_spelling() {
        let body: HostPerfBody = serde_json::from_value(json!({
            "FirstOccurrence": "1700000000000",
            "itemid": 4711,
            "range": 1800
        }))
        .unwrap();
        let req = HostPerfRequest::from(body);
        assert_eq!(req.itemid.as_deref(), Some("4711"));
        assert_eq!(
            req.first_occurrence,
            Some(TimestampParam::Text("1700000000000".into()))
        );
        assert_eq!(req.range, Some(1800));
        assert!(!req.use_direct_time_range);
    }

    #[test]
    fn empty_overview_body_is_valid() {
        let body: OverviewBody = serde_json::from_value(json!({})).unwrap();
        let req = OverviewRequest::from(body);
        assert!(req.start_time.is_none() && req.date.is_none());
    }
}
