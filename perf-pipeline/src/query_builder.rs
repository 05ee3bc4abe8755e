//! Turns a query intent into a concrete [`DslQuery`].
//!
//! Every build starts from a clone of the family's template, so templates
//! are never mutated. Slots the builder must write into are checked first;
//! a missing slot means the deployed template is wrong and surfaces as a
//! configuration error.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::dsl::{
    sort_by, Aggregation, Clause, Direction, DslQuery, RangeBounds, SourceFilter, TermsAgg,
};
use crate::error::{PipelineError, Result};
use crate::templates::{QueryTemplates, TemplateFamily};
use crate::time_params::TimeRange;

// ------------------------------------------------------------------ //
//  Field and aggregation names                                        //
// ------------------------------------------------------------------ //

pub const TIME_FIELD: &str = "clock";
pub const DEVICE_FIELD: &str = "appcode";
pub const HOST_FIELD: &str = "hostip";
pub const METRIC_FIELD: &str = "kpiname";
pub const PERF_SOURCE_FIELD: &str = "source";
pub const PERF_HOST_FIELD: &str = "ip_addr";
pub const PERF_ITEM_FIELD: &str = "itemid";
pub const PERF_DEFAULT_SORT_FIELD: &str = "clock_time";

pub const DEVICE_AGG: &str = "group_by_device";
pub const HOST_VALUES_AGG: &str = "hostip_values";
pub const ALL_VALUES_AGG: &str = "all_values";
pub const DEVICE_COUNT_AGG: &str = "device_count";
pub const HOST_AGG: &str = "group_by_hostip";
pub const LATEST_INFO_AGG: &str = "latest_info";
pub const TIME_SERIES_AGG: &str = "time_series";

/// Samples kept per host bucket in the aggregated families.
pub const SAMPLES_PER_BUCKET: u64 = 100;
const DEVICE_BUCKETS: u64 = 10_000;
const HOST_BUCKETS: u64 = 1_000;

/// Document fields returned by the metadata and sample sub-aggregations.
pub const METADATA_FIELDS: [&str; 13] = [
    "agent",
    "appname",
    "appcode",
    "@version",
    "branchnamecn",
    "hostname",
    "hostip",
    "bizarea",
    "vendor",
    "component",
    "clock",
    "value",
    "@timestamp",
];

// ------------------------------------------------------------------ //
//  Intent types                                                       //
// ------------------------------------------------------------------ //

/// Field name → required value. Blank values are never stored, so every
/// entry turns into a clause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    fields: BTreeMap<String, String>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `field = value` when `value` is present and not blank.
    pub fn with(mut self, field: &str, value: Option<&str>) -> Self {
        if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.fields.insert(field.to_string(), v.to_string());
        }
        self
    }

    /// Entries in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Requested page. `current == 0` asks for the total only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub current: u64,
    pub page_size: u64,
}

impl PageRequest {
    pub fn new(current: u64, page_size: u64) -> Self {
        Self { current, page_size }
    }

    pub fn totals_only(page_size: u64) -> Self {
        Self::new(0, page_size)
    }

    pub fn is_totals_only(&self) -> bool {
        self.current == 0
    }

    /// `(from, size)`: `from = max(0, (current-1) * page_size)`,
    /// `size = max(1, page_size)`.
    pub fn window(&self) -> (u64, u64) {
        let from = self.current.saturating_sub(1).saturating_mul(self.page_size);
        (from, self.page_size.max(1))
    }
}

/// Caller-chosen sort for the host-performance family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortRequest {
    pub field: String,
    pub order: Direction,
}

impl SortRequest {
    /// Both parts must be present and the order recognisable; otherwise
    /// the family default applies.
    pub fn parse(field: Option<&str>, order: Option<&str>) -> Option<Self> {
        let field = field.map(str::trim).filter(|f| !f.is_empty())?;
        let order = Direction::parse(order?)?;
        Some(Self {
            field: field.to_string(),
            order,
        })
    }
}

// ------------------------------------------------------------------ //
//  QueryBuilder                                                       //
// ------------------------------------------------------------------ //

pub struct QueryBuilder {
    templates: QueryTemplates,
    metric_name: String,
}

impl QueryBuilder {
    pub fn new(templates: QueryTemplates, metric_name: impl Into<String>) -> Self {
        Self {
            templates,
            metric_name: metric_name.into(),
        }
    }

    pub fn templates(&self) -> &QueryTemplates {
        &self.templates
    }

    /// Build every family once so a template missing a slot fails at
    /// startup rather than on the first request.
    pub fn check(&self) -> Result<()> {
        let range = TimeRange::new(0, 1, 1)?;
        self.grouped_qps(&range, &[])?;
        self.role_detail(&range, None)?;
        self.host_detail(&range, "", "", PageRequest::new(1, 1))?;
        self.host_perf_curve(&range, &QueryFilter::new(), None, PageRequest::new(1, 1))?;
        Ok(())
    }

    /// Device → host QPS overview. `hosts` restricts the search to an
    /// allow-list when non-empty.
    pub fn grouped_qps(&self, range: &TimeRange, hosts: &[String]) -> Result<DslQuery> {
        let family = TemplateFamily::GroupedQps;
        let mut query = self.templates.get(family).clone();

        let must = &mut query.query.bool.must;
        fill_time_slot(must, family, range.start(), range.end())?;
        set_term(must, METRIC_FIELD, Some(&self.metric_name));
        set_terms(must, HOST_FIELD, hosts);

        let device = root_agg(&mut query.aggs, family, DEVICE_AGG)?;
        let terms = terms_slot(device, family, DEVICE_AGG)?;
        terms.field = DEVICE_FIELD.to_string();
        terms.size = DEVICE_BUCKETS;

        include_metadata(sub_agg(device, family, LATEST_INFO_AGG)?, family, None)?;

        let hosts_agg = sub_agg(device, family, HOST_VALUES_AGG)?;
        let terms = terms_slot(hosts_agg, family, HOST_VALUES_AGG)?;
        terms.field = HOST_FIELD.to_string();
        terms.size = HOST_BUCKETS;
        let all_values = sub_agg(hosts_agg, family, ALL_VALUES_AGG)?;
        include_metadata(all_values, family, Some(SAMPLES_PER_BUCKET))?;

        let count = sub_agg(device, family, DEVICE_COUNT_AGG)?;
        let cardinality = count.cardinality.as_mut().ok_or_else(|| {
            PipelineError::configuration(format!(
                "{family}: {DEVICE_COUNT_AGG} is not a cardinality aggregation"
            ))
        })?;
        cardinality.field = HOST_FIELD.to_string();

        Ok(query)
    }

    /// All hosts of one role, bucketed by host.
    pub fn role_detail(&self, range: &TimeRange, role: Option<&str>) -> Result<DslQuery> {
        let family = TemplateFamily::RoleDetail;
        let mut query = self.templates.get(family).clone();

        let must = &mut query.query.bool.must;
        fill_time_slot(must, family, range.start(), range.end())?;
        set_term(must, DEVICE_FIELD, role);
        set_term(must, METRIC_FIELD, Some(&self.metric_name));

        let host = root_agg(&mut query.aggs, family, HOST_AGG)?;
        include_metadata(sub_agg(host, family, LATEST_INFO_AGG)?, family, None)?;
        let series = sub_agg(host, family, TIME_SERIES_AGG)?;
        include_metadata(series, family, Some(SAMPLES_PER_BUCKET))?;

        Ok(query)
    }

    /// Raw samples of one host in one role, one page at a time.
    pub fn host_detail(
        &self,
        range: &TimeRange,
        hostip: &str,
        role: &str,
        page: PageRequest,
    ) -> Result<DslQuery> {
        let family = TemplateFamily::HostDetail;
        let mut query = self.templates.get(family).clone();

        let must = &mut query.query.bool.must;
        fill_time_slot(must, family, range.start(), range.end())?;
        set_term(must, HOST_FIELD, Some(hostip));
        set_term(must, DEVICE_FIELD, Some(role));
        set_term(must, METRIC_FIELD, Some(&self.metric_name));

        if page.is_totals_only() {
            query.from = Some(0);
            query.size = Some(0);
        } else {
            let (from, size) = page.window();
            query.from = Some(from);
            query.size = Some(size);
        }

        Ok(query)
    }

    /// Host performance samples around an alert. The time clause is in
    /// milliseconds for this index family.
    pub fn host_perf_curve(
        &self,
        range: &TimeRange,
        filter: &QueryFilter,
        sort: Option<&SortRequest>,
        page: PageRequest,
    ) -> Result<DslQuery> {
        let mut query = self.templates.get(TemplateFamily::HostPerfCurve).clone();

        let must = &mut query.query.bool.must;
        must.retain(|c| !c.is_range_on(TIME_FIELD));
        must.push(Clause::range(TIME_FIELD, range.start_millis(), range.end_millis()));
        for (field, value) in filter.iter() {
            set_term(must, field, Some(value));
        }

        query.sort = vec![match sort {
            Some(s) => sort_by(&s.field, s.order),
            None => sort_by(PERF_DEFAULT_SORT_FIELD, Direction::Asc),
        }];

        let (from, size) = page.window();
        query.from = Some(from);
        query.size = Some(size);

        Ok(query)
    }
}

// ------------------------------------------------------------------ //
//  Slot helpers                                                       //
// ------------------------------------------------------------------ //

/// The first `must` clause has to be a range on the time field.
fn fill_time_slot(
    must: &mut [Clause],
    family: TemplateFamily,
    gte: i64,
    lte: i64,
) -> Result<()> {
    match must.first_mut() {
        Some(Clause::Range(fields)) if fields.contains_key(TIME_FIELD) => {
            fields.insert(
                TIME_FIELD.to_string(),
                RangeBounds {
                    gte: Some(gte),
                    lte: Some(lte),
                },
            );
            Ok(())
        }
        _ => Err(PipelineError::configuration(format!(
            "{family}: first must clause is not a range on {TIME_FIELD}"
        ))),
    }
}

/// Set the `term` clause on `field`, or drop it when there is no value.
fn set_term(must: &mut Vec<Clause>, field: &str, value: Option<&str>) {
    let value = value.map(str::trim).filter(|v| !v.is_empty());
    let existing = must.iter().position(|c| c.is_term_on(field));
    match (existing, value) {
        (Some(i), Some(v)) => must[i] = Clause::term(field, v),
        (Some(i), None) => {
            must.remove(i);
        }
        (None, Some(v)) => must.push(Clause::term(field, v)),
        (None, None) => {}
    }
}

/// Set the `terms` clause on `field`, or drop it when `values` is empty.
fn set_terms(must: &mut Vec<Clause>, field: &str, values: &[String]) {
    let values: Vec<Value> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(Value::from)
        .collect();
    let existing = must.iter().position(|c| c.is_terms_on(field));
    match (existing, values.is_empty()) {
        (Some(i), false) => must[i] = Clause::terms(field, values),
        (Some(i), true) => {
            must.remove(i);
        }
        (None, false) => must.push(Clause::terms(field, values)),
        (None, true) => {}
    }
}

fn root_agg<'a>(
    aggs: &'a mut BTreeMap<String, Aggregation>,
    family: TemplateFamily,
    name: &str,
) -> Result<&'a mut Aggregation> {
    aggs.get_mut(name).ok_or_else(|| {
        PipelineError::configuration(format!("{family}: missing root aggregation {name}"))
    })
}

fn sub_agg<'a>(
    parent: &'a mut Aggregation,
    family: TemplateFamily,
    name: &str,
) -> Result<&'a mut Aggregation> {
    parent.sub_mut(name).ok_or_else(|| {
        PipelineError::configuration(format!("{family}: missing sub-aggregation {name}"))
    })
}

fn terms_slot<'a>(
    agg: &'a mut Aggregation,
    family: TemplateFamily,
    name: &str,
) -> Result<&'a mut TermsAgg> {
    agg.terms.as_mut().ok_or_else(|| {
        PipelineError::configuration(format!("{family}: {name} is not a terms aggregation"))
    })
}

/// Restrict a `top_hits` slot to the metadata fields, optionally resizing it.
fn include_metadata(
    agg: &mut Aggregation,
    family: TemplateFamily,
    size: Option<u64>,
) -> Result<()> {
    let top_hits = agg.top_hits.as_mut().ok_or_else(|| {
        PipelineError::configuration(format!("{family}: sample slot is not a top_hits aggregation"))
    })?;
    top_hits.source = Some(SourceFilter {
        includes: METADATA_FIELDS.iter().map(|f| f.to_string()).collect(),
    });
    if let Some(size) = size {
        top_hits.size = size;
    }
    Ok(())
}
