//! DashboardService: drives the three query cycles.
//!
//! Every cycle follows the same path: validate input, resolve shards, build
//! the query, execute it, then flatten or accumulate the result.
//!
//! Role detail state lives in one session per `(role, range)` scope, each
//! with its own per-host [`AccumulatorTable`], so callers browsing different
//! roles never disturb each other. At most [`MAX_ROLE_SESSIONS`] are kept;
//! the least recently used one is evicted first. The session lock is held
//! only to issue a ticket or merge a page, never across a search.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::accumulator::{AccumulatorTable, EntityState, FetchedPage, MergeOutcome};
use crate::aggregator::{flat_series, flatten_device_hosts, flatten_hosts};
use crate::dsl::DslQuery;
use crate::error::{Result, ValidationError};
use crate::executor::SearchExecutor;
use crate::index_resolver::{Granularity, IndexResolver};
use crate::model::{EntityRecord, PaginationState};
use crate::query_builder::{
    PageRequest, QueryBuilder, QueryFilter, SortRequest, PERF_HOST_FIELD, PERF_ITEM_FIELD,
    PERF_SOURCE_FIELD, TIME_FIELD,
};
use crate::response::SearchResponse;
use crate::settings::Settings;
use crate::templates::QueryTemplates;
use crate::time_params::{now_secs, require_secs, TimeRange, TimestampParam};
use crate::view_mode::{self, ViewMode};

pub const OVERVIEW_WINDOW_SECS: i64 = 3600;
pub const DATED_OVERVIEW_WINDOW_SECS: i64 = 6 * 3600;
pub const ROLE_DETAIL_WINDOW_SECS: i64 = 6 * 3600;
pub const HOST_PERF_RANGE_SECS: i64 = 900;
pub const CHART_PAGE_SIZE: u64 = 100;
pub const TABLE_PAGE_SIZE: u64 = 10;
pub const MAX_ROLE_SESSIONS: usize = 32;

// ------------------------------------------------------------------ //
//  Requests                                                           //
// ------------------------------------------------------------------ //

/// Input of [`DashboardService::qps_overview`]. Without times the last hour
/// is queried.
#[derive(Debug, Clone, Default)]
pub struct OverviewRequest {
    pub start_time: Option<TimestampParam>,
    pub end_time: Option<TimestampParam>,
    /// End of a six-hour window; used when no explicit range is given.
    pub date: Option<TimestampParam>,
}

/// Input of [`DashboardService::role_detail`]. Without times the last six
/// hours are queried.
#[derive(Debug, Clone, Default)]
pub struct RoleDetailRequest {
    pub role: Option<String>,
    pub start_time: Option<TimestampParam>,
    pub end_time: Option<TimestampParam>,
}

/// Input of [`DashboardService::load_host_page`]. `current: 0` asks for the
/// total only; a missing `page_size` uses the configured role page size.
#[derive(Debug, Clone, Default)]
pub struct HostPageRequest {
    pub hostip: Option<String>,
    pub role: Option<String>,
    pub start_time: Option<TimestampParam>,
    pub end_time: Option<TimestampParam>,
    pub current: Option<u64>,
    pub page_size: Option<u64>,
}

/// Input of [`DashboardService::host_perf`].
#[derive(Debug, Clone, Default)]
pub struct HostPerfRequest {
    pub first_occurrence: Option<TimestampParam>,
    pub itemid: Option<String>,
    pub source: Option<String>,
    pub ip_addr: Option<String>,
    /// Half-width of the window around the occurrence, in seconds.
    pub range: Option<i64>,
    pub start_time: Option<TimestampParam>,
    pub end_time: Option<TimestampParam>,
    /// Query `start_time..end_time` instead of the window around the
    /// occurrence.
    pub use_direct_time_range: bool,
    pub current: Option<u64>,
    pub page_size: Option<u64>,
    pub sort_field: Option<String>,
    pub sort_order: Option<String>,
    /// The caller is showing a table; selects the table page size default.
    pub prefer_table: bool,
}

// ------------------------------------------------------------------ //
//  Results                                                            //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, Serialize)]
pub struct QpsOverview {
    pub range: TimeRange,
    pub shards: Vec<String>,
    pub records: Vec<EntityRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostFailure {
    pub hostip: String,
    pub error: String,
}

/// Outcome of hydrating the first page of every host in a role.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HydrationReport {
    pub hydrated: Vec<String>,
    pub failed: Vec<HostFailure>,
    /// A newer query took over the session before hydration finished.
    pub superseded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostDetail {
    pub key: String,
    pub hostip: String,
    pub role: String,
    pub vendor: String,
    pub device: String,
    #[serde(flatten)]
    pub state: EntityState,
    pub fully_loaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleDetailView {
    pub role: String,
    pub range: TimeRange,
    pub hosts: Vec<HostDetail>,
    pub hydration: HydrationReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostPageView {
    pub hostip: String,
    /// True only when `outcome` is `applied`.
    pub applied: bool,
    pub outcome: MergeOutcome,
    pub state: Option<EntityState>,
    pub fully_loaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostPerfView {
    pub range: TimeRange,
    pub shards: Vec<String>,
    pub page_size: u64,
    pub view: ViewMode,
}

// ------------------------------------------------------------------ //
//  Role session                                                       //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RoleScope {
    role: String,
    range: TimeRange,
}

/// Per-host series of one scope.
#[derive(Debug)]
struct RoleSession {
    /// Unique across the process; a recreated session never reuses an id.
    id: u64,
    generation: u64,
    last_used: u64,
    table: AccumulatorTable,
}

#[derive(Debug, Default)]
struct RoleSessions {
    sessions: HashMap<RoleScope, RoleSession>,
    clock: u64,
}

impl RoleSessions {
    /// The session for `scope`, created when absent.
    fn enter(&mut self, scope: &RoleScope) -> &mut RoleSession {
        self.clock += 1;
        let clock = self.clock;
        if !self.sessions.contains_key(scope) && self.sessions.len() >= MAX_ROLE_SESSIONS {
            self.evict_oldest();
        }
        let session = self
            .sessions
            .entry(scope.clone())
            .or_insert_with(|| RoleSession {
                id: clock,
                generation: 0,
                last_used: clock,
                table: AccumulatorTable::new(),
            });
        session.last_used = clock;
        session
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|(_, s)| s.last_used)
            .map(|(scope, _)| scope.clone());
        if let Some(scope) = oldest {
            debug!(role = %scope.role, "evicting role session");
            self.sessions.remove(&scope);
        }
    }

    fn get(&self, scope: &RoleScope) -> Option<&RoleSession> {
        self.sessions.get(scope)
    }

    /// The session for `scope` if it is still session `id`.
    fn live_mut(&mut self, scope: &RoleScope, id: u64) -> Option<&mut RoleSession> {
        self.sessions.get_mut(scope).filter(|s| s.id == id)
    }
}

fn host_detail(
    table: Option<&AccumulatorTable>,
    record: &EntityRecord,
    page_size: u64,
) -> HostDetail {
    let state = table
        .and_then(|t| t.get(&record.hostip))
        .cloned()
        .unwrap_or_else(|| EntityState {
            series: record.chart.clone(),
            pagination: PaginationState::unprobed(page_size),
        });
    HostDetail {
        key: record.key.clone(),
        hostip: record.hostip.clone(),
        role: record.role.clone(),
        vendor: record.vendor.clone(),
        device: record.device.clone(),
        fully_loaded: state.pagination.is_fully_loaded(),
        state,
    }
}

// ------------------------------------------------------------------ //
//  DashboardService                                                   //
// ------------------------------------------------------------------ //

/// Runs the dashboard's query cycles against one search executor.
pub struct DashboardService {
    executor: Arc<dyn SearchExecutor>,
    builder: QueryBuilder,
    resolver: IndexResolver,
    granularity: Granularity,
    qps_prefix: String,
    host_perf_prefix: String,
    qps_hosts: Vec<String>,
    role_page_size: u64,
    role_span_max_days: i64,
    sessions: Mutex<RoleSessions>,
}

impl DashboardService {
    /// Build from settings, loading template overrides if configured. A
    /// template missing a required slot is a configuration error here.
    pub fn new(settings: &Settings, executor: Arc<dyn SearchExecutor>) -> Result<Self> {
        let templates = QueryTemplates::load(settings.templates_dir.as_deref())?;
        let builder = QueryBuilder::new(templates, settings.metric_name.clone());
        builder.check()?;
        Ok(Self {
            executor,
            builder,
            resolver: settings.index_resolver(),
            granularity: settings.index_granularity.clone(),
            qps_prefix: settings.qps_index_prefix.clone(),
            host_perf_prefix: settings.host_perf_index_prefix.clone(),
            qps_hosts: settings.qps_hosts.clone(),
            role_page_size: settings.role_page_size.max(1),
            role_span_max_days: settings.role_span_max_days,
            sessions: Mutex::new(RoleSessions::default()),
        })
    }

    fn qps_shards(&self, range: &TimeRange) -> Vec<String> {
        self.resolver.resolve(
            range.start_millis(),
            range.end_millis(),
            &self.qps_prefix,
            &self.granularity,
        )
    }

    async fn search(&self, shards: &[String], query: &DslQuery) -> Result<SearchResponse> {
        let body = self.executor.search(shards, query).await?;
        SearchResponse::from_json(body)
    }

    // -------------------------------------------------------------- //
    //  QPS overview                                                  //
    // -------------------------------------------------------------- //

    /// Device → host QPS records for the requested window.
    pub async fn qps_overview(&self, req: &OverviewRequest) -> Result<QpsOverview> {
        let range = overview_range(req, now_secs())?;
        let query = self.builder.grouped_qps(&range, &self.qps_hosts)?;
        let shards = self.qps_shards(&range);

        let resp = self.search(&shards, &query).await?;
        let records = flatten_device_hosts(&resp)?;

        info!(
            start = range.start(),
            end = range.end(),
            shards = shards.len(),
            records = records.len(),
            "qps overview"
        );
        Ok(QpsOverview {
            range,
            shards,
            records,
        })
    }

    // -------------------------------------------------------------- //
    //  Role detail                                                   //
    // -------------------------------------------------------------- //

    /// Query all hosts of a role, then hydrate the first page of each host
    /// one after another.
    pub async fn role_detail(&self, req: &RoleDetailRequest) -> Result<RoleDetailView> {
        let role = required(req.role.as_deref()).ok_or(ValidationError::MissingRole)?;
        let now = now_secs();
        let range = match (&req.start_time, &req.end_time) {
            (Some(start), Some(end)) => TimeRange::with_max_span(
                start.to_epoch_secs("start_time")?,
                end.to_epoch_secs("end_time")?,
                now,
                self.role_span_max_days,
            )?,
            _ => TimeRange::trailing(now, ROLE_DETAIL_WINDOW_SECS, now)?,
        };
        let scope = RoleScope {
            role: role.to_string(),
            range,
        };

        let (session_id, generation) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.enter(&scope);
            session.generation += 1;
            (session.id, session.generation)
        };

        let query = self.builder.role_detail(&range, Some(role))?;
        let resp = self.search(&self.qps_shards(&range), &query).await?;
        let records = flatten_hosts(&resp)?;

        let mut hydration = HydrationReport::default();
        {
            let mut sessions = self.sessions.lock().await;
            match sessions
                .live_mut(&scope, session_id)
                .filter(|s| s.generation == generation)
            {
                Some(session) => {
                    session.table.clear();
                    for record in &records {
                        session
                            .table
                            .seed(&record.hostip, record.chart.clone(), self.role_page_size);
                    }
                }
                None => hydration.superseded = true,
            }
        }

        if !hydration.superseded {
            for record in &records {
                let still_current = self
                    .sessions
                    .lock()
                    .await
                    .live_mut(&scope, session_id)
                    .is_some_and(|s| s.generation == generation);
                if !still_current {
                    hydration.superseded = true;
                    break;
                }

                let page = PageRequest::new(1, self.role_page_size);
                match self.fetch_host_page(&scope, &record.hostip, page).await {
                    Ok((id, MergeOutcome::Applied)) if id == session_id => {
                        hydration.hydrated.push(record.hostip.clone())
                    }
                    Ok(_) => {
                        hydration.superseded = true;
                        break;
                    }
                    Err(e) => {
                        warn!(hostip = %record.hostip, error = %e, "host hydration failed");
                        hydration.failed.push(HostFailure {
                            hostip: record.hostip.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            role,
            hosts = records.len(),
            hydrated = hydration.hydrated.len(),
            failed = hydration.failed.len(),
            "role detail"
        );

        let sessions = self.sessions.lock().await;
        let table = sessions
            .get(&scope)
            .filter(|s| s.id == session_id)
            .map(|s| &s.table);
        let hosts = records
            .iter()
            .map(|r| host_detail(table, r, self.role_page_size))
            .collect();
        Ok(RoleDetailView {
            role: role.to_string(),
            range,
            hosts,
            hydration,
        })
    }

    /// Fetch one page (or the total) of a host and merge it into its scope's
    /// table. Other scopes are left untouched.
    pub async fn load_host_page(&self, req: &HostPageRequest) -> Result<HostPageView> {
        let hostip =
            required(req.hostip.as_deref()).ok_or(ValidationError::MissingHostAddress)?;
        let role = required(req.role.as_deref()).ok_or(ValidationError::MissingRole)?;
        let range = TimeRange::with_max_span(
            require_secs(req.start_time.as_ref(), "start_time")?,
            require_secs(req.end_time.as_ref(), "end_time")?,
            now_secs(),
            self.role_span_max_days,
        )?;
        let page_size = req.page_size.unwrap_or(self.role_page_size);
        if page_size == 0 {
            return Err(ValidationError::InvalidPageSize.into());
        }
        let page = PageRequest::new(req.current.unwrap_or(1), page_size);

        let scope = RoleScope {
            role: role.to_string(),
            range,
        };

        let (session_id, outcome) = self.fetch_host_page(&scope, hostip, page).await?;

        let sessions = self.sessions.lock().await;
        let table = sessions
            .get(&scope)
            .filter(|s| s.id == session_id)
            .map(|s| &s.table);
        Ok(HostPageView {
            hostip: hostip.to_string(),
            applied: outcome == MergeOutcome::Applied,
            outcome,
            fully_loaded: table.is_some_and(|t| t.is_fully_loaded(hostip)),
            state: table.and_then(|t| t.get(hostip)).cloned(),
        })
    }

    /// Returns the id of the session the page was merged into with the
    /// merge outcome. A session evicted mid-fetch makes the page stale.
    async fn fetch_host_page(
        &self,
        scope: &RoleScope,
        hostip: &str,
        page: PageRequest,
    ) -> Result<(u64, MergeOutcome)> {
        let (session_id, ticket) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.enter(scope);
            (session.id, session.table.begin_request(hostip))
        };

        let query = self
            .builder
            .host_detail(&scope.range, hostip, &scope.role, page)?;
        let resp = self.search(&self.qps_shards(&scope.range), &query).await?;

        let fetched = if page.is_totals_only() {
            FetchedPage::TotalsOnly {
                total: resp.total(),
            }
        } else {
            FetchedPage::Page {
                current: page.current,
                page_size: page.page_size,
                total: resp.total(),
                series: flat_series(&resp, TIME_FIELD),
            }
        };

        let outcome = match self.sessions.lock().await.live_mut(scope, session_id) {
            Some(session) => session.table.merge(&ticket, fetched),
            None => MergeOutcome::Stale,
        };
        debug!(hostip, current = page.current, ?outcome, "host page merged");
        Ok((session_id, outcome))
    }

    // -------------------------------------------------------------- //
    //  Host performance                                              //
    // -------------------------------------------------------------- //

    /// Samples of one monitored item around an alert, as a chart or a table
    /// depending on the declared result type.
    pub async fn host_perf(&self, req: &HostPerfRequest) -> Result<HostPerfView> {
        let occurrence = req
            .first_occurrence
            .as_ref()
            .ok_or(ValidationError::MissingOccurrenceTime)?
            .to_epoch_secs("first_occurrence")?;
        let itemid = required(req.itemid.as_deref()).ok_or(ValidationError::MissingItemId)?;
        if occurrence <= 0 {
            return Err(ValidationError::MalformedTimestamp {
                field: "first_occurrence",
                value: occurrence.to_string(),
            }
            .into());
        }

        let now = now_secs();
        let range = if req.use_direct_time_range {
            TimeRange::new(
                require_secs(req.start_time.as_ref(), "start_time")?,
                require_secs(req.end_time.as_ref(), "end_time")?,
                now,
            )?
        } else {
            let half = req.range.filter(|r| *r > 0).unwrap_or(HOST_PERF_RANGE_SECS);
            TimeRange::around(occurrence, half, now)?
        };

        let default_size = if req.prefer_table {
            TABLE_PAGE_SIZE
        } else {
            CHART_PAGE_SIZE
        };
        let page_size = req.page_size.unwrap_or(default_size);
        if page_size == 0 {
            return Err(ValidationError::InvalidPageSize.into());
        }
        let current = req.current.unwrap_or(1).max(1);

        let filter = QueryFilter::new()
            .with(PERF_SOURCE_FIELD, req.source.as_deref())
            .with(PERF_HOST_FIELD, req.ip_addr.as_deref())
            .with(PERF_ITEM_FIELD, Some(itemid));
        let sort = SortRequest::parse(req.sort_field.as_deref(), req.sort_order.as_deref());
        let query = self.builder.host_perf_curve(
            &range,
            &filter,
            sort.as_ref(),
            PageRequest::new(current, page_size),
        )?;
        let shards = self.resolver.resolve(
            range.start_millis(),
            range.end_millis(),
            &self.host_perf_prefix,
            &self.granularity,
        );

        let resp = self.search(&shards, &query).await?;
        let view = view_mode::select(&resp, current)?;

        info!(
            itemid,
            start = range.start(),
            end = range.end(),
            chart = view.is_chart(),
            "host performance"
        );
        Ok(HostPerfView {
            range,
            shards,
            page_size,
            view,
        })
    }
}

fn required(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn overview_range(req: &OverviewRequest, now: i64) -> Result<TimeRange, ValidationError> {
    match (&req.start_time, &req.end_time, &req.date) {
        (Some(start), Some(end), _) => TimeRange::new(
            start.to_epoch_secs("start_time")?,
            end.to_epoch_secs("end_time")?,
            now,
        ),
        (_, _, Some(date)) => {
            TimeRange::trailing(date.to_epoch_secs("date")?, DATED_OVERVIEW_WINDOW_SECS, now)
        }
        _ => TimeRange::trailing(now, OVERVIEW_WINDOW_SECS, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, TransportError};
    use crate::executor::FakeSearchExecutor;
    use crate::query_builder::HOST_FIELD;
    use serde_json::{json, Value};

    fn service() -> (DashboardService, FakeSearchExecutor) {
        let mut settings = Settings::defaults().unwrap();
        settings.index_utc_offset_secs = Some(0);
        let fake = FakeSearchExecutor::new();
        let svc = DashboardService::new(&settings, Arc::new(fake.clone())).unwrap();
        (svc, fake)
    }

    fn window() -> (i64, i64) {
        let end = now_secs() - 120;
        (end - 3600, end)
    }

    fn samples(times: std::ops::Range<i64>) -> Vec<Value> {
        times
            .map(|t| json!({"_source": {"clock": t, "value": t * 2}}))
            .collect()
    }

    fn page_body(total: u64, times: std::ops::Range<i64>) -> Value {
        json!({"hits": {"total": {"value": total, "relation": "eq"}, "hits": samples(times)}})
    }

    fn role_body(hosts: &[&str]) -> Value {
        let buckets: Vec<Value> = hosts
            .iter()
            .map(|ip| {
                let latest = json!({"_source": {"appcode": "dns-core", "vendor": "acme"}});
                json!({
                    "key": ip,
                    "latest_info": {"hits": {"hits": [latest]}},
                    "time_series": {"hits": {"hits": samples(0..3)}}
                })
            })
            .collect();
        json!({"aggregations": {"group_by_hostip": {"buckets": buckets}}})
    }

    fn page_request(
        role: &str,
        hostip: &str,
        range: (i64, i64),
        current: u64,
    ) -> HostPageRequest {
        HostPageRequest {
            hostip: Some(hostip.into()),
            role: Some(role.into()),
            start_time: Some(range.0.into()),
            end_time: Some(range.1.into()),
            current: Some(current),
            page_size: Some(100),
        }
    }

    fn role_request(start: i64, end: i64) -> RoleDetailRequest {
        RoleDetailRequest {
            role: Some("dns-core".into()),
            start_time: Some(start.into()),
            end_time: Some(end.into()),
        }
    }

    #[test]
    fn override_missing_a_sample_slot_fails_startup() {
        let dir = std::env::temp_dir().join(format!("perf-svc-templates-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut template: Value =
            serde_json::from_str(include_str!("../templates/grouped_qps.json")).unwrap();
        template["aggs"]["group_by_device"]["aggs"]
            .as_object_mut()
            .unwrap()
            .remove("latest_info");
        std::fs::write(dir.join("grouped_qps.json"), template.to_string()).unwrap();

        let mut settings = Settings::defaults().unwrap();
        settings.templates_dir = Some(dir.clone());
        let result = DashboardService::new(&settings, Arc::new(FakeSearchExecutor::new()));
        std::fs::remove_dir_all(&dir).unwrap();

        let err = result.err().unwrap();
        assert!(err.is_system_fault(), "{err}");
    }

    #[tokio::test]
    async fn overview_defaults_to_last_hour() {
        let (svc, fake) = service();
        fake.push_response(json!({"aggregations": {"group_by_device": {"buckets": [
            {"latest_info": {"hits": {"hits": [{"_source": {"appcode": "dns-core"}}]}}}
        ]}}}));

        let overview = svc.qps_overview(&OverviewRequest::default()).await.unwrap();
        assert_eq!(overview.range.span_secs(), OVERVIEW_WINDOW_SECS);
        assert_eq!(overview.records.len(), 1);

        let sent = fake.snapshot();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].shards.iter().all(|s| s.starts_with("u2performance-")));
    }

    #[tokio::test]
    async fn overview_with_date_covers_six_hours_before_it() {
        let (svc, fake) = service();
        fake.push_response(json!({"aggregations": {"group_by_device": {"buckets": [
            {"latest_info": {"hits": {"hits": [{"_source": {"appcode": "x"}}]}}}
        ]}}}));
        let date = now_secs() - 86_400;

        let overview = svc
            .qps_overview(&OverviewRequest {
                date: Some(date.into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(overview.range.end(), date);
        assert_eq!(overview.range.start(), date - 6 * 3600);
    }

    #[tokio::test]
    async fn inverted_range_never_reaches_the_engine() {
        let (svc, fake) = service();
        let (start, end) = window();
        let err = svc
            .qps_overview(&OverviewRequest {
                start_time: Some(end.into()),
                end_time: Some(start.into()),
                date: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::StartNotBeforeEnd { .. })
        ));
        assert!(fake.snapshot().is_empty());
    }

    #[tokio::test]
    async fn role_detail_hydrates_every_host_in_order() {
        let (svc, fake) = service();
        let (start, end) = window();
        fake.push_response(role_body(&["10.0.0.2", "10.0.0.1"]))
            .push_response(page_body(150, 100..200))
            .push_response(page_body(40, 500..540));

        let view = svc.role_detail(&role_request(start, end)).await.unwrap();
        assert_eq!(view.hydration.hydrated, vec!["10.0.0.1", "10.0.0.2"]);
        assert!(view.hydration.failed.is_empty());

        let first = &view.hosts[0];
        assert_eq!(first.hostip, "10.0.0.1");
        assert_eq!(first.state.series.len(), 100);
        assert_eq!(
            first.state.pagination,
            PaginationState { current: 1, page_size: 100, total: 150 }
        );
        assert!(!first.fully_loaded);
        assert!(view.hosts[1].fully_loaded);

        let sent = fake.snapshot();
        assert_eq!(sent.len(), 3);
        assert_eq!((sent[1].query.from, sent[1].query.size), (Some(0), Some(100)));
        assert!(sent[1].query.query.bool.must.iter().any(|c| c.is_term_on(HOST_FIELD)));
    }

    #[tokio::test]
    async fn failed_host_is_reported_and_others_continue() {
        let (svc, fake) = service();
        let (start, end) = window();
        fake.push_response(role_body(&["10.0.0.1", "10.0.0.2"]))
            .push_error(TransportError::Status {
                status: 500,
                body: "boom".into(),
            })
            .push_response(page_body(3, 0..3));

        let view = svc.role_detail(&role_request(start, end)).await.unwrap();
        assert_eq!(view.hydration.hydrated, vec!["10.0.0.2"]);
        assert_eq!(view.hydration.failed.len(), 1);
        assert_eq!(view.hydration.failed[0].hostip, "10.0.0.1");
        // The failed host keeps its preview series.
        assert_eq!(view.hosts[0].state.series.len(), 3);
        assert_eq!(view.hosts[0].state.pagination.current, 0);
    }

    #[tokio::test]
    async fn load_more_appends_until_fully_loaded() {
        let (svc, fake) = service();
        let (start, end) = window();
        fake.push_response(role_body(&["10.0.0.1"]))
            .push_response(page_body(150, 0..100))
            .push_response(page_body(150, 100..150));
        svc.role_detail(&role_request(start, end)).await.unwrap();

        let page = svc
            .load_host_page(&HostPageRequest {
                hostip: Some("10.0.0.1".into()),
                role: Some("dns-core".into()),
                start_time: Some(start.into()),
                end_time: Some(end.into()),
                current: Some(2),
                page_size: Some(100),
            })
            .await
            .unwrap();

        assert!(page.applied);
        assert!(page.fully_loaded);
        let state = page.state.unwrap();
        assert_eq!(state.series.len(), 150);
        let expected: Vec<i64> = (0..150).collect();
        assert_eq!(state.series.categories(), expected.as_slice());
        assert_eq!(fake.snapshot()[2].query.from, Some(100));
    }

    #[tokio::test]
    async fn totals_probe_only_updates_total() {
        let (svc, fake) = service();
        let (start, end) = window();
        fake.push_response(json!({"hits": {"total": 999, "hits": []}}));

        let page = svc
            .load_host_page(&HostPageRequest {
                hostip: Some("10.0.0.1".into()),
                role: Some("dns-core".into()),
                start_time: Some(start.into()),
                end_time: Some(end.into()),
                current: Some(0),
                page_size: Some(100),
            })
            .await
            .unwrap();

        let state = page.state.unwrap();
        assert!(state.series.is_empty());
        assert_eq!(state.pagination.total, 999);
        assert_eq!(fake.snapshot()[0].query.size, Some(0));
    }

    #[tokio::test]
    async fn other_scope_does_not_disturb_loaded_pages() {
        let (svc, fake) = service();
        let (start, end) = window();
        fake.push_response(role_body(&["10.0.0.1"]))
            .push_response(page_body(150, 0..100))
            .push_response(page_body(5, 0..5))
            .push_response(page_body(150, 100..150));
        svc.role_detail(&role_request(start, end)).await.unwrap();

        let other = svc
            .load_host_page(&page_request("other-role", "10.9.9.9", (start, end), 1))
            .await
            .unwrap();
        assert!(other.applied);

        let page = svc
            .load_host_page(&page_request("dns-core", "10.0.0.1", (start, end), 2))
            .await
            .unwrap();
        assert!(page.applied);
        assert!(page.fully_loaded);
        let series = page.state.unwrap().series;
        assert_eq!(series.len(), 150);
        assert_eq!(series.categories()[0], 0);

        let sessions = svc.sessions.lock().await;
        assert_eq!(sessions.sessions.len(), 2);
    }

    #[tokio::test]
    async fn skipped_page_is_not_appended() {
        let (svc, fake) = service();
        let (start, end) = window();
        fake.push_response(role_body(&["10.0.0.1"]))
            .push_response(page_body(350, 0..100))
            .push_response(page_body(350, 200..300));
        svc.role_detail(&role_request(start, end)).await.unwrap();

        let page = svc
            .load_host_page(&page_request("dns-core", "10.0.0.1", (start, end), 3))
            .await
            .unwrap();
        assert!(!page.applied);
        assert_eq!(page.outcome, MergeOutcome::OutOfOrder);
        assert!(!page.fully_loaded);
        let state = page.state.unwrap();
        assert_eq!(state.series.len(), 100);
        assert_eq!(state.pagination.current, 1);
    }

    #[tokio::test]
    async fn page_two_without_page_one_is_rejected() {
        let (svc, fake) = service();
        let (start, end) = window();
        fake.push_response(page_body(150, 100..150));

        let page = svc
            .load_host_page(&page_request("dns-core", "10.0.0.1", (start, end), 2))
            .await
            .unwrap();
        assert_eq!(page.outcome, MergeOutcome::OutOfOrder);
        assert!(page.state.is_none());
        assert!(!page.fully_loaded);
    }

    #[test]
    fn least_recently_used_session_is_evicted() {
        let mut sessions = RoleSessions::default();
        let scope = |i: usize| RoleScope {
            role: format!("role-{i}"),
            range: TimeRange::new(0, 60, 60).unwrap(),
        };
        for i in 0..MAX_ROLE_SESSIONS {
            sessions.enter(&scope(i));
        }
        let first_id = sessions.get(&scope(0)).unwrap().id;
        let evicted_id = sessions.get(&scope(1)).unwrap().id;
        sessions.enter(&scope(0));
        sessions.enter(&scope(MAX_ROLE_SESSIONS));

        assert_eq!(sessions.sessions.len(), MAX_ROLE_SESSIONS);
        assert_eq!(sessions.get(&scope(0)).unwrap().id, first_id);
        assert!(sessions.get(&scope(1)).is_none());

        // A recreated session gets a fresh id, so old tickets cannot land in it.
        let recreated = sessions.enter(&scope(1)).id;
        assert_ne!(recreated, evicted_id);
        assert!(sessions.live_mut(&scope(1), evicted_id).is_none());
    }

    #[tokio::test]
    async fn unhydrated_hosts_are_not_fully_loaded() {
        let (svc, fake) = service();
        let (start, end) = window();
        fake.push_response(role_body(&["10.0.0.1"]))
            .push_error(TransportError::Network("reset".into()));

        let view = svc.role_detail(&role_request(start, end)).await.unwrap();
        assert_eq!(view.hydration.failed.len(), 1);
        assert!(!view.hosts[0].fully_loaded);
    }

    #[tokio::test]
    async fn role_detail_validation() {
        let (svc, fake) = service();
        let (start, end) = window();

        let err = svc
            .role_detail(&RoleDetailRequest {
                role: Some("  ".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(ValidationError::MissingRole)));

        let err = svc
            .role_detail(&role_request(end - 31 * 86_400, end))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::SpanTooLong { .. })
        ));

        let err = svc
            .load_host_page(&HostPageRequest {
                role: Some("dns-core".into()),
                start_time: Some(start.into()),
                end_time: Some(end.into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::MissingHostAddress)
        ));
        assert!(fake.snapshot().is_empty());
    }

    #[tokio::test]
    async fn missing_role_aggregation_is_no_data() {
        let (svc, fake) = service();
        let (start, end) = window();
        fake.push_response(json!({"aggregations": {}}));
        let err = svc.role_detail(&role_request(start, end)).await.unwrap_err();
        assert!(matches!(err, PipelineError::DataShape(_)));
    }

    fn perf_hit(kind: i64, clock: i64, value: f64) -> Value {
        json!({"_source": {
            "type": kind,
            "clock_time": clock,
            "value": value,
            "source": "cpu.util"
        }})
    }

    #[tokio::test]
    async fn host_perf_centres_window_on_occurrence() {
        let (svc, fake) = service();
        fake.push_response(json!({"hits": {"total": {"value": 2}, "hits": [
            perf_hit(0, 1, 1.0), perf_hit(0, 2, 2.0)
        ]}}));
        let occurrence = now_secs() - 86_400;

        let view = svc
            .host_perf(&HostPerfRequest {
                first_occurrence: Some(TimestampParam::Text(format!("{occurrence}123"))),
                itemid: Some("4711".into()),
                source: Some("zabbix".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(view.range.start(), occurrence - HOST_PERF_RANGE_SECS);
        assert_eq!(view.range.end(), occurrence + HOST_PERF_RANGE_SECS);
        assert_eq!(view.page_size, CHART_PAGE_SIZE);
        assert!(view.view.is_chart());

        let sent = &fake.snapshot()[0];
        let body = serde_json::to_value(&sent.query).unwrap();
        assert_eq!(body["sort"], json!([{"clock_time": {"order": "asc"}}]));
        assert_eq!(
            body["query"]["bool"]["must"][0]["range"]["clock"]["gte"],
            json!((occurrence - HOST_PERF_RANGE_SECS) * 1000)
        );
        assert!(sent.shards.iter().all(|s| s.starts_with("nt_zabbix_performance-")));
    }

    #[tokio::test]
    async fn host_perf_window_end_is_clamped_to_now() {
        let (svc, fake) = service();
        fake.push_response(json!({"hits": {"total": 1, "hits": [perf_hit(2, 1, 1.0)]}}));
        let occurrence = now_secs() - 60;

        let view = svc
            .host_perf(&HostPerfRequest {
                first_occurrence: Some(occurrence.into()),
                itemid: Some("4711".into()),
                prefer_table: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(view.range.end() < occurrence + HOST_PERF_RANGE_SECS);
        assert!(!view.view.is_chart());
        assert_eq!(view.page_size, TABLE_PAGE_SIZE);
    }

    #[tokio::test]
    async fn host_perf_rejects_unknown_type() {
        let (svc, fake) = service();
        fake.push_response(json!({"hits": {"total": 1, "hits": [perf_hit(9, 1, 1.0)]}}));
        let err = svc
            .host_perf(&HostPerfRequest {
                first_occurrence: Some((now_secs() - 86_400).into()),
                itemid: Some("1".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedResultType(Some(9))));
    }

    #[tokio::test]
    async fn oversized_perf_range_is_a_validation_error() {
        let (svc, fake) = service();
        let err = svc
            .host_perf(&HostPerfRequest {
                first_occurrence: Some((now_secs() - 86_400).into()),
                itemid: Some("4711".into()),
                range: Some(10_000_000_000_000_000),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::TimestampOutOfRange { .. })
        ));

        let err = svc
            .host_perf(&HostPerfRequest {
                first_occurrence: Some((now_secs() - 86_400).into()),
                itemid: Some("4711".into()),
                range: Some(i64::MAX),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(fake.snapshot().is_empty());
    }

    #[tokio::test]
    async fn extreme_start_time_is_a_validation_error() {
        let (svc, fake) = service();
        let err = svc
            .role_detail(&RoleDetailRequest {
                role: Some("dns-core".into()),
                start_time: Some(i64::MIN.into()),
                end_time: Some((now_secs() - 60).into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::TimestampOutOfRange {
                field: "start_time",
                ..
            })
        ));

        let err = svc
            .qps_overview(&OverviewRequest {
                date: Some(TimestampParam::Text("-9223372036854775808".into())),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(fake.snapshot().is_empty());
    }

    #[tokio::test]
    async fn host_perf_requires_item_and_occurrence() {
        let (svc, fake) = service();
        let err = svc
            .host_perf(&HostPerfRequest {
                first_occurrence: Some(1_700_000_000_i64.into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(ValidationError::MissingItemId)));

        let err = svc
            .host_perf(&HostPerfRequest {
                itemid: Some("1".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::MissingOccurrenceTime)
        ));
        assert!(fake.snapshot().is_empty());
    }
}
