//! Per-entity accumulation of paginated series.
//!
//! Each entity key owns a [`ChartSeries`] and a [`PaginationState`]. The
//! only way to change either is [`AccumulatorTable::merge`], which applies
//! one fetched page according to its page number:
//!
//! | page        | effect                                   |
//! |-------------|------------------------------------------|
//! | totals-only | `total` updated, series untouched        |
//! | 1           | series replaced                          |
//! | N > 1       | points appended in received order        |
//!
//! Page N > 1 is only appended when the entity already holds page N - 1 at
//! the same page size; anything else is rejected as out of order.
//!
//! Every fetch is preceded by [`AccumulatorTable::begin_request`]. The
//! returned ticket carries an epoch; a response whose ticket is no longer
//! the newest for its key, or that predates a [`AccumulatorTable::clear`],
//! is discarded.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::model::{ChartSeries, PaginationState};

/// Issued before a fetch; presented again when merging its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTicket {
    key: String,
    epoch: u64,
}

/// One fetched result, ready to merge.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedPage {
    TotalsOnly {
        total: u64,
    },
    Page {
        current: u64,
        page_size: u64,
        total: u64,
        series: ChartSeries,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    Applied,
    /// A newer request for the key, or a clear, superseded this one.
    Stale,
    /// Page N > 1 arrived while the entity did not hold page N - 1.
    OutOfOrder,
}

/// Accumulated data for one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub series: ChartSeries,
    pub pagination: PaginationState,
}

#[derive(Debug, Default)]
pub struct AccumulatorTable {
    entries: BTreeMap<String, EntityState>,
    issued: BTreeMap<String, u64>,
    next_epoch: u64,
    /// Tickets at or below this epoch were issued before the last clear.
    floor: u64,
}

impl AccumulatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a ticket for a fetch of `key`. Any earlier ticket for the same
    /// key becomes stale.
    pub fn begin_request(&mut self, key: &str) -> RequestTicket {
        self.next_epoch += 1;
        self.issued.insert(key.to_string(), self.next_epoch);
        RequestTicket {
            key: key.to_string(),
            epoch: self.next_epoch,
        }
    }

    /// Install a preview series for `key` with an unprobed pagination state.
    pub fn seed(&mut self, key: &str, series: ChartSeries, page_size: u64) {
        self.entries.insert(
            key.to_string(),
            EntityState {
                series,
                pagination: PaginationState::unprobed(page_size),
            },
        );
    }

    /// Apply `page` for the ticket's key. The only writer of entity state.
    pub fn merge(&mut self, ticket: &RequestTicket, page: FetchedPage) -> MergeOutcome {
        if ticket.epoch <= self.floor || self.issued.get(&ticket.key) != Some(&ticket.epoch) {
            debug!(key = %ticket.key, epoch = ticket.epoch, "discarding stale page");
            return MergeOutcome::Stale;
        }
        if let FetchedPage::Page {
            current, page_size, ..
        } = page
        {
            if current > 1 && !self.follows(&ticket.key, current, page_size) {
                warn!(key = %ticket.key, current, page_size, "page does not follow loaded data");
                return MergeOutcome::OutOfOrder;
            }
        }

        match page {
            FetchedPage::TotalsOnly { total } => {
                let entry = self
                    .entries
                    .entry(ticket.key.clone())
                    .or_insert_with(|| EntityState {
                        series: ChartSeries::new(),
                        pagination: PaginationState::unprobed(0),
                    });
                entry.pagination.total = total;
            }
            FetchedPage::Page {
                current,
                page_size,
                total,
                series,
            } => {
                let entry = self
                    .entries
                    .entry(ticket.key.clone())
                    .or_insert_with(|| EntityState {
                        series: ChartSeries::new(),
                        pagination: PaginationState::unprobed(page_size),
                    });
                if current <= 1 {
                    entry.series = series;
                } else {
                    entry.series.append(series);
                }
                entry.pagination = PaginationState {
                    current: current.max(1),
                    page_size,
                    total,
                };

                let limit = usize::try_from(total).unwrap_or(usize::MAX);
                if entry.series.len() > limit {
                    warn!(
                        key = %ticket.key,
                        points = entry.series.len(),
                        total,
                        "series exceeds reported total, truncating"
                    );
                    entry.series.truncate(limit);
                }
            }
        }
        MergeOutcome::Applied
    }

    /// True when `key` holds exactly the page before `current`.
    fn follows(&self, key: &str, current: u64, page_size: u64) -> bool {
        self.entries.get(key).is_some_and(|e| {
            e.pagination.current + 1 == current && e.pagination.page_size == page_size
        })
    }

    /// Drop every entity and invalidate all outstanding tickets.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.issued.clear();
        self.floor = self.next_epoch;
    }

    pub fn get(&self, key: &str) -> Option<&EntityState> {
        self.entries.get(key)
    }

    pub fn is_fully_loaded(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| e.pagination.is_fully_loaded())
    }
}
