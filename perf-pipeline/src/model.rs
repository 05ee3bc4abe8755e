//! Chart-facing data types shared by the aggregator, the accumulator and the
//! coordinator's JSON responses.

use serde::Serialize;

// ------------------------------------------------------------------ //
//  ChartSeries                                                        //
// ------------------------------------------------------------------ //

/// Parallel time labels (epoch seconds) and values.
///
/// Both vectors are private so that every mutation goes through methods that
/// keep them the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartSeries {
    categories: Vec<i64>,
    values: Vec<f64>,
}

impl ChartSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a series from points, sorted ascending by time. The sort is
    /// stable so samples sharing a timestamp keep their received order.
    pub fn from_unordered(points: impl IntoIterator<Item = (i64, f64)>) -> Self {
        let mut points: Vec<(i64, f64)> = points.into_iter().collect();
        points.sort_by_key(|(time, _)| *time);
        Self::from_ordered(points)
    }

    /// Build a series keeping the given order.
    pub fn from_ordered(points: impl IntoIterator<Item = (i64, f64)>) -> Self {
        let (categories, values) = points.into_iter().unzip();
        Self { categories, values }
    }

    /// Append `other` to the tail in its own order.
    pub fn append(&mut self, other: ChartSeries) {
        self.categories.extend(other.categories);
        self.values.extend(other.values);
    }

    pub fn truncate(&mut self, len: usize) {
        self.categories.truncate(len);
        self.values.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn categories(&self) -> &[i64] {
        &self.categories
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

// ------------------------------------------------------------------ //
//  Entity records                                                     //
// ------------------------------------------------------------------ //

/// One flattened row of aggregation output: a host (optionally under a
/// device) together with its chart series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    /// Stable row identifier derived from bucket position and names.
    pub key: String,
    pub role: String,
    pub vendor: String,
    pub device: String,
    pub hostip: String,
    pub chart: ChartSeries,
}

// ------------------------------------------------------------------ //
//  Pagination                                                         //
// ------------------------------------------------------------------ //

/// Paging position of one entity. `current == 0` means only the total has
/// been probed and no page of data has been fetched yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationState {
    pub current: u64,
    pub page_size: u64,
    pub total: u64,
}

impl PaginationState {
    /// No page fetched and no total known yet.
    pub fn unprobed(page_size: u64) -> Self {
        Self {
            current: 0,
            page_size,
            total: 0,
        }
    }

    /// Number of pages needed to cover `total`.
    pub fn page_count(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size)
    }

    /// True once at least one page is loaded and the loaded pages cover
    /// `total`. An entity with no page yet reports false, since its total
    /// may not be known.
    pub fn is_fully_loaded(&self) -> bool {
        self.current > 0 && self.current >= self.page_count()
    }
}
