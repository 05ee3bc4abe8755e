//! Query, aggregation and pagination pipeline behind the QPS and host
//! performance dashboards.
//!
//! A query cycle runs through the modules in this order:
//!
//! 1. [`time_params`] validates the caller's window.
//! 2. [`index_resolver`] lists the date-sharded indices it touches.
//! 3. [`query_builder`] fills a [`templates`] clone with filters, sort and
//!    paging.
//! 4. [`executor`] posts it to the search engine.
//! 5. [`aggregator`] flattens bucket trees into [`model::EntityRecord`]s, or
//!    [`accumulator`] merges a flat page into a host's series, or
//!    [`view_mode`] picks chart or table for host performance hits.
//!
//! [`service::DashboardService`] wires these together.

pub mod accumulator;
pub mod aggregator;
pub mod dsl;
pub mod error;
pub mod executor;
pub mod index_resolver;
pub mod model;
pub mod query_builder;
pub mod response;
pub mod service;
pub mod settings;
pub mod templates;
pub mod time_params;
pub mod view_mode;

pub use error::{PipelineError, Result, TransportError, ValidationError};
pub use executor::{FakeSearchExecutor, HttpSearchExecutor, SearchExecutor};
pub use service::DashboardService;
pub use settings::Settings;
