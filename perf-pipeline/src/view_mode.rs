//! Chart-or-table selection for host performance results.
//!
//! The first hit declares a numeric `type`. Curve types are drawn as a line
//! chart; the others are listed as raw rows.

use serde::Serialize;
use serde_json::Value;

use crate::aggregator::coerce_value;
use crate::error::{PipelineError, Result};
use crate::response::{Hit, SearchResponse};

const TYPE_FIELD: &str = "type";
const X_AXIS_FIELD: &str = "clock_time";
const LABEL_FIELD: &str = "source";
const VALUE_FIELD: &str = "value";

const CHART_TYPES: [i64; 2] = [0, 3];
const TABLE_TYPES: [i64; 3] = [1, 2, 4];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurveView {
    pub x_axis: Vec<Value>,
    pub series: Vec<f64>,
    pub y_axis_label: String,
    pub first_hit: Value,
    pub total: u64,
    pub current: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableView {
    pub rows: Vec<Value>,
    pub total: u64,
    pub current: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ViewMode {
    Chart(CurveView),
    Table(TableView),
}

impl ViewMode {
    pub fn is_chart(&self) -> bool {
        matches!(self, ViewMode::Chart(_))
    }
}

/// The declared `type` of a hit, as a number or a numeric string.
pub fn declared_type(hit: &Hit) -> Option<i64> {
    match hit.field(TYPE_FIELD)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Pick the presentation for one page of host performance hits.
pub fn select(resp: &SearchResponse, current: u64) -> Result<ViewMode> {
    let hits = resp.hit_list();
    let first = hits
        .first()
        .ok_or_else(|| PipelineError::data_shape("search returned no hits"))?;

    let kind = declared_type(first);
    let total = resp.total();

    match kind {
        Some(t) if CHART_TYPES.contains(&t) => {
            let (x_axis, series): (Vec<Value>, Vec<f64>) = hits
                .iter()
                .filter_map(|h| match h.field(X_AXIS_FIELD) {
                    None | Some(Value::Null) => None,
                    Some(x) => Some((x.clone(), coerce_value(h.field(VALUE_FIELD)))),
                })
                .unzip();
            Ok(ViewMode::Chart(CurveView {
                x_axis,
                series,
                y_axis_label: first.text(LABEL_FIELD).unwrap_or_default(),
                first_hit: first.source.clone(),
                total,
                current,
            }))
        }
        Some(t) if TABLE_TYPES.contains(&t) => Ok(ViewMode::Table(TableView {
            rows: hits.iter().map(|h| h.source.clone()).collect(),
            total,
            current,
        })),
        other => Err(PipelineError::UnsupportedResultType(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(hits: Vec<Value>) -> SearchResponse {
        SearchResponse::from_json(json!({"hits": {"total": {"value": 57}, "hits": hits}})).unwrap()
    }

    fn hit(kind: Value, clock: Value, value: Value) -> Value {
        json!({"_source": {
            "type": kind,
            "clock_time": clock,
            "value": value,
            "source": "cpu.util"
        }})
    }

    #[test]
    fn curve_types_select_chart() {
        for t in [json!(0), json!("3")] {
            let view = select(
                &response(vec![
                    hit(t.clone(), json!("2024-03-01 10:00:00"), json!(1.5)),
                    hit(t, json!("2024-03-01 10:01:00"), json!("n/a")),
                ]),
                2,
            )
            .unwrap();
            let ViewMode::Chart(curve) = view else {
                panic!("expected chart");
            };
            assert_eq!(curve.x_axis.len(), 2);
            assert_eq!(curve.series, vec![1.5, 0.0]);
            assert_eq!(curve.y_axis_label, "cpu.util");
            assert_eq!((curve.total, curve.current), (57, 2));
        }
    }

    #[test]
    fn listing_types_select_table() {
        for t in [1, 2, 4] {
            let view = select(&response(vec![hit(json!(t), json!(1), json!(1))]), 1).unwrap();
            assert!(!view.is_chart());
        }
    }

    #[test]
    fn other_types_are_rejected() {
        let err = select(&response(vec![hit(json!(11), json!(1), json!(1))]), 1).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedResultType(Some(11))));

        let err = select(&response(vec![hit(json!("curve"), json!(1), json!(1))]), 1).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedResultType(None)));
    }

    #[test]
    fn empty_hits_are_a_data_shape_error() {
        assert!(matches!(select(&response(vec![]), 1), Err(PipelineError::DataShape(_))));
    }

    #[test]
    fn points_without_x_value_are_left_out() {
        let view = select(
            &response(vec![
                hit(json!(0), json!(100), json!(1)),
                hit(json!(0), Value::Null, json!(2)),
            ]),
            1,
        )
        .unwrap();
        let ViewMode::Chart(curve) = view else {
            panic!("expected chart");
        };
        assert_eq!(curve.series, vec![1.0]);
    }

    #[test]
    fn serializes_with_mode_tag() {
        let view = select(&response(vec![hit(json!(2), json!(1), json!(1))]), 1).unwrap();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["mode"], json!("table"));
        assert_eq!(json["rows"].as_array().unwrap().len(), 1);
    }
}
