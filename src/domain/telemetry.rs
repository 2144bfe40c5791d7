// Telemetry data domain models
use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::collections::VecDeque;

pub const DEFAULT_RETENTION: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

/// Charted metrics, one rolling series each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Current,
    Voltage,
    GasFlow,
}

impl Metric {
    pub const CHARTED: [Metric; 3] = [Metric::Current, Metric::Voltage, Metric::GasFlow];
}

/// Fixed-capacity history for one metric of one machine.
///
/// Points are kept in non-decreasing time order; pushing past capacity evicts
/// the oldest point.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSeries {
    capacity: usize,
    points: VecDeque<TimeSeriesPoint>,
}

impl MetricSeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            points: VecDeque::with_capacity(capacity),
        }
    }

    /// Series holding a single origin point.
    pub fn bootstrap(capacity: usize, point: TimeSeriesPoint) -> Self {
        let mut series = Self::new(capacity);
        series.points.push_back(point);
        series
    }

    /// Append a point, clamping its timestamp to the newest point so order
    /// never goes backwards.
    pub fn push(&mut self, mut point: TimeSeriesPoint) {
        if let Some(last) = self.points.back() {
            if point.time_ms < last.time_ms {
                point.time_ms = last.time_ms;
            }
        }
        self.points.push_back(point);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&TimeSeriesPoint> {
        self.points.front()
    }

    pub fn last(&self) -> Option<&TimeSeriesPoint> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeSeriesPoint> {
        self.points.iter()
    }

    pub fn to_vec(&self) -> Vec<TimeSeriesPoint> {
        self.points.iter().copied().collect()
    }
}

impl Serialize for MetricSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.points.len()))?;
        for point in self.iter() {
            seq.serialize_element(point)?;
        }
        seq.end()
    }
}
