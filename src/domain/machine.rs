// Welding machine domain model
use super::telemetry::{Metric, MetricSeries, TimeSeriesPoint};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub type MachineId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    Running,
    Stopped,
    #[default]
    Unknown,
}

impl MachineStatus {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "running" | "run" | "on" | "active" | "welding" => MachineStatus::Running,
            "stopped" | "stop" | "off" | "idle" => MachineStatus::Stopped,
            _ => MachineStatus::Unknown,
        }
    }
}

/// One inbound reading for one machine, already normalized: numeric fields
/// the feed left out are zero.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub machine_id: MachineId,
    pub current: f64,
    pub voltage: f64,
    pub gas_flow_rate: f64,
    pub machine_temp: f64,
    pub ambient_temp: f64,
    pub status: MachineStatus,
    pub operator_id: String,
    pub timestamp_ms: i64,
}

impl RawSample {
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Current => self.current,
            Metric::Voltage => self.voltage,
            Metric::GasFlow => self.gas_flow_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSnapshot {
    pub machine_id: MachineId,
    pub current: f64,
    pub voltage: f64,
    pub gas_flow_rate: f64,
    pub machine_temp: f64,
    pub ambient_temp: f64,
    pub status: MachineStatus,
    pub operator_id: String,
    /// Sample time of the last applied change, epoch millis. Zero until seeded.
    pub last_update: i64,
    /// Wall-clock time the last change was applied.
    pub received_at: Option<DateTime<Utc>>,
    /// Wall-clock time of the last drained sample, changed or not.
    pub last_seen: Option<DateTime<Utc>>,
    /// Changes applied since the snapshot was seeded.
    pub updates: u64,
    pub current_series: MetricSeries,
    pub voltage_series: MetricSeries,
    pub gas_flow_series: MetricSeries,
}

impl MachineSnapshot {
    /// Placeholder returned for ids the store has never seen.
    pub fn placeholder(machine_id: &str, retention: usize) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            current: 0.0,
            voltage: 0.0,
            gas_flow_rate: 0.0,
            machine_temp: 0.0,
            ambient_temp: 0.0,
            status: MachineStatus::Unknown,
            operator_id: String::new(),
            last_update: 0,
            received_at: None,
            last_seen: None,
            updates: 0,
            current_series: MetricSeries::new(retention),
            voltage_series: MetricSeries::new(retention),
            gas_flow_series: MetricSeries::new(retention),
        }
    }

    /// First sighting of a machine: every series starts at this sample.
    pub fn seed(sample: RawSample, retention: usize, now: DateTime<Utc>) -> Self {
        let origin = |metric| {
            MetricSeries::bootstrap(
                retention,
                TimeSeriesPoint::new(sample.timestamp_ms, sample.value(metric)),
            )
        };
        let current_series = origin(Metric::Current);
        let voltage_series = origin(Metric::Voltage);
        let gas_flow_series = origin(Metric::GasFlow);

        Self {
            last_update: sample.timestamp_ms,
            received_at: Some(now),
            last_seen: Some(now),
            updates: 0,
            current: sample.current,
            voltage: sample.voltage,
            gas_flow_rate: sample.gas_flow_rate,
            machine_temp: sample.machine_temp,
            ambient_temp: sample.ambient_temp,
            status: sample.status,
            operator_id: sample.operator_id,
            machine_id: sample.machine_id,
            current_series,
            voltage_series,
            gas_flow_series,
        }
    }

    /// Whether `sample` differs from this snapshot in a change-detected field.
    /// Operator id and temperatures alone do not count as a change.
    pub fn differs_from(&self, sample: &RawSample) -> bool {
        self.current != sample.current
            || self.voltage != sample.voltage
            || self.gas_flow_rate != sample.gas_flow_rate
            || self.status != sample.status
    }

    /// Apply a changed sample: overwrite scalars and extend every series.
    pub fn apply(&mut self, sample: RawSample, now: DateTime<Utc>) {
        for metric in Metric::CHARTED {
            let point = TimeSeriesPoint::new(sample.timestamp_ms, sample.value(metric));
            self.series_mut(metric).push(point);
        }

        self.current = sample.current;
        self.voltage = sample.voltage;
        self.gas_flow_rate = sample.gas_flow_rate;
        self.machine_temp = sample.machine_temp;
        self.ambient_temp = sample.ambient_temp;
        self.status = sample.status;
        self.operator_id = sample.operator_id;
        self.last_update = self
            .current_series
            .last()
            .map(|p| p.time_ms)
            .unwrap_or(sample.timestamp_ms);
        self.received_at = Some(now);
        self.last_seen = Some(now);
        self.updates += 1;
    }

    /// Record that the machine reported again without changing anything.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_seen = Some(now);
    }

    pub fn series(&self, metric: Metric) -> &MetricSeries {
        match metric {
            Metric::Current => &self.current_series,
            Metric::Voltage => &self.voltage_series,
            Metric::GasFlow => &self.gas_flow_series,
        }
    }

    fn series_mut(&mut self, metric: Metric) -> &mut MetricSeries {
        match metric {
            Metric::Current => &mut self.current_series,
            Metric::Voltage => &mut self.voltage_series,
            Metric::GasFlow => &mut self.gas_flow_series,
        }
    }

    /// Stale once the machine has gone quiet; an idle welder repeating the
    /// same reading stays fresh.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        match self.last_seen {
            Some(at) => now - at > stale_after,
            None => true,
        }
    }
}
