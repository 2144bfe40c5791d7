// Mapper to convert inbound event payloads to domain samples
use crate::domain::machine::{MachineStatus, RawSample};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Build a `RawSample` for `machine_id` from an event payload.
///
/// Never fails: absent or unusable numeric fields become `0`, an absent
/// timestamp becomes `now`.
pub fn payload_to_sample(machine_id: &str, payload: &Value, now: DateTime<Utc>) -> RawSample {
    let empty = Map::new();
    let fields = match payload {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            tracing::warn!(
                "Payload for {} is not an object ({}); using zero defaults",
                machine_id,
                other
            );
            &empty
        }
    };

    RawSample {
        machine_id: machine_id.to_string(),
        current: number_field(machine_id, fields, "current"),
        voltage: number_field(machine_id, fields, "voltage"),
        gas_flow_rate: number_field(machine_id, fields, "gasFlowRate"),
        machine_temp: number_field(machine_id, fields, "machineTemp"),
        ambient_temp: number_field(machine_id, fields, "ambientTemp"),
        status: status_field(fields.get("status")),
        operator_id: text_field(fields.get("operatorId")),
        timestamp_ms: timestamp_field(fields.get("timestamp")).unwrap_or(now.timestamp_millis()),
    }
}

fn number_field(machine_id: &str, fields: &Map<String, Value>, key: &str) -> f64 {
    match fields.get(key) {
        None | Some(Value::Null) => 0.0,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) if s.trim().is_empty() => 0.0,
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => v,
            _ => {
                tracing::warn!("Field {} of {} is not numeric: {:?}", key, machine_id, s);
                0.0
            }
        },
        Some(other) => {
            tracing::warn!("Field {} of {} is not numeric: {}", key, machine_id, other);
            0.0
        }
    }
}

fn status_field(value: Option<&Value>) -> MachineStatus {
    match value {
        Some(Value::String(s)) => MachineStatus::from_label(s),
        Some(Value::Bool(true)) => MachineStatus::Running,
        Some(Value::Bool(false)) => MachineStatus::Stopped,
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) if v != 0.0 => MachineStatus::Running,
            Some(_) => MachineStatus::Stopped,
            None => MachineStatus::Unknown,
        },
        _ => MachineStatus::Unknown,
    }
}

fn text_field(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn timestamp_field(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|v| v as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|t| t.timestamp_millis())
            }),
        _ => None,
    }
}
