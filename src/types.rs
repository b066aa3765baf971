use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest raw value the ADC can produce.
pub const ADC_MIN: f64 = 0.0;

/// Highest raw value the ADC can produce (10-bit converter).
pub const ADC_MAX: f64 = 1023.0;

/// Role a connection declares via the websocket subprotocol token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Device,
    Dashboard,
}

impl ConnectionRole {
    /// Parse a `Sec-WebSocket-Protocol` token. Unknown tokens return `None`
    /// so the caller can log and fall back to the dashboard role.
    pub fn from_protocol(token: &str) -> Option<Self> {
        match token {
            "device" => Some(Self::Device),
            "dashboard" => Some(Self::Dashboard),
            _ => None,
        }
    }
}

/// Messages the monitoring device sends to the server, one JSON object per frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// Liveness only; no payload.
    Ping,
    /// Device-reported fault, forwarded to dashboards verbatim.
    Error { message: Option<String> },
    /// One raw ADC sample. The firmware sends numbers or numeric strings,
    /// so the value is validated separately via [`Reading::from_raw`].
    Data { value: Option<serde_json::Value> },
}

/// Typed messages the server broadcasts to dashboard observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Status {
        message: String,
        /// Only present on the initial per-observer snapshot.
        #[serde(skip_serializing_if = "Option::is_none")]
        esp_connected: Option<bool>,
    },
    Warning {
        message: String,
    },
    Alert {
        message: String,
        severity: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerMessage {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            esp_connected: None,
        }
    }

    pub fn snapshot(message: impl Into<String>, device_connected: bool) -> Self {
        Self::Status {
            message: message.into(),
            esp_connected: Some(device_connected),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning {
            message: message.into(),
        }
    }

    pub fn alert(message: impl Into<String>) -> Self {
        Self::Alert {
            message: message.into(),
            severity: "high".to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// A processed reading broadcast to dashboards. Deliberately untagged: the
/// frontend distinguishes data points from [`ServerMessage`] by shape.
#[derive(Debug, Clone, Serialize)]
pub struct EcgDataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub is_anomaly: bool,
}

/// Why a raw `data` payload was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ReadingError {
    #[error("value is not numeric")]
    NotNumeric,
    #[error("value {0} outside ADC range [0, 1023]")]
    OutOfRange(f64),
}

/// A validated ADC sample with its capture timestamp. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Validate a raw JSON payload into a reading. Accepts JSON numbers and
    /// numeric strings; everything else is rejected.
    pub fn from_raw(raw: &serde_json::Value) -> Result<Self, ReadingError> {
        let value = match raw {
            serde_json::Value::Number(n) => n.as_f64().ok_or(ReadingError::NotNumeric)?,
            serde_json::Value::String(s) => {
                s.trim().parse::<f64>().map_err(|_| ReadingError::NotNumeric)?
            }
            _ => return Err(ReadingError::NotNumeric),
        };

        if !value.is_finite() {
            return Err(ReadingError::NotNumeric);
        }
        if !(ADC_MIN..=ADC_MAX).contains(&value) {
            return Err(ReadingError::OutOfRange(value));
        }

        Ok(Self {
            value,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_parsing() {
        assert_eq!(ConnectionRole::from_protocol("device"), Some(ConnectionRole::Device));
        assert_eq!(ConnectionRole::from_protocol("dashboard"), Some(ConnectionRole::Dashboard));
        assert_eq!(ConnectionRole::from_protocol("esp32"), None);
    }

    #[test]
    fn test_reading_accepts_numbers_and_numeric_strings() {
        assert_eq!(Reading::from_raw(&json!(512)).unwrap().value, 512.0);
        assert_eq!(Reading::from_raw(&json!(512.5)).unwrap().value, 512.5);
        assert_eq!(Reading::from_raw(&json!("768")).unwrap().value, 768.0);
    }

    #[test]
    fn test_reading_rejects_out_of_range() {
        assert!(matches!(
            Reading::from_raw(&json!(-1)),
            Err(ReadingError::OutOfRange(_))
        ));
        assert!(matches!(
            Reading::from_raw(&json!(1024)),
            Err(ReadingError::OutOfRange(_))
        ));
        // Boundaries are inclusive
        assert!(Reading::from_raw(&json!(0)).is_ok());
        assert!(Reading::from_raw(&json!(1023)).is_ok());
    }

    #[test]
    fn test_reading_rejects_non_numeric() {
        assert!(matches!(Reading::from_raw(&json!("abc")), Err(ReadingError::NotNumeric)));
        assert!(matches!(Reading::from_raw(&json!(null)), Err(ReadingError::NotNumeric)));
        assert!(matches!(Reading::from_raw(&json!([1, 2])), Err(ReadingError::NotNumeric)));
    }

    #[test]
    fn test_device_message_parsing() {
        assert!(matches!(
            serde_json::from_str::<DeviceMessage>(r#"{"type":"ping"}"#),
            Ok(DeviceMessage::Ping)
        ));
        let msg: DeviceMessage =
            serde_json::from_str(r#"{"type":"data","value":512}"#).unwrap();
        assert!(matches!(msg, DeviceMessage::Data { value: Some(_) }));

        // Unknown tags are a parse error, handled by the session as drop-and-log
        assert!(serde_json::from_str::<DeviceMessage>(r#"{"type":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<DeviceMessage>("not json").is_err());
    }

    #[test]
    fn test_status_snapshot_includes_device_flag() {
        let json = serde_json::to_value(ServerMessage::snapshot("Connected to server", true)).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["esp_connected"], true);

        // Plain status messages omit the flag entirely
        let json = serde_json::to_value(ServerMessage::status("Device connected")).unwrap();
        assert!(json.get("esp_connected").is_none());
    }

    #[test]
    fn test_data_point_has_no_type_tag() {
        let point = EcgDataPoint {
            timestamp: Utc::now(),
            value: 612.0,
            is_anomaly: false,
        };
        let json = serde_json::to_value(&point).unwrap();
        assert!(json.get("type").is_none());
        assert_eq!(json["value"], 612.0);
        assert_eq!(json["is_anomaly"], false);
    }
}
