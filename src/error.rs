//! Unified error type for the monitor's query/command surface.
//!
//! `MonitorError` is the single error type returned by every control
//! operation. It serializes as `{ "kind": "...", "message": "..." }` so a
//! web or CLI consumer can programmatically distinguish error categories.

use serde::ser::SerializeStruct;

/// Error returned by the monitor's control operations.
///
/// Each variant maps to a distinct failure domain. External consumers
/// receive a JSON object with `kind` (variant name) and `message`
/// (human-readable description).
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// `start()` was called while a capture is already running.
    #[error("capture already running")]
    AlreadyRunning,

    /// `stop()` was called with no capture running.
    #[error("no capture running")]
    NotRunning,

    /// Invalid or missing user input (bad port, non-positive threshold).
    #[error("{0}")]
    InvalidArgument(String),

    /// No alert rule exists for the named port.
    #[error("no alert rule for port {0}")]
    NotFound(u16),

    /// Errors from the underlying capture primitive (device open, BPF
    /// filter, read failure).
    #[error("{0}")]
    Capture(String),
}

impl MonitorError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::AlreadyRunning => "AlreadyRunning",
            MonitorError::NotRunning => "NotRunning",
            MonitorError::InvalidArgument(_) => "InvalidArgument",
            MonitorError::NotFound(_) => "NotFound",
            MonitorError::Capture(_) => "Capture",
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for MonitorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("MonitorError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<anyhow::Error> for MonitorError {
    fn from(err: anyhow::Error) -> Self {
        MonitorError::Capture(format!("{err:#}"))
    }
}

impl From<pcap::Error> for MonitorError {
    fn from(err: pcap::Error) -> Self {
        MonitorError::Capture(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_returns_correct_variant_name() {
        assert_eq!(MonitorError::AlreadyRunning.kind(), "AlreadyRunning");
        assert_eq!(MonitorError::NotRunning.kind(), "NotRunning");
        assert_eq!(
            MonitorError::InvalidArgument("bad threshold".into()).kind(),
            "InvalidArgument"
        );
        assert_eq!(MonitorError::NotFound(8080).kind(), "NotFound");
        assert_eq!(MonitorError::Capture("eperm".into()).kind(), "Capture");
    }

    #[test]
    fn test_error_display_shows_message() {
        assert_eq!(
            MonitorError::NotFound(443).to_string(),
            "no alert rule for port 443"
        );
        assert_eq!(
            MonitorError::AlreadyRunning.to_string(),
            "capture already running"
        );
    }

    #[test]
    fn test_error_serializes_as_kind_and_message() {
        let err = MonitorError::Capture("permission denied".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "Capture");
        assert_eq!(json["message"], "permission denied");
    }

    #[test]
    fn test_from_anyhow_produces_capture_variant() {
        let anyhow_err = anyhow::anyhow!("device is gone");
        let err: MonitorError = anyhow_err.into();
        assert_eq!(err.kind(), "Capture");
        assert!(err.to_string().contains("device is gone"));
    }

    #[test]
    fn test_all_variants_serialize_with_two_fields() {
        let variants: Vec<MonitorError> = vec![
            MonitorError::AlreadyRunning,
            MonitorError::NotRunning,
            MonitorError::InvalidArgument("a".into()),
            MonitorError::NotFound(1),
            MonitorError::Capture("b".into()),
        ];
        for err in variants {
            let json = serde_json::to_value(&err).unwrap();
            let obj = json.as_object().unwrap();
            assert_eq!(obj.len(), 2, "Expected exactly 2 fields for {err:?}");
            assert!(obj.contains_key("kind"));
            assert!(obj.contains_key("message"));
        }
    }
}
