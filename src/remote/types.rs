//! Wire types for the build service API.
//!
//! Every struct derives `Serialize`/`Deserialize` for JSON conversion in the
//! shape the service expects.

use serde::{Deserialize, Serialize};

/// One spec sheet row, submitted as a single-spec item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecItem {
    /// Source configuration the spec derives from.
    pub from_name: String,
    /// The specification identifier.
    pub spec_id: String,
    /// Name the built configuration is filed under.
    pub config_name: String,
    /// Effectivity week the spec applies from.
    pub spec_week: String,
    /// Whether the row participates in geometry generation.
    pub gg: bool,
    /// Change-variant codes, deduplicated, order preserved.
    pub change_variants: Vec<String>,
}

/// Request body for a build submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecPayload {
    pub single_spec_items: Vec<SpecItem>,
    /// VM filter forwarded with the submission.
    pub vms: Vec<String>,
    pub ansa_dlfs: bool,
}

/// Opaque reference to a submitted build, used for polling and download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionHandle {
    pub job_id: String,
}

/// Remote build progress as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    /// The build has not finished yet.
    Pending,
    /// The artifact is ready for download.
    Ready,
    /// The service gave up on this build.
    Failed { reason: String },
}

/// Raw status document returned by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusResponse {
    /// Map the service's status string onto [`BuildStatus`]. Unknown strings
    /// are treated as still pending so a vocabulary drift on the server does
    /// not kill jobs mid-build.
    pub fn into_build_status(self) -> BuildStatus {
        match self.status.to_ascii_lowercase().as_str() {
            "ready" | "done" | "completed" => BuildStatus::Ready,
            "failed" | "error" => BuildStatus::Failed {
                reason: self.error.unwrap_or_else(|| "build failed".to_string()),
            },
            _ => BuildStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_payload_roundtrip() {
        let payload = SpecPayload {
            single_spec_items: vec![SpecItem {
                from_name: "FH16".into(),
                spec_id: "1234567890123".into(),
                config_name: "FH16-globetrotter".into(),
                spec_week: "2447".into(),
                gg: true,
                change_variants: vec!["CV1".into(), "CV2".into()],
            }],
            vms: vec!["vm-a".into()],
            ansa_dlfs: false,
        };
        let json = serde_json::to_string(&payload).unwrap();
        let parsed: SpecPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.single_spec_items.len(), 1);
        assert_eq!(parsed.single_spec_items[0].spec_id, "1234567890123");
        assert_eq!(parsed.vms, vec!["vm-a".to_string()]);
        assert!(!parsed.ansa_dlfs);
    }

    #[test]
    fn status_response_maps_ready_variants() {
        for s in ["ready", "Done", "COMPLETED"] {
            let resp = StatusResponse {
                status: s.into(),
                error: None,
            };
            assert_eq!(resp.into_build_status(), BuildStatus::Ready, "status {s}");
        }
    }

    #[test]
    fn status_response_maps_failure_with_reason() {
        let resp = StatusResponse {
            status: "failed".into(),
            error: Some("variant clash".into()),
        };
        assert_eq!(
            resp.into_build_status(),
            BuildStatus::Failed {
                reason: "variant clash".into()
            }
        );
    }

    #[test]
    fn status_response_failure_without_reason_gets_default() {
        let resp = StatusResponse {
            status: "error".into(),
            error: None,
        };
        assert!(matches!(
            resp.into_build_status(),
            BuildStatus::Failed { reason } if reason == "build failed"
        ));
    }

    #[test]
    fn status_response_unknown_is_pending() {
        let resp = StatusResponse {
            status: "queued-for-farm".into(),
            error: None,
        };
        assert_eq!(resp.into_build_status(), BuildStatus::Pending);
    }

    #[test]
    fn status_response_deserializes_from_api_format() {
        let json = r#"{"status": "pending"}"#;
        let resp: StatusResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status, "pending");
        assert!(resp.error.is_none());
    }
}
