//! Structured payloads carried in JSON columns.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::codec::{decode_json, encode_or_diagnostic};

/// Reason recorded when a task or chunk is cancelled.
pub const CANCELLED: &str = "cancelled";

/// Failure information attached to tasks, chunks, pods and reservations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ChunkError>,
}

/// One distinct chunk failure collected on the owning task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkError {
    pub chunk_index: u32,
    pub reason: String,
}

impl FailureMeta {
    /// Record a chunk failure unless the same failure is already listed.
    pub fn push_error(&mut self, chunk_index: u32, reason: &str) -> bool {
        let duplicate = self
            .errors
            .iter()
            .any(|e| e.chunk_index == chunk_index && e.reason == reason);
        if duplicate {
            return false;
        }
        self.errors.push(ChunkError {
            chunk_index,
            reason: reason.to_string(),
        });
        true
    }
}

/// Rewrite a `meta` column through its structured form.
///
/// A malformed column cannot be merged into, so it is rebuilt from empty.
pub(crate) fn edit_meta(raw: &mut String, edit: impl FnOnce(&mut FailureMeta)) {
    let mut meta = if raw.trim().is_empty() {
        FailureMeta::default()
    } else {
        decode_json(raw).unwrap_or_else(|| {
            warn!(discarded = %raw, "Replacing undecodable meta column");
            FailureMeta::default()
        })
    };
    edit(&mut meta);
    *raw = encode_or_diagnostic(&meta);
}

/// Request parameters extracted from the original routing request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avoid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(
        rename = "nb-gateway-track-info",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub nb_gateway_track_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approaches: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truck_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truck_weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
}

impl ExtractedParams {
    pub fn encode(&self) -> String {
        encode_or_diagnostic(self)
    }

    pub fn decode(raw: &str) -> Option<Self> {
        decode_json(raw)
    }
}

/// Descriptor of the compute resource behind a pod, supplied by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceMeta {
    pub name: String,
    pub namespace: String,
    pub action: String,
    pub spec: ResourceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSpec {
    pub asset: AssetSpec,
    pub app: AppSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub release: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSpec {
    pub replicas: u32,
    pub parallel: bool,
    pub version: String,
    pub storage: String,
}
