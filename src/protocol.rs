//! Wire schemas for the control-plane commands (spec §6). Requests are
//! dispatched on a `command` string tag; each variant carries its own
//! typed payload. Responses are separate per-operation structs rather
//! than one shared enum, since a successful reply's extra fields differ
//! per command (mirrors how the teacher keeps one typed message per RPC).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A `(host, port)` pair, encoded on the wire as a 2-element JSON array.
pub type Location = (String, u16);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Request {
    #[serde(rename = "HEARTBEAT")]
    Heartbeat {
        node_id: String,
        host: String,
        port: u16,
    },
    #[serde(rename = "UPLOAD")]
    Upload {
        filename: String,
        chunk_ids: Vec<String>,
    },
    #[serde(rename = "DOWNLOAD")]
    Download { filename: String },
    #[serde(rename = "LIST_FILES")]
    ListFiles,
    #[serde(rename = "REPORT_CHUNK")]
    ReportChunk {
        chunk_id: String,
        locations: Vec<Location>,
    },
    #[serde(rename = "STORE")]
    Store { chunk_id: String, size: u64 },
    #[serde(rename = "RETRIEVE")]
    Retrieve { chunk_id: String },
}

/// Shared `{status, message}` reply shape used by HEARTBEAT, REPORT_CHUNK,
/// STORE, and the error path of every other command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_assignments: Option<HashMap<String, Vec<Location>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_locations: Option<HashMap<String, Vec<Location>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_request_round_trips_on_command_tag() {
        let req = Request::Heartbeat {
            node_id: "127.0.0.1:9001".into(),
            host: "127.0.0.1".into(),
            port: 9001,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"command\":\"HEARTBEAT\""));
        let back: Request = serde_json::from_str(&json).unwrap();
        matches!(back, Request::Heartbeat { .. });
    }

    #[test]
    fn locations_encode_as_json_arrays() {
        let resp = UploadResponse {
            status: "success".into(),
            chunk_assignments: Some(HashMap::from([(
                "chunk_0_abc".to_string(),
                vec![("10.0.0.1".to_string(), 9001u16)],
            )])),
            message: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        let loc = &json["chunk_assignments"]["chunk_0_abc"][0];
        assert_eq!(loc[0], "10.0.0.1");
        assert_eq!(loc[1], 9001);
    }

    #[test]
    fn unknown_command_fails_to_parse_as_request() {
        let raw = serde_json::json!({"command": "WAT"});
        assert!(serde_json::from_value::<Request>(raw).is_err());
    }
}
