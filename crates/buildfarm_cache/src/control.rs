//! Control API for the build artifact cache.
//!
//! Uses a ZMQ REP socket with JSON request/response, same envelope shape as
//! the coordinator's control API.
//!
//! # Supported Operations
//!
//! - `Get` - fetch a cache entry by fingerprint
//! - `Put` - store a cache entry
//! - `Delete` - evict a single entry
//! - `Stats` - cache occupancy/hit-rate statistics
//! - `Ping` - health check

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CacheRequest {
    Get {
        fingerprint: String,
    },
    Put {
        fingerprint: String,
        artifacts: Vec<CacheArtifact>,
        ttl_secs: Option<u64>,
    },
    Delete {
        fingerprint: String,
    },
    Stats,
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CacheResponse {
    Entry(Option<CacheEntryInfo>),
    PutResult { success: bool, message: String },
    DeleteResult { success: bool, message: String },
    Stats(CacheStatsInfo),
    Pong,
    Error { code: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheArtifact {
    pub relative_path: String,
    pub contents_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryInfo {
    pub fingerprint: String,
    pub artifacts: Vec<CacheArtifact>,
    pub size_bytes: u64,
    pub created_at: String,
    pub last_accessed_at: String,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsInfo {
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheResponse {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_request_roundtrips() {
        let req = CacheRequest::Get {
            fingerprint: "abc123".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: CacheRequest = serde_json::from_str(&json).unwrap();
        match parsed {
            CacheRequest::Get { fingerprint } => assert_eq!(fingerprint, "abc123"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn error_response_roundtrips() {
        let resp = CacheResponse::error("not_found", "no such entry");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("not_found"));
        let parsed: CacheResponse = serde_json::from_str(&json).unwrap();
        matches!(parsed, CacheResponse::Error { .. });
    }
}
