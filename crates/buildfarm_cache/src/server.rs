//! ZMQ REP server loop for the cache's control API.

use crate::control::{CacheArtifact, CacheEntryInfo, CacheRequest, CacheResponse, CacheStatsInfo};
use crate::store::{Artifact, CacheStore, PutError};
use anyhow::{Context, Result};
use base64::Engine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct CacheServer {
    store: Arc<CacheStore>,
    socket: zmq::Socket,
}

impl CacheServer {
    pub fn bind(listen_addr: &str, store: Arc<CacheStore>) -> Result<Self> {
        let context = zmq::Context::new();
        let socket = context
            .socket(zmq::REP)
            .context("failed to create cache REP socket")?;
        socket
            .bind(listen_addr)
            .with_context(|| format!("failed to bind cache socket to {}", listen_addr))?;
        socket
            .set_rcvtimeo(200)
            .context("failed to set cache socket receive timeout")?;

        info!(addr = listen_addr, "cache control API bound");
        Ok(Self { store, socket })
    }

    /// Serve requests until `shutdown` is set.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::Relaxed) {
            let bytes = match self.socket.recv_bytes(0) {
                Ok(b) => b,
                Err(zmq::Error::EAGAIN) => continue,
                Err(e) => {
                    error!(error = %e, "cache socket recv failed");
                    continue;
                }
            };

            let response = match serde_json::from_slice::<CacheRequest>(&bytes) {
                Ok(request) => self.handle(request),
                Err(e) => CacheResponse::error("invalid_request", e.to_string()),
            };

            let payload = serde_json::to_vec(&response).unwrap_or_else(|_| {
                serde_json::to_vec(&CacheResponse::error("internal_error", "serialization failed"))
                    .expect("static error response serializes")
            });

            if let Err(e) = self.socket.send(&payload, 0) {
                warn!(error = %e, "failed to send cache response");
            }
        }
        Ok(())
    }

    fn handle(&self, request: CacheRequest) -> CacheResponse {
        match request {
            CacheRequest::Ping => CacheResponse::Pong,
            CacheRequest::Get { fingerprint } => self.handle_get(&fingerprint),
            CacheRequest::Put {
                fingerprint,
                artifacts,
                ttl_secs,
            } => self.handle_put(&fingerprint, artifacts, ttl_secs),
            CacheRequest::Delete { fingerprint } => self.handle_delete(&fingerprint),
            CacheRequest::Stats => self.handle_stats(),
        }
    }

    fn handle_get(&self, fingerprint: &str) -> CacheResponse {
        match self.store.get(fingerprint) {
            Ok(None) => CacheResponse::Entry(None),
            Ok(Some(artifacts)) => {
                let (created_at, last_accessed_at, expires_at) = self
                    .store
                    .entry_timestamps(fingerprint)
                    .unwrap_or_else(|| {
                        let now = chrono::Utc::now();
                        (now, now, None)
                    });
                CacheResponse::Entry(Some(CacheEntryInfo {
                    fingerprint: fingerprint.to_string(),
                    size_bytes: artifacts.iter().map(|a| a.contents.len() as u64).sum(),
                    artifacts: artifacts.into_iter().map(to_wire_artifact).collect(),
                    created_at: created_at.to_rfc3339(),
                    last_accessed_at: last_accessed_at.to_rfc3339(),
                    expires_at: expires_at.map(|d| d.to_rfc3339()),
                }))
            }
            Err(e) => CacheResponse::error("io_error", e.to_string()),
        }
    }

    fn handle_put(
        &self,
        fingerprint: &str,
        artifacts: Vec<CacheArtifact>,
        ttl_secs: Option<u64>,
    ) -> CacheResponse {
        let artifacts: Result<Vec<Artifact>, CacheResponse> = artifacts
            .into_iter()
            .map(from_wire_artifact)
            .collect();
        let artifacts = match artifacts {
            Ok(a) => a,
            Err(resp) => return resp,
        };

        let ttl = ttl_secs.map(std::time::Duration::from_secs);
        match self.store.put(fingerprint, &artifacts, ttl) {
            Ok(()) => CacheResponse::PutResult {
                success: true,
                message: "stored".to_string(),
            },
            Err(PutError::TooLarge { size, max }) => CacheResponse::error(
                "entry_too_large",
                format!("entry size {} exceeds max_cache_size {}", size, max),
            ),
            Err(e @ PutError::Io(_)) => CacheResponse::error("io_error", e.to_string()),
        }
    }

    fn handle_delete(&self, fingerprint: &str) -> CacheResponse {
        match self.store.remove(fingerprint) {
            Ok(true) => CacheResponse::DeleteResult {
                success: true,
                message: "removed".to_string(),
            },
            Ok(false) => CacheResponse::DeleteResult {
                success: false,
                message: "not found".to_string(),
            },
            Err(e) => CacheResponse::error("io_error", e.to_string()),
        }
    }

    fn handle_stats(&self) -> CacheResponse {
        let stats = self.store.stats();
        CacheResponse::Stats(CacheStatsInfo {
            entry_count: stats.entry_count,
            total_size_bytes: stats.total_size_bytes,
            max_size_bytes: self.store.max_size_bytes(),
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
        })
    }
}

fn to_wire_artifact(artifact: Artifact) -> CacheArtifact {
    CacheArtifact {
        relative_path: artifact.relative_path,
        contents_base64: base64::engine::general_purpose::STANDARD.encode(artifact.contents),
    }
}

fn from_wire_artifact(artifact: CacheArtifact) -> Result<Artifact, CacheResponse> {
    let contents = base64::engine::general_purpose::STANDARD
        .decode(&artifact.contents_base64)
        .map_err(|e| CacheResponse::error("invalid_request", format!("bad base64: {}", e)))?;
    Ok(Artifact {
        relative_path: artifact.relative_path,
        contents,
    })
}
