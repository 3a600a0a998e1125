use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no resource to assign, pool is not initialized")]
    NotInitialized,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status} from `{url}`")]
    UnexpectedStatus { url: String, status: u16 },
}

/// Protocol-specific slice of a provisioned identity. Untagged: the
/// provisioning service sends only the fields relevant to the pool's
/// protocol and the disjoint required keys pick the variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProtocolMetadata {
    RestLogin {
        admin_user: String,
        admin_token: String,
    },
    OauthToken {
        oauth_client_id: String,
        oauth_client_secret: String,
        auth_server: String,
    },
    Federated {
        sp_url: String,
    },
    VpnLogin {
        vpn_gateway_url: String,
    },
    Unspecified {},
}

impl Default for ProtocolMetadata {
    fn default() -> Self {
        Self::Unspecified {}
    }
}

/// A test credential bundle issued by the provisioning backend.
/// Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityResource {
    pub pool_id: String,
    pub id: String,
    #[serde(default)]
    pub seed: String,
    pub user: String,
    pub password: String,
    #[serde(default, rename = "custom_data")]
    pub custom: ProtocolMetadata,
}

/// Thin client for the resource-provisioning backend.
#[derive(Debug, Clone)]
pub struct ResourceClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ResourceClient {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub async fn request(&self, group: &str) -> Result<IdentityResource, PoolError> {
        let url = format!(
            "http://{}/resourcesmanager/v1/res/request/{group}",
            self.endpoint
        );
        let resp = self.http.get(&url).send().await?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(PoolError::UnexpectedStatus {
                url,
                status: resp.status().as_u16(),
            });
        }
        Ok(resp.json().await?)
    }

    pub async fn recycle(&self, pool_id: &str, id: &str) -> Result<(), PoolError> {
        let url = format!(
            "http://{}/resourcesmanager/v1/res/recycle/{pool_id}/{id}",
            self.endpoint
        );
        let resp = self.http.delete(&url).send().await?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(PoolError::UnexpectedStatus {
                url,
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Round-robin allocator over provisioned identities. The ring is
/// append-only while being populated and read-only once workers start;
/// the cursor is the only shared mutable point.
#[derive(Debug)]
pub struct ResourcePool {
    client: ResourceClient,
    ring: Vec<IdentityResource>,
    cursor: AtomicUsize,
}

impl ResourcePool {
    pub fn new(client: ResourceClient) -> Self {
        Self {
            client,
            ring: Vec::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Issues `count` sequential fetches against the backend. A failed
    /// fetch is logged and skipped, never fatal for the batch. Returns
    /// (succeeded, failed).
    pub async fn request(&mut self, count: usize, group: &str) -> (usize, usize) {
        let mut failed = 0;
        for _ in 0..count {
            match self.client.request(group).await {
                Ok(resource) => self.add(resource),
                Err(err) => {
                    warn!(%err, group, "resource request failed");
                    failed += 1;
                }
            }
        }
        info!(
            requested = count - failed,
            failed, group, "resource request complete"
        );
        (count - failed, failed)
    }

    pub fn add(&mut self, resource: IdentityResource) {
        self.ring.push(resource);
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Hands out the resource at the cursor and advances it, wrapping
    /// around the ring. Safe to call from concurrent workers.
    pub fn get(&self) -> Result<&IdentityResource, PoolError> {
        if self.ring.is_empty() {
            return Err(PoolError::NotInitialized);
        }
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % self.ring.len();
        Ok(&self.ring[slot])
    }

    /// All resources in ring order, head first. Does not move the cursor.
    pub fn list(&self) -> &[IdentityResource] {
        &self.ring
    }

    /// Recycles every resource once. Failures are logged and do not stop
    /// the walk.
    pub async fn release(&self) {
        for resource in &self.ring {
            if let Err(err) = self.client.recycle(&resource.pool_id, &resource.id).await {
                warn!(%err, id = %resource.id, "resource recycle failed");
            }
        }
    }
}
