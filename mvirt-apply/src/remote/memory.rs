//! In-memory remote with optional JSON persistence.
//!
//! Behaves like a small resource service: it assigns server-side fields,
//! drops input-only fields from what it stores and enforces optimistic
//! concurrency through a per-resource etag.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{Identity, ListPage, Remote, RemoteError};
use crate::diff::OperationDiff;
use crate::entity::{Entity, Presence, Value};
use crate::schema::Schema;

/// Server-assigned field names, set when the schema declares them.
const UID_FIELD: &str = "uid";
const CREATE_TIME_FIELD: &str = "create_time";
const UPDATE_TIME_FIELD: &str = "update_time";
const ETAG_FIELD: &str = "etag";

#[derive(Debug, Error)]
pub enum StateFileError {
    #[error("state file i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file format: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Stored {
    entity: Entity,
    version: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    resources: BTreeMap<String, Stored>,
}

pub struct InMemoryRemote {
    schema: Arc<Schema>,
    resources: RwLock<BTreeMap<String, Stored>>,
}

impl InMemoryRemote {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            resources: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load state from `path`. A missing file yields an empty remote.
    pub async fn load(schema: Arc<Schema>, path: &Path) -> Result<Self, StateFileError> {
        let state = match tokio::fs::read_to_string(path).await {
            Ok(data) => serde_json::from_str::<StateFile>(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateFile::default(),
            Err(e) => return Err(e.into()),
        };
        info!(
            "Loaded {} resource(s) from {}",
            state.resources.len(),
            path.display()
        );
        Ok(Self {
            schema,
            resources: RwLock::new(state.resources),
        })
    }

    /// Write the current state to `path`.
    pub async fn save(&self, path: &Path) -> Result<(), StateFileError> {
        let resources = self.resources.read().await.clone();
        let data = serde_json::to_string_pretty(&StateFile { resources })?;
        tokio::fs::write(path, data).await?;
        debug!("Saved state to {}", path.display());
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.resources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.resources.read().await.is_empty()
    }

    fn declares(&self, name: &str) -> bool {
        self.schema.field(name).is_some()
    }

    /// Drop fields the service never stores as sent: output-only fields are
    /// its own, input-only fields are never echoed back.
    fn accepted(&self, name: &str) -> bool {
        self.schema
            .field(name)
            .is_none_or(|f| !f.output_only && !f.input_only)
    }

    fn stamp(&self, entity: &mut Entity, version: u64, now: &str) {
        if self.declares(UPDATE_TIME_FIELD) {
            entity.set(UPDATE_TIME_FIELD, Presence::Present(Value::from(now)));
        }
        if self.declares(ETAG_FIELD) {
            entity.set(ETAG_FIELD, Presence::Present(Value::from(version.to_string())));
        }
    }
}

#[async_trait]
impl Remote for InMemoryRemote {
    async fn fetch(&self, identity: &Identity) -> Result<Entity, RemoteError> {
        self.resources
            .read()
            .await
            .get(identity.as_str())
            .map(|s| s.entity.clone())
            .ok_or_else(|| RemoteError::NotFound(identity.to_string()))
    }

    async fn create(&self, identity: &Identity, desired: &Entity) -> Result<Option<Entity>, RemoteError> {
        let mut resources = self.resources.write().await;
        if resources.contains_key(identity.as_str()) {
            return Err(RemoteError::Conflict(format!("{} already exists", identity)));
        }

        let mut entity = Entity::new();
        for (name, slot) in desired.iter() {
            if self.accepted(name) {
                entity.set(name, slot.clone());
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        if self.declares(UID_FIELD) {
            entity.set(
                UID_FIELD,
                Presence::Present(Value::from(uuid::Uuid::new_v4().to_string())),
            );
        }
        if self.declares(CREATE_TIME_FIELD) {
            entity.set(CREATE_TIME_FIELD, Presence::Present(Value::from(now.as_str())));
        }
        self.stamp(&mut entity, 1, &now);

        resources.insert(
            identity.to_string(),
            Stored {
                entity: entity.clone(),
                version: 1,
            },
        );
        info!("Created {}", identity);
        Ok(Some(entity))
    }

    async fn update(
        &self,
        identity: &Identity,
        desired: &Entity,
        ops: &[OperationDiff],
    ) -> Result<Option<Entity>, RemoteError> {
        let mut resources = self.resources.write().await;
        let stored = resources
            .get_mut(identity.as_str())
            .ok_or_else(|| RemoteError::NotFound(identity.to_string()))?;

        if let Some(etag) = desired.get_str(ETAG_FIELD)
            && etag != stored.version.to_string()
        {
            return Err(RemoteError::Conflict(format!(
                "{}: etag {} does not match current version {}",
                identity, etag, stored.version
            )));
        }

        for op in ops {
            for name in op.field_names() {
                if self.accepted(name) {
                    stored.entity.set(name, desired.get(name).cloned());
                }
            }
        }

        stored.version += 1;
        let now = chrono::Utc::now().to_rfc3339();
        let version = stored.version;
        self.stamp(&mut stored.entity, version, &now);

        debug!("Updated {} to version {}", identity, version);
        Ok(Some(stored.entity.clone()))
    }

    async fn delete(&self, identity: &Identity) -> Result<(), RemoteError> {
        match self.resources.write().await.remove(identity.as_str()) {
            Some(_) => {
                info!("Deleted {}", identity);
                Ok(())
            }
            None => Err(RemoteError::NotFound(identity.to_string())),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<ListPage, RemoteError> {
        let resources = self.resources.read().await;
        let mut matching = resources
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| page_token.is_none_or(|token| key.as_str() > token));

        let limit = if page_size == 0 { usize::MAX } else { page_size };
        let mut items = Vec::new();
        let mut last_key = None;
        for (key, stored) in matching.by_ref().take(limit) {
            items.push(stored.entity.clone());
            last_key = Some(key.clone());
        }
        let next_token = if matching.next().is_some() { last_key } else { None };

        Ok(ListPage {
            items,
            next_token,
            prefix: prefix.to_string(),
            page_size,
        })
    }
}
