//! Shared test utilities for mvirt-apply integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use mvirt_apply::{
    Entity, FieldKind, FieldSchema, Identity, ListPage, Normalization, OperationDiff, Remote,
    RemoteError, Schema,
};

/// Schema used across the integration tests.
pub fn thing_schema() -> Schema {
    Schema::new("Thing", "things/{name}")
        .with_operation("update_display_name")
        .with_operation("update_config")
        .with_operation("update_tags")
        .with_field(FieldSchema::string("name").required().immutable())
        .with_field(FieldSchema::string("display_name").update_op("update_display_name"))
        .with_field(
            FieldSchema::object(
                "config",
                vec![
                    FieldSchema::enumeration("tier", &["BASIC", "PREMIUM"]),
                    FieldSchema::int("size"),
                ],
            )
            .update_op("update_config"),
        )
        .with_field(
            FieldSchema::list("tags", FieldKind::String)
                .order_irrelevant()
                .update_op("update_tags"),
        )
        .with_field(
            FieldSchema::string("zone")
                .immutable()
                .normalize(Normalization::LastSegment),
        )
        .with_field(FieldSchema::string("uid").output_only())
        .with_field(FieldSchema::string("etag").output_only())
        .with_field(FieldSchema::string("self_link").immutable())
        .with_field(
            FieldSchema::string("secret")
                .input_only()
                .update_op("update_display_name"),
        )
        .with_derived("self_link", "things/{name}")
}

/// Scripted remote that records every call.
#[derive(Default)]
pub struct MockRemote {
    resources: Mutex<BTreeMap<String, Entity>>,
    /// Extra fields returned by create but never stored.
    create_response_extra: Mutex<Entity>,
    /// Fields the service never echoes back.
    hidden: Mutex<Vec<String>>,
    conflicts_on_update: AtomicUsize,
    freeze_updates: AtomicBool,
    fetched: Mutex<Vec<String>>,
    update_ops: Mutex<Vec<String>>,
    pub fetches: AtomicUsize,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a resource.
    pub fn with_resource(self, identity: &str, entity: Entity) -> Self {
        self.resources
            .lock()
            .unwrap()
            .insert(identity.to_string(), entity);
        self
    }

    pub fn with_create_response(self, extra: Entity) -> Self {
        *self.create_response_extra.lock().unwrap() = extra;
        self
    }

    pub fn hiding(self, field: &str) -> Self {
        self.hidden.lock().unwrap().push(field.to_string());
        self
    }

    /// Fail the next `n` updates with a conflict.
    pub fn conflict_updates(self, n: usize) -> Self {
        self.conflicts_on_update.store(n, Ordering::SeqCst);
        self
    }

    /// Accept updates without applying them.
    pub fn freeze_updates(self) -> Self {
        self.freeze_updates.store(true, Ordering::SeqCst);
        self
    }

    pub fn get(&self, identity: &str) -> Option<Entity> {
        self.resources.lock().unwrap().get(identity).cloned()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn update_ops(&self) -> Vec<String> {
        self.update_ops.lock().unwrap().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn store(&self, entity: &Entity) -> Entity {
        let mut stored = entity.clone();
        for field in self.hidden.lock().unwrap().iter() {
            stored.remove(field);
        }
        stored
    }
}

#[async_trait]
impl Remote for MockRemote {
    async fn fetch(&self, identity: &Identity) -> Result<Entity, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(identity.to_string());
        self.get(identity.as_str())
            .ok_or_else(|| RemoteError::NotFound(identity.to_string()))
    }

    async fn create(&self, identity: &Identity, desired: &Entity) -> Result<Option<Entity>, RemoteError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let stored = self.store(desired);
        self.resources
            .lock()
            .unwrap()
            .insert(identity.to_string(), stored.clone());

        let mut response = stored;
        for (name, slot) in self.create_response_extra.lock().unwrap().iter() {
            response.set(name, slot.clone());
        }
        Ok(Some(response))
    }

    async fn update(
        &self,
        identity: &Identity,
        desired: &Entity,
        ops: &[OperationDiff],
    ) -> Result<Option<Entity>, RemoteError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        for op in ops {
            let name = op.update_op.clone().unwrap_or_else(|| "recreate".to_string());
            self.update_ops.lock().unwrap().push(name);
        }

        if self
            .conflicts_on_update
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RemoteError::Conflict("concurrent modification".to_string()));
        }
        if self.freeze_updates.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let hidden = self.hidden.lock().unwrap().clone();
        let mut resources = self.resources.lock().unwrap();
        let current = resources
            .get_mut(identity.as_str())
            .ok_or_else(|| RemoteError::NotFound(identity.to_string()))?;
        for op in ops {
            for name in op.field_names() {
                if !hidden.iter().any(|h| h == name) {
                    current.set(name, desired.get(name).cloned());
                }
            }
        }
        Ok(None)
    }

    async fn delete(&self, identity: &Identity) -> Result<(), RemoteError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.resources
            .lock()
            .unwrap()
            .remove(identity.as_str())
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(identity.to_string()))
    }

    async fn list(
        &self,
        prefix: &str,
        page_size: usize,
        _page_token: Option<&str>,
    ) -> Result<ListPage, RemoteError> {
        let items = self
            .resources
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.clone())
            .collect();
        Ok(ListPage {
            items,
            next_token: None,
            prefix: prefix.to_string(),
            page_size,
        })
    }
}
