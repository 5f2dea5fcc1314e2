//! In-memory store implementations, used by tests and short-lived
//! embedders that don't need persistence.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::crypto::PreKey;
use crate::types::{GroupMetadata, JID};

use super::traits::{ContactStore, GroupStore, PreKeyStore, StoreResult};

#[derive(Default)]
struct PreKeyState {
    keys: Vec<PreKey>,
    next_id: u32,
    uploaded_up_to: u32,
}

#[derive(Default)]
pub struct MemoryPreKeyStore {
    state: Mutex<PreKeyState>,
}

impl MemoryPreKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreKeyStore for MemoryPreKeyStore {
    async fn generate_pre_keys(&self, count: usize) -> StoreResult<Vec<PreKey>> {
        let mut state = self.state.lock().unwrap();
        let mut fresh = Vec::with_capacity(count);
        for _ in 0..count {
            state.next_id += 1;
            fresh.push(PreKey::new(state.next_id));
        }
        state.keys.extend(fresh.iter().cloned());
        Ok(fresh)
    }

    async fn uploaded_pre_key_count(&self) -> StoreResult<usize> {
        let state = self.state.lock().unwrap();
        Ok(state
            .keys
            .iter()
            .filter(|k| k.key_id <= state.uploaded_up_to)
            .count())
    }

    async fn mark_pre_keys_uploaded(&self, up_to_id: u32) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.uploaded_up_to = state.uploaded_up_to.max(up_to_id);
        Ok(())
    }

    async fn wipe(&self) -> StoreResult<()> {
        *self.state.lock().unwrap() = PreKeyState::default();
        Ok(())
    }
}

#[derive(Default, Clone)]
struct ContactInfo {
    push_name: Option<String>,
    business_name: Option<String>,
}

#[derive(Default)]
pub struct MemoryContactStore {
    contacts: Mutex<HashMap<JID, ContactInfo>>,
}

impl MemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn put_push_name(&self, jid: &JID, name: &str) -> StoreResult<(bool, Option<String>)> {
        let mut contacts = self.contacts.lock().unwrap();
        let entry = contacts.entry(jid.clone()).or_default();
        let previous = entry.push_name.clone();
        let changed = previous.as_deref() != Some(name);
        entry.push_name = Some(name.to_string());
        Ok((changed, previous))
    }

    async fn put_business_name(&self, jid: &JID, name: &str) -> StoreResult<()> {
        let mut contacts = self.contacts.lock().unwrap();
        contacts.entry(jid.clone()).or_default().business_name = Some(name.to_string());
        Ok(())
    }

    async fn wipe(&self) -> StoreResult<()> {
        self.contacts.lock().unwrap().clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryGroupStore {
    groups: Mutex<HashMap<JID, GroupMetadata>>,
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupStore for MemoryGroupStore {
    async fn put_group(&self, group: &GroupMetadata) -> StoreResult<()> {
        self.groups
            .lock()
            .unwrap()
            .insert(group.jid.clone(), group.clone());
        Ok(())
    }

    async fn wipe(&self) -> StoreResult<()> {
        self.groups.lock().unwrap().clear();
        Ok(())
    }
}
