//! Device store: identity snapshot plus the persistence interfaces the
//! runtime depends on.

mod device;
mod memory;
mod traits;

use std::sync::{Arc, RwLock};

pub use device::Device;
pub use memory::{MemoryContactStore, MemoryGroupStore, MemoryPreKeyStore};
pub use traits::{ContactStore, GroupStore, PreKeyStore, StoreError, StoreResult};

use crate::types::JID;

/// Container tying the device identity to its sub-stores. Held by the
/// client behind an `Arc`; `delete` drops all session state, which is
/// what "unpaired" means to the reconnect logic.
pub struct Store {
    device: RwLock<Device>,
    pub pre_keys: Arc<dyn PreKeyStore>,
    pub contacts: Arc<dyn ContactStore>,
    pub groups: Arc<dyn GroupStore>,
}

impl Store {
    pub fn new(
        device: Device,
        pre_keys: Arc<dyn PreKeyStore>,
        contacts: Arc<dyn ContactStore>,
        groups: Arc<dyn GroupStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            device: RwLock::new(device),
            pre_keys,
            contacts,
            groups,
        })
    }

    /// Fresh unpaired device with in-memory sub-stores.
    pub fn new_in_memory() -> Arc<Self> {
        Self::new(
            Device::generate(),
            Arc::new(MemoryPreKeyStore::new()),
            Arc::new(MemoryContactStore::new()),
            Arc::new(MemoryGroupStore::new()),
        )
    }

    /// The device JID; `Some` means paired.
    pub fn id(&self) -> Option<JID> {
        self.device.read().unwrap().id.clone()
    }

    pub fn push_name(&self) -> String {
        self.device.read().unwrap().push_name.clone()
    }

    pub fn set_push_name(&self, name: impl Into<String>) {
        self.device.write().unwrap().push_name = name.into();
    }

    /// Records the identity assigned by a successful pairing.
    pub fn set_pairing(&self, id: JID, platform: String, business_name: String) {
        let mut device = self.device.write().unwrap();
        device.id = Some(id);
        device.platform = platform;
        device.business_name = business_name;
    }

    /// Copy of the current identity, used by the handshake.
    pub fn device_snapshot(&self) -> Device {
        self.device.read().unwrap().clone()
    }

    /// Drops all session state: fresh unpaired identity and wiped
    /// sub-stores.
    pub async fn delete(&self) -> StoreResult<()> {
        self.pre_keys.wipe().await?;
        self.contacts.wipe().await?;
        self.groups.wipe().await?;
        *self.device.write().unwrap() = Device::generate();
        Ok(())
    }
}
