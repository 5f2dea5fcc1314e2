//! One-time prekey upkeep: querying the server-side count and refilling
//! the pool after login when either side runs low.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::binary::{AttrValue, Node};
use crate::client::Client;
use crate::crypto::PreKey;
use crate::error::{ClientError, IqError};
use crate::request::{InfoQuery, InfoQueryType};
use crate::types::SERVER_JID;

/// Refill threshold, checked against both the local store and the
/// server's view.
pub const MIN_PRE_KEY_COUNT: usize = 5;
/// How many prekeys one refill uploads.
pub const WANTED_PRE_KEY_COUNT: usize = 30;

impl Client {
    /// Post-connect task: tops up prekeys when either the local store
    /// or the server reports fewer than [`MIN_PRE_KEY_COUNT`].
    pub(crate) async fn refill_pre_keys_if_needed(self: &Arc<Self>) {
        let local_count = match self.store.pre_keys.uploaded_pre_key_count().await {
            Ok(count) => count,
            Err(err) => {
                error!(target: "wamd", %err, "failed to get number of prekeys in store");
                return;
            }
        };
        let server_count = match self.get_server_pre_key_count().await {
            Ok(count) => count,
            Err(err) => {
                warn!(target: "wamd", %err, "failed to get number of prekeys on server");
                return;
            }
        };
        debug!(
            target: "wamd",
            local_count, server_count, "prekey counts after connect"
        );
        if local_count < MIN_PRE_KEY_COUNT || server_count < MIN_PRE_KEY_COUNT {
            if let Err(err) = self.upload_pre_keys().await {
                error!(target: "wamd", %err, "failed to upload prekeys");
            }
        }
    }

    /// Asks the server how many one-time prekeys it still holds for us.
    pub async fn get_server_pre_key_count(&self) -> Result<usize, IqError> {
        let resp = self
            .send_iq(InfoQuery {
                namespace: "encrypt",
                query_type: InfoQueryType::Get,
                to: SERVER_JID.clone(),
                target: None,
                id: None,
                content: Some(vec![Node::new("count")]),
                timeout: None,
            })
            .await?;
        Ok(resp
            .child_by_tag("count")
            .and_then(|c| c.attr_int("value"))
            .unwrap_or(0) as usize)
    }

    /// Generates and uploads a batch of fresh prekeys. Serialized by a
    /// dedicated lock so at most one refill runs at a time.
    pub async fn upload_pre_keys(self: &Arc<Self>) -> Result<(), ClientError> {
        let _guard = self.upload_pre_keys_lock.lock().await;

        let fresh = self
            .store
            .pre_keys
            .generate_pre_keys(WANTED_PRE_KEY_COUNT)
            .await?;
        if fresh.is_empty() {
            return Ok(());
        }
        let last_id = fresh.last().map(|k| k.key_id).unwrap_or_default();

        let device = self.store.device_snapshot();
        let content = vec![
            Node::with_attrs(
                "registration",
                [("id", AttrValue::Int(device.registration_id as i64))],
            ),
            {
                let mut identity = Node::new("identity");
                identity.set_bytes(device.identity_key.public.to_vec());
                identity
            },
            {
                let mut list = Node::new("list");
                list.set_children(fresh.iter().map(pre_key_node).collect());
                list
            },
            signed_pre_key_node(&device.signed_pre_key),
        ];

        self.send_iq(InfoQuery {
            namespace: "encrypt",
            query_type: InfoQueryType::Set,
            to: SERVER_JID.clone(),
            target: None,
            id: None,
            content: Some(content),
            timeout: None,
        })
        .await?;

        if let Err(err) = self.store.pre_keys.mark_pre_keys_uploaded(last_id).await {
            warn!(target: "wamd", %err, "failed to mark prekeys as uploaded");
        }
        debug!(target: "wamd", count = fresh.len(), "uploaded prekeys");
        Ok(())
    }
}

fn pre_key_node(key: &PreKey) -> Node {
    let mut node = Node::with_attrs("key", [("id", AttrValue::Int(key.key_id as i64))]);
    let mut value = Node::new("value");
    value.set_bytes(key.key_pair.public.to_vec());
    node.add_child(value);
    node
}

fn signed_pre_key_node(key: &PreKey) -> Node {
    let mut node = pre_key_node(key);
    node.tag = "skey".to_string();
    if let Some(signature) = key.signature {
        let mut sig = Node::new("signature");
        sig.set_bytes(signature.to_vec());
        node.add_child(sig);
    }
    node
}
