//! Handlers for connection-level nodes (`success`, `failure`,
//! `stream:error`, `ib`) and the small post-connect senders.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::binary::Node;
use crate::client::Client;
use crate::error::ClientError;
use crate::request::{InfoQuery, InfoQueryType};
use crate::types::events::{ConnectFailure, Event, LoggedOut, StreamError};
use crate::types::{ChatPresence, Presence, SERVER_JID};

impl Client {
    pub(crate) async fn handle_stream_error(self: &Arc<Self>, node: Node) {
        self.set_logged_in(false);
        let code = node.attr_str("code").unwrap_or_default().to_string();
        let conflict_type = node
            .child_by_tag("conflict")
            .and_then(|c| c.attr_str("type"))
            .unwrap_or_default()
            .to_string();

        match code.as_str() {
            "515" => {
                // Raised before the spawn: the server may tear the
                // transport down right after this frame, and the close
                // must already read as expected by then.
                self.expect_disconnect();
                info!(target: "wamd", "got 515 code, reconnecting");
                tokio::spawn(self.clone().reconnect_after_stream_restart());
            }
            "401" if conflict_type == "device_removed" => {
                self.expect_disconnect();
                info!(
                    target: "wamd",
                    "got device removed stream error, sending LoggedOut event and deleting session"
                );
                let cli = self.clone();
                tokio::spawn(async move {
                    cli.dispatch_event(&Event::LoggedOut(LoggedOut { on_connect: false }))
                });
                if let Err(err) = self.store.delete().await {
                    warn!(target: "wamd", %err, "failed to delete store after device_removed error");
                }
            }
            _ => {
                error!(target: "wamd", "unknown stream error: {node}");
                let cli = self.clone();
                let event = Event::StreamError(StreamError { code, raw: node });
                tokio::spawn(async move { cli.dispatch_event(&event) });
            }
        }
    }

    pub(crate) async fn handle_connect_failure(self: &Arc<Self>, node: Node) {
        let reason = node.attr_str("reason").unwrap_or_default().to_string();
        if reason == "401" {
            self.expect_disconnect();
            info!(
                target: "wamd",
                "got 401 connect failure, sending LoggedOut event and deleting session"
            );
            let cli = self.clone();
            tokio::spawn(async move {
                cli.dispatch_event(&Event::LoggedOut(LoggedOut { on_connect: true }))
            });
            if let Err(err) = self.store.delete().await {
                warn!(target: "wamd", %err, "failed to delete store after 401 failure");
            }
        } else {
            warn!(target: "wamd", "unknown connect failure: {node}");
            let cli = self.clone();
            let event = Event::ConnectFailure(ConnectFailure { reason, raw: node });
            tokio::spawn(async move { cli.dispatch_event(&event) });
        }
    }

    pub(crate) async fn handle_connect_success(self: &Arc<Self>, _node: Node) {
        self.note_successful_connect();
        let cli = self.clone();
        tokio::spawn(async move {
            cli.refill_pre_keys_if_needed().await;
            if let Err(err) = cli.set_passive(false).await {
                warn!(target: "wamd", %err, "failed to send post-connect passive IQ");
            }
            cli.dispatch_event(&Event::Connected);
        });
    }

    pub(crate) async fn handle_ib(self: &Arc<Self>, node: Node) {
        let children = node.children();
        if children.len() == 1 && children[0].tag == "downgrade_webclient" {
            let cli = self.clone();
            tokio::spawn(async move { cli.dispatch_event(&Event::QRScannedWithoutMultidevice) });
        }
    }

    /// Tells the server whether this device is passive (no live
    /// delivery) or active.
    pub async fn set_passive(&self, passive: bool) -> Result<(), ClientError> {
        let tag = if passive { "passive" } else { "active" };
        self.send_iq(InfoQuery {
            namespace: "passive",
            query_type: InfoQueryType::Set,
            to: SERVER_JID.clone(),
            target: None,
            id: None,
            content: Some(vec![Node::new(tag)]),
            timeout: None,
        })
        .await?;
        Ok(())
    }

    /// Updates the user's presence status.
    ///
    /// Call this at least once after connecting so the server has the
    /// push name; without one other users see "-" as the name.
    pub async fn send_presence(&self, state: Presence) -> Result<(), ClientError> {
        let push_name = self.store.push_name();
        if push_name.is_empty() {
            return Err(ClientError::NoPushName);
        }
        self.send_node(Node::with_attrs(
            "presence",
            [("name", push_name.into()), ("type", state.as_str().into())],
        ))
        .await
    }

    /// Updates the typing status in a specific chat. Unsolicited: the
    /// node carries no request id.
    pub async fn send_chat_presence(
        &self,
        state: ChatPresence,
        jid: crate::types::JID,
    ) -> Result<(), ClientError> {
        let own_id = self.store.id().ok_or(ClientError::NotLoggedIn)?;
        let mut node = Node::with_attrs(
            "chatstate",
            [("from", own_id.into()), ("to", jid.into())],
        );
        node.add_child(Node::new(state.as_str()));
        self.send_node(node).await
    }
}
