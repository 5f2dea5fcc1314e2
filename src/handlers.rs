//! Handlers for content-bearing nodes: messages, receipts, chat states
//! and notifications. Decryption belongs to the Signal layer; these
//! handlers parse envelope metadata and fan out typed events.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::binary::Node;
use crate::client::Client;
use crate::types::events::{
    ChatPresence, ChatPresenceState, Event, GroupInfo, Message, MessageInfo, Picture, PushName,
    Receipt, ReceiptType, UndecryptableMessage,
};
use crate::types::{GroupMetadata, JID};

fn parse_timestamp(node: &Node) -> Option<DateTime<Utc>> {
    node.attr_int("t")
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

impl Client {
    pub(crate) fn parse_message_info(&self, node: &Node) -> Option<MessageInfo> {
        let chat = node.attr_jid("from")?;
        let is_group = chat.is_group();
        let sender = if is_group || chat.is_broadcast_list() {
            node.attr_jid("participant").unwrap_or_else(|| chat.clone())
        } else {
            chat.clone()
        };
        let is_from_me = self
            .store
            .id()
            .is_some_and(|own| own.user == sender.user);

        Some(MessageInfo {
            id: node.attr_str("id").unwrap_or_default().to_string(),
            chat,
            sender,
            is_from_me,
            is_group,
            push_name: node.attr_str("notify").map(str::to_string),
            timestamp: parse_timestamp(node),
        })
    }

    pub(crate) async fn handle_message(self: &Arc<Self>, node: Node) {
        let Some(info) = self.parse_message_info(&node) else {
            warn!(target: "wamd::recv", "message node without sender: {node}");
            return;
        };

        if let Some(push_name) = &info.push_name {
            if !info.is_from_me {
                self.update_push_name(info.sender.clone(), push_name.clone())
                    .await;
            }
        }

        if node.child_by_tag("enc").is_some() {
            self.dispatch_event(&Event::Message(Message { info, raw: node }));
        } else {
            debug!(target: "wamd::recv", id = %info.id, "message node without ciphertext");
            self.dispatch_event(&Event::UndecryptableMessage(UndecryptableMessage {
                info,
                is_unavailable: true,
            }));
        }
    }

    pub(crate) async fn handle_receipt(self: &Arc<Self>, node: Node) {
        let Some(chat) = node.attr_jid("from") else {
            warn!(target: "wamd::recv", "receipt node without sender: {node}");
            return;
        };
        let sender = if chat.is_group() {
            node.attr_jid("participant").unwrap_or_else(|| chat.clone())
        } else {
            chat.clone()
        };
        let receipt_type = ReceiptType::from(node.attr_str("type").unwrap_or_default());

        let mut message_ids = vec![node.attr_str("id").unwrap_or_default().to_string()];
        if let Some(list) = node.child_by_path(&["list"]) {
            message_ids.extend(
                list.children_by_tag("item")
                    .filter_map(|i| i.attr_str("id"))
                    .map(str::to_string),
            );
        }

        if receipt_type == ReceiptType::Retry {
            let retries = self.increment_message_retry(&message_ids[0]);
            debug!(
                target: "wamd::recv",
                id = %message_ids[0], retries, "received retry receipt"
            );
        }

        self.dispatch_event(&Event::Receipt(Receipt {
            message_ids,
            chat,
            sender,
            receipt_type,
            timestamp: parse_timestamp(&node),
        }));
    }

    pub(crate) async fn handle_chat_state(self: &Arc<Self>, node: Node) {
        let Some(chat) = node.attr_jid("from") else {
            warn!(target: "wamd::recv", "chatstate node without sender: {node}");
            return;
        };
        let sender = node.attr_jid("participant").unwrap_or_else(|| chat.clone());
        let state = match node.children().first().map(|c| c.tag.as_str()) {
            Some("composing") => ChatPresenceState::Composing,
            Some("paused") => ChatPresenceState::Paused,
            Some("recording") => ChatPresenceState::Recording,
            other => {
                debug!(target: "wamd::recv", ?other, "unknown chat state");
                return;
            }
        };
        self.dispatch_event(&Event::ChatPresence(ChatPresence { chat, sender, state }));
    }

    pub(crate) async fn handle_notification(self: &Arc<Self>, node: Node) {
        match node.attr_str("type") {
            Some("picture") => self.handle_picture_notification(&node),
            Some("w:gp2") => self.handle_group_notification(&node).await,
            other => {
                debug!(target: "wamd::recv", ?other, "unhandled notification type");
            }
        }
    }

    fn handle_picture_notification(self: &Arc<Self>, node: &Node) {
        let Some(jid) = node.attr_jid("from") else {
            return;
        };
        let author = node.attr_jid("author").unwrap_or_else(|| jid.clone());
        let remove = node.child_by_tag("remove").is_some();
        let picture_id = node
            .child_by_tag("set")
            .or_else(|| node.child_by_tag("delete"))
            .and_then(|c| c.attr_str("id"))
            .unwrap_or_default()
            .to_string();
        self.dispatch_event(&Event::Picture(Picture {
            jid,
            author,
            timestamp: parse_timestamp(node),
            remove,
            picture_id,
        }));
    }

    async fn handle_group_notification(self: &Arc<Self>, node: &Node) {
        let Some(jid) = node.attr_jid("from") else {
            return;
        };
        let mut change = GroupInfo {
            jid: jid.clone(),
            notify: node.attr_str("notify").unwrap_or_default().to_string(),
            sender: node.attr_jid("participant"),
            timestamp: parse_timestamp(node),
            ..Default::default()
        };

        for child in node.children() {
            let participants = || -> Vec<JID> {
                child
                    .children_by_tag("participant")
                    .filter_map(|p| p.attr_jid("jid"))
                    .collect()
            };
            match child.tag.as_str() {
                "add" => change.join = participants(),
                "remove" => change.leave = participants(),
                "promote" => change.promote = participants(),
                "demote" => change.demote = participants(),
                "subject" => {
                    change.new_subject = child.attr_str("subject").map(str::to_string);
                }
                _ => change.unknown_changes.push(child.clone()),
            }
        }

        if let Some(subject) = &change.new_subject {
            let metadata = GroupMetadata {
                jid: jid.clone(),
                name: subject.clone(),
                ..Default::default()
            };
            if let Err(err) = self.store.groups.put_group(&metadata).await {
                warn!(target: "wamd", %err, "failed to store group metadata");
            }
        }

        self.dispatch_event(&Event::GroupInfo(change));
    }

    /// Records a push name, dispatching [`Event::PushName`] when it
    /// changed.
    pub(crate) async fn update_push_name(self: &Arc<Self>, user: JID, name: String) {
        let user = user.to_non_ad();
        match self.store.contacts.put_push_name(&user, &name).await {
            Err(err) => {
                warn!(target: "wamd", %err, %user, "failed to save push name");
            }
            Ok((true, previous)) => {
                debug!(
                    target: "wamd",
                    %user, ?previous, new = %name, "push name changed, dispatching event"
                );
                self.dispatch_event(&Event::PushName(PushName {
                    jid: user,
                    old_push_name: previous,
                    new_push_name: name,
                }));
            }
            Ok((false, _)) => {}
        }
    }

    /// Records a verified business name.
    pub(crate) async fn update_business_name(self: &Arc<Self>, user: JID, name: &str) {
        if let Err(err) = self.store.contacts.put_business_name(&user, name).await {
            warn!(target: "wamd", %err, %user, "failed to save business name");
        }
    }
}
