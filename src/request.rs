//! Request/response correlation: request ids, response waiters and
//! [`Client::send_iq`].

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::binary::Node;
use crate::client::Client;
use crate::error::IqError;
use crate::types::JID;

/// Tag of the synthetic node delivered to waiters on teardown.
const DISCONNECT_TAG: &str = "xmlstreamend";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQueryType {
    Get,
    Set,
}

impl InfoQueryType {
    fn as_str(&self) -> &'static str {
        match self {
            InfoQueryType::Get => "get",
            InfoQueryType::Set => "set",
        }
    }
}

/// One IQ request. `id` defaults to a fresh request id; `timeout`
/// defaults to the configured request timeout.
pub struct InfoQuery<'a> {
    pub namespace: &'a str,
    pub query_type: InfoQueryType,
    pub to: JID,
    pub target: Option<JID>,
    pub id: Option<String>,
    pub content: Option<Vec<Node>>,
    pub timeout: Option<Duration>,
}

impl Client {
    /// Allocates a request id unique for the lifetime of this client:
    /// a random per-client prefix plus a monotonic counter.
    pub fn generate_request_id(&self) -> String {
        format!(
            "{}{}",
            self.unique_id,
            self.id_counter.fetch_add(1, Ordering::Relaxed) + 1
        )
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_request_count(&self) -> usize {
        self.response_waiters.lock().unwrap().len()
    }

    fn wait_response(&self, id: &str) -> oneshot::Receiver<Node> {
        let (tx, rx) = oneshot::channel();
        self.response_waiters
            .lock()
            .unwrap()
            .insert(id.to_string(), tx);
        rx
    }

    fn cancel_response(&self, id: &str) {
        self.response_waiters.lock().unwrap().remove(id);
    }

    /// Delivers a node to the waiter registered for its `id`, if any.
    /// Delivery is single-shot: the waiter entry is removed first.
    pub(crate) fn receive_response(&self, node: &Node) -> bool {
        let Some(id) = node.attr_str("id") else {
            return false;
        };
        let waiter = self.response_waiters.lock().unwrap().remove(id);
        match waiter {
            Some(tx) => {
                if tx.send(node.clone()).is_err() {
                    debug!(target: "wamd::recv", id, "response waiter was dropped before delivery");
                }
                true
            }
            None => false,
        }
    }

    /// Releases every outstanding waiter with a disconnect signal.
    pub(crate) fn clear_response_waiters(&self) {
        let waiters = std::mem::take(&mut *self.response_waiters.lock().unwrap());
        for (_, tx) in waiters {
            let _ = tx.send(Node::new(DISCONNECT_TAG));
        }
    }

    /// Sends an IQ and waits for the matching reply.
    ///
    /// Concurrent calls are independent: each caller gets exactly the
    /// reply whose id matches its request.
    pub async fn send_iq(&self, query: InfoQuery<'_>) -> Result<Node, IqError> {
        let id = query
            .id
            .unwrap_or_else(|| self.generate_request_id());
        let rx = self.wait_response(&id);

        let mut node = Node::new("iq");
        node.set_attr("id", id.clone());
        node.set_attr("type", query.query_type.as_str());
        node.set_attr("xmlns", query.namespace);
        node.set_attr("to", query.to);
        if let Some(target) = query.target {
            node.set_attr("target", target);
        }
        if let Some(content) = query.content {
            node.set_children(content);
        }

        if let Err(err) = self.send_node(node).await {
            self.cancel_response(&id);
            return Err(match err {
                crate::error::ClientError::Socket(e) => IqError::Socket(e),
                _ => IqError::NotConnected,
            });
        }

        let timeout = query.timeout.unwrap_or(self.config.request_timeout);
        let response = match tokio::time::timeout(timeout, rx).await {
            Err(_elapsed) => {
                self.cancel_response(&id);
                return Err(IqError::Timeout);
            }
            // The sender is only dropped when the client itself goes
            // away; treat it like a disconnect.
            Ok(Err(_recv)) => return Err(IqError::Disconnected),
            Ok(Ok(node)) => node,
        };

        if response.tag == DISCONNECT_TAG {
            return Err(IqError::Disconnected);
        }
        if let Some(error) = parse_iq_error(&response) {
            return Err(error);
        }
        Ok(response)
    }
}

/// Extracts a server-side error from a reply node, if it is one.
fn parse_iq_error(node: &Node) -> Option<IqError> {
    let error_child = node.child_by_tag("error");
    if error_child.is_none() && node.attr_str("type") != Some("error") {
        return None;
    }
    let code = error_child
        .and_then(|e| e.attr_int("code"))
        .unwrap_or_default() as u16;
    let text = error_child
        .and_then(|e| e.attr_str("text"))
        .unwrap_or_default()
        .to_string();
    Some(IqError::ServerError {
        code,
        text,
        raw: node.clone(),
    })
}
