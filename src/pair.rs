//! QR pairing: the server-driven exchange that links an unpaired
//! device to a phone.
//!
//! After an unpaired handshake the server sends an `iq` with a
//! `pair-device` child carrying ref tokens. Each token becomes one QR
//! code string. Once the phone scans a code, a `pair-success` iq
//! arrives; the device identity is stored and the server closes the
//! stream with code 515, letting the reconnect loop establish the
//! authenticated session.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, info, warn};

use crate::binary::Node;
use crate::client::Client;
use crate::types::events::{Event, PairError, PairSuccess, QR};

/// How long the first QR code is valid before the embedder should show
/// the next one.
const QR_CODE_TIMEOUT: Duration = Duration::from_secs(60);

impl Client {
    /// Handles inbound `iq` nodes that are not replies: server ping and
    /// the pairing exchange.
    pub(crate) async fn handle_iq(self: &Arc<Self>, node: Node) {
        if self.handle_ping(&node).await {
            return;
        }
        if let Some(pair_device) = node.child_by_tag("pair-device") {
            let refs: Vec<String> = pair_device
                .children_by_tag("ref")
                .filter_map(|r| r.bytes())
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .collect();
            self.handle_pair_device(&node, refs).await;
            return;
        }
        if let Some(pair_success) = node.child_by_tag("pair-success") {
            let pair_success = pair_success.clone();
            self.handle_pair_success(&node, &pair_success).await;
            return;
        }
        debug!(target: "wamd::recv", "unhandled iq: {node}");
    }

    async fn handle_ping(self: &Arc<Self>, node: &Node) -> bool {
        if node.attr_str("type") != Some("get") || node.child_by_tag("ping").is_none() {
            return false;
        }
        debug!(target: "wamd", "received ping, sending pong");
        if let Err(err) = self.ack_iq(node).await {
            warn!(target: "wamd", %err, "failed to send pong");
        }
        true
    }

    async fn handle_pair_device(self: &Arc<Self>, node: &Node, refs: Vec<String>) {
        if let Err(err) = self.ack_iq(node).await {
            warn!(target: "wamd", %err, "failed to ack pair-device iq");
        }
        if refs.is_empty() {
            warn!(target: "wamd", "pair-device iq contained no ref tokens");
            return;
        }

        let device = self.store.device_snapshot();
        let noise_pub = BASE64.encode(device.noise_key.public);
        let identity_pub = BASE64.encode(device.identity_key.public);
        let adv_secret = BASE64.encode(device.adv_secret_key);

        let codes: Vec<String> = refs
            .into_iter()
            .map(|r| format!("{r},{noise_pub},{identity_pub},{adv_secret}"))
            .collect();
        info!(target: "wamd", count = codes.len(), "pairing started, emitting QR codes");
        self.dispatch_event(&Event::QR(QR {
            codes,
            timeout: QR_CODE_TIMEOUT,
        }));
    }

    async fn handle_pair_success(self: &Arc<Self>, node: &Node, pair_success: &Node) {
        let business_name = pair_success
            .child_by_tag("biz")
            .and_then(|b| b.attr_str("name"))
            .unwrap_or_default()
            .to_string();
        let platform = pair_success
            .child_by_tag("platform")
            .and_then(|p| p.attr_str("name"))
            .unwrap_or_default()
            .to_string();

        let Some(id) = pair_success
            .child_by_tag("device")
            .and_then(|d| d.attr_jid("jid"))
        else {
            warn!(target: "wamd", "pair-success without device jid");
            self.dispatch_event(&Event::PairError(PairError {
                id: Default::default(),
                business_name,
                platform,
                error: "missing device jid in pair-success".to_string(),
            }));
            return;
        };

        self.store
            .set_pairing(id.clone(), platform.clone(), business_name.clone());
        if let Err(err) = self.ack_iq(node).await {
            warn!(target: "wamd", %err, "failed to ack pair-success iq");
        }
        info!(target: "wamd", %id, "successfully paired");
        self.dispatch_event(&Event::PairSuccess(PairSuccess {
            id,
            business_name,
            platform,
        }));
        // The server follows up with a 515 stream error; the reconnect
        // cycle it triggers establishes the authenticated session.
    }

    /// Replies to a server-initiated iq with an empty `result`.
    async fn ack_iq(&self, node: &Node) -> Result<(), crate::error::ClientError> {
        let mut reply = Node::new("iq");
        if let Some(id) = node.attr_str("id") {
            reply.set_attr("id", id);
        }
        if let Some(from) = node.attr_jid("from") {
            reply.set_attr("to", from);
        }
        reply.set_attr("type", "result");
        self.send_node(reply).await
    }
}

/// Renders a pairing code as a terminal-friendly unicode QR image.
pub fn render_qr_unicode(data: &str) -> Option<String> {
    use qrcode::render::unicode;
    use qrcode::QrCode;

    let code = QrCode::new(data.as_bytes()).ok()?;
    Some(
        code.render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .build(),
    )
}
