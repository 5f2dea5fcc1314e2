//! User queries built on the usync IQ machinery: registration checks,
//! device lists and profile pictures.

use std::sync::Arc;

use tracing::warn;

use crate::binary::{AttrValue, Node};
use crate::client::Client;
use crate::error::{ClientError, IqError};
use crate::request::{InfoQuery, InfoQueryType};
use crate::types::{servers, JID, SERVER_JID};

/// Response to checking whether a phone number is registered.
#[derive(Debug, Clone)]
pub struct IsOnWhatsAppResponse {
    /// The query string that produced this entry.
    pub query: String,
    /// The canonical user JID.
    pub jid: JID,
    pub is_in: bool,
}

/// Where to download a profile picture or group photo.
#[derive(Debug, Clone, Default)]
pub struct ProfilePictureInfo {
    pub id: String,
    pub url: String,
    pub picture_type: String,
    pub direct_path: String,
}

impl Client {
    /// Checks which of the given phone numbers are registered. Numbers
    /// should be in international format with the `+` prefix.
    pub async fn is_on_whatsapp(
        self: &Arc<Self>,
        phones: &[String],
    ) -> Result<Vec<IsOnWhatsAppResponse>, ClientError> {
        let jids: Vec<JID> = phones
            .iter()
            .map(|p| JID::new(p.clone(), servers::LEGACY_USER))
            .collect();
        let list = self
            .usync(
                &jids,
                "query",
                "interactive",
                vec![
                    {
                        let mut business = Node::new("business");
                        business.add_child(Node::new("verified_name"));
                        business
                    },
                    Node::new("contact"),
                ],
            )
            .await?;

        let query_suffix = format!("@{}", servers::LEGACY_USER);
        let mut output = Vec::new();
        for child in list.children_by_tag("user") {
            let Some(jid) = child.attr_jid("jid") else {
                continue;
            };
            if let Some(verified_name) = child.child_by_path(&["business", "verified_name"]) {
                if let Some(name) = verified_name.attr_str("name") {
                    self.update_business_name(jid.clone(), name).await;
                }
            }
            let contact = child.child_by_tag("contact");
            let is_in = contact.and_then(|c| c.attr_str("type")) == Some("in");
            let query = contact
                .and_then(|c| c.bytes())
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            output.push(IsOnWhatsAppResponse {
                query: query.trim_end_matches(&query_suffix).to_string(),
                jid,
                is_in,
            });
        }
        Ok(output)
    }

    /// Fetches the device list for the given users. Input is regular
    /// JIDs; output is AD JIDs, excluding this device.
    pub async fn get_user_devices(
        self: &Arc<Self>,
        jids: &[JID],
    ) -> Result<Vec<JID>, ClientError> {
        let list = self
            .usync(
                jids,
                "query",
                "message",
                vec![Node::with_attrs("devices", [("version", "2".into())])],
            )
            .await?;

        let own_id = self.store.id();
        let mut devices = Vec::new();
        for user in list.children_by_tag("user") {
            let Some(user_jid) = user.attr_jid("jid") else {
                continue;
            };
            let Some(device_list) = user.child_by_path(&["devices", "device-list"]) else {
                warn!(target: "wamd", %user_jid, "usync response without device list");
                continue;
            };
            for device in device_list.children_by_tag("device") {
                let Some(device_id) = device.attr_int("id") else {
                    continue;
                };
                let device_jid = JID::new_ad(user_jid.user.clone(), 0, device_id as u16);
                if own_id.as_ref() != Some(&device_jid) {
                    devices.push(device_jid);
                }
            }
        }
        Ok(devices)
    }

    /// Fetches the URL of a user's profile picture or a group's photo.
    /// Returns `None` when the target has no picture set.
    pub async fn get_profile_picture_info(
        self: &Arc<Self>,
        jid: JID,
        preview: bool,
    ) -> Result<Option<ProfilePictureInfo>, ClientError> {
        let mut picture = Node::new("picture");
        picture.set_attr("query", "url");
        picture.set_attr("type", if preview { "preview" } else { "image" });

        let resp = self
            .send_iq(InfoQuery {
                namespace: "w:profile:picture",
                query_type: InfoQueryType::Get,
                to: jid,
                target: None,
                id: None,
                content: Some(vec![picture]),
                timeout: None,
            })
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(IqError::ServerError { code: 404, .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let Some(picture) = resp.child_by_tag("picture") else {
            return Ok(None);
        };
        Ok(Some(ProfilePictureInfo {
            id: picture.attr_str("id").unwrap_or_default().to_string(),
            url: picture.attr_str("url").unwrap_or_default().to_string(),
            picture_type: picture.attr_str("type").unwrap_or_default().to_string(),
            direct_path: picture
                .attr_str("direct_path")
                .unwrap_or_default()
                .to_string(),
        }))
    }

    /// Shared usync query scaffolding. The `sid` reuses the session's
    /// request-id space.
    async fn usync(
        self: &Arc<Self>,
        jids: &[JID],
        mode: &str,
        context: &str,
        query: Vec<Node>,
    ) -> Result<Node, ClientError> {
        let mut user_list = Vec::with_capacity(jids.len());
        for jid in jids {
            let mut user = Node::new("user");
            match jid.server.as_str() {
                servers::LEGACY_USER => {
                    let mut contact = Node::new("contact");
                    contact.set_bytes(jid.to_string().into_bytes());
                    user.add_child(contact);
                }
                servers::DEFAULT_USER => {
                    user.set_attr("jid", jid.to_non_ad());
                }
                other => {
                    warn!(target: "wamd", server = other, "unknown user server in usync query");
                    continue;
                }
            }
            user_list.push(user);
        }

        let mut usync = Node::with_attrs(
            "usync",
            [
                ("sid", AttrValue::String(self.generate_request_id())),
                ("mode", mode.into()),
                ("last", "true".into()),
                ("index", "0".into()),
                ("context", context.into()),
            ],
        );
        let mut query_node = Node::new("query");
        query_node.set_children(query);
        let mut list_node = Node::new("list");
        list_node.set_children(user_list);
        usync.set_children(vec![query_node, list_node]);

        let resp = self
            .send_iq(InfoQuery {
                namespace: "usync",
                query_type: InfoQueryType::Get,
                to: SERVER_JID.clone(),
                target: None,
                id: None,
                content: Some(vec![usync]),
                timeout: None,
            })
            .await?;

        resp.child_by_path(&["usync", "list"])
            .cloned()
            .ok_or_else(|| {
                IqError::ServerError {
                    code: 0,
                    text: "missing usync list in response".to_string(),
                    raw: resp.clone(),
                }
                .into()
            })
    }
}
