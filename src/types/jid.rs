//! WhatsApp JID (Jabber ID) types.
//!
//! JIDs identify users, groups and companion devices. A plain JID is
//! `user@server`; an AD JID additionally carries agent and device parts
//! (`user.agent:device@server`) and addresses one specific device.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Known JID servers.
pub mod servers {
    pub const DEFAULT_USER: &str = "s.whatsapp.net";
    pub const GROUP: &str = "g.us";
    pub const LEGACY_USER: &str = "c.us";
    pub const BROADCAST: &str = "broadcast";
    pub const HIDDEN_USER: &str = "lid";
}

/// MessageID is the internal ID of a WhatsApp message.
pub type MessageID = String;

/// JID represents a WhatsApp user, group or device ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct JID {
    pub user: String,
    pub agent: u8,
    pub device: u16,
    pub server: String,
}

impl JID {
    /// Creates a new regular (non-AD) JID.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
            ..Default::default()
        }
    }

    /// Creates a new AD JID addressing a specific companion device.
    pub fn new_ad(user: impl Into<String>, agent: u8, device: u16) -> Self {
        Self {
            user: user.into(),
            agent,
            device,
            server: servers::DEFAULT_USER.to_string(),
        }
    }

    /// Returns a copy with the agent and device parts stripped.
    pub fn to_non_ad(&self) -> Self {
        Self {
            user: self.user.clone(),
            server: self.server.clone(),
            ..Default::default()
        }
    }

    /// Whether this is an AD JID (has an agent or device part).
    pub fn is_ad(&self) -> bool {
        self.agent != 0 || self.device != 0
    }

    pub fn is_group(&self) -> bool {
        self.server == servers::GROUP
    }

    pub fn is_broadcast_list(&self) -> bool {
        self.server == servers::BROADCAST && self.user != "status"
    }

    /// Returns true if the JID has no server part.
    pub fn is_empty(&self) -> bool {
        self.server.is_empty()
    }
}

impl fmt::Display for JID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.agent > 0 {
            write!(f, "{}.{}:{}@{}", self.user, self.agent, self.device, self.server)
        } else if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else if !self.user.is_empty() {
            write!(f, "{}@{}", self.user, self.server)
        } else {
            write!(f, "{}", self.server)
        }
    }
}

/// Error returned when a JID string fails to parse.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("failed to parse JID: {0}")]
pub struct JIDParseError(pub String);

impl FromStr for JID {
    type Err = JIDParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user_part, server) = match s.split_once('@') {
            Some((u, srv)) => (u, srv),
            None => return Ok(JID::new("", s)),
        };

        let mut jid = JID::new(user_part, server);

        if let Some((user, ad)) = user_part.split_once('.') {
            // user.agent:device@server
            jid.user = user.to_string();
            let (agent, device) = match ad.split_once(':') {
                Some((a, d)) => (a, Some(d)),
                None => (ad, None),
            };
            jid.agent = agent
                .parse()
                .map_err(|_| JIDParseError(format!("invalid agent in {s:?}")))?;
            if let Some(device) = device {
                jid.device = device
                    .parse()
                    .map_err(|_| JIDParseError(format!("invalid device in {s:?}")))?;
            }
        } else if let Some((user, device)) = user_part.split_once(':') {
            // user:device@server
            jid.user = user.to_string();
            jid.device = device
                .parse()
                .map_err(|_| JIDParseError(format!("invalid device in {s:?}")))?;
        }

        Ok(jid)
    }
}

lazy_static::lazy_static! {
    /// The JID of the WhatsApp server itself, target of most IQs.
    pub static ref SERVER_JID: JID = JID::new("", servers::DEFAULT_USER);
    pub static ref GROUP_SERVER_JID: JID = JID::new("", servers::GROUP);
    pub static ref BROADCAST_SERVER_JID: JID = JID::new("", servers::BROADCAST);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_jid() {
        let jid: JID = "1234567890@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.server, servers::DEFAULT_USER);
        assert!(!jid.is_ad());
    }

    #[test]
    fn parse_device_jid() {
        let jid: JID = "1234567890:12@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.device, 12);
        assert!(jid.is_ad());
        assert_eq!(jid.to_non_ad().to_string(), "1234567890@s.whatsapp.net");
    }

    #[test]
    fn parse_ad_jid() {
        let jid: JID = "1234567890.1:2@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.agent, 1);
        assert_eq!(jid.device, 2);
        assert_eq!(jid.to_string(), "1234567890.1:2@s.whatsapp.net");
    }

    #[test]
    fn parse_server_only() {
        let jid: JID = "g.us".parse().unwrap();
        assert!(jid.user.is_empty());
        assert!(jid.is_group());
    }

    #[test]
    fn reject_garbage_device() {
        assert!("123:abc@s.whatsapp.net".parse::<JID>().is_err());
    }
}
