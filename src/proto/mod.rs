//! Protobuf payloads exchanged during the Noise handshake.

use prost::Message;

/// Envelope for the three handshake messages.
#[derive(Clone, PartialEq, Message)]
pub struct HandshakeMessage {
    #[prost(message, optional, tag = "2")]
    pub client_hello: Option<ClientHello>,
    #[prost(message, optional, tag = "3")]
    pub server_hello: Option<ServerHello>,
    #[prost(message, optional, tag = "4")]
    pub client_finish: Option<ClientFinish>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientHello {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub ephemeral: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ServerHello {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub ephemeral: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub r#static: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub payload: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientFinish {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub r#static: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub payload: Option<Vec<u8>>,
}

/// Inner payload of the client-finish message: either a login for a
/// paired device or a registration carrying pairing data.
#[derive(Clone, PartialEq, Message)]
pub struct ClientPayload {
    #[prost(uint64, optional, tag = "1")]
    pub username: Option<u64>,
    #[prost(bool, optional, tag = "3")]
    pub passive: Option<bool>,
    #[prost(string, optional, tag = "7")]
    pub push_name: Option<String>,
    #[prost(uint32, optional, tag = "18")]
    pub device: Option<u32>,
    #[prost(message, optional, tag = "19")]
    pub device_pairing_data: Option<DevicePairingData>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DevicePairingData {
    #[prost(uint32, optional, tag = "1")]
    pub registration_id: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub identity_key: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "3")]
    pub signed_pre_key_id: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub signed_pre_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub signed_pre_key_signature: Option<Vec<u8>>,
}

/// Payload for a device that is already paired.
pub fn login_payload(username: u64, device: u32, push_name: Option<&str>) -> ClientPayload {
    ClientPayload {
        username: Some(username),
        passive: Some(true),
        push_name: push_name.map(str::to_string),
        device: Some(device),
        device_pairing_data: None,
    }
}

/// Payload for a device registering for its first pair.
pub fn registration_payload(
    registration_id: u32,
    identity_key: &[u8; 32],
    signed_pre_key_id: u32,
    signed_pre_key: &[u8; 32],
    signed_pre_key_signature: &[u8; 64],
) -> ClientPayload {
    ClientPayload {
        username: None,
        passive: Some(false),
        push_name: None,
        device: None,
        device_pairing_data: Some(DevicePairingData {
            registration_id: Some(registration_id),
            identity_key: Some(identity_key.to_vec()),
            signed_pre_key_id: Some(signed_pre_key_id),
            signed_pre_key: Some(signed_pre_key.to_vec()),
            signed_pre_key_signature: Some(signed_pre_key_signature.to_vec()),
        }),
    }
}
