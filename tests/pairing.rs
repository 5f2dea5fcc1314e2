//! Fresh-pair scenario: empty device store, QR exchange, pair success,
//! server-initiated 515 restart, authenticated reconnect.

mod common;

use std::time::Duration;

use common::*;
use wamd::binary::Node;
use wamd::store::Store;
use wamd::types::events::Event;
use wamd::types::JID;

const PAIRED_JID_USER: &str = "12345";

fn pair_device_iq(id: &str, refs: &[&str]) -> Node {
    let mut pair_device = Node::new("pair-device");
    for r in refs {
        let mut ref_node = Node::new("ref");
        ref_node.set_bytes(r.as_bytes().to_vec());
        pair_device.add_child(ref_node);
    }
    let mut iq = Node::new("iq");
    iq.set_attr("id", id);
    iq.set_attr("type", "set");
    iq.set_attr("from", JID::new("", "s.whatsapp.net"));
    iq.add_child(pair_device);
    iq
}

fn pair_success_iq(id: &str) -> Node {
    let mut device = Node::new("device");
    device.set_attr("jid", JID::new_ad(PAIRED_JID_USER, 0, 4));
    let mut platform = Node::new("platform");
    platform.set_attr("name", "chrome");
    let mut pair_success = Node::new("pair-success");
    pair_success.add_child(device);
    pair_success.add_child(platform);
    let mut iq = Node::new("iq");
    iq.set_attr("id", id);
    iq.set_attr("type", "set");
    iq.set_attr("from", JID::new("", "s.whatsapp.net"));
    iq.add_child(pair_success);
    iq
}

// S1: the full pairing dance ending in an authenticated session and a
// populated device store.
#[tokio::test]
async fn fresh_pair_flow() {
    let store = Store::new_in_memory();
    assert!(store.id().is_none());

    let (client, mut dials) = scripted_client(store.clone());
    let mut events = collect_events(&client);

    let server = tokio::spawn(async move {
        let conn = dials.recv().await.expect("first dial");
        let mut session = accept_session(conn).await;
        // An unpaired device registers rather than logging in.
        assert!(
            session.client_payload.device_pairing_data.is_some(),
            "expected registration payload from unpaired device"
        );
        session.send_node(&pair_device_iq("pair-1", &["2@ref0", "2@ref1", "2@ref2"])).await;
        (session, dials)
    });
    client.connect().await.expect("connect");
    let (mut session, mut dials) = server.await.unwrap();

    // The client acks the pair-device iq and emits the QR codes.
    let ack = session.recv_node_with_tag("iq").await;
    assert_eq!(ack.attr_str("id"), Some("pair-1"));
    assert_eq!(ack.attr_str("type"), Some("result"));

    let qr = expect_event(&mut events, "QR", |e| matches!(e, Event::QR(_))).await;
    let Event::QR(qr) = qr else { unreachable!() };
    assert_eq!(qr.codes.len(), 3);
    assert_eq!(qr.timeout, Duration::from_secs(60));
    for (i, code) in qr.codes.iter().enumerate() {
        assert!(code.starts_with(&format!("2@ref{i},")), "bad code {code:?}");
        // ref plus noise key, identity key and adv secret.
        assert_eq!(code.split(',').count(), 4);
    }

    // "Scan" the first code: the server reports pairing success.
    session.send_node(&pair_success_iq("pair-2")).await;

    let success = expect_event(&mut events, "PairSuccess", |e| {
        matches!(e, Event::PairSuccess(_))
    })
    .await;
    let Event::PairSuccess(success) = success else { unreachable!() };
    assert_eq!(success.id.user, PAIRED_JID_USER);
    assert_eq!(success.platform, "chrome");
    assert_eq!(store.id().map(|j| j.user), Some(PAIRED_JID_USER.to_string()));

    let ack = session.recv_node_with_tag("iq").await;
    assert_eq!(ack.attr_str("id"), Some("pair-2"));

    // The server restarts the stream; the client reconnects on its own.
    let mut stream_error = Node::new("stream:error");
    stream_error.set_attr("code", "515");
    session.send_node(&stream_error).await;

    let conn = tokio::time::timeout(Duration::from_secs(5), dials.recv())
        .await
        .expect("reconnect dial")
        .expect("dial channel open");
    let mut session2 = accept_session(conn).await;
    // Now paired, the device logs in instead of registering.
    assert!(session2.client_payload.device_pairing_data.is_none());
    assert_eq!(
        session2.client_payload.username,
        Some(PAIRED_JID_USER.parse::<u64>().unwrap())
    );
    session2.authenticate().await;

    expect_event(&mut events, "Connected", |e| matches!(e, Event::Connected)).await;
    assert!(client.is_logged_in());

    // No user-visible Disconnected event anywhere in the flow.
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, Event::Disconnected), "unexpected {event:?}");
    }
}

// A pair-success without a device jid produces PairError and leaves the
// store unpaired.
#[tokio::test]
async fn malformed_pair_success_emits_pair_error() {
    let store = Store::new_in_memory();
    let (client, mut dials) = scripted_client(store.clone());
    let mut events = collect_events(&client);

    let server = tokio::spawn(async move {
        let conn = dials.recv().await.expect("dial");
        let mut session = accept_session(conn).await;
        let mut pair_success = Node::new("pair-success");
        pair_success.add_child(Node::new("platform"));
        let mut iq = Node::new("iq");
        iq.set_attr("id", "pair-x");
        iq.set_attr("type", "set");
        iq.add_child(pair_success);
        session.send_node(&iq).await;
        session
    });
    client.connect().await.expect("connect");
    let _session = server.await.unwrap();

    expect_event(&mut events, "PairError", |e| matches!(e, Event::PairError(_))).await;
    assert!(store.id().is_none());
}
