//! API-level flows against the scripted server: keepalive pings,
//! presence senders, logout and the usync-backed queries.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use tokio::sync::mpsc;
use wamd::binary::{AttrValue, Node};
use wamd::store::Store;
use wamd::types::events::Event;
use wamd::types::{ChatPresence, JID, Presence};
use wamd::{Client, ClientConfig, ClientError};

fn paired_store() -> Arc<Store> {
    let store = Store::new_in_memory();
    store.set_pairing(
        JID::new_ad("123456789", 0, 7),
        "web".to_string(),
        String::new(),
    );
    store
}

async fn connect_and_authenticate(
    client: &Arc<Client>,
    dials: &mut mpsc::UnboundedReceiver<ServerConn>,
) -> ServerSession {
    let (connected, session) = tokio::join!(client.connect(), async {
        let conn = dials.recv().await.expect("dial");
        let mut session = accept_session(conn).await;
        session.authenticate().await;
        session
    });
    connected.expect("connect");
    session
}

#[tokio::test]
async fn keepalive_pings_flow_on_schedule() {
    let mut config = ClientConfig::default();
    config.keep_alive_interval = Duration::from_millis(300);
    config.request_timeout = Duration::from_secs(5);
    let (client, mut dials) = scripted_client_with_config(Store::new_in_memory(), config);
    let mut session = connect_and_authenticate(&client, &mut dials).await;

    for _ in 0..2 {
        let ping = session.recv_node_with_tag("iq").await;
        assert_eq!(ping.attr_str("xmlns"), Some("w:p"));
        assert!(ping.child_by_tag("ping").is_some());
        session.send_node(&result_for(&ping)).await;
    }
}

#[tokio::test]
async fn server_ping_gets_pong() {
    let (client, mut dials) = scripted_client(Store::new_in_memory());
    let mut session = connect_and_authenticate(&client, &mut dials).await;

    let mut ping = Node::new("iq");
    ping.set_attr("id", "srv-ping-1");
    ping.set_attr("type", "get");
    ping.set_attr("from", JID::new("", "s.whatsapp.net"));
    ping.add_child(Node::new("ping"));
    session.send_node(&ping).await;

    let pong = session.recv_node_with_tag("iq").await;
    assert_eq!(pong.attr_str("id"), Some("srv-ping-1"));
    assert_eq!(pong.attr_str("type"), Some("result"));
}

#[tokio::test]
async fn presence_requires_push_name() {
    let store = paired_store();
    let (client, mut dials) = scripted_client(store.clone());
    let mut session = connect_and_authenticate(&client, &mut dials).await;

    let err = client.send_presence(Presence::Available).await.unwrap_err();
    assert!(matches!(err, ClientError::NoPushName));

    store.set_push_name("tester");
    client.send_presence(Presence::Available).await.unwrap();

    let presence = session.recv_node_with_tag("presence").await;
    assert_eq!(presence.attr_str("type"), Some("available"));
    assert_eq!(presence.attr_str("name"), Some("tester"));
}

#[tokio::test]
async fn chat_presence_is_unsolicited() {
    let (client, mut dials) = scripted_client(paired_store());
    let mut session = connect_and_authenticate(&client, &mut dials).await;

    client
        .send_chat_presence(
            ChatPresence::Composing,
            JID::new("111222333", "s.whatsapp.net"),
        )
        .await
        .unwrap();

    let chatstate = session.recv_node_with_tag("chatstate").await;
    assert!(chatstate.attr_str("id").is_none());
    assert_eq!(
        chatstate.children().first().map(|c| c.tag.as_str()),
        Some("composing")
    );
}

#[tokio::test]
async fn get_user_devices_parses_usync_response() {
    let (client, mut dials) = scripted_client(paired_store());
    let mut session = connect_and_authenticate(&client, &mut dials).await;

    let query = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .get_user_devices(&[JID::new("555000111", "s.whatsapp.net")])
                .await
        })
    };

    let iq = session.recv_node_with_tag("iq").await;
    assert_eq!(iq.attr_str("xmlns"), Some("usync"));
    let usync = iq.child_by_tag("usync").expect("usync child");
    assert!(usync.attr_str("sid").is_some());

    // <usync><list><user jid=...><devices><device-list><device id=N/>
    let mut device_list = Node::new("device-list");
    for id in [0i64, 2, 5] {
        let mut device = Node::new("device");
        device.set_attr("id", AttrValue::Int(id));
        device_list.add_child(device);
    }
    let mut devices = Node::new("devices");
    devices.add_child(device_list);
    let mut user = Node::new("user");
    user.set_attr("jid", JID::new("555000111", "s.whatsapp.net"));
    user.add_child(devices);
    let mut list = Node::new("list");
    list.add_child(user);
    let mut usync_reply = Node::new("usync");
    usync_reply.add_child(list);
    let mut reply = result_for(&iq);
    reply.add_child(usync_reply);
    session.send_node(&reply).await;

    let devices = query.await.unwrap().expect("usync reply");
    let rendered: Vec<String> = devices.iter().map(|d| d.to_string()).collect();
    assert_eq!(
        rendered,
        vec![
            "555000111@s.whatsapp.net",
            "555000111:2@s.whatsapp.net",
            "555000111:5@s.whatsapp.net",
        ]
    );
}

#[tokio::test]
async fn profile_picture_404_is_none() {
    let (client, mut dials) = scripted_client(paired_store());
    let mut session = connect_and_authenticate(&client, &mut dials).await;

    let query = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .get_profile_picture_info(JID::new("555000111", "s.whatsapp.net"), false)
                .await
        })
    };

    let iq = session.recv_node_with_tag("iq").await;
    assert_eq!(iq.attr_str("xmlns"), Some("w:profile:picture"));
    let mut error = Node::new("error");
    error.set_attr("code", "404");
    error.set_attr("text", "item-not-found");
    let mut reply = result_for(&iq);
    reply.set_attr("type", "error");
    reply.add_child(error);
    session.send_node(&reply).await;

    assert!(query.await.unwrap().expect("no picture").is_none());
}

#[tokio::test]
async fn logout_unlinks_and_deletes_store() {
    let store = paired_store();
    let (client, mut dials) = scripted_client(store.clone());
    let mut session = connect_and_authenticate(&client, &mut dials).await;
    let mut events = collect_events(&client);

    let logout = {
        let client = client.clone();
        tokio::spawn(async move { client.logout().await })
    };

    let iq = session.recv_node_with_tag("iq").await;
    assert_eq!(iq.attr_str("xmlns"), Some("md"));
    let removal = iq.child_by_tag("remove-companion-device").expect("unlink child");
    assert_eq!(removal.attr_str("reason"), Some("user_initiated"));
    session.send_node(&result_for(&iq)).await;

    logout.await.unwrap().expect("logout");
    assert!(store.id().is_none(), "store deleted after logout");
    assert!(!client.is_connected().await);

    // The teardown was expected: no Disconnected event.
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, Event::Disconnected), "unexpected {event:?}");
    }
}

#[tokio::test]
async fn failed_logout_keeps_session() {
    let store = paired_store();
    let (client, mut dials) = scripted_client(store.clone());
    let mut session = connect_and_authenticate(&client, &mut dials).await;

    let logout = {
        let client = client.clone();
        tokio::spawn(async move { client.logout().await })
    };

    let iq = session.recv_node_with_tag("iq").await;
    let mut error = Node::new("error");
    error.set_attr("code", "500");
    let mut reply = result_for(&iq);
    reply.set_attr("type", "error");
    reply.add_child(error);
    session.send_node(&reply).await;

    assert!(logout.await.unwrap().is_err());
    assert!(store.id().is_some(), "store kept after failed logout");
    assert!(client.is_connected().await, "socket kept after failed logout");
}

#[tokio::test]
async fn push_name_updates_store_and_dispatches_event() {
    let (client, mut dials) = scripted_client(paired_store());
    let mut session = connect_and_authenticate(&client, &mut dials).await;
    let mut events = collect_events(&client);

    let mut message = Node::new("message");
    message.set_attr("id", "m1");
    message.set_attr("from", JID::new("999888777", "s.whatsapp.net"));
    message.set_attr("notify", "Maria");
    let mut enc = Node::new("enc");
    enc.set_bytes(vec![1, 2, 3]);
    message.add_child(enc);
    session.send_node(&message).await;

    let push_name = expect_event(&mut events, "PushName", |e| {
        matches!(e, Event::PushName(_))
    })
    .await;
    let Event::PushName(evt) = push_name else { unreachable!() };
    assert_eq!(evt.new_push_name, "Maria");
    assert_eq!(evt.old_push_name, None);
    assert_eq!(evt.jid.user, "999888777");

    // Same name again: no second PushName event, but the message still
    // flows. Message #1's event is still queued, so wait for both.
    session.send_node(&message).await;
    let no_duplicate = |e: &Event| {
        assert!(!matches!(e, Event::PushName(_)), "duplicate push name event");
        matches!(e, Event::Message(_))
    };
    expect_event(&mut events, "first Message", no_duplicate).await;
    expect_event(&mut events, "second Message", no_duplicate).await;
}
