//! Scenarios E1 and E2: the binary TCP streaming protocol driven end to
//! end over real loopback sockets against a live `StreamingAcceptor`.

use std::net::SocketAddr;
use std::sync::Arc;

use gatewayd_integration_tests::fixtures::streaming::RtmpTestClient;
use gw_amf::Value;
use gw_server::streaming_acceptor::StreamingAcceptor;
use gw_stream::chunk::{message_type, PROTOCOL_CHANNEL};
use gw_stream::connection::NullHandler;

async fn start_streaming_acceptor() -> SocketAddr {
    let acceptor = StreamingAcceptor::bind("127.0.0.1:0".parse().unwrap(), Arc::new(NullHandler), None)
        .await
        .unwrap();
    let addr = acceptor.local_addr().unwrap();
    tokio::spawn(acceptor.run());
    addr
}

async fn connect_and_join(addr: SocketAddr, app: &str) -> RtmpTestClient {
    let mut client = RtmpTestClient::connect(addr).await;
    let body = Value::Object(vec![("app".to_string(), Value::str(app))]);
    client.send_command("connect", 1.0, body, &[]).await;
    let ack = client.recv_message().await;
    assert_eq!(ack.channel, PROTOCOL_CHANNEL);
    assert_eq!(ack.message_type, message_type::WINDOW_ACK_SIZE);
    let result = client.recv_command().await;
    assert_eq!(result.name, "_result");
    assert_eq!(
        result.args[0].get("code").and_then(Value::as_str),
        Some("NetConnection.Connect.Success")
    );
    client
}

async fn create_stream(client: &mut RtmpTestClient) -> u32 {
    client.send_command("createStream", 2.0, Value::Null, &[]).await;
    let result = client.recv_command().await;
    assert_eq!(result.name, "_result");
    result.args[0].as_f64().unwrap() as u32
}

#[tokio::test]
async fn scenario_e1_handshake_and_connect() {
    let addr = start_streaming_acceptor().await;
    let mut client = RtmpTestClient::connect(addr).await;

    let body = Value::Object(vec![("app".to_string(), Value::str("live"))]);
    client.send_command("connect", 1.0, body, &[]).await;

    let ack = client.recv_message().await;
    assert_eq!(ack.channel, PROTOCOL_CHANNEL);
    assert_eq!(ack.message_type, message_type::WINDOW_ACK_SIZE);
    assert_eq!(u32::from_be_bytes(ack.data[..4].try_into().unwrap()), 1_073_741_824);

    let result = client.recv_command().await;
    assert_eq!(result.name, "_result");
    assert_eq!(
        result.args[0].get("code").and_then(Value::as_str),
        Some("NetConnection.Connect.Success")
    );
}

#[tokio::test]
async fn scenario_e2_publish_play_fan_out() {
    let addr = start_streaming_acceptor().await;

    let mut publisher = connect_and_join(addr, "live").await;
    let mut player_a = connect_and_join(addr, "live").await;
    let mut player_b = connect_and_join(addr, "live").await;

    let pub_stream_id = create_stream(&mut publisher).await;
    publisher
        .send_command_on_stream(8, pub_stream_id, "publish", 0.0, Value::Null, &[Value::str("s1"), Value::str("live")])
        .await;
    let publish_status = publisher.recv_command().await;
    assert_eq!(publish_status.name, "onStatus");
    assert_eq!(
        publish_status.args[0].get("code").and_then(Value::as_str),
        Some("NetStream.Publish.Start")
    );

    let player_a_stream_id = create_stream(&mut player_a).await;
    player_a
        .send_command_on_stream(8, player_a_stream_id, "play", 0.0, Value::Null, &[Value::str("s1")])
        .await;
    let play_a_status = player_a.recv_command().await;
    assert_eq!(play_a_status.name, "onStatus");
    assert_eq!(
        play_a_status.args[0].get("code").and_then(Value::as_str),
        Some("NetStream.Play.Start")
    );

    let player_b_stream_id = create_stream(&mut player_b).await;
    player_b
        .send_command_on_stream(8, player_b_stream_id, "play", 0.0, Value::Null, &[Value::str("s1")])
        .await;
    let play_b_status = player_b.recv_command().await;
    assert_eq!(play_b_status.name, "onStatus");
    assert_eq!(
        play_b_status.args[0].get("code").and_then(Value::as_str),
        Some("NetStream.Play.Start")
    );

    let audio = vec![0xabu8; 200];
    publisher.send_media(message_type::AUDIO, pub_stream_id, 500, audio.clone()).await;

    let got_a = player_a.recv_media().await;
    let got_b = player_b.recv_media().await;

    assert_eq!(got_a.data, audio);
    assert_eq!(got_a.timestamp, 500);
    assert_eq!(got_a.stream_id, player_a_stream_id);

    assert_eq!(got_b.data, audio);
    assert_eq!(got_b.timestamp, 500);
    assert_eq!(got_b.stream_id, player_b_stream_id);
}
