//! Scenario E4: capability negotiation between two signaling user agents
//! talking over a real loopback UDP [`UdpSignalingTransport`] pair, end
//! to end through `invite`/`accept`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gw_server::signaling_udp::UdpSignalingTransport;
use gw_signaling::{StreamingClient, Transaction, UserAgent};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Accepted { audio: Option<String>, video: Option<String> },
    Rejected(String),
}

#[derive(Default)]
struct RecordingStreamingClient {
    events: Mutex<Vec<Event>>,
}

impl RecordingStreamingClient {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamingClient for RecordingStreamingClient {
    async fn ringing(&self, _reason: &str) {}

    async fn accepted(&self, audio: Option<&str>, video: Option<&str>) {
        self.events.lock().unwrap().push(Event::Accepted {
            audio: audio.map(str::to_string),
            video: video.map(str::to_string),
        });
    }

    async fn rejected(&self, reason: &str) {
        self.events.lock().unwrap().push(Event::Rejected(reason.to_string()));
    }

    async fn invited(&self, _from_uri: &str, _to_uri: &str) {}
    async fn cancelled(&self, _from_uri: &str, _to_uri: &str) {}
    async fn byed(&self) {}
    async fn holded(&self, _on_hold: bool) {}
}

struct NullStreamingClient;

#[async_trait]
impl StreamingClient for NullStreamingClient {
    async fn ringing(&self, _reason: &str) {}
    async fn accepted(&self, _audio: Option<&str>, _video: Option<&str>) {}
    async fn rejected(&self, _reason: &str) {}
    async fn invited(&self, _from_uri: &str, _to_uri: &str) {}
    async fn cancelled(&self, _from_uri: &str, _to_uri: &str) {}
    async fn byed(&self) {}
    async fn holded(&self, _on_hold: bool) {}
}

#[tokio::test]
async fn scenario_e4_capability_negotiation_audio_only() {
    let caller_transport = UdpSignalingTransport::bind("127.0.0.1:0").await.unwrap();
    let callee_transport = UdpSignalingTransport::bind("127.0.0.1:0").await.unwrap();
    let callee_addr = callee_transport.local_addr().unwrap().to_string();

    let recorder = Arc::new(RecordingStreamingClient::default());
    let caller = Arc::new(UserAgent::new(caller_transport.clone(), recorder.clone()));
    let callee = Arc::new(UserAgent::new(callee_transport.clone(), Arc::new(NullStreamingClient)));

    let responder = {
        let callee = callee.clone();
        let callee_transport = callee_transport.clone();
        tokio::spawn(async move {
            let Some(Transaction::Incoming { method, from_uri, body }) = callee_transport.recv().await else {
                panic!("callee never saw an incoming transaction");
            };
            assert_eq!(method, "INVITE");
            callee.on_incoming_invite(&from_uri, body.as_deref()).await.unwrap();
            callee.accept(&["pcmu"]).await.unwrap();
        })
    };

    caller
        .invite(&callee_addr, &["wideband", "narrowband", "pcmu", "pcma", "dtmf"])
        .await
        .unwrap();
    responder.await.unwrap();

    assert_eq!(
        recorder.events(),
        vec![Event::Accepted { audio: Some("pcmu".to_string()), video: None }]
    );
}

#[tokio::test]
async fn scenario_e4_incompatible_offer_is_rejected_with_488() {
    let caller_transport = UdpSignalingTransport::bind("127.0.0.1:0").await.unwrap();
    let callee_transport = UdpSignalingTransport::bind("127.0.0.1:0").await.unwrap();
    let callee_addr = callee_transport.local_addr().unwrap().to_string();

    let recorder = Arc::new(RecordingStreamingClient::default());
    let caller = Arc::new(UserAgent::new(caller_transport.clone(), recorder.clone()));
    let callee = Arc::new(UserAgent::new(callee_transport.clone(), Arc::new(NullStreamingClient)));

    let responder = {
        let callee = callee.clone();
        let callee_transport = callee_transport.clone();
        tokio::spawn(async move {
            let Some(Transaction::Incoming { method, from_uri, body }) = callee_transport.recv().await else {
                panic!("callee never saw an incoming transaction");
            };
            assert_eq!(method, "INVITE");
            callee.on_incoming_invite(&from_uri, body.as_deref()).await.unwrap();
            assert!(callee.accept(&["h264"]).await.is_err());
        })
    };

    caller.invite(&callee_addr, &["pcmu"]).await.unwrap();
    responder.await.unwrap();

    assert_eq!(recorder.events(), vec![Event::Rejected("Incompatible SDP".to_string())]);
}
