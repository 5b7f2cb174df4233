mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::{eventually, quiet_frame, speech_frame, test_pool, test_state, FixedAnalyzer};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use voxline_server::registry::ActiveCall;
use voxline_server::{app, AppState};
use voxline_store::get_conversation;
use voxline_types::LeadTemperature;

async fn serve(state: AppState) -> std::net::SocketAddr {
    let app = app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn start_frame(call_sid: &str) -> Message {
    Message::Text(
        json!({
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "streamSid": format!("MZ{call_sid}"),
                "callSid": call_sid,
                "tracks": ["inbound"],
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
                "customParameters": {"from": "+5215550001111"}
            },
            "streamSid": format!("MZ{call_sid}")
        })
        .to_string()
        .into(),
    )
}

fn media_frame(audio: &[u8]) -> Message {
    Message::Text(
        json!({
            "event": "media",
            "media": {"track": "inbound", "payload": BASE64.encode(audio)}
        })
        .to_string()
        .into(),
    )
}

fn event_frame(body: Value) -> Message {
    Message::Text(body.to_string().into())
}

#[tokio::test]
async fn call_round_trip_stores_conversation_and_analysis() {
    let (_dir, pool) = test_pool();
    let analyzer = Arc::new(FixedAnalyzer::new());
    let state = test_state(pool.clone(), analyzer.clone());
    let registry = state.registry.clone();
    let addr = serve(state).await;

    let (mut ws, _) = connect_async(format!("ws://{}/media-stream", addr))
        .await
        .expect("failed to connect");

    ws.send(event_frame(json!({"event": "connected", "protocol": "Call", "version": "1.0.0"})))
        .await
        .unwrap();
    ws.send(start_frame("CA-ws")).await.unwrap();
    ws.send(Message::Text("{not json".into())).await.unwrap();
    for _ in 0..15 {
        ws.send(media_frame(&speech_frame())).await.unwrap();
    }
    for _ in 0..5 {
        ws.send(media_frame(&quiet_frame())).await.unwrap();
    }

    // 200 ms of reply audio is ten 20 ms chunks, then the playback mark.
    let mut media = 0;
    let mark = loop {
        let frame = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("reply should arrive")
            .expect("socket open")
            .unwrap();
        let Message::Text(text) = frame else { continue };
        let event: Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(event["streamSid"], "MZCA-ws");
        match event["event"].as_str().unwrap() {
            "media" => {
                let payload = BASE64
                    .decode(event["media"]["payload"].as_str().unwrap())
                    .unwrap();
                assert!(payload.len() <= 160);
                media += 1;
            }
            "mark" => break event["mark"]["name"].as_str().unwrap().to_string(),
            other => panic!("unexpected outbound event {other}"),
        }
    };
    assert_eq!(media, 10);
    assert_eq!(mark, "reply-1");
    assert_eq!(registry.len(), 1);

    ws.send(event_frame(json!({"event": "mark", "streamSid": "MZCA-ws", "mark": {"name": mark}})))
        .await
        .unwrap();
    ws.send(event_frame(json!({"event": "stop", "streamSid": "MZCA-ws"})))
        .await
        .unwrap();

    let stored = eventually(|| {
        let conn = pool.get().unwrap();
        get_conversation(&conn, "CA-ws")
            .unwrap()
            .filter(|c| c.analysis.is_some())
    })
    .await
    .expect("conversation with analysis should be stored");

    assert_eq!(stored.phone_number, "+5215550001111");
    assert_eq!(stored.total_user_messages, 1);
    assert_eq!(stored.total_assistant_messages, 1);
    assert_eq!(stored.messages[0].content, "busco un departamento");
    assert_eq!(stored.messages[1].content, "Claro, ¿en qué zona?");
    assert_eq!(
        stored.analysis.unwrap().lead_temperature,
        LeadTemperature::Hot
    );
    assert_eq!(analyzer.calls(), 1);
    assert!(eventually(|| registry.is_empty().then_some(())).await.is_some());
}

#[tokio::test]
async fn disconnect_without_speech_stores_call_but_skips_analysis() {
    let (_dir, pool) = test_pool();
    let analyzer = Arc::new(FixedAnalyzer::new());
    let addr = serve(test_state(pool.clone(), analyzer.clone())).await;

    let (mut ws, _) = connect_async(format!("ws://{}/media-stream", addr))
        .await
        .unwrap();
    ws.send(start_frame("CA-quiet")).await.unwrap();
    for _ in 0..10 {
        ws.send(media_frame(&quiet_frame())).await.unwrap();
    }
    ws.close(None).await.unwrap();

    let stored = eventually(|| {
        let conn = pool.get().unwrap();
        get_conversation(&conn, "CA-quiet").unwrap()
    })
    .await
    .expect("conversation should be stored on disconnect");

    assert!(stored.messages.is_empty());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(analyzer.calls(), 0);
}

#[tokio::test]
async fn second_stream_for_a_live_call_is_refused() {
    let (_dir, pool) = test_pool();
    let state = test_state(pool.clone(), Arc::new(FixedAnalyzer::new()));
    state.registry.register(
        "CA-dup",
        ActiveCall {
            stream_sid: "MZ-first".to_string(),
            phone_number: None,
            started_at: chrono::Utc::now(),
        },
    );
    let registry = state.registry.clone();
    let addr = serve(state).await;

    let (mut ws, _) = connect_async(format!("ws://{}/media-stream", addr))
        .await
        .unwrap();
    ws.send(start_frame("CA-dup")).await.unwrap();
    for _ in 0..20 {
        // The server may already have closed the socket.
        if ws.send(media_frame(&speech_frame())).await.is_err() {
            break;
        }
    }

    // The server closes the socket without sending any audio.
    let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("server should end the stream");
    match next {
        None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {}
        Some(Ok(other)) => panic!("unexpected frame {other:?}"),
    }

    assert_eq!(registry.get("CA-dup").unwrap().stream_sid, "MZ-first");
    let conn = pool.get().unwrap();
    assert!(get_conversation(&conn, "CA-dup").unwrap().is_none());
}

#[tokio::test]
async fn shutdown_flushes_live_calls_before_returning() {
    let (_dir, pool) = test_pool();
    let analyzer = Arc::new(FixedAnalyzer::new());
    let state = test_state(pool.clone(), analyzer.clone());
    let lifecycle = state.lifecycle.clone();
    let registry = state.registry.clone();
    let addr = serve(state).await;

    let (mut ws, _) = connect_async(format!("ws://{}/media-stream", addr))
        .await
        .unwrap();
    ws.send(start_frame("CA-live")).await.unwrap();
    for _ in 0..15 {
        ws.send(media_frame(&speech_frame())).await.unwrap();
    }
    for _ in 0..5 {
        ws.send(media_frame(&quiet_frame())).await.unwrap();
    }

    // Wait for the reply so the caller's turn is in the transcript.
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("reply should arrive")
            .expect("socket open")
            .unwrap();
        let Message::Text(text) = frame else { continue };
        let event: Value = serde_json::from_str(text.as_str()).unwrap();
        if event["event"] == "mark" {
            break;
        }
    }
    assert_eq!(registry.len(), 1);

    // The caller never hangs up.
    lifecycle.begin_shutdown();
    assert!(lifecycle.wait(Duration::from_secs(5)).await, "calls should drain");

    assert!(registry.is_empty());
    let conn = pool.get().unwrap();
    let stored = get_conversation(&conn, "CA-live")
        .unwrap()
        .expect("conversation flushed during shutdown");
    assert_eq!(stored.total_user_messages, 1);
    assert_eq!(
        stored.analysis.expect("analysis finished before wait returned").lead_temperature,
        LeadTemperature::Hot
    );
    drop(ws);
}
