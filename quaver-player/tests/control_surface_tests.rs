//! Control surface integration tests
//!
//! Exercises the real unix socket end to end: whitelist enforcement,
//! argument validation, framing limits, and socket permissions. The
//! invariant under test throughout: a rejected request leaves session
//! state exactly as it was.

mod helpers;

use quaver_player::control::protocol::{
    QueuePayload, Request, Response, StatusPayload, VolumePayload, MAX_REQUEST_BYTES,
};
use quaver_player::control::{ControlClient, ControlServer};
use quaver_common::model::PlaybackState;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn boot(
    dir: &tempfile::TempDir,
) -> (ControlClient, quaver_player::session::SessionHandle) {
    let (session, _bus) = helpers::spawn_session(dir.path()).await;
    let socket_path = dir.path().join("run").join("control.sock");
    let server = ControlServer::bind(&socket_path, session.clone()).unwrap();
    tokio::spawn(server.run());
    (ControlClient::new(socket_path), session)
}

fn payload<T: serde::de::DeserializeOwned>(response: Response) -> T {
    match response {
        Response::Ok { payload: Some(value) } => serde_json::from_value(value).unwrap(),
        other => panic!("expected ok-with-payload, got {:?}", other),
    }
}

fn error_code(response: Response) -> String {
    match response {
        Response::Error { code, .. } => code,
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_status_on_fresh_session() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _session) = boot(&dir).await;

    let status: StatusPayload = payload(client.send(&Request::new("status")).await.unwrap());
    assert_eq!(status.state, PlaybackState::Idle);
    assert_eq!(status.queue_length, 0);
    assert!(status.track.is_none());
}

#[tokio::test]
async fn test_queue_add_and_list() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _session) = boot(&dir).await;

    let request = Request::with_args(
        "queue-add",
        serde_json::json!({ "tracks": [
            { "id": "a1", "title": "First", "artist": "X" },
            { "id": "a2", "title": "Second", "artist": "Y" },
        ]}),
    );
    let added: serde_json::Value = payload(client.send(&request).await.unwrap());
    assert_eq!(added["added"], 2);

    let queue: QueuePayload = payload(client.send(&Request::new("queue")).await.unwrap());
    assert_eq!(queue.items.len(), 2);
    assert_eq!(queue.items[0].track.id, "a1");
    assert_eq!(queue.items[1].track.id, "a2");
}

#[tokio::test]
async fn test_unknown_command_rejected_and_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let (client, session) = boot(&dir).await;
    session
        .queue_add(vec![quaver_common::model::Track::new("t", "T", "A")])
        .await
        .unwrap();

    // Outside the whitelist is a protocol violation, not a bad argument
    let code = error_code(client.send(&Request::new("shutdown")).await.unwrap());
    assert_eq!(code, "protocol");
    let code = error_code(client.send(&Request::new("exec")).await.unwrap());
    assert_eq!(code, "protocol");

    let status = session.status().await.unwrap();
    assert_eq!(status.queue_length, 1);
    assert_eq!(status.state, PlaybackState::Idle);
}

#[tokio::test]
async fn test_shuffle_repeat_and_play_at_range() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _session) = boot(&dir).await;

    let request = Request::with_args(
        "queue-add",
        serde_json::json!({ "tracks": [
            { "id": "a1", "title": "First", "artist": "X" },
            { "id": "a2", "title": "Second", "artist": "Y" },
            { "id": "a3", "title": "Third", "artist": "Z" },
        ]}),
    );
    client.send(&request).await.unwrap();

    let request = Request::with_args("shuffle", serde_json::json!({ "enabled": true }));
    assert!(matches!(
        client.send(&request).await.unwrap(),
        Response::Ok { .. }
    ));
    let request = Request::with_args("repeat", serde_json::json!({ "mode": "all" }));
    assert!(matches!(
        client.send(&request).await.unwrap(),
        Response::Ok { .. }
    ));

    let status: StatusPayload = payload(client.send(&Request::new("status")).await.unwrap());
    assert!(status.shuffle);
    assert_eq!(status.repeat, quaver_common::model::RepeatMode::All);

    // Shuffled order is still a complete listing of the queue
    let queue: QueuePayload = payload(client.send(&Request::new("queue")).await.unwrap());
    assert_eq!(queue.items.len(), 3);
    assert!(queue.shuffle);

    // Out-of-range index rejected before touching playback
    let request = Request::with_args("play-at", serde_json::json!({ "index": 7 }));
    let code = error_code(client.send(&request).await.unwrap());
    assert_eq!(code, "invalid_input");
    let request = Request::with_args("repeat", serde_json::json!({ "mode": "forever" }));
    let code = error_code(client.send(&request).await.unwrap());
    assert_eq!(code, "invalid_input");
}

#[tokio::test]
async fn test_slow_client_gets_timed_out() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _session) = boot(&dir).await;

    // Connect, write a fragment, and never half-close
    let mut stream = tokio::net::UnixStream::connect(client.socket_path())
        .await
        .unwrap();
    stream.write_all(b"{\"command\":").await.unwrap();

    let mut reply = Vec::new();
    tokio::time::timeout(
        std::time::Duration::from_secs(10),
        stream.read_to_end(&mut reply),
    )
    .await
    .expect("server never released the connection")
    .unwrap();
    let response: Response = serde_json::from_slice(&reply).unwrap();
    assert_eq!(error_code(response), "protocol");
}

#[tokio::test]
async fn test_invalid_seek_argument_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _session) = boot(&dir).await;

    let request = Request::with_args("seek", serde_json::json!({ "target": "1:99" }));
    let code = error_code(client.send(&request).await.unwrap());
    assert_eq!(code, "invalid_input");

    let request = Request::with_args("seek", serde_json::json!({}));
    let code = error_code(client.send(&request).await.unwrap());
    assert_eq!(code, "invalid_input");
}

#[tokio::test]
async fn test_volume_set_get_and_range_check() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _session) = boot(&dir).await;

    let request = Request::with_args("volume", serde_json::json!({ "volume": 35 }));
    let volume: VolumePayload = payload(client.send(&request).await.unwrap());
    assert_eq!(volume.volume, 35);

    let volume: VolumePayload = payload(client.send(&Request::new("volume")).await.unwrap());
    assert_eq!(volume.volume, 35);

    let request = Request::with_args("volume", serde_json::json!({ "volume": 150 }));
    let code = error_code(client.send(&request).await.unwrap());
    assert_eq!(code, "invalid_input");
}

#[tokio::test]
async fn test_malformed_json_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _session) = boot(&dir).await;

    let mut stream = tokio::net::UnixStream::connect(client.socket_path())
        .await
        .unwrap();
    stream.write_all(b"{this is not json").await.unwrap();
    stream.shutdown().await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    let response: Response = serde_json::from_slice(&reply).unwrap();
    assert_eq!(error_code(response), "protocol");
}

#[tokio::test]
async fn test_oversized_request_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _session) = boot(&dir).await;

    let mut stream = tokio::net::UnixStream::connect(client.socket_path())
        .await
        .unwrap();
    let body = vec![b'x'; MAX_REQUEST_BYTES + 1];
    stream.write_all(&body).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    let response: Response = serde_json::from_slice(&reply).unwrap();
    assert_eq!(error_code(response), "protocol");
}

#[cfg(unix)]
#[tokio::test]
async fn test_socket_and_runtime_dir_are_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let (client, _session) = boot(&dir).await;

    let socket_mode = std::fs::metadata(client.socket_path())
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(socket_mode & 0o777, 0o600);

    let dir_mode = std::fs::metadata(client.socket_path().parent().unwrap())
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(dir_mode & 0o777, 0o700);
}

#[tokio::test]
async fn test_unreachable_socket_reports_no_running_session() {
    let dir = tempfile::tempdir().unwrap();
    let client = ControlClient::new(dir.path().join("absent.sock"));
    let err = client.send(&Request::new("status")).await.unwrap_err();
    assert!(err.to_string().contains("no running session"));
}
