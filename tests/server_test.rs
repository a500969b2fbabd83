//! End-to-end tests: register, verify, fetch, complete.

use std::sync::{Arc, Mutex};
use std::thread;

use jobgate::event::{Event, HandlerParams, Hook};
use jobgate::{Error, Work, WorkServer, WorkStatus, WorkerClient, WorkerId};
use serde_json::{Value, json};

const SECRET: &[u8; 32] = b"jobgate-jobgate-jobgate-jobgate!";

fn verified_worker(server: &WorkServer) -> (String, String) {
    let (id, challenge) = server.register_worker();
    let client = WorkerClient::new(SECRET, &id, &challenge).unwrap();
    let token = server.verify_worker(&id, client.client_response()).unwrap();
    (id, token)
}

#[test]
fn full_round_trip_fires_every_hook_in_order() {
    let server = WorkServer::new(SECRET).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    for hook in [
        Hook::WorkerRegister,
        Hook::WorkerVerify,
        Hook::AddWork,
        Hook::GetWork,
        Hook::WorkComplete,
    ] {
        let log = Arc::clone(&log);
        server
            .new_handler(hook, move |_: &Event, _: &HandlerParams| {
                log.lock().unwrap().push(hook);
            })
            .unwrap();
    }

    let (id, challenge) = server.register_worker();
    assert_eq!(id, "1");
    let mut client = WorkerClient::new(SECRET, &id, &challenge).unwrap();
    let token = server.verify_worker(&id, client.client_response()).unwrap();
    client.set_session_token(token.as_str());

    let work_id = server.submit_work(&json!({"numbers": [1, 2, 3]}), 60).unwrap();
    let mut work = server.fetch_work(&id, &token).unwrap().unwrap();
    assert_eq!(work.id.hex(), work_id);

    let params: Value = client.process(&mut work).unwrap();
    let sum: i64 = params["numbers"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_i64)
        .sum();
    let done = server.complete_work(&work_id, &json!({"sum": sum}), "").unwrap();

    assert_eq!(done.status(), WorkStatus::Complete);
    assert!(done.result.error.is_none());
    assert_eq!(done.result.payload, r#"{"sum":6}"#);
    assert!(done.time.added.unwrap() <= done.time.received.unwrap());
    assert!(done.time.received.unwrap() <= done.time.completed.unwrap());
    assert_eq!(server.in_flight(), 0);
    assert_eq!(
        *log.lock().unwrap(),
        [
            Hook::WorkerRegister,
            Hook::WorkerVerify,
            Hook::AddWork,
            Hook::GetWork,
            Hook::WorkComplete,
        ]
    );
}

#[test]
fn handler_receives_event_payload_and_params() {
    let server = WorkServer::new(SECRET).unwrap();
    let seen = Arc::new(Mutex::new(None));
    let captured = Arc::clone(&seen);
    server
        .add_params(HandlerParams::from_iter([("queue".to_string(), json!("images"))]))
        .new_handler(Hook::AddWork, move |event: &Event, params: &HandlerParams| {
            let work = event.as_work().map(|w| w.id.hex());
            *captured.lock().unwrap() = Some((work, params.get("queue").cloned()));
        })
        .unwrap();

    let id = server.submit_work(&json!(1), 60).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        Some((Some(id), Some(json!("images"))))
    );
}

#[test]
fn concurrent_workers_drain_the_queue_exactly_once() {
    let server = WorkServer::new(SECRET).unwrap();
    let mut expected: Vec<String> = (0..100)
        .map(|n| server.submit_work(&json!({ "n": n }), 600).unwrap())
        .collect();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let server = server.clone();
            thread::spawn(move || {
                let (id, token) = verified_worker(&server);
                let mut seen = Vec::new();
                while let Some(work) = server.fetch_work(&id, &token).unwrap() {
                    let hex = work.id.hex();
                    server.complete_work(&hex, &json!("ok"), "").unwrap();
                    seen.push(hex);
                }
                seen
            })
        })
        .collect();

    let mut seen: Vec<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    seen.sort();
    expected.sort();
    assert_eq!(seen, expected);
    assert_eq!(server.queue_size(), 0);
    assert_eq!(server.in_flight(), 0);
    assert_eq!(server.worker_count(), 4);
}

#[test]
fn clones_share_state() {
    let server = WorkServer::new(SECRET).unwrap();
    let other = server.clone();
    other.submit_work(&json!(1), 60).unwrap();
    let (id, _) = other.register();
    assert_eq!(server.queue_size(), 1);
    assert_eq!(id, WorkerId(1));
    assert!(server.worker(id).is_some());
}

#[test]
fn work_survives_a_json_round_trip() {
    let server = WorkServer::new(SECRET).unwrap();
    let (id, token) = verified_worker(&server);
    server.submit_work(&json!({"path": "/tmp/a.png"}), 60).unwrap();
    let work = server.fetch_work(&id, &token).unwrap().unwrap();

    let wire = work.to_json().unwrap();
    let decoded: Value = serde_json::from_str(&wire).unwrap();
    assert_eq!(decoded["id"], json!(work.id.hex()));
    assert_eq!(Work::from_json(&wire).unwrap(), work);
    assert!(matches!(
        Work::from_json(r#"{"id":"nope"}"#),
        Err(Error::Serialization(_))
    ));
}

#[test]
fn server_rejects_bad_secret() {
    assert!(matches!(
        WorkServer::new(&[0u8; 16]),
        Err(Error::InvalidKeySize(16))
    ));
}

#[test]
fn worker_record_tracks_verification() {
    let server = WorkServer::new(SECRET).unwrap();
    let (id, challenge) = server.register();
    let before = server.worker(id).unwrap();
    assert!(!before.is_registered());
    assert_eq!(before.verification.challenge, challenge);
    assert!(before.verification.response.is_none());

    let client = WorkerClient::new(SECRET, &id.to_string(), &challenge).unwrap();
    let token = server.verify(&id.to_string(), client.client_response()).unwrap();

    let after = server.worker(id).unwrap();
    assert!(after.is_registered());
    assert_eq!(after.verification.response.as_deref(), Some(challenge.as_str()));
    assert_eq!(after.session_token(), Some(&token));
}
