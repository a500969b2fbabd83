//! Tests for the event hooks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use jobgate::event::{Event, EventBus, HandlerParams, Hook};
use jobgate::{Error, WorkServer};
use serde_json::json;

const SECRET: &[u8; 32] = b"jobgate-jobgate-jobgate-jobgate!";

fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event, &HandlerParams) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    (count, move |_: &Event, _: &HandlerParams| {
        seen.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn handler_receives_event_and_params() {
    let bus = EventBus::new();
    let received = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&received);
    bus.add_handler(Hook::GetWorkEmpty, move |event: &Event, params: &HandlerParams| {
        *slot.lock().unwrap() = Some((event.as_error().map(str::to_string), params.clone()));
    })
    .unwrap();

    let mut params = HandlerParams::new();
    params.insert("db".to_string(), json!("primary"));
    bus.set_params(params);
    bus.emit(Hook::GetWorkEmpty, Event::error("NoWork"));

    let (error, params) = received.lock().unwrap().take().expect("handler not called");
    assert_eq!(error.as_deref(), Some("NoWork"));
    assert_eq!(params.get("db"), Some(&json!("primary")));
}

#[test]
fn second_handler_for_same_hook_is_rejected() {
    let bus = EventBus::new();
    let (first, first_handler) = counter();
    let (second, second_handler) = counter();

    bus.add_handler(Hook::AddWork, first_handler).unwrap();
    let err = bus.add_handler(Hook::AddWork, second_handler).unwrap_err();
    assert!(matches!(err, Error::HandlerExists(Hook::AddWork)));

    bus.emit(Hook::AddWork, Event::error("x"));
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[test]
fn rejected_registration_fires_add_handler_error() {
    let bus = EventBus::new();
    let (errors, on_error) = counter();
    bus.add_handler(Hook::AddHandlerError, on_error).unwrap();
    bus.add_handler(Hook::WorkComplete, |_: &Event, _: &HandlerParams| {})
        .unwrap();
    assert!(
        bus.add_handler(Hook::WorkComplete, |_: &Event, _: &HandlerParams| {})
            .is_err()
    );
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[test]
fn emit_without_handler_is_a_no_op() {
    let bus = EventBus::new();
    bus.emit(Hook::WorkTimeout, Event::error("Timeout"));
    assert!(!bus.has_handler(Hook::WorkTimeout));
}

#[test]
fn panicking_handler_does_not_reach_the_caller() {
    let server = WorkServer::new(SECRET).unwrap();
    server
        .new_handler(Hook::WorkerRegister, |_: &Event, _: &HandlerParams| {
            panic!("handler bug")
        })
        .unwrap();

    let (id, _) = server.register_worker();
    assert_eq!(id, "1");
    assert_eq!(server.worker_count(), 1);
}

#[test]
fn params_are_replaced_not_merged() {
    let bus = EventBus::new();
    let mut first = HandlerParams::new();
    first.insert("a".to_string(), json!(1));
    bus.set_params(first);

    let mut second = HandlerParams::new();
    second.insert("b".to_string(), json!(2));
    bus.set_params(second);

    let params = bus.params();
    assert!(params.get("a").is_none());
    assert_eq!(params.get("b"), Some(&json!(2)));
}

#[test]
fn handler_can_call_back_into_the_bus() {
    let bus = Arc::new(EventBus::new());
    let inner = Arc::clone(&bus);
    bus.add_handler(Hook::GetWork, move |_: &Event, _: &HandlerParams| {
        let _ = inner.add_handler(Hook::WorkComplete, |_: &Event, _: &HandlerParams| {});
        inner.emit(Hook::WorkComplete, Event::error("nested"));
    })
    .unwrap();

    bus.emit(Hook::GetWork, Event::error("outer"));
    assert!(bus.has_handler(Hook::WorkComplete));
}

#[test]
fn hook_names_round_trip() {
    let names: Vec<&str> = Hook::ALL.iter().map(|h| h.as_str()).collect();
    assert_eq!(
        names,
        [
            "add_work",
            "add_handler_error",
            "get_work",
            "get_work_empty",
            "get_work_error",
            "work_complete",
            "work_timeout",
            "worker_register",
            "worker_verify",
            "worker_verify_error",
        ]
    );
    for hook in Hook::ALL {
        assert_eq!(hook.as_str().parse::<Hook>().unwrap(), hook);
    }
    assert!("123abc".parse::<Hook>().is_err());
}

#[test]
fn events_carry_a_timestamp() {
    let before = chrono::Utc::now();
    let event = Event::error("AHH ERROR HAPPENED");
    assert!(event.timestamp >= before);
    assert_eq!(event.as_error(), Some("AHH ERROR HAPPENED"));
    assert!(event.as_work().is_none());
    assert!(event.as_worker().is_none());
}
