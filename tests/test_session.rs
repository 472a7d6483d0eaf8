//! Device sessions against loopback fake devices: lifecycle transitions,
//! counter-gated polling, cancellation and control commands.

mod common;

use common::{announcement, client_config, wait_for, Behavior, FakeDevice};
use pixelair::codec::OscArg;
use pixelair::{
    ClientConfig, ControlRoutes, DeviceIdentity, DeviceMode, DeviceSession, DeviceState, Error,
    JsonStateDecoder, PixelAirRuntime, SceneInfo, SessionState, StateListener, StaticArpTable,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn runtime(config: ClientConfig) -> PixelAirRuntime {
    let runtime = PixelAirRuntime::with_decoder(config, Arc::new(StaticArpTable::new()), Arc::new(JsonStateDecoder));
    runtime.start().unwrap();
    runtime
}

fn routed_state() -> DeviceState {
    DeviceState {
        serial_number: Some("SN-1".into()),
        model: Some("Fluora".into()),
        mode: DeviceMode::Auto,
        scenes: vec![SceneInfo { label: "Sunset".into(), index: 0 }, SceneInfo { label: "Ocean".into(), index: 2 }],
        manual_animations: vec!["fluora::Bloom".into()],
        routes: ControlRoutes {
            brightness: Some("/r/b".into()),
            is_displaying: Some("/r/on".into()),
            mode: Some("/r/mode".into()),
            active_scene_index: Some("/r/scene".into()),
            manual_animation_index: Some("/r/anim".into()),
            ..ControlRoutes::default()
        },
        ..DeviceState::default()
    }
}

async fn resolved_session(runtime: &PixelAirRuntime, serial: &str) -> DeviceSession {
    let session = runtime.session(DeviceIdentity::from_serial(serial).unwrap());
    assert_eq!(session.session_state(), SessionState::Unresolved);
    session.resolve_ip(Duration::from_millis(300)).await.unwrap();
    session
}

#[tokio::test]
async fn test_unresolved_session_refuses_requests() {
    let device = FakeDevice::spawn(Behavior::default());
    let runtime = runtime(client_config(device.port()));
    let session = runtime.session(DeviceIdentity::from_serial("SN-1").unwrap());

    let err = session.fetch_counter(Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, Error::NotResolved(_)));
    assert_eq!(device.discovery_requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_timeout_marks_stale_and_failed_resolve_keeps_it() {
    let mut reported = announcement("SN-1", "127.0.0.1");
    reported.state_counter = 3;
    let device = FakeDevice::spawn(Behavior { announcements: vec![reported], ..Behavior::default() });
    let runtime = runtime(client_config(device.port()));
    let session = resolved_session(&runtime, "SN-1").await;
    assert!(matches!(session.session_state(), SessionState::Resolved(_)));

    assert_eq!(session.fetch_counter(Duration::from_millis(300)).await.unwrap(), 3);
    assert!(matches!(session.session_state(), SessionState::Active(_)));

    device.responsive.store(false, Ordering::SeqCst);
    let err = session.fetch_counter(Duration::from_millis(200)).await.unwrap_err();
    assert!(matches!(err, Error::ResponseTimeout { .. }));
    let stale = session.session_state();
    assert!(matches!(stale, SessionState::Stale(_)));

    // No silent retry: a stale session refuses until re-resolved
    let err = session.fetch_counter(Duration::from_millis(200)).await.unwrap_err();
    assert!(matches!(err, Error::NotResolved(_)));

    let err = session.resolve_ip(Duration::from_millis(200)).await.unwrap_err();
    assert!(matches!(err, Error::DeviceNotFound(_)));
    assert_eq!(session.session_state(), stale);

    device.responsive.store(true, Ordering::SeqCst);
    session.resolve_ip(Duration::from_millis(300)).await.unwrap();
    assert!(matches!(session.session_state(), SessionState::Resolved(_)));
}

#[tokio::test]
async fn test_fragmented_state_fetch() {
    let mut state = routed_state();
    state.nickname = Some("n".repeat(400));
    state.scenes = (0..30).map(|i| SceneInfo { label: format!("Scene {}", i), index: i }).collect();
    let device = FakeDevice::spawn(Behavior {
        announcements: vec![announcement("SN-1", "127.0.0.1")],
        state: Some(state.clone()),
        fragment_body: Some(128),
        ..Behavior::default()
    });
    let runtime = runtime(client_config(device.port()));
    let session = resolved_session(&runtime, "SN-1").await;

    let fetched = session.fetch_state(Duration::from_millis(300)).await.unwrap();
    assert_eq!(fetched, state);
    assert_eq!(session.device_state(), Some(state));
    assert!(session.has_control_routes());
}

#[tokio::test]
async fn test_listeners_follow_the_counter() {
    let mut reported = announcement("SN-1", "127.0.0.1");
    reported.state_counter = 5;
    let device = FakeDevice::spawn(Behavior {
        announcements: vec![reported],
        state: Some(routed_state()),
        ..Behavior::default()
    });
    let runtime = runtime(client_config(device.port()));
    let session = resolved_session(&runtime, "SN-1").await;

    let calls = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));
    let c = calls.clone();
    let o = order.clone();
    session.add_listener(StateListener::from_fn(move |_, state| {
        assert_eq!(state.serial_number.as_deref(), Some("SN-1"));
        c.fetch_add(1, Ordering::SeqCst);
        o.lock().unwrap().push("sync");
    }));
    let o = order.clone();
    session.add_listener(StateListener::from_async(move |_, _| {
        let o = o.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            o.lock().unwrap().push("async");
        }
    }));

    session.start_polling(Duration::from_millis(50)).await.unwrap();
    assert!(wait_for(Duration::from_secs(3), || calls.load(Ordering::SeqCst) == 1).await);

    // Counter unchanged: several more polls, no further notification
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.last_seen_counter(), Some(5));

    device.counter.store(6, Ordering::SeqCst);
    assert!(wait_for(Duration::from_secs(3), || calls.load(Ordering::SeqCst) == 2).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    session.stop_polling().await;
    assert!(!session.is_polling().await);
    assert_eq!(order.lock().unwrap().as_slice(), &["sync", "async", "sync", "async"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_polling_is_final() {
    let device = FakeDevice::spawn(Behavior {
        announcements: vec![announcement("SN-1", "127.0.0.1")],
        state: Some(routed_state()),
        auto_increment: true,
        ..Behavior::default()
    });
    let runtime = runtime(client_config(device.port()));
    let session = resolved_session(&runtime, "SN-1").await;

    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let id = session.add_listener(StateListener::from_fn(move |_, _| {
        c.fetch_add(1, Ordering::SeqCst);
    }));

    session.start_polling(Duration::from_millis(10)).await.unwrap();
    assert!(wait_for(Duration::from_secs(3), || calls.load(Ordering::SeqCst) >= 3).await);

    session.stop_polling().await;
    let after_stop = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    assert_eq!(runtime.transport().handler_count(), 0);

    assert!(session.remove_listener(id));
    assert!(!session.remove_listener(id));
}

#[tokio::test]
async fn test_dropping_the_session_ends_polling() {
    let device = FakeDevice::spawn(Behavior {
        announcements: vec![announcement("SN-1", "127.0.0.1")],
        state: Some(routed_state()),
        ..Behavior::default()
    });
    let runtime = runtime(client_config(device.port()));
    let session = resolved_session(&runtime, "SN-1").await;

    session.start_polling(Duration::from_millis(20)).await.unwrap();
    assert!(wait_for(Duration::from_secs(3), || device.discovery_requests.load(Ordering::SeqCst) >= 3).await);
    drop(session);

    // Let an in-flight tick finish before sampling
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_drop = device.discovery_requests.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(device.discovery_requests.load(Ordering::SeqCst), after_drop);
    assert_eq!(runtime.transport().handler_count(), 0);
}

#[tokio::test]
async fn test_control_commands() {
    let device = FakeDevice::spawn(Behavior {
        announcements: vec![announcement("SN-1", "127.0.0.1")],
        state: Some(routed_state()),
        ..Behavior::default()
    });
    let runtime = runtime(client_config(device.port()));
    let session = resolved_session(&runtime, "SN-1").await;

    // Routes are unknown until a state has been fetched
    assert!(!session.has_control_routes());
    assert!(matches!(session.turn_on(), Err(Error::InvalidParameter(_))));

    session.fetch_state(Duration::from_millis(300)).await.unwrap();
    session.turn_on().unwrap();
    session.set_brightness(0.456).unwrap();
    session.set_effect("scene:2").unwrap();
    session.set_effect_by_name("Bloom").unwrap();

    assert!(matches!(session.set_brightness(1.5), Err(Error::InvalidParameter(_))));
    assert!(matches!(session.set_effect("disco"), Err(Error::InvalidParameter(_))));
    assert!(matches!(session.set_effect("scene:x"), Err(Error::InvalidParameter(_))));
    assert!(matches!(session.set_effect_by_name("Nope"), Err(Error::InvalidParameter(_))));

    assert!(wait_for(Duration::from_secs(2), || device.commands.lock().unwrap().len() == 6).await);
    let sent: Vec<(String, Vec<OscArg>)> = device
        .commands
        .lock()
        .unwrap()
        .iter()
        .map(|m| (m.address.clone(), m.args.clone()))
        .collect();
    assert_eq!(
        sent,
        vec![
            ("/r/on".to_string(), vec![OscArg::Int(1), OscArg::Int(0)]),
            ("/r/b".to_string(), vec![OscArg::Float(0.46), OscArg::Int(0)]),
            ("/r/mode".to_string(), vec![OscArg::Int(1), OscArg::Int(0)]),
            ("/r/scene".to_string(), vec![OscArg::Int(2), OscArg::Int(0)]),
            ("/r/mode".to_string(), vec![OscArg::Int(2), OscArg::Int(0)]),
            ("/r/anim".to_string(), vec![OscArg::Int(0), OscArg::Int(0)]),
        ]
    );

    let cached = session.device_state().unwrap();
    assert!(cached.is_on);
    assert_eq!(cached.mode, DeviceMode::Manual);
    assert_eq!(cached.current_effect().as_deref(), Some("Bloom"));
}

#[tokio::test]
async fn test_session_for_scan_record() {
    let device = FakeDevice::spawn(Behavior {
        announcements: vec![announcement("SN-7", "127.0.0.1")],
        ..Behavior::default()
    });
    let runtime = runtime(client_config(device.port()));

    let devices = runtime.discovery().scan(Duration::from_millis(300)).await.unwrap();
    let session = runtime.session_for(&devices[0]).unwrap();
    assert!(matches!(session.session_state(), SessionState::Resolved(_)));
    assert_eq!(session.fetch_counter(Duration::from_millis(300)).await.unwrap(), 0);
    assert_eq!(session.identity().serial_number(), Some("SN-7"));
}
