mod common;

use common::{init_tracing, test_policy, MockBehavior, MockTransport};
use govee_ble_plug::protocol::frame::{Frame, OP_AUTH};
use govee_ble_plug::{PlugConfig, PlugDevice, PlugError, SessionState};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;

const TOKEN: &str = "000102030405060708090a0b0c0d0e0f";

fn config(model: &str) -> PlugConfig {
    PlugConfig {
        address: "AA:BB:CC:DD:EE:FF".into(),
        local_name: Some(format!("ihoment_{model}_TEST")),
        model: model.into(),
        access_token: TOKEN.into(),
        connection: test_policy(),
    }
}

fn plug(transport: std::sync::Arc<MockTransport>, model: &str) -> PlugDevice {
    PlugDevice::from_config(transport, &config(model)).expect("valid test config")
}

async fn wait_for_state(rx: &mut watch::Receiver<SessionState>, want: SessionState) {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            if *rx.borrow_and_update() == want {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for session state {want:?}"));
}

#[tokio::test(start_paused = true)]
async fn commands_resolve_in_submission_order() {
    init_tracing();
    let transport = MockTransport::healthy();
    let plug = plug(transport.clone(), "H5082");

    // All five are queued before the session task gets to run, so they
    // form a single must-process batch.
    let results = tokio::join!(
        plug.turn_on(0),
        plug.turn_on(1),
        plug.turn_off(0),
        plug.turn_off(1),
        plug.turn_on(0),
    );
    assert_eq!(
        (
            results.0.unwrap(),
            results.1.unwrap(),
            results.2.unwrap(),
            results.3.unwrap(),
            results.4.unwrap(),
        ),
        (true, true, true, true, true)
    );

    // Drained in submission order over one connection.
    assert_eq!(
        transport.state.switch_payloads(),
        vec![0x22, 0x11, 0x20, 0x10, 0x22]
    );
    assert_eq!(transport.state.connect_attempts.load(Ordering::SeqCst), 1);

    // Confirmed commands updated the cached state.
    assert_eq!(plug.is_on(0), Some(true));
    assert_eq!(plug.is_on(1), Some(false));

    let mut state = plug.subscribe_session_state();
    wait_for_state(&mut state, SessionState::NoSession).await;
    assert_eq!(transport.state.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_failure_fails_every_queued_command() {
    init_tracing();
    let transport = MockTransport::new(MockBehavior {
        connect_failures: u32::MAX,
        ..Default::default()
    });
    let plug = plug(transport.clone(), "H5080");

    let results = tokio::join!(plug.turn_on(0), plug.turn_off(0), plug.turn_on(0));
    assert_eq!(
        (results.0.unwrap(), results.1.unwrap(), results.2.unwrap()),
        (false, false, false)
    );

    // No handle ever existed, so nothing was disconnected.
    assert_eq!(transport.state.disconnects.load(Ordering::SeqCst), 0);
    assert_eq!(transport.state.connect_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(plug.is_on(0), None);

    let mut state = plug.subscribe_session_state();
    wait_for_state(&mut state, SessionState::NoSession).await;
}

#[tokio::test(start_paused = true)]
async fn write_failure_aborts_session_and_retries_the_rest() {
    init_tracing();
    let transport = MockTransport::new(MockBehavior {
        fail_write_at: Some(3),
        ..Default::default()
    });
    let plug = plug(transport.clone(), "H5082");

    let results = tokio::join!(
        plug.turn_on(0),
        plug.turn_on(1),
        plug.turn_off(0),
        plug.turn_off(1),
        plug.turn_on(0),
    );

    // 1-2 confirmed, 3 failed, 4-5 picked up by the auto-triggered
    // second session.
    assert_eq!(
        (
            results.0.unwrap(),
            results.1.unwrap(),
            results.2.unwrap(),
            results.3.unwrap(),
            results.4.unwrap(),
        ),
        (true, true, false, true, true)
    );
    assert_eq!(transport.state.connect_attempts.load(Ordering::SeqCst), 2);

    // The failed off-command never touched the cache; the later commands did.
    assert_eq!(plug.is_on(0), Some(true));
    assert_eq!(plug.is_on(1), Some(false));

    let mut state = plug.subscribe_session_state();
    wait_for_state(&mut state, SessionState::NoSession).await;
    assert_eq!(transport.state.disconnects.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn silent_device_fails_batch_after_ack_timeout() {
    init_tracing();
    let transport = MockTransport::new(MockBehavior {
        auth_response: false,
        ..Default::default()
    });
    let plug = plug(transport.clone(), "H5080");

    let results = tokio::join!(plug.turn_on(0), plug.turn_off(0));
    assert_eq!((results.0.unwrap(), results.1.unwrap()), (false, false));

    let mut state = plug.subscribe_session_state();
    wait_for_state(&mut state, SessionState::NoSession).await;
    // Teardown still ran on the timed-out session.
    assert_eq!(transport.state.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn end_to_end_turn_on_lifecycle() {
    init_tracing();
    let transport = MockTransport::healthy();
    let plug = plug(transport.clone(), "H5080");
    let mut state = plug.subscribe_session_state();

    assert_eq!(plug.is_on(0), None);
    assert!(plug.turn_on(0).await.unwrap());
    assert_eq!(plug.is_on(0), Some(true));

    // First write of the session is the zero-padded auth frame built from
    // the stored credential.
    let key = hex::decode(TOKEN).unwrap();
    let auth = Frame::command(OP_AUTH, &key).unwrap();
    assert_eq!(
        transport.state.written.lock().unwrap()[0].as_slice(),
        auth.as_bytes()
    );
    assert_eq!(transport.state.switch_payloads(), vec![0xFF]);

    // After the idle window with no further work the session closes.
    wait_for_state(&mut state, SessionState::NoSession).await;
    assert_eq!(transport.state.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(transport.state.connect_attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_session_picks_up_late_commands() {
    init_tracing();
    let transport = MockTransport::healthy();
    let plug = plug(transport.clone(), "H5080");

    assert!(plug.turn_on(0).await.unwrap());
    // The session lingers on the live queue; this lands inside the idle
    // window and reuses the connection.
    assert!(plug.turn_off(0).await.unwrap());

    assert_eq!(transport.state.connect_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(plug.is_on(0), Some(false));
}

#[tokio::test(start_paused = true)]
async fn commands_during_teardown_retrigger_a_session() {
    init_tracing();
    let transport = MockTransport::new(MockBehavior {
        disconnect_delay: Some(Duration::from_secs(1)),
        ..Default::default()
    });
    let plug = plug(transport.clone(), "H5080");
    let mut state = plug.subscribe_session_state();

    assert!(plug.turn_on(0).await.unwrap());

    // Catch the session while it is closing and slip a command in; the
    // done-callback reconciliation must restart instead of stranding it.
    wait_for_state(&mut state, SessionState::Closing).await;
    assert!(plug.turn_off(0).await.unwrap());

    assert_eq!(transport.state.connect_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(plug.is_on(0), Some(false));

    wait_for_state(&mut state, SessionState::NoSession).await;
    assert_eq!(transport.state.disconnects.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_fails_admitted_commands_and_tears_down() {
    init_tracing();
    let transport = MockTransport::new(MockBehavior {
        auth_response: false,
        ..Default::default()
    });
    let plug = std::sync::Arc::new(plug(transport.clone(), "H5080"));
    let mut state = plug.subscribe_session_state();

    let pending = tokio::spawn({
        let plug = std::sync::Arc::clone(&plug);
        async move { plug.turn_on(0).await }
    });

    wait_for_state(&mut state, SessionState::Authenticating).await;
    plug.shutdown();

    assert!(!pending.await.unwrap().unwrap());
    wait_for_state(&mut state, SessionState::NoSession).await;
    assert_eq!(transport.state.disconnects.load(Ordering::SeqCst), 1);

    // Submissions after shutdown resolve immediately as failed.
    assert!(!plug.turn_on(0).await.unwrap());
    assert_eq!(transport.state.connect_attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsupported_model_fails_at_construction() {
    init_tracing();
    let transport = MockTransport::healthy();

    let mut bad_model = config("H5080");
    bad_model.model = "H6104".into();
    let err = PlugDevice::from_config(transport.clone(), &bad_model).unwrap_err();
    assert!(matches!(err, PlugError::Configuration(_)));

    let mut bad_token = config("H5080");
    bad_token.access_token = "zz".into();
    let err = PlugDevice::from_config(transport.clone(), &bad_token).unwrap_err();
    assert!(matches!(err, PlugError::Configuration(_)));

    // Nothing was submitted anywhere.
    assert_eq!(transport.state.connect_attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn out_of_range_port_is_a_configuration_error() {
    init_tracing();
    let transport = MockTransport::healthy();
    let plug = plug(transport.clone(), "H5080");

    let err = plug.turn_on(1).await.unwrap_err();
    assert!(matches!(err, PlugError::Configuration(_)));
    assert_eq!(transport.state.connect_attempts.load(Ordering::SeqCst), 0);
    assert!(transport.state.written.lock().unwrap().is_empty());
}

#[tokio::test]
async fn advertisements_update_cached_state_passively() {
    init_tracing();
    let transport = MockTransport::healthy();
    let plug = plug(transport.clone(), "H5082");

    let mfr = std::collections::HashMap::from([(0x8803u16, vec![0xDEu8, 0x03])]);
    let discovered = govee_ble_plug::parse_advertisement(
        "AA:BB:CC:DD:EE:FF",
        Some("ihoment_H5082_TEST"),
        &mfr,
    )
    .unwrap();
    plug.handle_advertisement(&discovered);
    assert_eq!(plug.is_on(0), Some(true));
    assert_eq!(plug.is_on(1), Some(true));

    // A broadcast from a different device leaves the cache untouched.
    let other = govee_ble_plug::parse_advertisement(
        "11:22:33:44:55:66",
        Some("ihoment_H5082_OTHER"),
        &std::collections::HashMap::from([(0x8803u16, vec![0x00u8])]),
    )
    .unwrap();
    plug.handle_advertisement(&other);
    assert_eq!(plug.is_on(0), Some(true));
    assert_eq!(plug.is_on(1), Some(true));

    // No connection was ever opened for passive updates.
    assert_eq!(transport.state.connect_attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn port_names_follow_the_model_layout() {
    init_tracing();
    let transport = MockTransport::healthy();

    let single = plug(transport.clone(), "H5080");
    assert_eq!(single.port_names(), vec![(None, None)]);

    let dual = plug(transport, "H5082");
    assert_eq!(
        dual.port_names(),
        vec![(Some(0), Some("Left Power")), (Some(1), Some("Right Power"))]
    );
}
