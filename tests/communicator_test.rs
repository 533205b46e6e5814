use emproto::communicator::{Communicator, CommunicatorState, EventKind};
use emproto::config::Config;
use emproto::dump::DumpDirection;
use emproto::error::EvseError;
use emproto::persistence::EvseStore;
use emproto::protocol::{ChargeStartParams, Datagram, Payload, codes, encode_frame};
use emproto::session::{MetaState, SessionStatus};
use emproto::transport::{ChannelTransport, TransportHandle};
use std::net::SocketAddr;
use std::time::Duration;

const SERIAL: &str = "1368844619649410";
const OTHER: &str = "00000000000000a1";
const PASSWORD: &str = "123456";

fn addr() -> SocketAddr {
    "192.168.1.50:28376".parse().unwrap()
}

fn other_addr() -> SocketAddr {
    "192.168.1.51:28376".parse().unwrap()
}

fn config() -> Config {
    let mut config = Config::default();
    config.evses_file = String::new();
    config.session.poll_interval_ms = 0;
    config
}

fn start(config: Config) -> (Communicator, TransportHandle) {
    let (transport, handle) = ChannelTransport::pair();
    let communicator = Communicator::start_with_transport(config, transport).unwrap();
    (communicator, handle)
}

fn frame(serial: &str, code: u16, payload: &[u8]) -> Vec<u8> {
    encode_frame(code, 0, Some(serial), None, payload)
}

fn login_payload() -> Vec<u8> {
    let mut buf = vec![0u8; 70];
    buf[0] = 25;
    buf[1..5].copy_from_slice(b"ACME");
    buf[17..21].copy_from_slice(b"WB-7");
    buf[49..53].copy_from_slice(&7400u32.to_be_bytes());
    buf[53] = 32;
    buf
}

fn ac_status_payload(error_bits: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 25];
    buf[0] = 1;
    buf[1..3].copy_from_slice(&2301u16.to_be_bytes());
    buf[21..25].copy_from_slice(&error_bits.to_be_bytes());
    buf
}

fn version_payload() -> Vec<u8> {
    let mut buf = vec![0u8; 37];
    buf[0..3].copy_from_slice(b"HW1");
    buf[16..22].copy_from_slice(b"V1.0.7");
    buf
}

async fn discover(
    communicator: &Communicator,
    handle: &TransportHandle,
    serial: &str,
    from: SocketAddr,
) {
    let mut events = communicator.subscribe();
    handle.inject(frame(serial, codes::LOGIN, &login_payload()), from);
    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, EventKind::Added);
    assert_eq!(event.session.serial, serial);
}

async fn login(communicator: &Communicator, handle: &mut TransportHandle) {
    let (result, _) = tokio::join!(communicator.login(SERIAL, PASSWORD), async {
        let (bytes, to) = handle.next_sent().await.unwrap();
        assert_eq!(to, addr());
        let request = Datagram::decode(&bytes).unwrap();
        assert_eq!(request.command, codes::REQUEST_LOGIN);
        assert_eq!(request.password.as_deref(), Some(PASSWORD));
        handle.inject(frame(SERIAL, codes::LOGIN_RESPONSE, &login_payload()), addr());
    });
    result.unwrap();

    let (confirm, _) = handle.next_sent().await.unwrap();
    let confirm = Datagram::decode(&confirm).unwrap();
    assert_eq!(confirm.command, codes::LOGIN_CONFIRM);
    assert_eq!(confirm.password.as_deref(), Some(PASSWORD));
}

#[tokio::test(start_paused = true)]
async fn session_lifecycle_added_changed_removed() {
    let (communicator, handle) = start(config());
    let mut events = communicator.subscribe();

    handle.inject(frame(SERIAL, codes::LOGIN, &login_payload()), addr());
    let added = events.recv().await.unwrap();
    assert_eq!(added.kind, EventKind::Added);
    assert_eq!(added.session.status, SessionStatus::Discovered);
    assert_eq!(added.session.info.as_ref().unwrap().brand, "ACME");

    handle.inject(frame(SERIAL, codes::AC_STATUS, &ac_status_payload(0)), addr());
    let changed = events.recv().await.unwrap();
    assert_eq!(changed.kind, EventKind::Changed);
    assert!(!changed.session.state.as_ref().unwrap().has_fault());

    // An identical status is not a change; the next event is the fault
    handle.inject(frame(SERIAL, codes::AC_STATUS, &ac_status_payload(0)), addr());
    handle.inject(frame(SERIAL, codes::AC_STATUS, &ac_status_payload(1 << 3)), addr());
    let fault = events.recv().await.unwrap();
    assert_eq!(fault.kind, EventKind::Changed);
    assert_eq!(fault.session.state.as_ref().unwrap().errors, vec![3]);

    let removed = tokio::time::timeout(Duration::from_secs(40), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(removed.kind, EventKind::Removed);
    assert_eq!(removed.session.status, SessionStatus::Absent);
    assert_eq!(removed.session.meta_state(), MetaState::Offline);
    assert!(communicator.sessions().await.unwrap().is_empty());

    communicator.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn endpoint_follows_latest_datagram() {
    let (communicator, handle) = start(config());
    discover(&communicator, &handle, SERIAL, addr()).await;

    let mut events = communicator.subscribe();
    handle.inject(frame(SERIAL, codes::HEADING, &[]), other_addr());
    let moved = events.recv().await.unwrap();
    assert_eq!(moved.kind, EventKind::Changed);
    assert_eq!(moved.session.address, other_addr());
    assert_eq!(communicator.sessions().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn frames_without_serial_and_corrupt_frames_are_dropped() {
    let (communicator, handle) = start(config());
    let mut events = communicator.subscribe();

    handle.inject(encode_frame(codes::LOGIN, 0, None, None, &login_payload()), addr());
    let mut corrupt = frame(SERIAL, codes::LOGIN, &login_payload());
    let last = corrupt.len() - 3;
    corrupt[last] ^= 0xff;
    handle.inject(corrupt, addr());
    handle.inject(frame(SERIAL, codes::LOGIN, &[0u8; 10]), addr());
    handle.inject(frame(OTHER, 0x7777, &[1, 2, 3]), addr());

    // Unknown commands still create the session
    let added = events.recv().await.unwrap();
    assert_eq!(added.kind, EventKind::Added);
    assert_eq!(added.session.serial, OTHER);
    assert!(communicator.session(SERIAL).await.unwrap().is_none());
    assert_eq!(handle.sent_bytes(), 0);
}

#[tokio::test(start_paused = true)]
async fn privileged_commands_need_login_and_send_nothing() {
    let (communicator, handle) = start(config());
    discover(&communicator, &handle, SERIAL, addr()).await;

    let err = communicator
        .charge_start(SERIAL, ChargeStartParams::new(16))
        .await
        .unwrap_err();
    assert!(matches!(err, EvseError::AuthRequired { .. }));
    let err = communicator.charge_stop(SERIAL).await.unwrap_err();
    assert!(matches!(err, EvseError::AuthRequired { .. }));
    let err = communicator.set_system_time(SERIAL).await.unwrap_err();
    assert!(matches!(err, EvseError::AuthRequired { .. }));
    let err = communicator.set_max_current(SERIAL, 16).await.unwrap_err();
    assert!(matches!(err, EvseError::AuthRequired { .. }));

    assert_eq!(handle.sent_bytes(), 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_serial_and_missing_password() {
    let (communicator, handle) = start(config());

    let err = communicator.fetch_version(SERIAL).await.unwrap_err();
    assert!(matches!(err, EvseError::DeviceNotFound { .. }));
    let err = communicator.login(SERIAL, PASSWORD).await.unwrap_err();
    assert!(matches!(err, EvseError::DeviceNotFound { .. }));
    let err = communicator.fetch_version("not-a-serial").await.unwrap_err();
    assert!(matches!(err, EvseError::InvalidParameter { .. }));

    discover(&communicator, &handle, SERIAL, addr()).await;
    let err = communicator.login_saved(SERIAL).await.unwrap_err();
    assert!(matches!(err, EvseError::InvalidParameter { .. }));
    assert_eq!(handle.sent_bytes(), 0);
}

#[tokio::test(start_paused = true)]
async fn charge_start_validates_amps_before_sending() {
    let (communicator, mut handle) = start(config());
    discover(&communicator, &handle, SERIAL, addr()).await;

    for amps in [5, 33] {
        let err = communicator
            .charge_start(SERIAL, ChargeStartParams::new(amps))
            .await
            .unwrap_err();
        assert!(matches!(err, EvseError::InvalidParameter { .. }));
    }
    let err = communicator.set_max_current(SERIAL, 40).await.unwrap_err();
    assert!(matches!(err, EvseError::InvalidParameter { .. }));
    assert_eq!(handle.sent_bytes(), 0);

    login(&communicator, &mut handle).await;

    for amps in [6, 32] {
        let (result, _) = tokio::join!(
            communicator.charge_start(SERIAL, ChargeStartParams::new(amps)),
            async {
                let (bytes, _) = handle.next_sent().await.unwrap();
                let request = Datagram::decode(&bytes).unwrap();
                let Payload::ChargeStart(start) = request.payload else {
                    panic!("expected a ChargeStart request");
                };
                assert_eq!(start.max_amps, amps);
                assert_eq!(start.charge_id.len(), 16);
                assert_eq!(request.password.as_deref(), Some(PASSWORD));
                handle.inject(frame(SERIAL, codes::CHARGE_START_RESPONSE, &[1, 0]), addr());
            }
        );
        assert_eq!(result.unwrap().len(), 16);
    }

    let (stopped, _) = tokio::join!(communicator.charge_stop(SERIAL), async {
        let (bytes, _) = handle.next_sent().await.unwrap();
        assert_eq!(Datagram::decode(&bytes).unwrap().command, codes::CHARGE_STOP);
        handle.inject(frame(SERIAL, codes::CHARGE_STOP_RESPONSE, &[1]), addr());
    });
    stopped.unwrap();
}

#[tokio::test(start_paused = true)]
async fn login_success_sets_logged_in_and_acks_status() {
    let (communicator, mut handle) = start(config());
    discover(&communicator, &handle, SERIAL, addr()).await;
    let mut events = communicator.subscribe();

    login(&communicator, &mut handle).await;
    let session = communicator.session(SERIAL).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::LoggedIn);
    assert_eq!(session.meta_state(), MetaState::Idle);

    let logging_in = events.recv().await.unwrap();
    assert_eq!(logging_in.session.status, SessionStatus::LoggingIn);
    let logged_in = events.recv().await.unwrap();
    assert_eq!(logged_in.session.status, SessionStatus::LoggedIn);

    // Logging in again is a no-op
    communicator.login_saved(SERIAL).await.unwrap();

    handle.inject(frame(SERIAL, codes::AC_STATUS, &ac_status_payload(0)), addr());
    let (ack, _) = handle.next_sent().await.unwrap();
    let ack = Datagram::decode(&ack).unwrap();
    assert_eq!(ack.command, codes::AC_STATUS_RESPONSE);
    assert_eq!(ack.raw.len(), 26);

    handle.inject(frame(SERIAL, codes::HEADING, &[]), addr());
    let (ack, _) = handle.next_sent().await.unwrap();
    assert_eq!(Datagram::decode(&ack).unwrap().command, codes::HEADING_RESPONSE);
}

#[tokio::test(start_paused = true)]
async fn status_is_not_acknowledged_before_login() {
    let (communicator, handle) = start(config());
    discover(&communicator, &handle, SERIAL, addr()).await;
    let mut events = communicator.subscribe();

    handle.inject(frame(SERIAL, codes::HEADING, &[]), addr());
    handle.inject(frame(SERIAL, codes::AC_STATUS, &ac_status_payload(0)), addr());
    assert_eq!(events.recv().await.unwrap().kind, EventKind::Changed);
    assert_eq!(handle.sent_bytes(), 0);
}

#[tokio::test(start_paused = true)]
async fn login_password_error() {
    let (communicator, mut handle) = start(config());
    discover(&communicator, &handle, SERIAL, addr()).await;

    let (result, _) = tokio::join!(communicator.login(SERIAL, "000000"), async {
        let (bytes, _) = handle.next_sent().await.unwrap();
        assert_eq!(Datagram::decode(&bytes).unwrap().command, codes::REQUEST_LOGIN);
        handle.inject(frame(SERIAL, codes::PASSWORD_ERROR, &[]), addr());
    });
    assert!(matches!(result, Err(EvseError::PasswordRejected { .. })));

    let session = communicator.session(SERIAL).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Discovered);
    assert!(session.password.is_none());
    assert!(handle.try_next_sent().is_none());
}

#[tokio::test(start_paused = true)]
async fn login_timeout_returns_to_discovered() {
    let (communicator, handle) = start(config());
    discover(&communicator, &handle, SERIAL, addr()).await;

    let started = tokio::time::Instant::now();
    let err = communicator.login(SERIAL, PASSWORD).await.unwrap_err();
    assert!(matches!(err, EvseError::Timeout { .. }));
    assert!(started.elapsed() >= communicator.config().session.login_timeout());

    let session = communicator.session(SERIAL).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Discovered);
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_to_two_devices() {
    let (communicator, mut handle) = start(config());
    discover(&communicator, &handle, SERIAL, addr()).await;
    discover(&communicator, &handle, OTHER, other_addr()).await;

    let (answered, silent, _) = tokio::join!(
        communicator.fetch_version(SERIAL),
        communicator.fetch_version(OTHER),
        async {
            for _ in 0..2 {
                let (bytes, to) = handle.next_sent().await.unwrap();
                let request = Datagram::decode(&bytes).unwrap();
                assert_eq!(request.command, codes::GET_VERSION);
                if request.serial.as_deref() == Some(SERIAL) {
                    assert_eq!(to, addr());
                    handle.inject(frame(SERIAL, codes::VERSION_RESPONSE, &version_payload()), addr());
                }
            }
        }
    );

    let version = answered.unwrap();
    assert_eq!(version.software_version, "V1.0.7");
    assert!(matches!(silent, Err(EvseError::Timeout { .. })));

    let session = communicator.session(SERIAL).await.unwrap().unwrap();
    assert_eq!(
        session.info.unwrap().software_version.as_deref(),
        Some("V1.0.7")
    );
}

#[tokio::test(start_paused = true)]
async fn unprivileged_reads_work_without_login() {
    let (communicator, mut handle) = start(config());
    discover(&communicator, &handle, SERIAL, addr()).await;

    let (amps, _) = tokio::join!(communicator.fetch_max_current(SERIAL), async {
        let (bytes, _) = handle.next_sent().await.unwrap();
        assert_eq!(Datagram::decode(&bytes).unwrap().command, codes::OUTPUT_CURRENT);
        handle.inject(frame(SERIAL, codes::OUTPUT_CURRENT_RESPONSE, &[2, 16]), addr());
    });
    assert_eq!(amps.unwrap(), 16);

    let (time, _) = tokio::join!(communicator.fetch_system_time(SERIAL), async {
        let (bytes, _) = handle.next_sent().await.unwrap();
        assert_eq!(Datagram::decode(&bytes).unwrap().command, codes::SYSTEM_TIME);
        let mut body = vec![2u8];
        body.extend_from_slice(&1_700_000_000u32.to_be_bytes());
        handle.inject(frame(SERIAL, codes::SYSTEM_TIME_RESPONSE, &body), addr());
    });
    assert_eq!(time.unwrap().timestamp(), 1_700_000_000);

    let session = communicator.session(SERIAL).await.unwrap().unwrap();
    assert_eq!(session.config.max_current, Some(16));
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_in_flight_requests() {
    let (communicator, mut handle) = start(config());
    discover(&communicator, &handle, SERIAL, addr()).await;

    let (result, _) = tokio::join!(communicator.fetch_version(SERIAL), async {
        handle.next_sent().await.unwrap();
        communicator.stop().await.unwrap();
    });
    assert!(matches!(result, Err(EvseError::Cancelled { .. })));
    assert_eq!(*communicator.state().borrow(), CommunicatorState::Stopped);

    let err = communicator.fetch_version(SERIAL).await.unwrap_err();
    assert!(matches!(err, EvseError::Cancelled { .. }));
}

#[tokio::test(start_paused = true)]
async fn transport_failure_is_fatal() {
    let (communicator, handle) = start(config());
    handle.inject_error("socket closed");

    let err = communicator.closed().await.unwrap_err();
    assert!(matches!(err, EvseError::Transport { .. }));
    assert!(err.is_fatal());
    assert!(matches!(
        &*communicator.state().borrow(),
        CommunicatorState::Failed(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn listeners_and_streams_filter_by_kind() {
    use tokio_stream::StreamExt;

    let (communicator, handle) = start(config());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    communicator.add_event_listener(&[EventKind::Added], move |event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event.session.serial.clone());
            Ok::<(), emproto::EvseError>(())
        }
    });
    let mut changes = Box::pin(communicator.event_stream(&[EventKind::Changed]));

    handle.inject(frame(SERIAL, codes::LOGIN, &login_payload()), addr());
    handle.inject(frame(SERIAL, codes::AC_STATUS, &ac_status_payload(0)), addr());

    assert_eq!(rx.recv().await.unwrap(), SERIAL);
    let changed = changes.next().await.unwrap();
    assert_eq!(changed.kind, EventKind::Changed);
    assert!(changed.session.state.is_some());
}

#[tokio::test(start_paused = true)]
async fn login_persists_password_and_saved_name_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evses.json");
    let mut seed = EvseStore::new(&path);
    seed.set_name(SERIAL, Some("Garage".to_string()));
    seed.save().unwrap();

    let mut config = config();
    config.evses_file = path.to_string_lossy().into_owned();
    let (communicator, mut handle) = start(config);

    let mut events = communicator.subscribe();
    handle.inject(frame(SERIAL, codes::LOGIN, &login_payload()), addr());
    let added = events.recv().await.unwrap();
    assert_eq!(added.session.config.name.as_deref(), Some("Garage"));
    assert_eq!(added.session.display_name(), "Garage");

    login(&communicator, &mut handle).await;

    let mut saved = EvseStore::new(&path);
    saved.load().unwrap();
    let record = saved.get(SERIAL).unwrap();
    assert_eq!(record.password.as_deref(), Some(PASSWORD));
    assert_eq!(record.name.as_deref(), Some("Garage"));

    let copy = dir.path().join("copy").join("evses.json");
    assert_eq!(communicator.save_evses(&copy).await.unwrap(), 1);
    assert_eq!(communicator.load_evses(&copy).await.unwrap(), 1);
    communicator.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn saved_password_allows_login_without_argument() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evses.json");
    let mut seed = EvseStore::new(&path);
    seed.set_password(SERIAL, PASSWORD);
    seed.save().unwrap();

    let mut config = config();
    config.evses_file = path.to_string_lossy().into_owned();
    let (communicator, mut handle) = start(config);
    discover(&communicator, &handle, SERIAL, addr()).await;

    let (result, _) = tokio::join!(communicator.login_saved(SERIAL), async {
        let (bytes, _) = handle.next_sent().await.unwrap();
        let request = Datagram::decode(&bytes).unwrap();
        assert_eq!(request.password.as_deref(), Some(PASSWORD));
        handle.inject(frame(SERIAL, codes::LOGIN_RESPONSE, &login_payload()), addr());
    });
    result.unwrap();
}

#[tokio::test(start_paused = true)]
async fn dump_records_both_directions() {
    let mut config = config();
    config.dump_datagrams = true;
    let (communicator, mut handle) = start(config);
    let mut dump = communicator.subscribe_dump();

    discover(&communicator, &handle, SERIAL, addr()).await;
    let received = dump.recv().await.unwrap();
    assert_eq!(received.direction, DumpDirection::Received);
    assert_eq!(received.decoded, "Login");
    assert_eq!(received.peer, addr());

    let _ = tokio::join!(communicator.fetch_version(SERIAL), async {
        handle.next_sent().await.unwrap();
        handle.inject(frame(SERIAL, codes::VERSION_RESPONSE, &version_payload()), addr());
    });
    let sent = dump.recv().await.unwrap();
    assert_eq!(sent.direction, DumpDirection::Sent);
    assert_eq!(sent.decoded, "GetVersion");
    assert!(sent.to_string().starts_with("-> 192.168.1.50:28376 GetVersion"));
}

#[tokio::test(start_paused = true)]
async fn concurrent_logins_share_one_attempt() {
    let (communicator, mut handle) = start(config());
    discover(&communicator, &handle, SERIAL, addr()).await;

    let (first, (second, other_password), _) = tokio::join!(
        communicator.login(SERIAL, PASSWORD),
        async {
            tokio::join!(
                communicator.login(SERIAL, PASSWORD),
                communicator.login(SERIAL, "654321"),
            )
        },
        async {
            let (bytes, _) = handle.next_sent().await.unwrap();
            assert_eq!(Datagram::decode(&bytes).unwrap().command, codes::REQUEST_LOGIN);
            // Requests are served in order, so both later logins are queued by now
            communicator.session(SERIAL).await.unwrap();
            handle.inject(frame(SERIAL, codes::LOGIN_RESPONSE, &login_payload()), addr());
        }
    );
    first.unwrap();
    second.unwrap();
    assert!(matches!(other_password, Err(EvseError::InvalidParameter { .. })));

    let (confirm, _) = handle.next_sent().await.unwrap();
    assert_eq!(Datagram::decode(&confirm).unwrap().command, codes::LOGIN_CONFIRM);
    assert!(handle.try_next_sent().is_none());

    tokio::time::sleep(communicator.config().session.login_timeout() * 3).await;
    let session = communicator.session(SERIAL).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::LoggedIn);

    let (stopped, _) = tokio::join!(communicator.charge_stop(SERIAL), async {
        let (bytes, _) = handle.next_sent().await.unwrap();
        assert_eq!(Datagram::decode(&bytes).unwrap().command, codes::CHARGE_STOP);
        handle.inject(frame(SERIAL, codes::CHARGE_STOP_RESPONSE, &[1]), addr());
    });
    stopped.unwrap();
}

#[tokio::test(start_paused = true)]
async fn logged_in_devices_are_polled_and_log_in_again_without_keepalive() {
    let mut config = config();
    config.session.poll_interval_ms = 5000;
    config.session.relogin_after_secs = 30;
    config.session.liveness_timeout_secs = 120;
    let (communicator, mut handle) = start(config);
    discover(&communicator, &handle, SERIAL, addr()).await;
    login(&communicator, &mut handle).await;

    let (bytes, to) = handle.next_sent().await.unwrap();
    let poll = Datagram::decode(&bytes).unwrap();
    assert_eq!(poll.command, codes::REQUEST_CHARGE_STATUS_RECORD);
    assert_eq!(poll.password.as_deref(), Some(PASSWORD));
    assert_eq!(to, addr());

    // Acknowledged heading counts as keepalive
    handle.inject(frame(SERIAL, codes::HEADING, &[]), addr());
    let (ack, _) = handle.next_sent().await.unwrap();
    assert_eq!(Datagram::decode(&ack).unwrap().command, codes::HEADING_RESPONSE);
    let acked = tokio::time::Instant::now();

    let mut polls = 0;
    loop {
        let (bytes, _) = handle.next_sent().await.unwrap();
        match Datagram::decode(&bytes).unwrap().command {
            codes::REQUEST_CHARGE_STATUS_RECORD => polls += 1,
            codes::REQUEST_LOGIN => break,
            other => panic!("unexpected command {:#06x}", other),
        }
    }
    assert!(acked.elapsed() > Duration::from_secs(30));
    assert_eq!(polls, 6);
    let session = communicator.session(SERIAL).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::LoggingIn);

    handle.inject(frame(SERIAL, codes::LOGIN_RESPONSE, &login_payload()), addr());
    let (confirm, _) = handle.next_sent().await.unwrap();
    assert_eq!(Datagram::decode(&confirm).unwrap().command, codes::LOGIN_CONFIRM);
    let session = communicator.session(SERIAL).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::LoggedIn);

    let (bytes, _) = handle.next_sent().await.unwrap();
    assert_eq!(
        Datagram::decode(&bytes).unwrap().command,
        codes::REQUEST_CHARGE_STATUS_RECORD
    );
}

#[tokio::test(start_paused = true)]
async fn devices_not_logged_in_are_not_polled() {
    let mut config = config();
    config.session.poll_interval_ms = 5000;
    config.session.liveness_timeout_secs = 120;
    let (communicator, handle) = start(config);
    discover(&communicator, &handle, SERIAL, addr()).await;

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(handle.sent_bytes(), 0);
}

#[tokio::test(start_paused = true)]
async fn removed_device_is_added_again_when_it_reappears() {
    let (communicator, handle) = start(config());
    let mut events = communicator.subscribe();
    discover(&communicator, &handle, SERIAL, addr()).await;
    assert_eq!(events.recv().await.unwrap().kind, EventKind::Added);

    let removed = tokio::time::timeout(Duration::from_secs(40), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(removed.kind, EventKind::Removed);

    handle.inject(frame(SERIAL, codes::HEADING, &[]), other_addr());
    let again = events.recv().await.unwrap();
    assert_eq!(again.kind, EventKind::Added);
    assert_eq!(again.session.status, SessionStatus::Discovered);
    assert_eq!(again.session.address, other_addr());
    assert_eq!(communicator.sessions().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_listeners_do_not_affect_others() {
    let (communicator, handle) = start(config());
    let failing = communicator.add_event_listener(&EventKind::ALL, |_event| async {
        Err::<(), EvseError>(EvseError::invalid_parameter("listener", "rejected"))
    });
    let panicking = communicator.add_event_listener(&EventKind::ALL, |event| async move {
        if event.kind == EventKind::Added {
            panic!("listener crashed on {}", event.session.serial);
        }
        Ok::<(), EvseError>(())
    });
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    communicator.add_event_listener(&EventKind::ALL, move |event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send((event.kind, event.session.serial.clone()));
            Ok::<(), EvseError>(())
        }
    });

    handle.inject(frame(SERIAL, codes::LOGIN, &login_payload()), addr());
    handle.inject(frame(OTHER, codes::LOGIN, &login_payload()), other_addr());
    handle.inject(frame(SERIAL, codes::AC_STATUS, &ac_status_payload(0)), addr());

    assert_eq!(rx.recv().await.unwrap(), (EventKind::Added, SERIAL.to_string()));
    assert_eq!(rx.recv().await.unwrap(), (EventKind::Added, OTHER.to_string()));
    assert_eq!(rx.recv().await.unwrap(), (EventKind::Changed, SERIAL.to_string()));

    assert!(panicking.await.unwrap_err().is_panic());
    assert!(!failing.is_finished());
    assert_eq!(communicator.sessions().await.unwrap().len(), 2);
}
