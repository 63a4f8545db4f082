//! End-to-end tests: a real server on a temp socket, driven over the wire
//! with raw frames, injecting into a recording target.

use std::io::{ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use touchgate::input::{abs, key, InputEvent};
use touchgate::socket::framing::{Frame, FrameError};
use touchgate::{
    AuthToken, Command, DeviceInfo, InjectionTarget, Recording, RecordingTarget, Response, Server, ServerConfig,
};

const TOKEN: [u8; 32] = [0x5a; 32];

struct Harness {
    _dir: TempDir,
    socket: PathBuf,
    server: Option<Server>,
    recording: Recording,
}

impl Harness {
    fn start() -> Self {
        Self::start_with(|_| {})
    }

    fn start_with(tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("tg.sock");
        let mut config = ServerConfig {
            socket: socket.to_string_lossy().into_owned(),
            humanize_delays: false,
            shutdown_grace_ms: 300,
            ..ServerConfig::default()
        };
        tweak(&mut config);

        let target = RecordingTarget::phone();
        let recording = target.recording();
        let server = Server::start(config, AuthToken::from_bytes(TOKEN), Box::new(target)).unwrap();
        Self {
            _dir: dir,
            socket,
            server: Some(server),
            recording,
        }
    }

    fn connect(&self) -> UnixStream {
        let stream = UnixStream::connect(&self.socket).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        stream
    }

    fn authed(&self) -> UnixStream {
        let mut stream = self.connect();
        assert_eq!(send(&mut stream, &Command::Auth(TOKEN)), Response::ok());
        stream
    }

    fn shutdown(&mut self) {
        if let Some(server) = self.server.take() {
            server.shutdown().unwrap();
        }
    }
}

fn send(stream: &mut UnixStream, command: &Command) -> Response {
    command.encode().write_to(stream).unwrap();
    read_response(stream).expect("server closed the connection")
}

fn read_response(stream: &mut UnixStream) -> Option<Response> {
    match Frame::read_from(stream) {
        Ok(Some(frame)) => Some(Response::decode(&frame).unwrap()),
        Ok(None) => None,
        Err(FrameError::Io(e)) if e.kind() == ErrorKind::ConnectionReset => None,
        Err(e) => panic!("unexpected read failure: {e}"),
    }
}

/// Whether the server has closed `stream`.
fn is_closed(stream: &mut UnixStream) -> bool {
    read_response(stream).is_none()
}

#[test]
fn test_auth_then_ping() {
    let harness = Harness::start();
    let mut stream = harness.authed();
    assert_eq!(send(&mut stream, &Command::Ping), Response::ok());
    assert_eq!(send(&mut stream, &Command::Ping), Response::ok());
}

#[test]
fn test_commands_before_auth_are_refused() {
    let harness = Harness::start();
    let mut stream = harness.connect();

    assert_eq!(send(&mut stream, &Command::Ping), Response::AuthRequired);
    assert_eq!(
        send(
            &mut stream,
            &Command::Tap {
                x: 1,
                y: 1,
                events: Vec::new(),
            }
        ),
        Response::AuthRequired
    );
    assert_eq!(send(&mut stream, &Command::Shutdown), Response::AuthRequired);
    assert!(harness.recording.sequences().is_empty());

    // Still usable afterwards.
    assert_eq!(send(&mut stream, &Command::Auth(TOKEN)), Response::ok());
    assert_eq!(send(&mut stream, &Command::Ping), Response::ok());
}

#[test]
fn test_three_bad_auths_then_disconnect() {
    let harness = Harness::start();
    let mut stream = harness.connect();

    for _ in 0..3 {
        let response = send(&mut stream, &Command::Auth([0u8; 32]));
        assert!(matches!(response, Response::Error(_)), "got {response:?}");
    }

    // Fourth attempt closes the session even with the right token.
    Command::Auth(TOKEN).encode().write_to(&mut stream).unwrap();
    assert!(is_closed(&mut stream));
}

#[test]
fn test_auth_attempt_limit_is_configurable() {
    let harness = Harness::start_with(|config| config.max_auth_attempts = 1);
    let mut stream = harness.connect();

    assert!(matches!(send(&mut stream, &Command::Auth([1u8; 32])), Response::Error(_)));
    Command::Auth(TOKEN).encode().write_to(&mut stream).unwrap();
    assert!(is_closed(&mut stream));
}

#[test]
fn test_humanized_tap_reaches_target() {
    let harness = Harness::start();
    let mut stream = harness.authed();

    let response = send(
        &mut stream,
        &Command::Tap {
            x: 100,
            y: 200,
            events: Vec::new(),
        },
    );
    assert_eq!(response, Response::ok());

    let sequences = harness.recording.sequences();
    assert_eq!(sequences.len(), 1);
    let events = &sequences[0];
    assert!(events.len() >= 5 * 5, "only {} events", events.len());

    // Touch down with a real tracking id, then BTN_TOUCH.
    assert_eq!(events[0].code, abs::MT_TRACKING_ID);
    assert!(events[0].value >= 1000);
    assert_eq!(events[1], InputEvent::key(key::BTN_TOUCH, true));

    // Lift: tracking id -1, BTN_TOUCH up, SYN.
    let n = events.len();
    assert_eq!(events[n - 3], InputEvent::abs(abs::MT_TRACKING_ID, -1));
    assert_eq!(events[n - 2], InputEvent::key(key::BTN_TOUCH, false));
    assert!(events[n - 1].is_syn_report());

    // Positions stay near the requested point.
    for event in events.iter().filter(|e| e.code == abs::MT_POSITION_X) {
        assert!((event.value - 100).abs() <= 60, "x drifted to {}", event.value);
    }
    for event in events.iter().filter(|e| e.code == abs::MT_POSITION_Y) {
        assert!((event.value - 200).abs() <= 60, "y drifted to {}", event.value);
    }
}

#[test]
fn test_explicit_events_are_injected_verbatim() {
    let harness = Harness::start();
    let mut stream = harness.authed();

    let events = vec![
        InputEvent::abs(abs::MT_TRACKING_ID, 9),
        InputEvent::abs(abs::MT_POSITION_X, 10),
        InputEvent::abs(abs::MT_POSITION_Y, 20),
        InputEvent::syn(),
        InputEvent::abs(abs::MT_TRACKING_ID, -1),
        InputEvent::syn(),
    ];
    let tap = Command::Tap {
        x: 0,
        y: 0,
        events: events.clone(),
    };
    assert_eq!(send(&mut stream, &tap), Response::ok());

    let swipe = Command::Swipe {
        points: vec![(0, 0)],
        duration_ms: 10,
        events: events.clone(),
    };
    assert_eq!(send(&mut stream, &swipe), Response::ok());

    assert_eq!(harness.recording.sequences(), vec![events.clone(), events]);
}

#[test]
fn test_humanized_swipe_and_short_path() {
    let harness = Harness::start();
    let mut stream = harness.authed();

    let swipe = Command::Swipe {
        points: vec![(100, 1800), (100, 600)],
        duration_ms: 200,
        events: Vec::new(),
    };
    assert_eq!(send(&mut stream, &swipe), Response::ok());
    assert_eq!(harness.recording.sequences().len(), 1);

    let short = Command::Swipe {
        points: vec![(100, 100)],
        duration_ms: 200,
        events: Vec::new(),
    };
    assert!(matches!(send(&mut stream, &short), Response::Error(_)));
    assert_eq!(harness.recording.sequences().len(), 1);
}

#[test]
fn test_text_is_forwarded() {
    let harness = Harness::start();
    let mut stream = harness.authed();

    assert_eq!(send(&mut stream, &Command::Text("héllo".into())), Response::ok());
    assert_eq!(harness.recording.texts(), vec!["héllo".to_string()]);
}

#[test]
fn test_injection_failure_keeps_connection_open() {
    let harness = Harness::start();
    let mut stream = harness.authed();
    harness.recording.set_failure(Some("device unplugged"));

    let response = send(
        &mut stream,
        &Command::Tap {
            x: 5,
            y: 5,
            events: Vec::new(),
        },
    );
    let message = response.error_message().expect("error response");
    assert!(message.contains("device unplugged"), "message was {message}");

    harness.recording.set_failure(None);
    assert_eq!(send(&mut stream, &Command::Ping), Response::ok());
}

#[test]
fn test_oversized_frame_is_rejected_before_payload() {
    let harness = Harness::start();
    let mut stream = harness.authed();

    // Header only: type TAP, declared length 2,000,000. No payload follows.
    let mut header = vec![0x02];
    header.extend_from_slice(&2_000_000u32.to_be_bytes());
    stream.write_all(&header).unwrap();

    assert!(is_closed(&mut stream));
    assert!(harness.recording.sequences().is_empty());
}

#[test]
fn test_unknown_command_type_closes_connection() {
    let harness = Harness::start();
    let mut stream = harness.authed();
    Frame::empty(0x42).write_to(&mut stream).unwrap();
    assert!(is_closed(&mut stream));
}

#[test]
fn test_device_info_round_trip() {
    let harness = Harness::start();
    let mut stream = harness.authed();

    let Response::Ok(payload) = send(&mut stream, &Command::GetDeviceInfo) else {
        panic!("expected Ok");
    };
    let info = DeviceInfo::decode(&payload).unwrap();
    assert_eq!(info.device_path, "recording");
    assert_eq!((info.screen_width, info.screen_height), (1080, 2400));
    assert_eq!(DeviceInfo::decode(&info.encode()).unwrap(), info);
}

#[test]
fn test_connections_are_independent() {
    let harness = Harness::start();
    let mut authed = harness.authed();
    let mut fresh = harness.connect();

    assert_eq!(send(&mut fresh, &Command::Ping), Response::AuthRequired);
    assert_eq!(send(&mut authed, &Command::Ping), Response::ok());
}

#[test]
fn test_shutdown_command_stops_server() {
    let mut harness = Harness::start();
    let mut stream = harness.authed();

    assert_eq!(send(&mut stream, &Command::Shutdown), Response::ok());
    assert!(is_closed(&mut stream));

    let server = harness.server.take().unwrap();
    server.wait().unwrap();
    assert!(!harness.socket.exists());
    assert_eq!(harness.recording.close_count(), 1);
    assert!(UnixStream::connect(&harness.socket).is_err());
}

#[test]
fn test_idle_connection_times_out() {
    let harness = Harness::start_with(|config| config.read_timeout_ms = 200);
    let mut stream = harness.authed();

    let started = Instant::now();
    assert!(is_closed(&mut stream));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_shutdown_forces_idle_connections_closed() {
    let mut harness = Harness::start();
    let mut stream = harness.authed();

    let started = Instant::now();
    harness.shutdown();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(is_closed(&mut stream));
    assert_eq!(harness.recording.close_count(), 1);
}

/// Harness with one worker and a one-slot queue, already saturated: the
/// worker holds an authenticated connection and another one waits in the
/// queue, so the next connection is served on the accept thread.
fn saturated() -> (Harness, UnixStream, UnixStream) {
    let harness = Harness::start_with(|config| {
        config.core_workers = 1;
        config.max_workers = 1;
        config.queue_capacity = 1;
    });
    let first = harness.authed();
    let queued = harness.connect();
    thread::sleep(Duration::from_millis(200));
    (harness, first, queued)
}

#[test]
fn test_saturated_pool_serves_on_accept_thread() {
    let (harness, first, mut queued) = saturated();

    // Queue full and no room for another worker: served by the caller.
    let mut overflow = harness.authed();
    assert_eq!(send(&mut overflow, &Command::Ping), Response::ok());

    // The queued connection is not served while the worker is busy.
    Command::Auth(TOKEN).encode().write_to(&mut queued).unwrap();
    queued.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    match Frame::read_from(&mut queued) {
        Err(FrameError::Io(e)) => assert!(matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)),
        other => panic!("queued connection answered early: {other:?}"),
    }

    // Freeing the worker lets it pick the queued connection up.
    drop(first);
    queued.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    assert_eq!(read_response(&mut queued), Some(Response::ok()));
    assert_eq!(send(&mut queued, &Command::Ping), Response::ok());

    drop(overflow);
}

#[test]
fn test_shutdown_not_held_off_by_chatty_client_on_accept_thread() {
    let (mut harness, _first, _queued) = saturated();

    let mut chatty = harness.connect();
    assert_eq!(send(&mut chatty, &Command::Ping), Response::AuthRequired);

    // Keeps the session busy with unauthenticated pings until dropped.
    let pinger = thread::spawn(move || {
        for _ in 0..100 {
            if Command::Ping.encode().write_to(&mut chatty).is_err() {
                return true;
            }
            match read_response(&mut chatty) {
                Some(response) => assert_eq!(response, Response::AuthRequired),
                None => return true,
            }
            thread::sleep(Duration::from_millis(100));
        }
        false
    });
    thread::sleep(Duration::from_millis(250));

    let started = Instant::now();
    harness.shutdown();
    assert!(started.elapsed() < Duration::from_secs(3), "shutdown took {:?}", started.elapsed());
    assert!(pinger.join().unwrap(), "client was never disconnected");
    assert!(!harness.socket.exists());
    assert_eq!(harness.recording.close_count(), 1);
}

#[test]
fn test_shutdown_closes_idle_client_on_accept_thread() {
    let (mut harness, mut first, mut queued) = saturated();

    let mut idle = harness.authed();
    assert_eq!(send(&mut idle, &Command::Ping), Response::ok());

    let started = Instant::now();
    harness.shutdown();
    assert!(started.elapsed() < Duration::from_secs(3), "shutdown took {:?}", started.elapsed());
    assert!(is_closed(&mut idle));
    assert!(is_closed(&mut first));
    assert!(is_closed(&mut queued));
}

/// Target that stores events one at a time and yields between them, so
/// two injections running at once would show up interleaved.
#[derive(Debug)]
struct PerEventTarget {
    log: Arc<Mutex<Vec<InputEvent>>>,
}

impl InjectionTarget for PerEventTarget {
    fn initialize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn inject_events(&mut self, events: &[InputEvent]) -> anyhow::Result<()> {
        for event in events {
            self.log.lock().unwrap().push(*event);
            thread::yield_now();
        }
        Ok(())
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            device_path: "per-event".to_string(),
            screen_width: 1080,
            screen_height: 2400,
            max_x: 1079,
            max_y: 2399,
            max_pressure: 255,
            max_touch_major: 30,
        }
    }

    fn close(&mut self) {}
}

/// Explicit tap gesture whose every non-SYN event carries `tag`.
fn tagged_gesture(tag: i32) -> Vec<InputEvent> {
    vec![
        InputEvent::abs(abs::MT_TRACKING_ID, tag),
        InputEvent::abs(abs::MT_POSITION_X, tag),
        InputEvent::abs(abs::MT_POSITION_Y, tag),
        InputEvent::syn(),
        InputEvent::abs(abs::MT_PRESSURE, tag),
        InputEvent::syn(),
    ]
}

#[test]
fn test_concurrent_gestures_are_never_interleaved() {
    const CLIENTS: i32 = 6;
    const TAPS: i32 = 25;

    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("tg.sock");
    let config = ServerConfig {
        socket: socket.to_string_lossy().into_owned(),
        humanize_delays: false,
        shutdown_grace_ms: 300,
        core_workers: CLIENTS as usize,
        max_workers: CLIENTS as usize,
        ..ServerConfig::default()
    };
    let log = Arc::new(Mutex::new(Vec::new()));
    let target = PerEventTarget { log: Arc::clone(&log) };
    let server = Server::start(config, AuthToken::from_bytes(TOKEN), Box::new(target)).unwrap();

    let clients: Vec<_> = (0..CLIENTS)
        .map(|client| {
            let socket = socket.clone();
            thread::spawn(move || {
                let mut stream = UnixStream::connect(&socket).unwrap();
                stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
                assert_eq!(send(&mut stream, &Command::Auth(TOKEN)), Response::ok());
                for tap in 0..TAPS {
                    let command = Command::Tap {
                        x: 0,
                        y: 0,
                        events: tagged_gesture(client * 1000 + tap + 1),
                    };
                    assert_eq!(send(&mut stream, &command), Response::ok());
                }
            })
        })
        .collect();
    for client in clients {
        client.join().unwrap();
    }
    server.shutdown().unwrap();

    let events = log.lock().unwrap().clone();
    let gesture_len = tagged_gesture(0).len();
    assert_eq!(events.len(), (CLIENTS * TAPS) as usize * gesture_len);

    let mut seen = std::collections::HashSet::new();
    for chunk in events.chunks(gesture_len) {
        let tag = chunk[0].value;
        assert_eq!(chunk, tagged_gesture(tag).as_slice(), "gesture {tag} was interleaved");
        assert!(seen.insert(tag), "gesture {tag} injected twice");
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_abstract_socket() {
    let name = format!("touchgate-test-{}", std::process::id());
    let target = RecordingTarget::phone();
    let config = ServerConfig {
        socket: format!("@{name}"),
        humanize_delays: false,
        shutdown_grace_ms: 300,
        ..ServerConfig::default()
    };
    let server = Server::start(config, AuthToken::from_bytes(TOKEN), Box::new(target)).unwrap();

    let mut stream = server.endpoint().connect().unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    assert_eq!(send(&mut stream, &Command::Auth(TOKEN)), Response::ok());
    assert_eq!(send(&mut stream, &Command::Ping), Response::ok());

    drop(stream);
    server.shutdown().unwrap();
}
