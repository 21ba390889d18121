//! Server and client talking over a real listening socket.


use config::Config;
use std::net::Shutdown;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use test_support::{Event, Recorder};
use udscomm::prelude::*;

fn socket_in(dir: &TempDir) -> PathBuf {
    dir.path().join("test.sock")
}

fn connect(path: &Path) -> Client<Recorder> {
    Client::connect(path, Recorder::new(), Options::default()).expect("connect failed")
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_echo_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);
    let options = Options::default().with_names(MessageNames::new(["hello"]));
    let mut server = Server::create(&path, Recorder::echoing(), options).unwrap();
    let mut client = connect(&path);
    let server_log = server.handler().log();
    let client_log = client.handler().log();

    client.enqueue(1, 42, b"ok").unwrap();
    // Type 1000 has no name; it must still be delivered.
    client.enqueue(1000, 7, &[]).unwrap();

    pump_until!([server, client], client_log.messages().len() == 2);

    let expected = vec![Message::new(1, 42, b"ok".to_vec()), Message::new(1000, 7, Vec::new())];
    assert_eq!(server_log.messages(), expected);
    assert_eq!(client_log.messages(), expected);

    let events = server_log.events();
    assert!(matches!(events[0], Event::Connected(_)), "connect comes first");
    assert_eq!(server_log.connects(), 1);
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_on_connect_can_send() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);
    let mut handler = Recorder::new();
    handler.greeting = Some((100, 0, b"welcome".to_vec()));
    let mut server = Server::create(&path, handler, Options::default()).unwrap();
    let mut client = connect(&path);
    let client_log = client.handler().log();

    pump_until!([server, client], !client_log.messages().is_empty());
    assert_eq!(client_log.messages(), vec![Message::new(100, 0, b"welcome".to_vec())]);
}

#[test]
fn test_client_disconnect_reaches_server() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);
    let mut server = Server::create(&path, Recorder::new(), Options::default()).unwrap();
    let server_log = server.handler().log();

    let mut client = connect(&path);
    pump_until!([server, client], server.connection_count() == 1);

    client.destroy();
    pump_until!([server], server_log.disconnects() == 1);
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_handler_close_spares_other_connections() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);
    let mut handler = Recorder::new();
    handler.close_on_type = Some(9);
    let mut server = Server::create(&path, handler, Options::default()).unwrap();
    let server_log = server.handler().log();

    let mut quitter = connect(&path);
    let mut stayer = connect(&path);
    let quitter_log = quitter.handler().log();
    pump_until!([server, quitter, stayer], server.connection_count() == 2);

    quitter.enqueue(9, 0, b"bye").unwrap();
    pump_until!([server, quitter, stayer], !quitter.is_connected());
    assert_eq!(quitter_log.disconnects(), 1);
    assert_eq!(server.connection_count(), 1);

    stayer.enqueue(1, 0, b"still here").unwrap();
    pump_until!([server, quitter, stayer], server_log.messages().len() == 2);
    assert_eq!(server_log.messages()[1], Message::new(1, 0, b"still here".to_vec()));
    assert_eq!(server_log.disconnects(), 1);
}

#[test]
fn test_destroy_connection_with_queued_messages() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);
    let mut server = Server::create(&path, Recorder::new(), Options::default()).unwrap();
    let server_log = server.handler().log();
    let mut client = connect(&path);
    let client_log = client.handler().log();
    pump_until!([server, client], server.connection_count() == 1);

    let id = server.connection_ids()[0];
    for i in 0..4 {
        server.send_to(id, 1, i, b"never sent").unwrap();
    }
    assert_eq!(server.connection(id).unwrap().queued_messages(), 4);

    server.destroy_connection(id);
    assert_eq!(server_log.disconnects(), 1);
    assert!(server.connection(id).is_none());

    // Unknown ids are ignored.
    server.destroy_connection(id);
    assert_eq!(server_log.disconnects(), 1);

    pump_until!([server, client], !client.is_connected());
    assert!(client_log.messages().is_empty());
}

#[test]
fn test_destroy_fires_every_disconnect() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);
    let mut server = Server::create(&path, Recorder::new(), Options::default()).unwrap();
    let server_log = server.handler().log();

    let mut first = connect(&path);
    let mut second = connect(&path);
    pump_until!([server, first, second], server.connection_count() == 2);

    server.destroy();
    assert_eq!(server_log.disconnects(), 2);

    pump_until!([first, second], !first.is_connected() && !second.is_connected());
}

#[test]
fn test_send_to_unknown_connection() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);
    let mut server = Server::create(&path, Recorder::new(), Options::default()).unwrap();

    let mut client = connect(&path);
    pump_until!([server, client], server.connection_count() == 1);
    let id = server.connection_ids()[0];
    server.destroy_connection(id);

    let err = server.send_to(id, 1, 0, b"gone").unwrap_err();
    assert!(matches!(err, Error::ConnectionNotFound { id: missing } if missing == id));
}

// ============================================================================
// Broadcast
// ============================================================================

#[test]
fn test_broadcast_reaches_every_client_in_order() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);
    let mut server = Server::create(&path, Recorder::new(), Options::default()).unwrap();
    let mut a = connect(&path);
    let mut b = connect(&path);
    let mut c = connect(&path);
    let logs = [a.handler().log(), b.handler().log(), c.handler().log()];
    pump_until!([server, a, b, c], server.connection_count() == 3);

    let first = server.broadcast(5, 1, b"first").unwrap();
    let second = server.broadcast(5, 2, b"second").unwrap();
    assert!(first.is_complete() && second.is_complete());
    assert_eq!(first.delivered.len(), 3);
    assert_eq!(second.delivered.len(), 3);

    pump_until!(
        [server, a, b, c],
        logs.iter().all(|log| log.messages().len() == 2)
    );
    for log in &logs {
        assert_eq!(
            log.messages(),
            vec![
                Message::new(5, 1, b"first".to_vec()),
                Message::new(5, 2, b"second".to_vec()),
            ]
        );
    }
}

#[test]
fn test_broadcast_without_connections() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);
    let mut server = Server::create(&path, Recorder::new(), Options::default()).unwrap();

    let report = server.broadcast(1, 0, b"anyone?").unwrap();
    assert!(report.is_complete());
    assert!(report.delivered.is_empty());
}

#[test]
fn test_broadcast_continues_past_failed_connection() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);
    let mut server = Server::create(&path, Recorder::new(), Options::default()).unwrap();
    let mut a = connect(&path);
    let mut b = connect(&path);
    let mut c = connect(&path);
    let logs = [a.handler().log(), b.handler().log(), c.handler().log()];
    pump_until!([server, a, b, c], server.connection_count() == 3);

    let broken = server.connection_ids()[0];
    server.shutdown_connection(broken, Shutdown::Write);

    let report = server.broadcast(2, 0, b"partial").unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.delivered.len(), 2);
    assert!(!report.delivered.contains(&broken));
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(report.failed[0], (id, Error::WriteShutdown { .. }) if id == broken));

    pump_until!(
        [server, a, b, c],
        logs.iter().filter(|log| log.messages().len() == 1).count() == 2
    );
    let unreached: Vec<_> = logs.iter().filter(|log| log.messages().is_empty()).collect();
    assert_eq!(unreached.len(), 1);
}

#[test]
fn test_broadcast_over_limit_queues_nothing() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);
    let options = Options::default().with_max_payload_size(4);
    let mut server = Server::create(&path, Recorder::new(), options).unwrap();
    let mut client = connect(&path);
    pump_until!([server, client], server.connection_count() == 1);

    let err = server.broadcast(1, 0, b"oversized").unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge { size: 9, max: 4 }));
    let id = server.connection_ids()[0];
    assert_eq!(server.connection(id).unwrap().queued_messages(), 0);
}

// ============================================================================
// Construction Failures
// ============================================================================

#[test]
fn test_bind_in_missing_directory_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing").join("test.sock");

    let err = Server::create(&path, Recorder::new(), Options::default()).unwrap_err();
    assert!(matches!(err, Error::Bind { path: failed, .. } if failed == path));
}

#[test]
fn test_connect_without_listener_fails() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);

    let err = Client::connect(&path, Recorder::new(), Options::default()).unwrap_err();
    assert!(matches!(err, Error::Connect { .. }));
}

#[test]
fn test_stale_socket_file_is_replaced() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);

    let server = Server::create(&path, Recorder::new(), Options::default()).unwrap();
    drop(server);
    assert!(path.exists(), "the socket file outlives the server");

    let keep_stale = Options {
        unlink_stale_socket: false,
        ..Options::default()
    };
    let err = Server::create(&path, Recorder::new(), keep_stale).unwrap_err();
    assert!(matches!(err, Error::Bind { .. }));

    let mut server = Server::create(&path, Recorder::new(), Options::default()).unwrap();
    let mut client = connect(&path);
    pump_until!([server, client], server.connection_count() == 1);
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_new_named_reads_namespaced_keys() {
    let dir = TempDir::new().unwrap();
    let path = socket_in(&dir);
    let config = Config::builder()
        .set_default("socket_path", path.to_str().unwrap())
        .unwrap()
        .set_default("agentd.max_payload_size", 8)
        .unwrap()
        .build()
        .unwrap();

    let mut server =
        Server::new_named(&config, "agentd", Recorder::new(), MessageNames::default()).unwrap();
    let server_log = server.handler().log();
    assert_eq!(server.path(), path.as_path());

    // No "session" namespace: falls back to the global keys.
    let mut client =
        Client::new_named(&config, "session", Recorder::new(), MessageNames::default()).unwrap();
    client.enqueue(1, 0, b"fits").unwrap();
    client.enqueue(2, 0, b"too large").unwrap();

    pump_until!([server, client], server_log.disconnects() == 1);
    assert_eq!(server_log.messages(), vec![Message::new(1, 0, b"fits".to_vec())]);
}

#[test]
fn test_new_named_requires_socket_path() {
    let config = Config::builder().build().unwrap();

    let err = Server::new_named(&config, "agentd", Recorder::new(), MessageNames::default())
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
