//! Engine over a real TCP socket against a minimal broker stub.

mod common;

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use common::{test_config, wait_until};
use stomp_client::frame::{command, Frame, FrameSplitter};
use stomp_client::{ConnectionStatus, Engine, TcpTransport};

fn reply(socket: &mut TcpStream, frame: &str) {
    socket.write_all(frame.as_bytes()).unwrap();
    socket.write_all(b"\0").unwrap();
}

/// Serve one client: CONNECTED, RECEIPTs, a MESSAGE for every SEND. Returns
/// the commands received, in order.
fn serve(listener: TcpListener) -> Vec<String> {
    let (mut socket, _) = listener.accept().unwrap();
    let mut splitter = FrameSplitter::new();
    let mut seen = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).unwrap();
        if n == 0 {
            return seen;
        }
        for raw in splitter.feed(&buf[..n]).unwrap() {
            let frame = Frame::decode(&raw).unwrap();
            seen.push(frame.command.clone());
            if frame.command == command::CONNECT {
                reply(&mut socket, "CONNECTED\nversion:1.2\n\n");
                continue;
            }
            if frame.command == command::SEND {
                reply(
                    &mut socket,
                    &format!(
                        "MESSAGE\ndestination:{}\nuser:{}\nmessage-id:7\nsubscription:1\n\n{}",
                        frame.header("destination").unwrap(),
                        frame.header("user").unwrap(),
                        frame.body
                    ),
                );
            }
            if let Some(receipt) = frame.header("receipt") {
                reply(&mut socket, &format!("RECEIPT\nreceipt-id:{receipt}\n\n"));
            }
            if frame.command == command::DISCONNECT {
                return seen;
            }
        }
    }
}

#[test]
fn test_session_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let broker = thread::spawn(move || serve(listener));

    let engine = Engine::new(test_config(), TcpTransport::new(addr, Duration::from_secs(1)));
    assert!(engine.connect("alice", "secret"));
    assert!(engine.subscribe("police"));
    assert!(engine.send(
        "police",
        "user:alice\nevent name:fire\ndate time:100\ndescription:smoke\n"
    ));

    assert!(wait_until(Duration::from_secs(2), || engine.events("/police").len() == 1));
    assert_eq!(engine.events("/police")[0].owner(), "alice");
    assert!(wait_until(Duration::from_secs(2), || engine.pending_receipts() == 0));

    assert!(engine.disconnect());
    assert_eq!(engine.status(), ConnectionStatus::Disconnected);
    assert_eq!(
        broker.join().unwrap(),
        ["CONNECT", "SUBSCRIBE", "SEND", "DISCONNECT"]
    );
}

#[test]
fn test_broker_hangup_is_noticed() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let broker = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).unwrap();
        reply(&mut socket, "CONNECTED\nversion:1.2\n\n");
        thread::sleep(Duration::from_millis(100));
        drop(socket);
    });

    let engine = Engine::new(test_config(), TcpTransport::new(addr, Duration::from_secs(1)));
    assert!(engine.connect("alice", "secret"));
    broker.join().unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        engine.status() == ConnectionStatus::Disconnected
    }));
}

#[test]
fn test_unreachable_broker() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let engine = Engine::new(test_config(), TcpTransport::new(addr, Duration::from_millis(500)));
    assert!(!engine.connect("alice", "secret"));
    assert_eq!(engine.status(), ConnectionStatus::Disconnected);
}

#[test]
fn test_non_utf8_message_does_not_end_session() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let broker = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut splitter = FrameSplitter::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).unwrap();
            if n == 0 {
                return;
            }
            for raw in splitter.feed(&buf[..n]).unwrap() {
                let frame = Frame::decode(&raw).unwrap();
                if frame.command == command::CONNECT {
                    let mut burst = Vec::new();
                    burst.extend_from_slice(b"CONNECTED\nversion:1.2\n\n\0");
                    burst.extend_from_slice(
                        b"MESSAGE\ndestination:/police\nuser:bob\n\nevent name:good1\n\0",
                    );
                    burst.extend_from_slice(
                        b"MESSAGE\ndestination:/police\nuser:bob\n\nevent name:bad \xff\n\0",
                    );
                    burst.extend_from_slice(
                        b"MESSAGE\ndestination:/police\nuser:bob\n\nevent name:good2\n\0",
                    );
                    socket.write_all(&burst).unwrap();
                    continue;
                }
                if let Some(receipt) = frame.header("receipt") {
                    reply(&mut socket, &format!("RECEIPT\nreceipt-id:{receipt}\n\n"));
                }
                if frame.command == command::DISCONNECT {
                    return;
                }
            }
        }
    });

    let engine = Engine::new(test_config(), TcpTransport::new(addr, Duration::from_secs(1)));
    assert!(engine.connect("alice", "secret"));
    assert!(wait_until(Duration::from_secs(2), || engine.events("/police").len() == 2));
    assert_eq!(engine.status(), ConnectionStatus::Connected);

    let names: Vec<String> = engine
        .events("/police")
        .iter()
        .map(|event| event.name().to_string())
        .collect();
    assert_eq!(names, ["good1", "good2"]);

    assert!(engine.disconnect());
    broker.join().unwrap();
}
