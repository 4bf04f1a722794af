use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use nq::config::NetConfig;
use nq::net::{NetManager, Received, SendStatus};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn config(port: u16) -> NetConfig {
    NetConfig {
        hostport: port,
        connect_attempt_secs: 1.0,
        ..Default::default()
    }
}

/// Bytes large enough to need several fragments.
fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Accepts one client, answers its reliable message with a larger one and
/// waits for the answer to be acknowledged.
fn run_echo_server(port: u16, ready: mpsc::Sender<()>) -> Vec<u8> {
    let mut net = NetManager::new(config(port));
    net.set_max_clients(4).unwrap();
    assert!(net.is_listening());
    ready.send(()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(15);
    let id = loop {
        if let Some(id) = net.check_new_connections().unwrap() {
            break id;
        }
        assert!(Instant::now() < deadline, "no client connected");
        thread::sleep(Duration::from_millis(1));
    };

    let request = loop {
        match net.get_message(id).unwrap() {
            Received::Reliable => break net.message().as_slice().to_vec(),
            Received::Dead => panic!("client went away"),
            _ => {}
        }
        assert!(Instant::now() < deadline, "no request arrived");
        thread::sleep(Duration::from_millis(1));
    };

    assert_eq!(net.send_message(id, &pattern(2500, 7)).unwrap(), SendStatus::Sent);
    while !net.can_send_message(id).unwrap() {
        net.get_message(id).unwrap();
        assert!(net.connection(id).unwrap().sequences_consistent());
        assert!(Instant::now() < deadline, "reply never acknowledged");
        thread::sleep(Duration::from_millis(1));
    }
    net.shutdown().unwrap();
    request
}

#[test]
fn test_fragmented_messages_over_localhost() {
    let port = next_port();
    let (ready_tx, ready_rx) = mpsc::channel();
    let server = thread::spawn(move || run_echo_server(port, ready_tx));
    ready_rx.recv().unwrap();

    let mut net = NetManager::new(config(port + 1));
    let id = net
        .connect(Some(&format!("127.0.0.1:{port}")))
        .unwrap()
        .expect("connection refused");

    let request = pattern(3000, 1);
    assert_eq!(net.send_message(id, &request).unwrap(), SendStatus::Sent);
    assert!(net.connection(id).unwrap().sequences_consistent());

    let deadline = Instant::now() + Duration::from_secs(15);
    let reply = loop {
        match net.get_message(id).unwrap() {
            Received::Reliable => break net.message().as_slice().to_vec(),
            Received::Dead => panic!("server went away"),
            _ => {}
        }
        assert!(net.connection(id).unwrap().sequences_consistent());
        assert!(Instant::now() < deadline, "no reply arrived");
        thread::sleep(Duration::from_millis(1));
    };
    assert_eq!(reply, pattern(2500, 7));

    let seen = server.join().unwrap();
    assert_eq!(seen, request);
    assert!(net.stats().messages_sent >= 1);
}
