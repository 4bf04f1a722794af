mod common;

use nq::client::{DecodedMessage, UserCmd};
use nq::config::ClientConfig;
use nq::demo::DemoReader;
use nq::net::ManualClock;
use nq::protocol::{SIGNONS, ServerOp};

use common::{loopback_host, loopback_host_with};

const FRAME: f64 = 0.05;

#[test]
fn test_record_and_play_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intro.dem");
    let clock = ManualClock::new(1.0);
    let shownet = ClientConfig {
        shownet: true,
        ..Default::default()
    };

    let mut host = loopback_host_with(&clock, shownet.clone());
    host.execute_line(&format!("record {} start 7", path.display()))
        .unwrap();
    assert!(host.client().is_recording());
    for _ in 0..40 {
        clock.advance(FRAME);
        host.frame(FRAME, &UserCmd::default()).unwrap();
    }
    assert_eq!(host.client().signon(), SIGNONS);
    host.execute_line("stop").unwrap();
    assert!(!host.client().is_recording());
    let recorded: Vec<DecodedMessage> = host.client().shownet_history().iter().cloned().collect();

    // Header carries the forced track; the last frame is a disconnect.
    let (mut reader, track) = DemoReader::open(&path).unwrap();
    assert_eq!(track, 7);
    let mut frames = Vec::new();
    while let Some(frame) = reader.read_frame().unwrap() {
        frames.push(frame);
    }
    assert!(frames.len() > 3);
    assert_eq!(frames[0].payload.first(), Some(&(ServerOp::Print as u8)));
    assert_eq!(
        frames.last().unwrap().payload,
        vec![ServerOp::Disconnect as u8]
    );
    // Every live message went to the file, plus the closing disconnect.
    assert_eq!(recorded.len(), frames.len() - 1);
    assert!(recorded
        .iter()
        .any(|m| m.opcodes.iter().any(|&op| op & ServerOp::FAST_UPDATE != 0)));
    for (message, frame) in recorded.iter().zip(&frames) {
        assert_eq!(message.view_angles, frame.view_angles);
    }

    let playback_clock = ManualClock::new(1.0);
    let mut viewer = loopback_host_with(&playback_clock, shownet);
    viewer
        .execute_line(&format!("playdemo {}", path.display()))
        .unwrap();
    assert!(viewer.client().is_playing_demo());

    let mut reached_signon = false;
    for _ in 0..200 {
        playback_clock.advance(FRAME);
        let result = viewer.frame(FRAME, &UserCmd::default());
        reached_signon |= viewer.client().signon() == SIGNONS;
        if result.is_err() || !viewer.client().is_playing_demo() {
            break;
        }
    }
    assert!(reached_signon);
    assert!(!viewer.client().is_playing_demo());
    assert_eq!(viewer.client().state().level_name, "Introduction");

    let replayed: Vec<DecodedMessage> =
        viewer.client().shownet_history().iter().cloned().collect();
    assert_eq!(replayed, recorded);
}

#[test]
fn test_record_refused_while_connected() {
    let clock = ManualClock::new(1.0);
    let mut host = loopback_host(&clock);
    host.execute_line("map start").unwrap();
    assert!(host.execute_line("record late").is_err());
    assert!(!host.client().is_recording());
}

#[test]
fn test_missing_demo_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(1.0);
    let mut host = loopback_host(&clock);
    let missing = dir.path().join("nothing.dem");
    assert!(host
        .execute_line(&format!("playdemo {}", missing.display()))
        .is_err());
    assert!(!host.client().is_playing_demo());
}
