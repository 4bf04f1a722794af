mod common;

use nq::client::{ClientEvent, ClientSession, UserCmd};
use nq::config::ClientConfig;
use nq::net::ManualClock;
use nq::protocol::SIGNONS;
use nq::server::{LocalServer, ServerEvent, World};

use common::{known_models, loopback_manager, single_player_config};

const FRAME: f64 = 0.05;

#[test]
fn test_local_handshake_and_interpolation() {
    let clock = ManualClock::new(1.0);
    let mut net = loopback_manager(&clock);
    let config = single_player_config();
    let mut loader = known_models(&config);

    let mut server = LocalServer::spawn(&mut net, config).unwrap();
    let mut client = ClientSession::new(ClientConfig {
        name: "ranger".to_string(),
        ..Default::default()
    });
    client.connect(&mut net, None).unwrap();

    let mut events = Vec::new();
    for _ in 0..40 {
        clock.advance(FRAME);
        server.frame(&mut net, FRAME).unwrap();
        client
            .frame(&mut net, FRAME, &UserCmd::default(), &mut loader)
            .unwrap();
        events.extend(client.drain_events());
    }

    assert_eq!(client.signon(), SIGNONS);
    assert!(events.contains(&ClientEvent::SignonComplete));
    assert!(events.iter().any(|e| matches!(e, ClientEvent::LevelLoaded { .. })));

    let server_events: Vec<_> = server.drain_events().collect();
    assert!(server_events.contains(&ServerEvent::ClientSpawned {
        slot: 0,
        name: "ranger".to_string(),
    }));

    let cl = client.state();
    assert_eq!(cl.view_entity, World::player_entity(0) as i32);
    assert_eq!(cl.scores[0].name, "ranger");
    assert_eq!(cl.static_entities.len(), 1);

    // The orbiting entity follows the server within one frame of motion.
    let orbiter = server.world().entities.len() - 1;
    let served = server.world().entities[orbiter].state.origin;
    let seen = cl.entities[orbiter].origin;
    assert!(cl.entities[orbiter].model.is_some());
    assert!(seen.distance(served) < 16.0, "{seen} vs {served}");
    assert!(cl.visible_entities.contains(&orbiter));
}

#[test]
fn test_server_shutdown_disconnects_client() {
    let clock = ManualClock::new(1.0);
    let mut net = loopback_manager(&clock);
    let config = single_player_config();
    let mut loader = known_models(&config);

    let mut server = LocalServer::spawn(&mut net, config).unwrap();
    let mut client = ClientSession::new(ClientConfig::default());
    client.connect(&mut net, None).unwrap();
    for _ in 0..20 {
        clock.advance(FRAME);
        server.frame(&mut net, FRAME).unwrap();
        client
            .frame(&mut net, FRAME, &UserCmd::default(), &mut loader)
            .unwrap();
    }

    assert_eq!(server.shutdown(&mut net).unwrap(), 0);
    assert!(net.local_server().is_none());
    assert!(
        client
            .frame(&mut net, FRAME, &UserCmd::default(), &mut loader)
            .is_err()
    );
    assert!(!client.is_connected());
}
