//! Simulated radio nodes running the stack on the host.
//!
//! In `link` mode (the default), node A sends a numbered line of text every
//! second over Radio Com and node B echoes every line back in upper case. A
//! third node sniffs the channel with a Radio Queue, keeping frames that fail
//! the CRC check when `allow_crc_errors` is set.
//!
//! In `network` mode, three nodes form a line: A at the configured address,
//! a relay, and C, which A cannot hear directly. Once routes have spread, A
//! sends C a message every second through the relay.
//!
//! The simulated channel runs on its own thread, standing in for the radio
//! interrupt, paced by the wall clock. Node A's counters are served at
//! http://localhost:8080/stats.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin host-node [config.json]
//! ```

use log::{debug, error, info, warn};
use radiolink::sim::Delivery;
use radiolink::{
    Link, Mac, MacHandle, NetworkError, NodeConfig, NodeMode, NodeStats, RadioCom, SimNetwork,
    SimTransceiver, StatsServer,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest slice of virtual time simulated in one go.
const MAX_SLICE_US: u64 = 10_000;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== radiolink host node starting ===");

    let config = match std::env::args().nth(1) {
        Some(path) => match NodeConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => NodeConfig::default(),
    };
    info!("Mode {:?}, channel {}", config.mode, config.channel);

    let stats_a = Arc::new(NodeStats::new("host-a"));

    // Keep server alive - dropped on exit
    let _stats_server = config.stats_port.and_then(|port| {
        match StatsServer::start(None, port, stats_a.clone()) {
            Ok(server) => {
                info!(
                    "Stats server running at http://localhost:{}/stats",
                    server.port()
                );
                Some(server)
            }
            Err(e) => {
                warn!("Failed to start stats server: {}", e);
                warn!("Continuing without stats server");
                None
            }
        }
    });

    match config.mode {
        NodeMode::Link => run_link(&config, stats_a),
        NodeMode::Network => run_network(&config, stats_a),
    }
}

fn run_link(config: &NodeConfig, stats_a: Arc<NodeStats>) {
    let stats_b = Arc::new(NodeStats::new("host-b"));
    let seed = config.backoff_seed_or_random();
    let settings = config.radio_settings();
    let mut net = SimNetwork::new();

    let handle_a = MacHandle::new();
    let (link_a, radio_a) = Link::with_stats(handle_a.clone(), seed, stats_a.clone());
    net.add_node(Mac::new(SimTransceiver::new(), radio_a, handle_a), &settings);

    let handle_b = MacHandle::new();
    let (link_b, radio_b) =
        Link::with_stats(handle_b.clone(), seed.wrapping_add(1), stats_b.clone());
    net.add_node(Mac::new(SimTransceiver::new(), radio_b, handle_b), &settings);

    let handle_s = MacHandle::new();
    let (mut sniffer, sniffer_radio) = config.radio_queue(
        handle_s.clone(),
        seed.wrapping_add(2),
        Arc::new(NodeStats::new("sniffer")),
    );
    net.add_node(Mac::new(SimTransceiver::new(), sniffer_radio, handle_s), &settings);

    let _radio_thread = thread::spawn(move || run_air(net));

    let mut com_a = RadioCom::new(link_a);
    let mut com_b = RadioCom::new(link_b);
    let mut line_a = Vec::new();
    let mut line_b = Vec::new();

    info!("Entering main loop (Ctrl+C to exit)...");

    let started = Instant::now();
    let mut next_message = started;
    let mut next_heartbeat = started + Duration::from_secs(5);
    let mut counter = 0u32;
    loop {
        let now = Instant::now();

        if now >= next_message {
            next_message += Duration::from_secs(1);
            counter += 1;
            let message = format!("hello from a, message #{}\n", counter);
            let taken = com_a.tx_send(message.as_bytes());
            if taken < message.len() {
                warn!("a: stream backlogged, {} bytes dropped", message.len() - taken);
            }
            com_a.tx_control_signals((counter & 0x03) as u8);
        }

        // B echoes complete lines back in upper case
        while let Some(byte) = com_b.rx_receive_byte() {
            line_b.push(byte);
            if byte == b'\n' {
                debug!("b: got {:?}", String::from_utf8_lossy(&line_b));
                let echo = line_b.to_ascii_uppercase();
                if com_b.tx_send(&echo) < echo.len() {
                    warn!("b: echo truncated");
                }
                line_b.clear();
            }
        }

        while let Some(byte) = com_a.rx_receive_byte() {
            line_a.push(byte);
            if byte == b'\n' {
                info!(
                    "a: echo {:?} (signals {:#04b})",
                    String::from_utf8_lossy(&line_a).trim_end(),
                    com_b.rx_control_signals()
                );
                line_a.clear();
            }
        }

        while let Some(packet) = sniffer.rx_current_packet() {
            let status = packet.status();
            debug!(
                "sniffer: {:02x?} ({} dBm, lqi {}, crc {})",
                packet.data(),
                status.rssi_dbm(),
                status.lqi(),
                if status.crc_ok() { "ok" } else { "bad" }
            );
            sniffer.rx_done_with_packet();
        }

        com_a.service();
        com_b.service();

        if now >= next_heartbeat {
            next_heartbeat += Duration::from_secs(5);
            info!(
                "Heartbeat - a: {} sent, {} retransmitted; b: {} delivered, {} duplicates; sniffer: {} frames",
                stats_a.link.frames_sent.get(),
                stats_a.link.retransmissions.get(),
                stats_b.link.delivered.get(),
                stats_b.link.duplicates.get(),
                sniffer.stats().frames_received.get()
            );
        }

        thread::sleep(Duration::from_millis(1));
    }
}

/// Next unicast address after `address`, wrapping within 1..=254.
fn next_address(address: u8) -> u8 {
    address % 254 + 1
}

fn run_network(config: &NodeConfig, stats_a: Arc<NodeStats>) {
    let seed = config.backoff_seed_or_random();
    let relay_config = NodeConfig {
        address: next_address(config.address),
        ..config.clone()
    };
    let far_config = NodeConfig {
        address: next_address(relay_config.address),
        ..config.clone()
    };
    let stats_relay = Arc::new(NodeStats::new("host-relay"));
    let stats_c = Arc::new(NodeStats::new("host-c"));

    let mut net = SimNetwork::new();
    // A and C are out of range of each other
    net.set_delivery_filter(|info| match (info.from, info.to) {
        (0, 2) | (2, 0) => Delivery::Drop,
        _ => Delivery::Deliver,
    });

    let mut nodes = Vec::new();
    for (i, (node_config, stats)) in [
        (config, stats_a.clone()),
        (&relay_config, stats_relay.clone()),
        (&far_config, stats_c.clone()),
    ]
    .into_iter()
    .enumerate()
    {
        let handle = MacHandle::new();
        let (queue, radio) =
            node_config.radio_queue(handle.clone(), seed.wrapping_add(i as u32), stats);
        let settings = node_config.network().radio_settings(node_config.channel);
        net.add_node(Mac::new(SimTransceiver::new(), radio, handle), &settings);
        match node_config.radio_network(queue) {
            Ok(network) => nodes.push(network),
            Err(e) => {
                error!("Cannot start node at {}: {}", node_config.address, e);
                std::process::exit(1);
            }
        }
    }
    info!(
        "Nodes at {}, {} (relay) and {}",
        config.address, relay_config.address, far_config.address
    );

    let _radio_thread = thread::spawn(move || run_air(net));

    info!("Entering main loop (Ctrl+C to exit)...");

    let started = Instant::now();
    let mut next_message = started;
    let mut next_heartbeat = started + Duration::from_secs(5);
    let mut counter = 0u32;
    loop {
        let now = Instant::now();
        for node in &mut nodes {
            node.service(now);
        }

        if now >= next_message {
            next_message += Duration::from_secs(1);
            counter += 1;
            let message = format!("hop #{}", counter);
            match nodes[0].tx_send_packet(far_config.address, message.as_bytes()) {
                Ok(()) => debug!("a: sent {:?}", message),
                Err(NetworkError::Unreachable) => {
                    debug!("a: no route to {} yet", far_config.address)
                }
                Err(e) => warn!("a: send failed: {}", e),
            }
        }

        let far = &mut nodes[2];
        while let Some(packet) = far.rx_current_packet() {
            info!(
                "c: {:?} from {} ({} dBm)",
                String::from_utf8_lossy(packet.payload()),
                packet.source(),
                packet.status().rssi_dbm()
            );
            far.rx_done_with_packet();
        }

        if now >= next_heartbeat {
            next_heartbeat += Duration::from_secs(5);
            info!(
                "Heartbeat - a: {} routes, {} sent; relay: {} forwarded; c: {} delivered",
                stats_a.network.routes.get(),
                stats_a.network.sent.get(),
                stats_relay.network.forwarded.get(),
                stats_c.network.delivered.get()
            );
        }

        thread::sleep(Duration::from_millis(1));
    }
}

/// Advance the simulated air in step with the wall clock.
fn run_air(mut net: SimNetwork) {
    let mut last = Instant::now();
    loop {
        thread::sleep(Duration::from_millis(1));
        let now = Instant::now();
        let elapsed = now.duration_since(last).as_micros() as u64;
        last = now;
        net.run_for(elapsed.min(MAX_SLICE_US));
    }
}
