//! End-to-end scenarios on the simulated air.

use std::time::Instant;

use super::{Delivery, SimNetwork, SimTransceiver};
use crate::com::RadioCom;
use crate::link::{FrameType, Header, Link, LINK_RX_SLOTS, LINK_TX_SLOTS};
use crate::network::{NetworkConfig, RadioNetwork, ADVERT_INTERVAL};
use crate::queue::{RadioQueue, QUEUE_TX_SLOTS};
use crate::radio::{Mac, MacHandle, RadioSettings};

const CHANNEL: u8 = 42;

fn link_node(net: &mut SimNetwork, seed: u32) -> Link {
    let handle = MacHandle::new();
    let (link, radio) = Link::new(handle.clone(), seed);
    let settings = RadioSettings::with_channel(CHANNEL);
    net.add_node(Mac::new(SimTransceiver::new(), radio, handle), &settings);
    link
}

fn link_pair() -> (SimNetwork, Link, Link) {
    let mut net = SimNetwork::new();
    net.record_air();
    let a = link_node(&mut net, 11);
    let b = link_node(&mut net, 22);
    (net, a, b)
}

fn queue_node(net: &mut SimNetwork, seed: u32) -> RadioQueue {
    let handle = MacHandle::new();
    let (queue, radio) = RadioQueue::new(handle.clone(), seed);
    let settings = RadioSettings::with_channel(CHANNEL);
    net.add_node(Mac::new(SimTransceiver::new(), radio, handle), &settings);
    queue
}

fn network_node(net: &mut SimNetwork, address: u8, seed: u32) -> RadioNetwork {
    let config = NetworkConfig { address };
    let handle = MacHandle::new();
    let (queue, radio) = RadioQueue::new(handle.clone(), seed);
    net.add_node(
        Mac::new(SimTransceiver::new(), radio, handle),
        &config.radio_settings(CHANNEL),
    );
    RadioNetwork::new(queue, &config).unwrap()
}

fn drain(link: &mut Link, out: &mut Vec<Vec<u8>>) {
    while let Some(packet) = link.rx_current_packet() {
        out.push(packet.payload().to_vec());
        link.rx_done_with_packet();
    }
}

fn frame_type(frame: &[u8]) -> Option<FrameType> {
    frame.get(1).map(|&byte| Header::from_byte(byte).frame_type)
}

fn assert_partitioned(masks: (u32, u32), slots: usize) {
    let (consumer, radio) = masks;
    assert_eq!(consumer & radio, 0, "buffer owned twice");
    assert_eq!(consumer | radio, (1 << slots) - 1, "buffer owned by nobody");
}

#[test]
fn test_link_delivers_in_order() {
    let (mut net, mut a, mut b) = link_pair();
    let mut received = Vec::new();
    for i in 0..6u8 {
        assert!(net.run_until(100_000, || {
            drain(&mut b, &mut received);
            a.tx_available() > 0
        }));
        a.send(i % 4, &[i; 7]).unwrap();
    }
    assert!(net.run_until(100_000, || {
        drain(&mut b, &mut received);
        a.tx_available() == LINK_TX_SLOTS
    }));
    drain(&mut b, &mut received);

    let expected: Vec<Vec<u8>> = (0..6u8).map(|i| vec![i; 7]).collect();
    assert_eq!(received, expected);
    assert_eq!(a.stats().acked.get(), 6);
}

#[test]
fn test_lost_acks_deliver_exactly_once() {
    let (mut net, mut a, mut b) = link_pair();
    // Drop every other ACK from B for five rounds
    let mut acks = 0;
    net.set_delivery_filter(move |info| {
        if info.from == 1 && frame_type(info.frame) == Some(FrameType::Ack) {
            acks += 1;
            if acks <= 10 && acks % 2 == 1 {
                return Delivery::Drop;
            }
        }
        Delivery::Deliver
    });

    let payloads: [&[u8]; 5] = [b"abc", b"round 2", b"round 3", b"round 4", b"round 5"];
    let mut received = Vec::new();
    for payload in payloads {
        a.send(0, payload).unwrap();
        assert!(net.run_until(200_000, || a.tx_available() == LINK_TX_SLOTS));
        drain(&mut b, &mut received);
        assert_partitioned(a.tx_ownership(), LINK_TX_SLOTS);
        assert_partitioned(b.rx_ownership(), LINK_RX_SLOTS);
    }

    assert_eq!(received, payloads.map(<[u8]>::to_vec));
    assert_eq!(received.iter().filter(|p| p.as_slice() == b"abc").count(), 1);
    assert_eq!(b.stats().duplicates.get(), 5);
    assert!(a.stats().retransmissions.get() >= 5);
}

#[test]
fn test_full_receive_ring_naks() {
    let (mut net, mut a, mut b) = link_pair();
    a.send(0, b"one").unwrap();
    a.send(0, b"two").unwrap();
    assert!(net.run_until(100_000, || a.tx_available() == LINK_TX_SLOTS));
    assert_eq!(b.rx_available(), 2);

    // The consumer holds both buffers: the third packet is refused
    a.send(0, b"three").unwrap();
    net.run_for(20_000);
    assert_eq!(b.rx_available(), 2);
    assert_eq!(a.tx_available(), LINK_TX_SLOTS - 1);
    assert_eq!(b.stats().delivered.get(), 2);
    assert!(b.stats().naks_sent.get() > 0);
    assert!(net
        .air_log()
        .iter()
        .any(|record| record.from == 1 && frame_type(&record.frame) == Some(FrameType::Nak)));
    assert_partitioned(b.rx_ownership(), LINK_RX_SLOTS);

    // Freeing one buffer lets the next retransmission in
    let mut received = Vec::new();
    assert_eq!(b.rx_current_packet().unwrap().payload(), b"one");
    b.rx_done_with_packet();
    assert!(net.run_until(100_000, || a.tx_available() == LINK_TX_SLOTS));
    drain(&mut b, &mut received);
    assert_eq!(received, vec![b"two".to_vec(), b"three".to_vec()]);
    assert_eq!(b.stats().delivered.get(), 3);
}

#[test]
fn test_corrupted_frames_never_delivered() {
    let (mut net, mut a, b) = link_pair();
    let mut corrupted = 0;
    net.set_delivery_filter(move |info| {
        if info.from == 0 && corrupted < 3 {
            corrupted += 1;
            return Delivery::Corrupt;
        }
        Delivery::Deliver
    });

    a.send(0, b"data").unwrap();
    assert!(net.run_until(200_000, || a.tx_available() == LINK_TX_SLOTS));
    assert_eq!(b.stats().crc_failures.get(), 3);
    assert_eq!(b.rx_available(), 1);
    assert_eq!(b.rx_current_packet().unwrap().payload(), b"data");
    assert!(b.rx_current_packet().unwrap().crc_ok());
}

#[test]
fn test_queue_drops_corrupted_frames() {
    let mut net = SimNetwork::new();
    let mut a = queue_node(&mut net, 1);
    let b = queue_node(&mut net, 2);
    net.set_delivery_filter(|_| Delivery::Corrupt);

    a.send(b"bad").unwrap();
    net.run_for(10_000);
    assert_eq!(b.rx_available(), 0);
    assert_eq!(b.stats().crc_failures.get(), 1);

    b.set_allow_crc_errors(true);
    a.send(b"bad").unwrap();
    net.run_for(10_000);
    assert_eq!(b.rx_available(), 1);
}

#[test]
fn test_link_tx_freed_only_by_ack() {
    let (mut net, mut a, b) = link_pair();
    a.send(0, b"x").unwrap();
    assert_eq!(a.tx_available(), LINK_TX_SLOTS - 1);

    assert!(net.step()); // data on the air
    assert!(net.step()); // data received
    assert_eq!(b.rx_available(), 1);
    assert_eq!(a.tx_available(), LINK_TX_SLOTS - 1);

    assert!(net.step()); // ACK on the air
    assert_eq!(a.tx_available(), LINK_TX_SLOTS - 1);
    assert!(net.step()); // ACK received
    assert_eq!(a.tx_available(), LINK_TX_SLOTS);
}

#[test]
fn test_queue_tx_freed_after_transmission() {
    let mut net = SimNetwork::new();
    let mut a = queue_node(&mut net, 1);
    let _b = queue_node(&mut net, 2);
    a.send(b"x").unwrap();
    assert_eq!(a.tx_available(), QUEUE_TX_SLOTS - 1);

    assert!(net.step());
    assert_eq!(a.tx_available(), QUEUE_TX_SLOTS - 1);
    assert!(net.step());
    assert_eq!(a.tx_available(), QUEUE_TX_SLOTS);
}

#[test]
fn test_reset_after_peer_restart() {
    let (mut net, mut a, mut b) = link_pair();
    a.send(0, b"before").unwrap();
    assert!(net.run_until(100_000, || a.tx_available() == LINK_TX_SLOTS));
    b.rx_done_with_packet();
    assert!(!b.take_reset_flag());

    // A reboots as a fresh node; its sequence bit starts over at zero
    net.set_delivery_filter(|info| {
        if info.from == 0 || info.to == 0 {
            Delivery::Drop
        } else {
            Delivery::Deliver
        }
    });
    let mut restarted = link_node(&mut net, 33);
    restarted.announce_reset();
    restarted.send(0, b"after").unwrap();
    assert!(net.run_until(100_000, || restarted.tx_available() == LINK_TX_SLOTS));

    assert!(b.take_reset_flag());
    assert!(!b.take_reset_flag());
    assert_eq!(b.rx_current_packet().unwrap().payload(), b"after");
    assert_eq!(b.stats().resets.get(), 1);
    assert!(net
        .air_log()
        .iter()
        .any(|record| record.from == 2 && frame_type(&record.frame) == Some(FrameType::Reset)));
}

#[test]
fn test_com_stream_over_link() {
    let (mut net, a, b) = link_pair();
    let mut tx = RadioCom::new(a);
    let mut rx = RadioCom::new(b);
    let message: &[u8] = b"The quick brown fox jumps over the lazy dog, then naps in the sun.";

    let mut sent = 0;
    let mut received = Vec::new();
    tx.tx_control_signals(0b01);
    for _ in 0..500 {
        sent += tx.tx_send(&message[sent..]);
        tx.service();
        rx.service();
        net.run_for(1_000);
        let mut buf = [0u8; 32];
        let n = rx.rx_receive(&mut buf);
        received.extend_from_slice(&buf[..n]);
        if received.len() == message.len() && rx.rx_control_signals() == 0b01 {
            break;
        }
    }
    assert_eq!(received, message);
    assert_eq!(rx.rx_control_signals(), 0b01);
}

#[test]
fn test_com_stream_over_queue() {
    let mut net = SimNetwork::new();
    let a = queue_node(&mut net, 1);
    let b = queue_node(&mut net, 2);
    let mut tx = RadioCom::new(a);
    let mut rx = RadioCom::new(b);
    let message = [0x5Au8; 50];

    assert_eq!(tx.tx_send(&message), message.len());
    let mut received = Vec::new();
    for _ in 0..200 {
        tx.service();
        rx.service();
        net.run_for(500);
        while let Some(byte) = rx.rx_receive_byte() {
            received.push(byte);
        }
        if received.len() == message.len() {
            break;
        }
    }
    assert_eq!(received, message);
}

#[test]
fn test_network_relays_over_two_hops() {
    let mut net = SimNetwork::new();
    // 1 and 3 are out of range of each other
    net.set_delivery_filter(|info| match (info.from, info.to) {
        (0, 2) | (2, 0) => Delivery::Drop,
        _ => Delivery::Deliver,
    });
    let mut nodes = [
        network_node(&mut net, 1, 1),
        network_node(&mut net, 2, 2),
        network_node(&mut net, 3, 3),
    ];

    // Two staggered epochs so routes spread two hops
    let start = Instant::now();
    for epoch in 0..2 {
        for node in nodes.iter_mut() {
            node.service(start + ADVERT_INTERVAL * epoch);
            net.run_for(5_000);
        }
        for node in nodes.iter_mut() {
            node.service(start + ADVERT_INTERVAL * epoch);
        }
    }
    assert_eq!(nodes[0].route(3).map(|r| (r.next_hop, r.hops)), Some((2, 2)));
    assert_eq!(nodes[2].route(1).map(|r| (r.next_hop, r.hops)), Some((2, 2)));

    let now = start + ADVERT_INTERVAL;
    nodes[0].tx_send_packet(3, b"hop").unwrap();
    for _ in 0..10 {
        net.run_for(2_000);
        for node in nodes.iter_mut() {
            node.service(now);
        }
    }

    let packet = nodes[2].rx_current_packet().unwrap();
    assert_eq!(packet.source(), 1);
    assert_eq!(packet.payload(), b"hop");
    nodes[2].rx_done_with_packet();
    assert_eq!(nodes[1].stats().forwarded.get(), 1);
    assert!(nodes[1].rx_current_packet().is_none());
}
