//! Performance benchmarks for the hot paths of the relay

use server::peer_table::PeerTable;
use shared::{Message, MessageRegistry, Position, PositionTable};
use std::time::Instant;

/// Benchmarks position update encoding
#[test]
fn benchmark_position_encoding() {
    let message = Message::relayed_position(7, Position::new(1.5, -2.5, 3.5));

    let iterations = 100_000;
    let start = Instant::now();

    let mut total = 0;
    for _ in 0..iterations {
        total += message.encode().len();
    }

    let duration = start.elapsed();
    println!(
        "Position encoding: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(total, iterations * 17);
    assert!(duration.as_millis() < 500);
}

/// Benchmarks registry dispatch over a mix of message kinds
#[test]
fn benchmark_registry_decoding() {
    let registry = MessageRegistry::new();
    let buffers: Vec<Vec<u8>> = vec![
        Message::position(Position::new(1.0, 2.0, 3.0)).encode(),
        Message::relayed_position(3, Position::new(4.0, 5.0, 6.0)).encode(),
        Message::Chat {
            sender: 2,
            text: "benchmark".to_string(),
        }
        .encode(),
        Message::Ping.encode(),
        Message::PeerLeft { peer_id: 9 }.encode(),
    ];

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let bytes = &buffers[i % buffers.len()];
        assert!(registry.create_from_bytes(bytes).is_ok());
    }

    let duration = start.elapsed();
    println!(
        "Registry decoding: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks rejection of bad input, which must stay as cheap as decoding
#[test]
fn benchmark_malformed_rejection() {
    let registry = MessageRegistry::new();
    let truncated = Message::position(Position::ZERO).encode()[..5].to_vec();
    let unknown = vec![0xEE, 0, 0, 0];

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let bytes: &[u8] = match i % 3 {
            0 => &truncated,
            1 => &unknown,
            _ => &[],
        };
        assert!(registry.create_from_bytes(bytes).is_err());
    }

    let duration = start.elapsed();
    println!(
        "Malformed rejection: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks snapshot copies of a full table
#[test]
fn benchmark_snapshot_copy() {
    let table = PositionTable::new();
    for id in 0..32 {
        table.insert(id, Position::new(id as f32, 0.0, 0.0));
    }

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        assert_eq!(table.snapshot().len(), 32);
    }

    let duration = start.elapsed();
    println!(
        "Snapshot copy: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 1000);
}

/// Benchmarks the per-update server work: table write plus recipient list
#[test]
fn benchmark_fan_out_preparation() {
    let peers = PeerTable::new();
    for id in 1..=32 {
        peers.add_peer(id);
    }

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let origin = (i % 32) as u32 + 1;
        peers
            .update_position(origin, Position::new(i as f32, 0.0, 0.0))
            .unwrap();
        let recipients = peers.recipients_except(origin);
        assert_eq!(recipients.len(), 31);
    }

    let duration = start.elapsed();
    println!(
        "Fan-out preparation: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}
