//! End-to-end two-process test for file-backed rings.
//!
//! # Overview
//!
//! The same test executable is spawned twice with a role in the environment.
//! The producer streams a counting byte pattern through a data ring; the
//! consumer reads it and reports progress back through a second ring, which
//! is exactly how the outbound/inbound pair of a serial session is used.
//!
//! ```text
//! [Producer] --create--> data ring  --------------------> [Consumer]
//!     ^                                                       |
//!     +--------------------- ack ring <--- consumed total ----+
//! ```
//!
//! The producer never lets `sent - acked` exceed the ring's largest write, so
//! the consumer is never lapped and every byte must arrive exactly once.
//!
//! # Running the Test
//!
//! ```bash
//! cargo test -p ringlink-ring --test e2e_mmap -- --nocapture
//! ```

use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "RINGLINK_E2E_ROLE";
const ENV_DIR: &str = "RINGLINK_E2E_DIR";
const ROLE_PRODUCER: &str = "producer";
const ROLE_CONSUMER: &str = "consumer";

const TOTAL_BYTES: u64 = 1_000_000;
const DATA_CAPACITY: usize = 4096;
const ACK_CAPACITY: usize = 256;
const CHUNK: usize = 300;

fn pattern(i: u64) -> u8 {
    (i % 251) as u8
}

fn test_dir() -> std::path::PathBuf {
    let pid = std::process::id();
    std::env::temp_dir().join(format!("ringlink_e2e_{pid}"))
}

fn latest_ack(reader: &mut ringlink_ring::RingReader, acked: &mut u64) {
    let bytes = reader.read();
    if let Some(last) = bytes.chunks_exact(8).last() {
        *acked = u64::from_le_bytes(last.try_into().unwrap());
    }
}

fn run_producer(dir: &str) {
    use ringlink_ring::RingBuffer;

    let data = RingBuffer::create(format!("{dir}/data"), DATA_CAPACITY).expect("create data ring");
    let ack = RingBuffer::create(format!("{dir}/ack"), ACK_CAPACITY).expect("create ack ring");
    let mut writer = data.writer().unwrap();
    let mut acks = ack.reader().unwrap();
    log!("[PRODUCER] rings created in {dir}");

    // The consumer publishes an initial ack once it has attached.
    let deadline = Instant::now() + Duration::from_secs(10);
    while acks.available() == 0 {
        assert!(Instant::now() < deadline, "consumer never attached");
        std::thread::sleep(Duration::from_millis(1));
    }

    let start = Instant::now();
    let mut sent = 0u64;
    let mut acked = 0u64;
    let mut chunk = Vec::with_capacity(CHUNK);
    while sent < TOTAL_BYTES {
        chunk.clear();
        let n = (TOTAL_BYTES - sent).min(CHUNK as u64);
        chunk.extend((sent..sent + n).map(pattern));

        loop {
            latest_ack(&mut acks, &mut acked);
            if sent + n - acked <= data.max_write() as u64 {
                break;
            }
            assert!(start.elapsed() < Duration::from_secs(30), "consumer stalled");
            std::hint::spin_loop();
        }

        writer.write(&chunk).unwrap();
        sent += n;
    }

    log!("[PRODUCER] sent {sent} bytes in {:?}", start.elapsed());
}

fn run_consumer(dir: &str) {
    use ringlink_ring::RingBuffer;

    let open_deadline = Instant::now() + Duration::from_secs(5);
    let (data, ack) = loop {
        match (
            RingBuffer::open(format!("{dir}/data")),
            RingBuffer::open(format!("{dir}/ack")),
        ) {
            (Ok(d), Ok(a)) => break (d, a),
            _ if Instant::now() < open_deadline => std::thread::sleep(Duration::from_millis(1)),
            (Err(e), _) | (_, Err(e)) => panic!("[CONSUMER] failed to open rings: {e}"),
        }
    };

    let mut reader = data.reader().unwrap();
    let mut ack_writer = ack.writer().unwrap();
    ack_writer.write(&0u64.to_le_bytes()).unwrap();
    log!("[CONSUMER] attached at cursor {}", reader.position());

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut received = 0u64;
    let mut acked_blocks = 0u64;
    let mut buf = Vec::new();
    while received < TOTAL_BYTES {
        assert!(Instant::now() < deadline, "timed out at {received} bytes");
        buf.clear();
        if reader.read_into(&mut buf, usize::MAX) == 0 {
            std::hint::spin_loop();
            continue;
        }
        for &b in &buf {
            assert_eq!(b, pattern(received), "byte {received} out of order");
            received += 1;
        }
        // One ack per CHUNK crossed keeps the ack ring from being lapped
        // between two producer checks.
        if received / CHUNK as u64 > acked_blocks || received == TOTAL_BYTES {
            acked_blocks = received / CHUNK as u64;
            ack_writer.write(&received.to_le_bytes()).unwrap();
        }
    }

    log!("[CONSUMER] received {received} bytes, all in order");
}

#[test]
fn e2e_two_process_file_rings() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let dir = env::var(ENV_DIR).expect("RINGLINK_E2E_DIR not set");
        match role.as_str() {
            ROLE_PRODUCER => run_producer(&dir),
            ROLE_CONSUMER => run_consumer(&dir),
            other => panic!("Unknown role: {other}"),
        }
        return;
    }

    let dir = test_dir();
    std::fs::create_dir_all(&dir).unwrap();
    let dir_str = dir.to_string_lossy().to_string();
    let exe = env::current_exe().expect("Failed to get current executable path");

    let spawn = |role: &str| {
        Command::new(&exe)
            .arg("--exact")
            .arg("e2e_two_process_file_rings")
            .env(ENV_ROLE, role)
            .env(ENV_DIR, &dir_str)
            .stderr(Stdio::inherit())
            .spawn()
            .expect("Failed to spawn child process")
    };

    let mut producer = spawn(ROLE_PRODUCER);
    std::thread::sleep(Duration::from_millis(5));
    let mut consumer = spawn(ROLE_CONSUMER);

    let producer_status = producer.wait().expect("Failed to wait for producer");
    let consumer_status = consumer.wait().expect("Failed to wait for consumer");

    let _ = std::fs::remove_dir_all(&dir);

    assert!(producer_status.success(), "producer failed: {producer_status}");
    assert!(consumer_status.success(), "consumer failed: {consumer_status}");
}
