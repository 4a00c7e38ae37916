use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

const HOUR: i64 = 3_600_000;
const FUTURE: i64 = 3_800_000_000_000;

async fn connect(host: &str, port: u16, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user("slotd")
        .password("slotd");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn insert_slot_sql(slot: Ulid, service: Ulid, index: i64, capacity: u32) -> String {
    let start = FUTURE + index * 2 * HOUR;
    format!(
        r#"INSERT INTO slots (id, service_id, start, "end", capacity) VALUES ('{slot}', '{service}', {start}, {end}, {capacity})"#,
        end = start + HOUR,
    )
}

fn insert_booking_sql(slot: Ulid, service: Ulid, visitors: u32) -> String {
    format!(
        "INSERT INTO bookings (id, slot_id, service_id, customer_name, customer_phone, adults, children, visitors, price_cents) \
         VALUES ('{id}', '{slot}', '{service}', 'Bench', '+000', {visitors}, 0, {visitors}, 100)",
        id = Ulid::new(),
    )
}

/// Phase 1: uncontended booking latency — every booking hits its own slot.
async fn phase1_uncontended(host: &str, port: u16) {
    let tenant = format!("bench_{}", Ulid::new());
    let client = connect(host, port, &tenant).await;
    let service = Ulid::new();

    let n = 1000;
    let mut slots = Vec::with_capacity(n);
    for i in 0..n {
        let slot = Ulid::new();
        client
            .batch_execute(&insert_slot_sql(slot, service, i as i64, 10))
            .await
            .unwrap();
        slots.push(slot);
    }

    let mut latencies = Vec::with_capacity(n);
    for &slot in &slots {
        let t = Instant::now();
        client
            .batch_execute(&insert_booking_sql(slot, service, 2))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("uncontended bookings (distinct slots)", &mut latencies);
}

/// Phase 2: all clients hammer the last seats of one slot. The point is
/// the invariant, not the latency: committed seats never exceed capacity.
async fn phase2_contended(host: &str, port: u16) {
    let tenant = format!("bench_{}", Ulid::new());
    let setup = connect(host, port, &tenant).await;
    let service = Ulid::new();
    let slot = Ulid::new();
    let capacity = 100u32;
    setup
        .batch_execute(&insert_slot_sql(slot, service, 0, capacity))
        .await
        .unwrap();

    let clients = 16;
    let attempts_per_client = 20; // 16 * 20 * 2 seats >> capacity
    let mut handles = Vec::new();
    for _ in 0..clients {
        let client = connect(host, port, &tenant).await;
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            let mut committed = 0u32;
            for _ in 0..attempts_per_client {
                let t = Instant::now();
                let result = client
                    .batch_execute(&insert_booking_sql(slot, service, 2))
                    .await;
                latencies.push(t.elapsed());
                if result.is_ok() {
                    committed += 2;
                }
            }
            (latencies, committed)
        }));
    }

    let mut all_latencies = Vec::new();
    let mut total_committed = 0u32;
    for h in handles {
        let (latencies, committed) = h.await.unwrap();
        all_latencies.extend(latencies);
        total_committed += committed;
    }
    print_latency("contended bookings (one slot)", &mut all_latencies);
    println!("    committed {total_committed} of {capacity} seats");
    assert!(total_committed <= capacity, "oversold: {total_committed} > {capacity}");

    // Cross-check the server's own counter
    let rows = setup
        .simple_query(&format!("SELECT * FROM slots WHERE service_id = '{service}'"))
        .await
        .unwrap();
    for row in rows {
        if let SimpleQueryMessage::Row(row) = row {
            let booked: u32 = row.get(5).unwrap().parse().unwrap();
            assert_eq!(booked, total_committed);
            println!("    server booked_count: {booked}");
        }
    }
}

/// Phase 3: availability reads while the slot set is large.
async fn phase3_availability(host: &str, port: u16) {
    let tenant = format!("bench_{}", Ulid::new());
    let client = connect(host, port, &tenant).await;
    let service = Ulid::new();
    for i in 0..500 {
        client
            .batch_execute(&insert_slot_sql(Ulid::new(), service, i, 5))
            .await
            .unwrap();
    }

    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    let window_end = FUTURE + 2000 * HOUR;
    for _ in 0..n {
        let t = Instant::now();
        client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE service_id = '{service}' AND start >= {FUTURE} AND \"end\" <= {window_end}"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("availability queries (500 slots)", &mut latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SLOTD_BENCH_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SLOTD_BENCH_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5433);

    println!("slotd stress bench against {host}:{port}");
    println!("phase 1: uncontended booking latency");
    phase1_uncontended(&host, port).await;
    println!("phase 2: contended bookings on one slot");
    phase2_contended(&host, port).await;
    println!("phase 3: availability query latency");
    phase3_availability(&host, port).await;
}
