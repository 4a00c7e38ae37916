use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use slotd::dispatch::{Dispatcher, LogSink};
use slotd::tenant::TenantManager;
use slotd::wire;

// ── Test infrastructure ──────────────────────────────────────

const HOUR: i64 = 3_600_000;
/// Slot windows far in the future so the availability past-filter never
/// kicks in while tests run.
const FUTURE: i64 = 3_800_000_000_000;

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let dispatch = Arc::new(Dispatcher::new(vec![Arc::new(LogSink)]));
    let tm = Arc::new(TenantManager::new(dir, 1000, dispatch));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "slotd".to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(dbname)
        .user("slotd")
        .password("slotd");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// Collect the data rows of a simple query as string vectors.
async fn query_rows(client: &tokio_postgres::Client, sql: &str) -> Vec<Vec<String>> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(
                (0..row.len())
                    .map(|i| row.get(i).unwrap_or("").to_string())
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

/// Rows affected by a simple INSERT/UPDATE/DELETE.
async fn execute_rows(client: &tokio_postgres::Client, sql: &str) -> u64 {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .find_map(|m| match m {
            SimpleQueryMessage::CommandComplete(n) => Some(n),
            _ => None,
        })
        .unwrap_or(0)
}

async fn seed_slot(client: &tokio_postgres::Client, service: Ulid, capacity: u32) -> Ulid {
    let slot = Ulid::new();
    client
        .batch_execute(&format!(
            r#"INSERT INTO slots (id, service_id, start, "end", capacity) VALUES ('{slot}', '{service}', {FUTURE}, {end}, {capacity})"#,
            end = FUTURE + HOUR,
        ))
        .await
        .unwrap();
    slot
}

fn insert_booking_sql(slot: Ulid, service: Ulid, visitors: u32) -> (Ulid, String) {
    let id = Ulid::new();
    let sql = format!(
        "INSERT INTO bookings (id, slot_id, service_id, customer_name, customer_phone, adults, children, visitors, price_cents) \
         VALUES ('{id}', '{slot}', '{service}', 'Amina', '+960 555 0100', {visitors}, 0, {visitors}, 4500)"
    );
    (id, sql)
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn seed_slot_and_query_availability() {
    let addr = start_test_server().await;
    let client = connect(addr, "tenant_avail").await;

    let service = Ulid::new();
    let slot = seed_slot(&client, service, 8).await;

    let rows = query_rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE service_id = '{service}' AND start >= {} AND \"end\" <= {}",
            FUTURE - HOUR,
            FUTURE + 2 * HOUR,
        ),
    )
    .await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], slot.to_string());
    assert_eq!(rows[0][3], "8");
}

#[tokio::test]
async fn full_checkout_flow() {
    let addr = start_test_server().await;
    let client = connect(addr, "tenant_checkout").await;

    let service = Ulid::new();
    let slot = seed_slot(&client, service, 3).await;

    // Session A holds 2 of 3 seats for checkout
    let lock = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO locks (id, slot_id, session_id, quantity, ttl_ms) VALUES ('{lock}', '{slot}', 'sess-a', 2, 300000)"
        ))
        .await
        .unwrap();

    // A competing walk-in wants 2 → only 1 effective seat left
    let (_, competing) = insert_booking_sql(slot, service, 2);
    let err = client.batch_execute(&competing).await.unwrap_err();
    let db_err = err.as_db_error().unwrap();
    assert_eq!(db_err.code().code(), "P0001");
    assert!(db_err.message().contains("capacity exceeded"));

    // Session A completes checkout with its lock
    let booking = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, slot_id, service_id, customer_name, customer_phone, adults, children, visitors, price_cents, lock_id, session_id) \
             VALUES ('{booking}', '{slot}', '{service}', 'Amina', '+960 555 0100', 2, 0, 2, 4500, '{lock}', 'sess-a')"
        ))
        .await
        .unwrap();

    // The lock was consumed inside the booking transaction
    let locks = query_rows(&client, &format!("SELECT * FROM locks WHERE slot_id = '{slot}'")).await;
    assert!(locks.is_empty());

    // Slot shows the committed seats
    let slots = query_rows(&client, &format!("SELECT * FROM slots WHERE service_id = '{service}'")).await;
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0][5], "2"); // booked_count
    assert_eq!(slots[0][6], "1"); // available_capacity

    // Cancel the booking; capacity returns
    let deleted = execute_rows(&client, &format!("DELETE FROM bookings WHERE id = '{booking}'")).await;
    assert_eq!(deleted, 1);
    let bookings = query_rows(&client, &format!("SELECT * FROM bookings WHERE slot_id = '{slot}'")).await;
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0][4], "canceled");

    let rows = query_rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE service_id = '{service}' AND start >= {} AND \"end\" <= {}",
            FUTURE - HOUR,
            FUTURE + 2 * HOUR,
        ),
    )
    .await;
    assert_eq!(rows[0][3], "3");
}

#[tokio::test]
async fn error_codes_distinguish_failure_classes() {
    let addr = start_test_server().await;
    let client = connect(addr, "tenant_errors").await;

    let service = Ulid::new();
    let slot = seed_slot(&client, service, 1).await;

    // Unknown slot → P0002
    let (_, sql) = insert_booking_sql(Ulid::new(), service, 1);
    let err = client.batch_execute(&sql).await.unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "P0002");

    // Oversell → P0001 with the capacity message
    let (_, first) = insert_booking_sql(slot, service, 1);
    client.batch_execute(&first).await.unwrap();
    let (_, second) = insert_booking_sql(slot, service, 1);
    let err = client.batch_execute(&second).await.unwrap_err();
    let db_err = err.as_db_error().unwrap();
    assert_eq!(db_err.code().code(), "P0001");
    assert!(db_err.message().contains("capacity exceeded"));

    // Bad SQL → syntax error class
    let err = client.batch_execute("FROBNICATE everything").await.unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "42601");
}

#[tokio::test]
async fn lock_release_is_idempotent_over_the_wire() {
    let addr = start_test_server().await;
    let client = connect(addr, "tenant_release").await;

    let service = Ulid::new();
    let slot = seed_slot(&client, service, 3).await;

    let lock = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO locks (id, slot_id, session_id, quantity, ttl_ms) VALUES ('{lock}', '{slot}', 'sess-a', 1, 300000)"
        ))
        .await
        .unwrap();

    assert_eq!(execute_rows(&client, &format!("DELETE FROM locks WHERE id = '{lock}'")).await, 1);
    // Second delete of the same lock: no row, no error
    assert_eq!(execute_rows(&client, &format!("DELETE FROM locks WHERE id = '{lock}'")).await, 0);
    // Deleting a lock that never existed: same
    assert_eq!(
        execute_rows(&client, &format!("DELETE FROM locks WHERE id = '{}'", Ulid::new())).await,
        0
    );
}

#[tokio::test]
async fn disabled_slot_rejects_bookings() {
    let addr = start_test_server().await;
    let client = connect(addr, "tenant_disable").await;

    let service = Ulid::new();
    let slot = seed_slot(&client, service, 5).await;

    client
        .batch_execute(&format!("UPDATE slots SET available = false WHERE id = '{slot}'"))
        .await
        .unwrap();

    let (_, sql) = insert_booking_sql(slot, service, 1);
    let err = client.batch_execute(&sql).await.unwrap_err();
    assert!(err.as_db_error().unwrap().message().contains("slot unavailable"));

    // And it disappears from availability
    let rows = query_rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE service_id = '{service}' AND start >= {} AND \"end\" <= {}",
            FUTURE - HOUR,
            FUTURE + 2 * HOUR,
        ),
    )
    .await;
    assert!(rows.is_empty());
}

#[tokio::test]
async fn tenants_are_isolated_over_the_wire() {
    let addr = start_test_server().await;
    let client_a = connect(addr, "tenant_iso_a").await;
    let client_b = connect(addr, "tenant_iso_b").await;

    let service = Ulid::new();
    let slot = seed_slot(&client_a, service, 2).await;

    // Tenant B cannot see or book tenant A's slot
    let slots_b = query_rows(&client_b, "SELECT * FROM slots").await;
    assert!(slots_b.is_empty());

    let (_, sql) = insert_booking_sql(slot, service, 1);
    let err = client_b.batch_execute(&sql).await.unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "P0002");

    // Tenant A still books it fine
    let (_, sql) = insert_booking_sql(slot, service, 1);
    client_a.batch_execute(&sql).await.unwrap();
}

#[tokio::test]
async fn concurrent_wire_bookings_never_oversell() {
    let addr = start_test_server().await;
    let setup = connect(addr, "tenant_wire_race").await;

    let service = Ulid::new();
    let slot = seed_slot(&setup, service, 5).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let (_, sql) = insert_booking_sql(slot, service, 2);
        let client = connect(addr, "tenant_wire_race").await;
        handles.push(tokio::spawn(async move { client.batch_execute(&sql).await }));
    }

    let mut committed = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            committed += 1;
        }
    }
    assert_eq!(committed, 2);

    let slots = query_rows(&setup, &format!("SELECT * FROM slots WHERE service_id = '{service}'")).await;
    assert_eq!(slots[0][5], "4"); // booked_count: exactly two 2-seat winners
}
