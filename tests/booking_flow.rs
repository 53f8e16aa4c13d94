use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use tokio_test::assert_err;
use ulid::Ulid;

use roombook::config::BookingPolicy;
use roombook::engine::Engine;
use roombook::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("roombook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("roombook.wal"), BookingPolicy::default()).unwrap());

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, "roombook".to_string()).await;
            });
        }
    });

    (addr, engine)
}

async fn connect(addr: SocketAddr, password: &str) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("roombook")
        .user("registrar")
        .password(password);

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn booking_sql(id: Ulid, room: Ulid, requester: Ulid, date: &str, capacity: u32) -> String {
    booking_sql_at(id, room, requester, date, ("09:00", "11:00"), capacity)
}

fn booking_sql_at(
    id: Ulid,
    room: Ulid,
    requester: Ulid,
    date: &str,
    (start, end): (&str, &str),
    capacity: u32,
) -> String {
    format!(
        "INSERT INTO bookings (id, room_id, requester_id, booking_date, start_time, end_time, capacity, purpose, responsible_person, contact, documents) \
         VALUES ('{id}', '{room}', '{requester}', '{date}', '{start}', '{end}', {capacity}, 'Robotics club meeting', 'Dana', '+6281234567890', \
         '[{{\"doc_type\":\"permit_letter\",\"name\":\"permit.pdf\",\"path\":\"permits/permit.pdf\"}}]')"
    )
}

async fn create_room(client: &Client) -> Ulid {
    let room = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, building_id, category_id, name, capacity, requires_approval) \
             VALUES ('{room}', '{}', '{}', 'Hall A', 40, true)",
            Ulid::new(),
            Ulid::new()
        ))
        .await
        .unwrap();
    room
}

fn next_week() -> String {
    (Utc::now().date_naive() + Duration::days(7)).to_string()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn submit_conflict_reject_and_reopen() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "roombook").await.unwrap();
    let room = create_room(&client).await;
    let date = next_week();

    let first = Ulid::new();
    let submitted = rows(&client, &booking_sql(first, room, Ulid::new(), &date, 20)).await;
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].get("status"), Some("pending"));
    assert!(submitted[0].get("code").unwrap().starts_with("BK-"));

    let availability = format!(
        "SELECT * FROM availability WHERE room_id = '{room}' AND date = '{date}' \
         AND start_time = '10:00' AND end_time = '12:00'"
    );
    let check = rows(&client, &availability).await;
    assert_eq!(check[0].get("available"), Some("f"));
    assert_eq!(check[0].get("reason"), Some("conflict"));
    let first_id = first.to_string();
    assert_eq!(check[0].get("conflicting_id"), Some(first_id.as_str()));

    let err = client
        .batch_execute(&booking_sql(Ulid::new(), room, Ulid::new(), &date, 10))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::EXCLUSION_VIOLATION));

    let decided = rows(
        &client,
        &format!(
            "INSERT INTO decisions (booking_id, decision, actor_id, actor_role, reason) \
             VALUES ('{first}', 'reject', '{}', 'approver', 'hall reserved for exams')",
            Ulid::new()
        ),
    )
    .await;
    assert_eq!(decided[0].get("status"), Some("rejected"));
    assert_eq!(decided[0].get("rejection_reason"), Some("hall reserved for exams"));

    let check = rows(&client, &availability).await;
    assert_eq!(check[0].get("available"), Some("t"));
}

#[tokio::test]
async fn excluding_own_booking_still_sees_neighbours() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "roombook").await.unwrap();
    let room = create_room(&client).await;
    let date = next_week();

    let morning = Ulid::new();
    let noon = Ulid::new();
    client
        .batch_execute(&booking_sql(morning, room, Ulid::new(), &date, 20))
        .await
        .unwrap();
    client
        .batch_execute(&booking_sql_at(noon, room, Ulid::new(), &date, ("11:00", "13:00"), 20))
        .await
        .unwrap();

    let own_window = rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE room_id = '{room}' AND date = '{date}' \
             AND start_time = '09:00' AND end_time = '11:00' AND exclude_booking = '{morning}'"
        ),
    )
    .await;
    assert_eq!(own_window[0].get("available"), Some("t"));

    let widened = rows(
        &client,
        &format!(
            "SELECT * FROM availability WHERE room_id = '{room}' AND date = '{date}' \
             AND start_time = '10:00' AND end_time = '12:00' AND exclude_booking = '{morning}'"
        ),
    )
    .await;
    assert_eq!(widened[0].get("available"), Some("f"));
    assert_eq!(widened[0].get("reason"), Some("conflict"));
    let noon_id = noon.to_string();
    assert_eq!(widened[0].get("conflicting_id"), Some(noon_id.as_str()));
}

#[tokio::test]
async fn invalid_booking_reports_fields() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "roombook").await.unwrap();
    let room = create_room(&client).await;

    let err = assert_err!(
        client
            .batch_execute(&booking_sql(Ulid::new(), room, Ulid::new(), &next_week(), 500))
            .await
    );
    let db = err.as_db_error().unwrap();
    assert_eq!(db.code(), &SqlState::CHECK_VIOLATION);
    assert!(db.message().contains("capacity"));
}

#[tokio::test]
async fn unknown_booking_code_is_no_data() {
    let (addr, _engine) = start_test_server().await;
    let client = connect(addr, "roombook").await.unwrap();

    let err = assert_err!(
        client
            .batch_execute("SELECT * FROM bookings WHERE code = 'BK-000000-NOPE'")
            .await
    );
    assert_eq!(err.code(), Some(&SqlState::NO_DATA_FOUND));
}

#[tokio::test]
async fn extended_protocol_lookup_by_code() {
    let (addr, engine) = start_test_server().await;
    let client = connect(addr, "roombook").await.unwrap();
    let room = create_room(&client).await;

    let id = Ulid::new();
    client
        .batch_execute(&booking_sql(id, room, Ulid::new(), &next_week(), 15))
        .await
        .unwrap();
    let code = engine.get_booking(id).await.unwrap().code;

    let found = client
        .query("SELECT * FROM bookings WHERE code = $1", &[&code.to_lowercase()])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get::<_, &str>("id"), id.to_string());
    assert_eq!(found[0].get::<_, &str>("status"), "pending");
}

#[tokio::test]
async fn wrong_password_is_refused() {
    let (addr, _engine) = start_test_server().await;
    assert!(connect(addr, "not-the-password").await.is_err());
}
