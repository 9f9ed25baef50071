use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use charterd::tenant::TenantManager;
use charterd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("charterd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "charterd".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr, db: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(db)
        .user("charterd")
        .password("charterd");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn data_rows(msgs: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    msgs.into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

const CANDIDATES: &str = r#"[{"order":1,"date":"2024-01-05","startTime":"10:00","endTime":"14:00"},{"order":2,"date":"2024-01-06","startTime":"14:30","endTime":"18:30"},{"order":3,"date":"2024-01-07","startTime":"19:00","endTime":"23:00"}]"#;

async fn open_request(client: &tokio_postgres::Client, staff: &[Ulid]) -> Ulid {
    let rid = Ulid::new();
    let staff_json = serde_json::to_string(
        &staff.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
    )
    .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO requests (id, scenario_id, customer_ref, participants, candidates, requested_stores, eligible_staff) \
             VALUES ('{rid}', '{}', 'cust-1', 6, '{CANDIDATES}', '[]', '{staff_json}')",
            Ulid::new()
        ))
        .await
        .unwrap();
    rid
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn full_booking_lifecycle() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "lifecycle").await;

    let staff = Ulid::new();
    let rid = open_request(&client, &[staff]).await;

    // The GM sees it on their worklist
    let rows = data_rows(
        client
            .simple_query(&format!(
                "SELECT * FROM pending_requests WHERE staff_id = '{staff}'"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(rid.to_string().as_str()));
    assert_eq!(rows[0].get("status"), Some("awaiting_gm"));

    // The GM claims candidates 1 and 3
    client
        .batch_execute(&format!(
            "INSERT INTO responses (request_id, staff_id, available, candidate_orders, notes) \
             VALUES ('{rid}', '{staff}', true, '[1,3]', 'either is fine')"
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM requests WHERE id = '{rid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows[0].get("status"), Some("awaiting_store"));
    let candidates = rows[0].get("candidates").unwrap();
    assert!(candidates.contains("\"order\":1"));
    assert!(!candidates.contains("\"order\":2"));
    assert!(candidates.contains("\"order\":3"));

    // The store approver pins candidate 3
    let store = Ulid::new();
    let gm = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO confirmations (request_id, candidate_order, store_id, gm_id) \
             VALUES ('{rid}', 3, '{store}', '{gm}')"
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM requests WHERE id = '{rid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows[0].get("status"), Some("confirmed"));
    assert_eq!(rows[0].get("confirmed_store_id"), Some(store.to_string().as_str()));
    assert_eq!(rows[0].get("assigned_gm_id"), Some(gm.to_string().as_str()));
    assert!(rows[0].get("candidates").unwrap().contains("\"status\":\"confirmed\""));

    // The occupancy view carries both tuples
    let rows = data_rows(
        client
            .simple_query("SELECT * FROM occupancy WHERE date >= '2024-01-01' AND date <= '2024-01-31'")
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.get("date") == Some("2024-01-07")));
    assert!(rows.iter().all(|r| r.get("time_slot") == Some("evening")));
    assert!(rows.iter().all(|r| r.get("occupant_kind") == Some("private")));
}

#[tokio::test]
async fn double_booking_surfaces_as_error() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "conflicts").await;

    let staff = Ulid::new();
    let store = Ulid::new();

    let r1 = open_request(&client, &[staff]).await;
    client
        .batch_execute(&format!(
            "INSERT INTO confirmations (request_id, candidate_order, store_id, gm_id) \
             VALUES ('{r1}', 3, '{store}', '{}')",
            Ulid::new()
        ))
        .await
        .unwrap();

    // Same store, same (date, slot)
    let r2 = open_request(&client, &[staff]).await;
    let err = client
        .batch_execute(&format!(
            "INSERT INTO confirmations (request_id, candidate_order, store_id, gm_id) \
             VALUES ('{r2}', 3, '{store}', '{}')",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    let msg = err.as_db_error().unwrap().message();
    assert!(msg.contains("double-booked"), "got: {msg}");
    assert!(msg.contains(&r1.to_string()), "conflict must name the holder: {msg}");

    // r2 is untouched
    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM requests WHERE id = '{r2}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows[0].get("status"), Some("awaiting_gm"));
}

#[tokio::test]
async fn rejection_requires_reason() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "rejections").await;

    let staff = Ulid::new();
    let rid = open_request(&client, &[staff]).await;

    let err = client
        .batch_execute(&format!(
            "INSERT INTO rejections (request_id, reason) VALUES ('{rid}', '')"
        ))
        .await
        .unwrap_err();
    assert!(err.as_db_error().unwrap().message().contains("reason"));

    client
        .batch_execute(&format!(
            "INSERT INTO rejections (request_id, reason) VALUES ('{rid}', 'no store free')"
        ))
        .await
        .unwrap();

    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM requests WHERE id = '{rid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows[0].get("status"), Some("rejected"));
    assert_eq!(rows[0].get("rejection_reason"), Some("no store free"));
}

#[tokio::test]
async fn claimed_request_refuses_second_gm() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "claims").await;

    let (staff_a, staff_b) = (Ulid::new(), Ulid::new());
    let rid = open_request(&client, &[staff_a, staff_b]).await;

    client
        .batch_execute(&format!(
            "INSERT INTO responses (request_id, staff_id, available, candidate_orders) \
             VALUES ('{rid}', '{staff_a}', true, '[2]')"
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!(
            "INSERT INTO responses (request_id, staff_id, available, candidate_orders) \
             VALUES ('{rid}', '{staff_b}', true, '[2]')"
        ))
        .await
        .unwrap_err();
    assert!(err.as_db_error().unwrap().message().contains("already claimed"));

    // The responses view shows one Available and one still Pending
    let rows = data_rows(
        client
            .simple_query(&format!("SELECT * FROM responses WHERE request_id = '{rid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 2);
    let statuses: Vec<&str> = rows.iter().filter_map(|r| r.get("status")).collect();
    assert!(statuses.contains(&"available"));
    assert!(statuses.contains(&"pending"));
}

#[tokio::test]
async fn schedule_feed_gates_and_frees_slots() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "feed").await;

    let staff = Ulid::new();
    let store = Ulid::new();
    let event_id = Ulid::new();

    client
        .batch_execute(&format!(
            "INSERT INTO schedule_events (id, store_id, date, start_time, end_time, gm_ids, label) \
             VALUES ('{event_id}', '{store}', '2024-01-07', '19:00', '23:00', '[]', 'open night')"
        ))
        .await
        .unwrap();

    let rid = open_request(&client, &[staff]).await;
    let err = client
        .batch_execute(&format!(
            "INSERT INTO confirmations (request_id, candidate_order, store_id, gm_id) \
             VALUES ('{rid}', 3, '{store}', '{}')",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert!(err.as_db_error().unwrap().message().contains("double-booked"));

    client
        .batch_execute(&format!("DELETE FROM schedule_events WHERE id = '{event_id}'"))
        .await
        .unwrap();

    client
        .batch_execute(&format!(
            "INSERT INTO confirmations (request_id, candidate_order, store_id, gm_id) \
             VALUES ('{rid}', 3, '{store}', '{}')",
            Ulid::new()
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn tenants_do_not_share_occupancy() {
    let (addr, _tm) = start_test_server().await;
    let client_a = connect(addr, "org_a").await;
    let client_b = connect(addr, "org_b").await;

    let staff = Ulid::new();
    let store = Ulid::new();

    let r1 = open_request(&client_a, &[staff]).await;
    client_a
        .batch_execute(&format!(
            "INSERT INTO confirmations (request_id, candidate_order, store_id, gm_id) \
             VALUES ('{r1}', 3, '{store}', '{}')",
            Ulid::new()
        ))
        .await
        .unwrap();

    // Same store id and slot in a different tenant: no conflict
    let r2 = open_request(&client_b, &[staff]).await;
    client_b
        .batch_execute(&format!(
            "INSERT INTO confirmations (request_id, candidate_order, store_id, gm_id) \
             VALUES ('{r2}', 3, '{store}', '{}')",
            Ulid::new()
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn extended_protocol_with_parameters() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "extended").await;

    let staff = Ulid::new();
    let _rid = open_request(&client, &[staff]).await;

    let rows = client
        .query(
            "SELECT * FROM pending_requests WHERE staff_id = $1",
            &[&staff.to_string()],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let status: &str = rows[0].get("status");
    assert_eq!(status, "awaiting_gm");
}
