use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};

const OWNER: &str = "bench-owner";
const TABLES: usize = 20;

async fn connect(host: &str, port: u16, user: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("covers")
        .user(user)
        .password(std::env::var("COVERS_PASSWORD").unwrap_or_else(|_| "covers".into()));

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

/// Bookings are spread over distinct (table, date) slots so none conflict.
fn date(day: u64) -> String {
    let start = NaiveDate::from_ymd_opt(2030, 1, 1).expect("valid date");
    (start + Days::new(day)).format("%Y-%m-%d").to_string()
}

fn first_column(messages: Vec<SimpleQueryMessage>) -> Vec<String> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get(0).map(str::to_string),
            _ => None,
        })
        .collect()
}

struct Floor {
    restaurant_id: String,
    table_ids: Vec<String>,
}

async fn setup(client: &tokio_postgres::Client, name: &str) -> Floor {
    let rows = client
        .simple_query(&format!("INSERT INTO restaurants (name) VALUES ('{name}') RETURNING id"))
        .await
        .unwrap();
    let restaurant_id = first_column(rows).remove(0);

    let mut table_ids = Vec::with_capacity(TABLES);
    for i in 0..TABLES {
        let capacity = [2, 2, 4, 4, 6][i % 5];
        let rows = client
            .simple_query(&format!(
                "INSERT INTO tables (restaurant_id, name, capacity) VALUES ('{restaurant_id}', 'T{i}', {capacity}) RETURNING id"
            ))
            .await
            .unwrap();
        table_ids.push(first_column(rows).remove(0));
    }

    println!("  restaurant {restaurant_id} with {} tables", table_ids.len());
    Floor {
        restaurant_id,
        table_ids,
    }
}

fn booking(floor: &Floor, n: usize, offset_days: u64) -> String {
    let table_id = &floor.table_ids[n % floor.table_ids.len()];
    let day = date(offset_days + (n / floor.table_ids.len()) as u64);
    format!(
        "INSERT INTO reservations (restaurant_id, table_id, table_name, date, time, guests) \
         VALUES ('{}', '{table_id}', 'T', '{day}', '7:00 PM', 2)",
        floor.restaurant_id
    )
}

async fn phase1_sequential(host: &str, port: u16, floor: &Floor) {
    let client = connect(host, port, "diner").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        client.batch_execute(&booking(floor, i, 0)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16, floor: Arc<Floor>) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for task in 0..n_tasks {
        let host = host.to_string();
        let floor = floor.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, "diner").await;
            // Each task owns its own range of dates.
            let offset = 1_000 + (task as u64) * 100;
            for j in 0..n_per_task {
                client.batch_execute(&booking(&floor, j, offset)).await.unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contention(host: &str, port: u16, floor: Arc<Floor>) {
    let n_tasks = 50;
    let admitted = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let floor = floor.clone();
        let admitted = admitted.clone();
        let refused = refused.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, "diner").await;
            match client.batch_execute(&booking(&floor, 0, 5_000)).await {
                Ok(()) => admitted.fetch_add(1, Ordering::Relaxed),
                Err(_) => refused.fetch_add(1, Ordering::Relaxed),
            };
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let admitted = admitted.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} diners racing for one slot: {admitted} admitted, {} refused",
        refused.load(Ordering::Relaxed)
    );
    assert_eq!(admitted, 1, "exactly one booking must win the slot");
}

async fn phase4_read_under_load(host: &str, port: u16, floor: Arc<Floor>) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5u64 {
        let host = host.to_string();
        let stop = stop.clone();
        let floor = floor.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, "diner").await;
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) {
                let _ = client.batch_execute(&booking(&floor, i, 10_000 + w * 1_000)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let host = host.to_string();
        let floor = floor.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, "anonymous").await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let day = date(((r * reads_per_reader + i) % 50) as u64);
                let sql = format!(
                    "SELECT * FROM available_tables WHERE restaurant_id = '{}' AND date = '{day}' AND time = '8:00 PM' AND min_capacity = 4",
                    floor.restaurant_id
                );
                let t = Instant::now();
                client.simple_query(&sql).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase5_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for c in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let owner = format!("storm-{c}");
            let client = connect(&host, port, &owner).await;
            let rows = client
                .simple_query(&format!("INSERT INTO restaurants (name) VALUES ('Storm {c}') RETURNING id"))
                .await
                .unwrap();
            let rid = first_column(rows).remove(0);

            for i in 0..ops_per_conn {
                client
                    .batch_execute(&format!(
                        "INSERT INTO tables (restaurant_id, name, capacity) VALUES ('{rid}', 'T{i}', 4)"
                    ))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("COVERS_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("COVERS_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid COVERS_PORT");

    println!("=== covers stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[setup]");
    let owner = connect(&host, port, OWNER).await;
    let floor = Arc::new(setup(&owner, "Bench Bistro").await);
    drop(owner);

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential(&host, port, &floor).await;

    println!("\n[phase 2] concurrent booking throughput");
    phase2_concurrent(&host, port, floor.clone()).await;

    println!("\n[phase 3] contention on a single slot");
    phase3_contention(&host, port, floor.clone()).await;

    println!("\n[phase 4] availability latency under write load");
    phase4_read_under_load(&host, port, floor).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
