use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};

const HOUR: i64 = 3_600_000;
/// 2026-03-02T00:00:00Z, a Monday.
const DAY0: i64 = 1_772_409_600_000;
const DAY: i64 = 24 * HOUR;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let password = std::env::var("SLOTKEEPER_PASSWORD").unwrap_or_else(|_| "slotkeeper".into());
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("bench")
        .user("slotkeeper")
        .password(password);

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

/// Sorted latency samples of one operation.
struct Latencies(Vec<Duration>);

impl Latencies {
    fn new(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        Self(samples)
    }

    fn at(&self, p: f64) -> f64 {
        let idx = ((self.0.len() as f64) * p / 100.0) as usize;
        self.0.get(idx.min(self.0.len().saturating_sub(1))).map_or(0.0, ms)
    }

    fn report(&self, label: &str) {
        let Some(max) = self.0.last() else {
            println!("  {label}: no samples");
            return;
        };
        let mean = self.0.iter().sum::<Duration>() / self.0.len() as u32;
        println!(
            "  {label}: n={} mean={:.2}ms p50={:.2}ms p95={:.2}ms p99={:.2}ms max={:.2}ms",
            self.0.len(),
            ms(&mean),
            self.at(50.0),
            self.at(95.0),
            self.at(99.0),
            ms(max),
        );
    }
}

fn ms(d: &Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

async fn returning_id(client: &tokio_postgres::Client, sql: &str) -> String {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .find_map(|m| match m {
            SimpleQueryMessage::Row(row) => row.get("id").map(str::to_string),
            _ => None,
        })
        .expect("RETURNING row")
}

#[derive(Clone)]
struct Salon {
    service: String,
    client: String,
    workers: Vec<String>,
}

async fn setup(client: &tokio_postgres::Client, n_workers: usize) -> Salon {
    let service = returning_id(
        client,
        &format!(
            "INSERT INTO services (name, duration_minutes, price) VALUES ('Bench cut {}', 60, 20) RETURNING *",
            ulid::Ulid::new()
        ),
    )
    .await;
    let mut workers = Vec::with_capacity(n_workers);
    for i in 0..n_workers {
        workers.push(
            returning_id(
                client,
                &format!(
                    "INSERT INTO workers (first_name, last_name, service_ids) VALUES ('Worker', 'No{i}', '{service}') RETURNING *"
                ),
            )
            .await,
        );
    }
    let booker = returning_id(
        client,
        "INSERT INTO clients (full_name) VALUES ('Bench Client') RETURNING *",
    )
    .await;
    println!("  created 1 service, {n_workers} workers, 1 client");
    Salon {
        service,
        client: booker,
        workers,
    }
}

fn booking_sql(salon: &Salon, worker: &str, starts_at: i64) -> String {
    format!(
        "INSERT INTO appointments (client_id, service_id, worker_id, starts_at) VALUES ('{}', '{}', '{worker}', {starts_at})",
        salon.client, salon.service
    )
}

/// One hour-long slot per (day, hour 8..20); slot `i` never overlaps slot `j`.
fn slot(i: i64) -> i64 {
    DAY0 + (i / 12) * DAY + (8 + i % 12) * HOUR
}

async fn phase1_sequential(host: &str, port: u16, salon: &Salon) {
    let client = connect(host, port).await;
    let worker = &salon.workers[0];

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        client
            .batch_execute(&booking_sql(salon, worker, slot(i as i64)))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    Latencies::new(latencies).report("booking latency");
}

/// Every task races for the same slots of one worker; exactly one wins each.
async fn phase2_contended(host: &str, port: u16, salon: &Salon) {
    let n_tasks = 20;
    let n_slots = 50i64;
    let worker = salon.workers[1].clone();

    let won = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let salon = salon.clone();
        let worker = worker.clone();
        let won = won.clone();
        let refused = refused.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for i in 0..n_slots {
                match client.batch_execute(&booking_sql(&salon, &worker, slot(i))).await {
                    Ok(()) => won.fetch_add(1, Ordering::Relaxed),
                    Err(e) if e.code() == Some(&SqlState::EXCLUSION_VIOLATION) => {
                        refused.fetch_add(1, Ordering::Relaxed)
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let refused = refused.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_slots} slots in {:.2}s: {won} booked, {refused} refused",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, n_slots as usize, "each slot must be booked exactly once");
}

async fn phase3_read_under_load(host: &str, port: u16, salon: &Salon) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 2..salon.workers.len() {
        let host = host.to_string();
        let salon = salon.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let worker = salon.workers[w].clone();
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let _ = client.batch_execute(&booking_sql(&salon, &worker, slot(i))).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let service = salon.service.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM available_workers WHERE service_id = '{service}' AND starts_at = {}",
                        slot((r * reads_per_reader + i) as i64 % 600)
                    ))
                    .await
                    .unwrap();
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

    Latencies::new(all_latencies).report("available_workers latency");
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = Arc::new(AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let salon = setup(&client, 1).await;
            for i in 0..ops_per_conn {
                client
                    .batch_execute(&booking_sql(&salon, &salon.workers[0], slot(i)))
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
    let host = std::env::var("SLOTKEEPER_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SLOTKEEPER_PORT")
        .unwrap_or_else(|_| "5434".into())
        .parse()
        .expect("invalid SLOTKEEPER_PORT");

    println!("=== slotkeeper stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[setup]");
    let setup_client = connect(&host, port).await;
    let salon = setup(&setup_client, 8).await;
    drop(setup_client);

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential(&host, port, &salon).await;

    println!("\n[phase 2] contended bookings on one worker");
    phase2_contended(&host, port, &salon).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&host, port, &salon).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\ndone.");
}
