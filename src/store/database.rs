use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

use super::{Store, StoreError, WorkerCalendar};

pub type SharedCalendar = Arc<RwLock<WorkerCalendar>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Snapshot {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Batch = Vec<(Event, oneshot::Sender<io::Result<()>>)>;

/// Owns the WAL. Every append already queued when the first one is picked up
/// joins the same batch and shares a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch: Batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Batch) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even when an append failed so buffered bytes from this batch
    // are not carried into the next one.
    let flushed = wal.flush_sync();
    let result = appended.and(flushed);

    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Snapshot { events, response } => {
            let result =
                Wal::write_snapshot(wal.path(), &events).and_then(|()| wal.install_snapshot());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// In-memory tables rebuilt from the WAL on open.
///
/// Appointment writes take the owning worker's calendar lock across the WAL
/// append and the in-memory apply, so readers never see an appointment that
/// is not yet durable.
pub struct Database {
    services: DashMap<Ulid, Service>,
    workers: DashMap<Ulid, Worker>,
    clients: DashMap<Ulid, Client>,
    calendars: DashMap<Ulid, SharedCalendar>,
    /// Reverse lookup: appointment id → worker id
    appointment_to_worker: DashMap<Ulid, Ulid>,
    /// Writers hold it shared; compaction holds it exclusively so the snapshot
    /// cannot miss a write that is durable but not yet applied.
    compaction_gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Database {
    pub fn open(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let db = Self {
            services: DashMap::new(),
            workers: DashMap::new(),
            clients: DashMap::new(),
            calendars: DashMap::new(),
            appointment_to_worker: DashMap::new(),
            compaction_gate: RwLock::new(()),
            wal_tx,
            notify,
        };

        // Nothing else holds these calendars yet, so try_write never fails here.
        for event in &events {
            match event {
                Event::AppointmentSaved(appointment) => {
                    let previous = db.worker_of(&appointment.id);
                    if let Some(prev) = previous
                        && prev != appointment.worker_id
                        && let Ok(mut cal) = db.calendar(prev).try_write()
                    {
                        cal.remove(appointment.id);
                    }
                    if let Ok(mut cal) = db.calendar(appointment.worker_id).try_write() {
                        cal.upsert(appointment.clone());
                    }
                    db.appointment_to_worker.insert(appointment.id, appointment.worker_id);
                }
                Event::AppointmentDeleted { id, worker_id } => {
                    if let Ok(mut cal) = db.calendar(*worker_id).try_write() {
                        cal.remove(*id);
                    }
                    db.appointment_to_worker.remove(id);
                }
                other => db.apply_catalog(other),
            }
        }
        info!("replayed {} events from {}", events.len(), wal_path.display());

        Ok(db)
    }

    fn worker_of(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_to_worker.get(appointment_id).map(|e| *e.value())
    }

    fn calendar(&self, worker_id: Ulid) -> SharedCalendar {
        self.calendars
            .entry(worker_id)
            .or_insert_with(|| Arc::new(RwLock::new(WorkerCalendar::new(worker_id))))
            .clone()
    }

    fn existing_calendar(&self, worker_id: &Ulid) -> Option<SharedCalendar> {
        self.calendars.get(worker_id).map(|e| e.value().clone())
    }

    fn apply_catalog(&self, event: &Event) {
        match event {
            Event::ServiceSaved(service) => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceDeleted { id } => {
                self.services.remove(id);
            }
            Event::WorkerSaved(worker) => {
                self.workers.insert(worker.id, worker.clone());
            }
            Event::WorkerDeleted { id } => {
                self.workers.remove(id);
                self.calendars.remove(id);
                self.notify.remove(id);
            }
            Event::ClientSaved(client) => {
                self.clients.insert(client.id, client.clone());
            }
            // Calendar events are applied under the calendar lock by their callers.
            Event::AppointmentSaved(_) | Event::AppointmentDeleted { .. } => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    async fn persist_catalog(&self, event: Event) -> Result<(), StoreError> {
        let _gate = self.compaction_gate.read().await;
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        Ok(())
    }

    /// Rewrite the WAL with only the events needed to rebuild the current state.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.compaction_gate.write().await;

        let mut events: Vec<Event> = Vec::new();
        events.extend(self.services.iter().map(|e| Event::ServiceSaved(e.value().clone())));
        events.extend(self.workers.iter().map(|e| Event::WorkerSaved(e.value().clone())));
        events.extend(self.clients.iter().map(|e| Event::ClientSaved(e.value().clone())));

        let calendars: Vec<SharedCalendar> =
            self.calendars.iter().map(|e| e.value().clone()).collect();
        for cal in calendars {
            let guard = cal.read().await;
            events.extend(guard.appointments.iter().cloned().map(Event::AppointmentSaved));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Snapshot { events, response: tx })
            .await
            .map_err(|_| StoreError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl Store for Database {
    async fn get_service(&self, id: Ulid) -> Result<Option<Service>, StoreError> {
        Ok(self.services.get(&id).map(|e| e.value().clone()))
    }

    async fn list_services(&self) -> Result<Vec<Service>, StoreError> {
        Ok(self.services.iter().map(|e| e.value().clone()).collect())
    }

    async fn save_service(&self, service: Service) -> Result<(), StoreError> {
        self.persist_catalog(Event::ServiceSaved(service)).await
    }

    async fn delete_service(&self, id: Ulid) -> Result<bool, StoreError> {
        if !self.services.contains_key(&id) {
            return Ok(false);
        }
        self.persist_catalog(Event::ServiceDeleted { id }).await?;
        Ok(true)
    }

    async fn get_worker(&self, id: Ulid) -> Result<Option<Worker>, StoreError> {
        Ok(self.workers.get(&id).map(|e| e.value().clone()))
    }

    async fn list_workers(&self) -> Result<Vec<Worker>, StoreError> {
        Ok(self.workers.iter().map(|e| e.value().clone()).collect())
    }

    async fn qualified_workers(&self, service_id: Ulid) -> Result<Vec<Worker>, StoreError> {
        let mut workers: Vec<Worker> = self
            .workers
            .iter()
            .filter(|e| e.value().is_qualified_for(&service_id))
            .map(|e| e.value().clone())
            .collect();
        // ULIDs sort by creation time: oldest worker first.
        workers.sort_by_key(|w| w.id);
        Ok(workers)
    }

    async fn save_worker(&self, worker: Worker) -> Result<(), StoreError> {
        self.persist_catalog(Event::WorkerSaved(worker)).await
    }

    async fn delete_worker(&self, id: Ulid) -> Result<bool, StoreError> {
        if !self.workers.contains_key(&id) {
            return Ok(false);
        }
        self.persist_catalog(Event::WorkerDeleted { id }).await?;
        Ok(true)
    }

    async fn get_client(&self, id: Ulid) -> Result<Option<Client>, StoreError> {
        Ok(self.clients.get(&id).map(|e| e.value().clone()))
    }

    async fn list_clients(&self) -> Result<Vec<Client>, StoreError> {
        Ok(self.clients.iter().map(|e| e.value().clone()).collect())
    }

    async fn save_client(&self, client: Client) -> Result<(), StoreError> {
        self.persist_catalog(Event::ClientSaved(client)).await
    }

    async fn get_appointment(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        let Some(worker_id) = self.worker_of(&id) else {
            return Ok(None);
        };
        let Some(cal) = self.existing_calendar(&worker_id) else {
            return Ok(None);
        };
        let guard = cal.read().await;
        Ok(guard.get(id).cloned())
    }

    async fn list_worker_appointments(
        &self,
        worker_id: Ulid,
        window: Span,
        exclude_status: AppointmentStatus,
    ) -> Result<Vec<Appointment>, StoreError> {
        let Some(cal) = self.existing_calendar(&worker_id) else {
            return Ok(Vec::new());
        };
        let guard = cal.read().await;
        Ok(guard
            .starting_within(&window)
            .iter()
            .filter(|a| a.status != exclude_status)
            .cloned()
            .collect())
    }

    async fn list_appointments(&self) -> Result<Vec<Appointment>, StoreError> {
        let calendars: Vec<SharedCalendar> =
            self.calendars.iter().map(|e| e.value().clone()).collect();
        let mut all = Vec::new();
        for cal in calendars {
            let guard = cal.read().await;
            all.extend(guard.appointments.iter().cloned());
        }
        all.sort_by_key(|a| (a.starts_at, a.id));
        Ok(all)
    }

    async fn save_appointment(&self, appointment: Appointment) -> Result<(), StoreError> {
        let _gate = self.compaction_gate.read().await;
        let id = appointment.id;
        let worker_id = appointment.worker_id;
        let event = Event::AppointmentSaved(appointment.clone());

        match self.worker_of(&id) {
            Some(previous) if previous != worker_id => {
                // Moving between workers: lock both calendars in id order.
                let (first, second) = if previous < worker_id {
                    (previous, worker_id)
                } else {
                    (worker_id, previous)
                };
                let first_cal = self.calendar(first);
                let second_cal = self.calendar(second);
                let mut first_guard = first_cal.write().await;
                let mut second_guard = second_cal.write().await;

                self.wal_append(&event).await?;
                let (old_cal, new_cal) = if previous == first {
                    (&mut *first_guard, &mut *second_guard)
                } else {
                    (&mut *second_guard, &mut *first_guard)
                };
                old_cal.remove(id);
                new_cal.upsert(appointment);
                self.appointment_to_worker.insert(id, worker_id);
                self.notify.send(previous, &event);
            }
            _ => {
                let cal = self.calendar(worker_id);
                let mut guard = cal.write().await;
                self.wal_append(&event).await?;
                guard.upsert(appointment);
                self.appointment_to_worker.insert(id, worker_id);
            }
        }

        self.notify.send(worker_id, &event);
        Ok(())
    }

    async fn delete_appointment(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
        let _gate = self.compaction_gate.read().await;
        let Some(worker_id) = self.worker_of(&id) else {
            return Ok(None);
        };
        let cal = self.calendar(worker_id);
        let mut guard = cal.write().await;
        if guard.get(id).is_none() {
            return Ok(None);
        }

        let event = Event::AppointmentDeleted { id, worker_id };
        self.wal_append(&event).await?;
        let removed = guard.remove(id);
        self.appointment_to_worker.remove(&id);
        self.notify.send(worker_id, &event);
        Ok(removed)
    }

    async fn count_appointments_for_service(&self, service_id: Ulid) -> Result<usize, StoreError> {
        Ok(self
            .list_appointments()
            .await?
            .iter()
            .filter(|a| a.service_id == service_id)
            .count())
    }

    async fn count_appointments_for_worker(&self, worker_id: Ulid) -> Result<usize, StoreError> {
        Ok(match self.existing_calendar(&worker_id) {
            Some(cal) => cal.read().await.len(),
            None => 0,
        })
    }
}
