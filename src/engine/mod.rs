mod conflict;
mod error;
mod mutations;
mod projection;
mod queries;

pub use error::EngineError;
pub use projection::OccupancyIndex;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRequestState = Arc<RwLock<RequestState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking coordination core for one tenant: request state, the
/// occupancy projection, and the WAL that makes both durable.
pub struct Engine {
    pub state: DashMap<Ulid, SharedRequestState>,
    /// One lock for the whole conflict-key space. Confirm holds it across
    /// both checks and the write, so overlapping confirmations serialize.
    pub(super) occupancy: RwLock<OccupancyIndex>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

/// Apply a request-scoped event to its state (no locking — caller holds
/// the write guard). RequestOpened and the schedule feed are handled at
/// the map/index level, not here.
fn apply_to_request(rs: &mut RequestState, event: &Event) {
    match event {
        Event::AvailabilitySubmitted {
            staff_id,
            available,
            selected_orders,
            notes,
            responded_at,
            ..
        } => {
            if rs.response(staff_id).is_none() {
                rs.responses.push(AvailabilityResponse::pending(*staff_id));
            }
            let resp = rs.response_mut(staff_id).expect("response row just ensured");
            resp.status = if *available {
                ResponseStatus::Available
            } else {
                ResponseStatus::AllUnavailable
            };
            resp.selected_orders = selected_orders.clone();
            resp.notes = notes.clone();
            resp.responded_at = Some(*responded_at);
            if *available {
                // The claim: only the selected slots stay on the table.
                rs.prune_candidates(selected_orders);
                rs.status = RequestStatus::AwaitingStore;
            }
            rs.updated_at = *responded_at;
        }
        Event::RequestConfirmed {
            candidate_order,
            store_id,
            gm_id,
            confirmed_at,
            ..
        } => {
            rs.prune_candidates(&[*candidate_order]);
            if let Some(slot) = rs.candidate_slots.first_mut() {
                slot.status = SlotStatus::Confirmed;
            }
            rs.confirmed_store_id = Some(*store_id);
            rs.assigned_gm_id = Some(*gm_id);
            rs.status = RequestStatus::Confirmed;
            rs.updated_at = *confirmed_at;
        }
        Event::RequestRejected { reason, rejected_at, .. } => {
            rs.status = RequestStatus::Rejected;
            rs.rejection_reason = Some(reason.clone());
            rs.updated_at = *rejected_at;
        }
        Event::RequestOpened { .. }
        | Event::ScheduleEventRecorded { .. }
        | Event::ScheduleEventWithdrawn { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            occupancy: RwLock::new(OccupancyIndex::new()),
            wal_tx,
            notify,
        };

        // Replay — we're the sole owner of every Arc and the occupancy lock,
        // so try_read/try_write always succeed instantly. Never use
        // blocking_read/blocking_write here because this may run inside an
        // async context (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::RequestOpened {
                    id,
                    scenario_id,
                    customer_ref,
                    participants,
                    candidate_slots,
                    requested_store_ids,
                    eligible_staff,
                    opened_at,
                } => {
                    let rs = RequestState::open(
                        *id,
                        *scenario_id,
                        customer_ref.clone(),
                        *participants,
                        candidate_slots.clone(),
                        requested_store_ids.clone(),
                        eligible_staff,
                        *opened_at,
                    );
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::ScheduleEventRecorded {
                    id,
                    store_id,
                    date,
                    start_time,
                    end_time,
                    gm_ids,
                    label,
                } => {
                    let mut occ = engine
                        .occupancy
                        .try_write()
                        .expect("replay: uncontended write");
                    occ.record_event(ScheduleEvent {
                        id: *id,
                        store_id: *store_id,
                        date: *date,
                        time_slot: TimeSlot::from_start(*start_time),
                        start_time: *start_time,
                        end_time: *end_time,
                        gm_ids: gm_ids.clone(),
                        label: label.clone(),
                    });
                }
                Event::ScheduleEventWithdrawn { id } => {
                    let mut occ = engine
                        .occupancy
                        .try_write()
                        .expect("replay: uncontended write");
                    occ.withdraw_event(id);
                }
                other => {
                    let Some(request_id) = other.request_id() else { continue };
                    let Some(entry) = engine.state.get(&request_id) else { continue };
                    let rs_arc = entry.clone();
                    let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                    apply_to_request(&mut guard, other);

                    if let Event::RequestConfirmed { store_id, gm_id, .. } = other
                        && let Some(slot) = guard.candidate_slots.first() {
                            let mut occ = engine
                                .occupancy
                                .try_write()
                                .expect("replay: uncontended write");
                            occ.claim_request(request_id, *store_id, *gm_id, slot.date, slot.time_slot);
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_request(&self, id: &Ulid) -> Option<SharedRequestState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// WAL-append + apply + notify in one call, for request-scoped events.
    pub(super) async fn persist_and_apply(
        &self,
        request_id: Ulid,
        rs: &mut RequestState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_request(rs, event);
        self.notify.send(request_id, event);
        Ok(())
    }
}
