use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_event_free, check_slot_free, now_ms, validate_candidates, validate_notes,
    validate_reason,
};
use super::{apply_to_request, Engine, EngineError, SharedRequestState, WalCommand};

impl Engine {
    /// Intake: register a new private booking request, AwaitingGm, with one
    /// Pending response row per eligible staff member.
    #[allow(clippy::too_many_arguments)]
    pub async fn open_request(
        &self,
        id: Ulid,
        scenario_id: Ulid,
        customer_ref: String,
        participants: u32,
        candidate_slots: Vec<CandidateSlot>,
        requested_store_ids: Vec<Ulid>,
        eligible_staff: Vec<Ulid>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_REQUESTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many requests"));
        }
        if customer_ref.len() > MAX_CUSTOMER_REF_LEN {
            return Err(EngineError::LimitExceeded("customer ref too long"));
        }
        if participants == 0 {
            return Err(EngineError::Validation("participant count must be positive"));
        }
        validate_candidates(&candidate_slots)?;
        if eligible_staff.is_empty() {
            return Err(EngineError::Validation("at least one eligible staff required"));
        }
        if eligible_staff.len() > MAX_ELIGIBLE_STAFF {
            return Err(EngineError::LimitExceeded("too many eligible staff"));
        }
        for (i, s) in eligible_staff.iter().enumerate() {
            if eligible_staff[..i].contains(s) {
                return Err(EngineError::Validation("duplicate eligible staff"));
            }
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let opened_at = now_ms();
        let event = Event::RequestOpened {
            id,
            scenario_id,
            customer_ref: customer_ref.clone(),
            participants,
            candidate_slots: candidate_slots.clone(),
            requested_store_ids: requested_store_ids.clone(),
            eligible_staff: eligible_staff.clone(),
            opened_at,
        };
        self.wal_append(&event).await?;
        let rs = RequestState::open(
            id,
            scenario_id,
            customer_ref,
            participants,
            candidate_slots,
            requested_store_ids,
            &eligible_staff,
            opened_at,
        );
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        self.notify.send(id, &event);
        Ok(())
    }

    /// Record one staff member's answer. An Available answer with a
    /// non-empty selection is the claim: candidates are pruned to the
    /// selection and the request advances to AwaitingStore. The claim
    /// check and the write run under one request write lock, so two
    /// concurrent claims cannot both win.
    pub async fn submit_availability(
        &self,
        request_id: Ulid,
        staff_id: Ulid,
        available: bool,
        mut selected_orders: Vec<u32>,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        validate_notes(notes.as_deref())?;
        let rs = self
            .get_request(&request_id)
            .ok_or(EngineError::NotFound(request_id))?;
        let mut guard = rs.write().await;

        if guard.response(&staff_id).is_none() {
            return Err(EngineError::NotFound(staff_id));
        }

        if available {
            if selected_orders.is_empty() {
                return Err(EngineError::Validation("at least one candidate order required"));
            }
            // Claim conflict outranks the order and status checks: once a
            // peer's Available answer claimed the request (possibly pruning
            // the orders this staff is about to send), later claims must
            // surface AlreadyClaimed, not a validation or state error.
            if let Some(claimed_by) = guard.claimed_by()
                && claimed_by != staff_id {
                    return Err(EngineError::AlreadyClaimed {
                        id: request_id,
                        claimed_by,
                    });
                }
            if guard.status != RequestStatus::AwaitingGm {
                return Err(EngineError::State {
                    id: request_id,
                    status: guard.status,
                });
            }
            selected_orders.sort_unstable();
            selected_orders.dedup();
            for &order in &selected_orders {
                if guard.candidate(order).is_none() {
                    return Err(EngineError::Validation("unknown candidate order"));
                }
            }
        } else {
            if !selected_orders.is_empty() {
                return Err(EngineError::Validation(
                    "a declining answer cannot carry candidate orders",
                ));
            }
            // Declines after the claim are recorded for audit only; a
            // decided request takes no further answers.
            if guard.status.is_terminal() {
                return Err(EngineError::State {
                    id: request_id,
                    status: guard.status,
                });
            }
        }

        let event = Event::AvailabilitySubmitted {
            request_id,
            staff_id,
            available,
            selected_orders,
            notes,
            responded_at: now_ms(),
        };
        self.persist_and_apply(request_id, &mut guard, &event).await
    }

    /// Store-side final decision: pin the request to one candidate, one
    /// store, and one GM. Both conflict checks and the write run while
    /// holding the request lock and the occupancy lock, so two overlapping
    /// confirmations serialize and exactly one wins.
    pub async fn confirm(
        &self,
        request_id: Ulid,
        candidate_order: u32,
        store_id: Ulid,
        gm_id: Ulid,
    ) -> Result<(), EngineError> {
        let rs = self
            .get_request(&request_id)
            .ok_or(EngineError::NotFound(request_id))?;
        let mut guard = rs.write().await;

        if guard.status.is_terminal() {
            return Err(EngineError::State {
                id: request_id,
                status: guard.status,
            });
        }
        let Some(slot) = guard.candidate(candidate_order) else {
            return Err(EngineError::Validation("unknown candidate order"));
        };
        let (date, time_slot) = (slot.date, slot.time_slot);

        let mut occ = self.occupancy.write().await;
        check_slot_free(&occ, store_id, gm_id, date, time_slot)?;

        let event = Event::RequestConfirmed {
            request_id,
            candidate_order,
            store_id,
            gm_id,
            confirmed_at: now_ms(),
        };
        self.wal_append(&event).await?;
        apply_to_request(&mut guard, &event);
        occ.claim_request(request_id, store_id, gm_id, date, time_slot);
        self.notify.send(request_id, &event);
        Ok(())
    }

    /// Close the request without booking anything. The reason is mandatory
    /// and travels to the customer-facing collaborator verbatim.
    pub async fn reject(&self, request_id: Ulid, reason: String) -> Result<(), EngineError> {
        validate_reason(&reason)?;
        let rs = self
            .get_request(&request_id)
            .ok_or(EngineError::NotFound(request_id))?;
        let mut guard = rs.write().await;

        if guard.status.is_terminal() {
            return Err(EngineError::Validation("request already decided"));
        }

        let event = Event::RequestRejected {
            request_id,
            reason,
            rejected_at: now_ms(),
        };
        self.persist_and_apply(request_id, &mut guard, &event).await
    }

    /// Ingest one entry of the ordinary-occupancy feed. Shares the conflict
    /// key space with confirmations, so a scheduled performance blocks a
    /// private booking and vice versa.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_schedule_event(
        &self,
        id: Ulid,
        store_id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        mut gm_ids: Vec<Ulid>,
        label: Option<String>,
    ) -> Result<(), EngineError> {
        if start_time >= end_time {
            return Err(EngineError::Validation("event start must be before end"));
        }
        if gm_ids.len() > MAX_GMS_PER_EVENT {
            return Err(EngineError::LimitExceeded("too many GMs on event"));
        }
        if let Some(ref l) = label
            && l.len() > MAX_LABEL_LEN {
                return Err(EngineError::LimitExceeded("label too long"));
            }
        gm_ids.sort_unstable();
        gm_ids.dedup();

        let time_slot = TimeSlot::from_start(start_time);
        let mut occ = self.occupancy.write().await;
        if occ.contains_event(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if occ.event_count() >= MAX_SCHEDULE_EVENTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many schedule events"));
        }
        check_event_free(&occ, store_id, &gm_ids, date, time_slot)?;

        let event = Event::ScheduleEventRecorded {
            id,
            store_id,
            date,
            start_time,
            end_time,
            gm_ids: gm_ids.clone(),
            label: label.clone(),
        };
        self.wal_append(&event).await?;
        occ.record_event(ScheduleEvent {
            id,
            store_id,
            date,
            time_slot,
            start_time,
            end_time,
            gm_ids,
            label,
        });
        Ok(())
    }

    /// Withdraw a feed entry and free its conflict keys.
    pub async fn withdraw_schedule_event(&self, id: Ulid) -> Result<(), EngineError> {
        let mut occ = self.occupancy.write().await;
        if !occ.contains_event(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ScheduleEventWithdrawn { id };
        self.wal_append(&event).await?;
        occ.withdraw_event(&id);
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: one open per request, its non-pending
    /// answers, its decision, and one record per live schedule event.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let request_arcs: Vec<SharedRequestState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        for rs in request_arcs {
            let guard = rs.read().await;

            events.push(Event::RequestOpened {
                id: guard.id,
                scenario_id: guard.scenario_id,
                customer_ref: guard.customer_ref.clone(),
                participants: guard.participants,
                // Emit Proposed; replaying the decision re-derives Confirmed.
                candidate_slots: guard
                    .candidate_slots
                    .iter()
                    .map(|c| CandidateSlot {
                        status: SlotStatus::Proposed,
                        ..c.clone()
                    })
                    .collect(),
                requested_store_ids: guard.requested_store_ids.clone(),
                eligible_staff: guard.responses.iter().map(|r| r.staff_id).collect(),
                opened_at: guard.opened_at,
            });

            for r in &guard.responses {
                if r.status == ResponseStatus::Pending {
                    continue;
                }
                events.push(Event::AvailabilitySubmitted {
                    request_id: guard.id,
                    staff_id: r.staff_id,
                    available: r.status == ResponseStatus::Available,
                    selected_orders: r.selected_orders.clone(),
                    notes: r.notes.clone(),
                    responded_at: r.responded_at.unwrap_or(guard.updated_at),
                });
            }

            match guard.status {
                RequestStatus::Confirmed => {
                    if let (Some(slot), Some(store_id), Some(gm_id)) = (
                        guard.candidate_slots.first(),
                        guard.confirmed_store_id,
                        guard.assigned_gm_id,
                    ) {
                        events.push(Event::RequestConfirmed {
                            request_id: guard.id,
                            candidate_order: slot.order,
                            store_id,
                            gm_id,
                            confirmed_at: guard.updated_at,
                        });
                    }
                }
                RequestStatus::Rejected => {
                    events.push(Event::RequestRejected {
                        request_id: guard.id,
                        reason: guard
                            .rejection_reason
                            .clone()
                            .unwrap_or_else(|| "rejected".into()),
                        rejected_at: guard.updated_at,
                    });
                }
                RequestStatus::AwaitingGm | RequestStatus::AwaitingStore => {}
            }
        }

        {
            let occ = self.occupancy.read().await;
            for ev in occ.live_events() {
                events.push(Event::ScheduleEventRecorded {
                    id: ev.id,
                    store_id: ev.store_id,
                    date: ev.date,
                    start_time: ev.start_time,
                    end_time: ev.end_time,
                    gm_ids: ev.gm_ids.clone(),
                    label: ev.label.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
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
