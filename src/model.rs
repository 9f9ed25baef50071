use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

/// Coarse schedule bucket. Conflict keys are (owner, date, slot), not raw
/// clock intervals, so two performances in the same bucket always collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
}

impl TimeSlot {
    /// Canonical bucketing: <12 morning, 12-16 afternoon, >=17 evening.
    pub fn from_start(start: NaiveTime) -> Self {
        match start.hour() {
            0..=11 => TimeSlot::Morning,
            12..=16 => TimeSlot::Afternoon,
            _ => TimeSlot::Evening,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSlot::Morning => "morning",
            TimeSlot::Afternoon => "afternoon",
            TimeSlot::Evening => "evening",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotStatus {
    Proposed,
    Confirmed,
}

/// One proposed (date, time-of-day) option on a request. `order` is the
/// slot's stable identity within its request and survives pruning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSlot {
    pub order: u32,
    pub date: NaiveDate,
    pub time_slot: TimeSlot,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: SlotStatus,
}

impl CandidateSlot {
    pub fn new(order: u32, date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            order,
            date,
            time_slot: TimeSlot::from_start(start_time),
            start_time,
            end_time,
            status: SlotStatus::Proposed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    AwaitingGm,
    AwaitingStore,
    Confirmed,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Confirmed | RequestStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::AwaitingGm => "awaiting_gm",
            RequestStatus::AwaitingStore => "awaiting_store",
            RequestStatus::Confirmed => "confirmed",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "awaiting_gm" => Some(RequestStatus::AwaitingGm),
            "awaiting_store" => Some(RequestStatus::AwaitingStore),
            "confirmed" => Some(RequestStatus::Confirmed),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Pending,
    Available,
    AllUnavailable,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Pending => "pending",
            ResponseStatus::Available => "available",
            ResponseStatus::AllUnavailable => "all_unavailable",
        }
    }
}

/// One staff member's answer to a request. Exactly one row exists per
/// (request, staff); intake seeds them all as Pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResponse {
    pub staff_id: Ulid,
    pub status: ResponseStatus,
    /// Candidate orders the staff can work. Non-empty iff status=Available.
    pub selected_orders: Vec<u32>,
    pub notes: Option<String>,
    pub responded_at: Option<Ms>,
}

impl AvailabilityResponse {
    pub fn pending(staff_id: Ulid) -> Self {
        Self {
            staff_id,
            status: ResponseStatus::Pending,
            selected_orders: Vec::new(),
            notes: None,
            responded_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestState {
    pub id: Ulid,
    pub scenario_id: Ulid,
    /// Opaque handle into the external customer registry.
    pub customer_ref: String,
    pub participants: u32,
    pub candidate_slots: Vec<CandidateSlot>,
    /// Stores the customer asked for; empty = any store acceptable.
    pub requested_store_ids: Vec<Ulid>,
    pub confirmed_store_id: Option<Ulid>,
    pub assigned_gm_id: Option<Ulid>,
    pub status: RequestStatus,
    pub rejection_reason: Option<String>,
    /// One per eligible staff member, in intake order.
    pub responses: Vec<AvailabilityResponse>,
    pub opened_at: Ms,
    pub updated_at: Ms,
}

impl RequestState {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: Ulid,
        scenario_id: Ulid,
        customer_ref: String,
        participants: u32,
        candidate_slots: Vec<CandidateSlot>,
        requested_store_ids: Vec<Ulid>,
        eligible_staff: &[Ulid],
        opened_at: Ms,
    ) -> Self {
        Self {
            id,
            scenario_id,
            customer_ref,
            participants,
            candidate_slots,
            requested_store_ids,
            confirmed_store_id: None,
            assigned_gm_id: None,
            status: RequestStatus::AwaitingGm,
            rejection_reason: None,
            responses: eligible_staff
                .iter()
                .map(|&s| AvailabilityResponse::pending(s))
                .collect(),
            opened_at,
            updated_at: opened_at,
        }
    }

    pub fn candidate(&self, order: u32) -> Option<&CandidateSlot> {
        self.candidate_slots.iter().find(|c| c.order == order)
    }

    pub fn response(&self, staff_id: &Ulid) -> Option<&AvailabilityResponse> {
        self.responses.iter().find(|r| &r.staff_id == staff_id)
    }

    pub fn response_mut(&mut self, staff_id: &Ulid) -> Option<&mut AvailabilityResponse> {
        self.responses.iter_mut().find(|r| &r.staff_id == staff_id)
    }

    /// The staff whose Available response claimed this request, if any.
    pub fn claimed_by(&self) -> Option<Ulid> {
        self.responses
            .iter()
            .find(|r| r.status == ResponseStatus::Available)
            .map(|r| r.staff_id)
    }

    /// Drop every candidate whose order is not in `keep`, preserving order.
    pub fn prune_candidates(&mut self, keep: &[u32]) {
        self.candidate_slots.retain(|c| keep.contains(&c.order));
    }
}

/// One ordinary (non-private) occupancy entry from the external
/// scheduling collaborator. Occupies its store slot and every listed GM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub id: Ulid,
    pub store_id: Ulid,
    pub date: NaiveDate,
    pub time_slot: TimeSlot,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub gm_ids: Vec<Ulid>,
    pub label: Option<String>,
}

/// Who holds an occupancy key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Occupant {
    /// A confirmed private booking request.
    Request(Ulid),
    /// An ordinary schedule event.
    Schedule(Ulid),
}

impl Occupant {
    pub fn id(&self) -> Ulid {
        match self {
            Occupant::Request(id) | Occupant::Schedule(id) => *id,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Occupant::Request(_) => "private",
            Occupant::Schedule(_) => "scheduled",
        }
    }
}

/// The event types — flat, no nesting beyond slot lists. This is the WAL
/// record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RequestOpened {
        id: Ulid,
        scenario_id: Ulid,
        customer_ref: String,
        participants: u32,
        candidate_slots: Vec<CandidateSlot>,
        requested_store_ids: Vec<Ulid>,
        eligible_staff: Vec<Ulid>,
        opened_at: Ms,
    },
    AvailabilitySubmitted {
        request_id: Ulid,
        staff_id: Ulid,
        available: bool,
        selected_orders: Vec<u32>,
        notes: Option<String>,
        responded_at: Ms,
    },
    RequestConfirmed {
        request_id: Ulid,
        candidate_order: u32,
        store_id: Ulid,
        gm_id: Ulid,
        confirmed_at: Ms,
    },
    RequestRejected {
        request_id: Ulid,
        reason: String,
        rejected_at: Ms,
    },
    ScheduleEventRecorded {
        id: Ulid,
        store_id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        gm_ids: Vec<Ulid>,
        label: Option<String>,
    },
    ScheduleEventWithdrawn {
        id: Ulid,
    },
}

impl Event {
    /// The booking request an event belongs to, for notification routing.
    /// Schedule-feed events are not request-scoped.
    pub fn request_id(&self) -> Option<Ulid> {
        match self {
            Event::RequestOpened { id, .. } => Some(*id),
            Event::AvailabilitySubmitted { request_id, .. }
            | Event::RequestConfirmed { request_id, .. }
            | Event::RequestRejected { request_id, .. } => Some(*request_id),
            Event::ScheduleEventRecorded { .. } | Event::ScheduleEventWithdrawn { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub id: Ulid,
    pub scenario_id: Ulid,
    pub customer_ref: String,
    pub participants: u32,
    pub status: RequestStatus,
    pub candidate_slots: Vec<CandidateSlot>,
    pub requested_store_ids: Vec<Ulid>,
    pub confirmed_store_id: Option<Ulid>,
    pub assigned_gm_id: Option<Ulid>,
    pub rejection_reason: Option<String>,
    pub opened_at: Ms,
    pub updated_at: Ms,
}

impl RequestInfo {
    pub fn from_state(rs: &RequestState) -> Self {
        Self {
            id: rs.id,
            scenario_id: rs.scenario_id,
            customer_ref: rs.customer_ref.clone(),
            participants: rs.participants,
            status: rs.status,
            candidate_slots: rs.candidate_slots.clone(),
            requested_store_ids: rs.requested_store_ids.clone(),
            confirmed_store_id: rs.confirmed_store_id,
            assigned_gm_id: rs.assigned_gm_id,
            rejection_reason: rs.rejection_reason.clone(),
            opened_at: rs.opened_at,
            updated_at: rs.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    pub request_id: Ulid,
    pub staff_id: Ulid,
    pub status: ResponseStatus,
    pub selected_orders: Vec<u32>,
    pub notes: Option<String>,
    pub responded_at: Option<Ms>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupancyKind {
    Store,
    Gm,
}

impl OccupancyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OccupancyKind::Store => "store",
            OccupancyKind::Gm => "gm",
        }
    }
}

/// One committed conflict key, for display and conflict checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyInfo {
    pub kind: OccupancyKind,
    pub owner_id: Ulid,
    pub date: NaiveDate,
    pub time_slot: TimeSlot,
    pub occupant: Occupant,
}
