use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{Occupant, RequestStatus, TimeSlot};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Malformed or missing input.
    Validation(&'static str),
    /// Operation invalid for the request's current status.
    State {
        id: Ulid,
        status: RequestStatus,
    },
    /// Another staff member's Available response already claimed the request.
    AlreadyClaimed {
        id: Ulid,
        claimed_by: Ulid,
    },
    /// The store already has a committed performance in that slot.
    StoreDoubleBooked {
        store_id: Ulid,
        date: NaiveDate,
        time_slot: TimeSlot,
        held_by: Occupant,
    },
    /// The GM is already committed elsewhere in that slot.
    GmDoubleBooked {
        gm_id: Ulid,
        date: NaiveDate,
        time_slot: TimeSlot,
        held_by: Occupant,
    },
    LimitExceeded(&'static str),
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::State { id, status } => {
                write!(f, "request {id} is {}: operation not allowed", status.as_str())
            }
            EngineError::AlreadyClaimed { id, claimed_by } => {
                write!(f, "request {id} already claimed by staff {claimed_by}")
            }
            EngineError::StoreDoubleBooked {
                store_id,
                date,
                time_slot,
                held_by,
            } => write!(
                f,
                "store {store_id} double-booked on {date} {}: held by {} {}",
                time_slot.as_str(),
                held_by.kind_str(),
                held_by.id()
            ),
            EngineError::GmDoubleBooked {
                gm_id,
                date,
                time_slot,
                held_by,
            } => write!(
                f,
                "gm {gm_id} double-booked on {date} {}: held by {} {}",
                time_slot.as_str(),
                held_by.kind_str(),
                held_by.id()
            ),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
