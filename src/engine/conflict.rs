use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::projection::OccupancyIndex;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Validate an intake candidate list: non-empty, bounded, unique orders,
/// start before end on every slot.
pub(crate) fn validate_candidates(candidates: &[CandidateSlot]) -> Result<(), EngineError> {
    if candidates.is_empty() {
        return Err(EngineError::Validation("at least one candidate slot required"));
    }
    if candidates.len() > MAX_CANDIDATES_PER_REQUEST {
        return Err(EngineError::LimitExceeded("too many candidate slots"));
    }
    for (i, c) in candidates.iter().enumerate() {
        if c.start_time >= c.end_time {
            return Err(EngineError::Validation("candidate start must be before end"));
        }
        if candidates[..i].iter().any(|p| p.order == c.order) {
            return Err(EngineError::Validation("duplicate candidate order"));
        }
    }
    Ok(())
}

pub(crate) fn validate_notes(notes: Option<&str>) -> Result<(), EngineError> {
    if let Some(n) = notes
        && n.len() > MAX_NOTES_LEN {
            return Err(EngineError::LimitExceeded("notes too long"));
        }
    Ok(())
}

/// Rejection reasons must carry actual content.
pub(crate) fn validate_reason(reason: &str) -> Result<(), EngineError> {
    if reason.trim().is_empty() {
        return Err(EngineError::Validation("rejection reason required"));
    }
    if reason.len() > MAX_REASON_LEN {
        return Err(EngineError::LimitExceeded("rejection reason too long"));
    }
    Ok(())
}

/// Check A and check B for a confirmation: the store slot and the GM slot
/// must both be free. Caller holds the occupancy write lock so the checks
/// and the subsequent insert are one serializable unit.
pub(crate) fn check_slot_free(
    occ: &OccupancyIndex,
    store_id: Ulid,
    gm_id: Ulid,
    date: NaiveDate,
    slot: TimeSlot,
) -> Result<(), EngineError> {
    if let Some(held_by) = occ.store_occupant(store_id, date, slot) {
        return Err(EngineError::StoreDoubleBooked {
            store_id,
            date,
            time_slot: slot,
            held_by,
        });
    }
    if let Some(held_by) = occ.staff_occupant(gm_id, date, slot) {
        return Err(EngineError::GmDoubleBooked {
            gm_id,
            date,
            time_slot: slot,
            held_by,
        });
    }
    Ok(())
}

/// Same checks for an incoming ordinary schedule event (one store, many GMs).
pub(crate) fn check_event_free(
    occ: &OccupancyIndex,
    store_id: Ulid,
    gm_ids: &[Ulid],
    date: NaiveDate,
    slot: TimeSlot,
) -> Result<(), EngineError> {
    if let Some(held_by) = occ.store_occupant(store_id, date, slot) {
        return Err(EngineError::StoreDoubleBooked {
            store_id,
            date,
            time_slot: slot,
            held_by,
        });
    }
    for &gm_id in gm_ids {
        if let Some(held_by) = occ.staff_occupant(gm_id, date, slot) {
            return Err(EngineError::GmDoubleBooked {
                gm_id,
                date,
                time_slot: slot,
                held_by,
            });
        }
    }
    Ok(())
}
