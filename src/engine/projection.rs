use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

/// (owner, date, slot) — the conflict key for both stores and staff.
pub type SlotKey = (Ulid, NaiveDate, TimeSlot);

/// The schedule projection: every conflict key committed so far, with its
/// occupant. Confirmed booking requests and ordinary schedule events feed
/// it; AwaitingGm/AwaitingStore requests never do.
#[derive(Default)]
pub struct OccupancyIndex {
    store: HashMap<SlotKey, Occupant>,
    staff: HashMap<SlotKey, Occupant>,
    /// Live ordinary events, kept whole so withdrawal can free their keys.
    events: HashMap<Ulid, ScheduleEvent>,
}

impl OccupancyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_occupant(&self, store_id: Ulid, date: NaiveDate, slot: TimeSlot) -> Option<Occupant> {
        self.store.get(&(store_id, date, slot)).copied()
    }

    pub fn staff_occupant(&self, staff_id: Ulid, date: NaiveDate, slot: TimeSlot) -> Option<Occupant> {
        self.staff.get(&(staff_id, date, slot)).copied()
    }

    /// Register a confirmed request's two tuples. Caller has already
    /// checked both keys are free.
    pub fn claim_request(
        &mut self,
        request_id: Ulid,
        store_id: Ulid,
        gm_id: Ulid,
        date: NaiveDate,
        slot: TimeSlot,
    ) {
        let occupant = Occupant::Request(request_id);
        self.store.insert((store_id, date, slot), occupant);
        self.staff.insert((gm_id, date, slot), occupant);
    }

    /// Register an ordinary schedule event: one store tuple plus one per GM.
    pub fn record_event(&mut self, event: ScheduleEvent) {
        let occupant = Occupant::Schedule(event.id);
        self.store
            .insert((event.store_id, event.date, event.time_slot), occupant);
        for gm in &event.gm_ids {
            self.staff.insert((*gm, event.date, event.time_slot), occupant);
        }
        self.events.insert(event.id, event);
    }

    /// Remove a schedule event and free its keys. Only keys still held by
    /// this event are removed.
    pub fn withdraw_event(&mut self, id: &Ulid) -> Option<ScheduleEvent> {
        let event = self.events.remove(id)?;
        let occupant = Occupant::Schedule(event.id);
        let store_key = (event.store_id, event.date, event.time_slot);
        if self.store.get(&store_key) == Some(&occupant) {
            self.store.remove(&store_key);
        }
        for gm in &event.gm_ids {
            let key = (*gm, event.date, event.time_slot);
            if self.staff.get(&key) == Some(&occupant) {
                self.staff.remove(&key);
            }
        }
        Some(event)
    }

    pub fn contains_event(&self, id: &Ulid) -> bool {
        self.events.contains_key(id)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn live_events(&self) -> impl Iterator<Item = &ScheduleEvent> {
        self.events.values()
    }

    /// All committed keys in `[from, to]`, sorted for stable display.
    pub fn snapshot(&self, from: NaiveDate, to: NaiveDate) -> Vec<OccupancyInfo> {
        let mut out = Vec::new();
        for (&(owner_id, date, time_slot), &occupant) in &self.store {
            if date >= from && date <= to {
                out.push(OccupancyInfo {
                    kind: OccupancyKind::Store,
                    owner_id,
                    date,
                    time_slot,
                    occupant,
                });
            }
        }
        for (&(owner_id, date, time_slot), &occupant) in &self.staff {
            if date >= from && date <= to {
                out.push(OccupancyInfo {
                    kind: OccupancyKind::Gm,
                    owner_id,
                    date,
                    time_slot,
                    occupant,
                });
            }
        }
        out.sort_by(|a, b| {
            (a.date, a.time_slot, a.kind.as_str(), a.owner_id)
                .cmp(&(b.date, b.time_slot, b.kind.as_str(), b.owner_id))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn event(store: Ulid, gms: Vec<Ulid>, date: &str, start_h: u32) -> ScheduleEvent {
        ScheduleEvent {
            id: Ulid::new(),
            store_id: store,
            date: d(date),
            time_slot: TimeSlot::from_start(t(start_h)),
            start_time: t(start_h),
            end_time: t(start_h + 3),
            gm_ids: gms,
            label: None,
        }
    }

    #[test]
    fn claim_request_occupies_both_keys() {
        let mut idx = OccupancyIndex::new();
        let (rid, store, gm) = (Ulid::new(), Ulid::new(), Ulid::new());
        idx.claim_request(rid, store, gm, d("2024-01-07"), TimeSlot::Evening);

        assert_eq!(
            idx.store_occupant(store, d("2024-01-07"), TimeSlot::Evening),
            Some(Occupant::Request(rid))
        );
        assert_eq!(
            idx.staff_occupant(gm, d("2024-01-07"), TimeSlot::Evening),
            Some(Occupant::Request(rid))
        );
        // Other slots on the same day stay free
        assert_eq!(idx.store_occupant(store, d("2024-01-07"), TimeSlot::Morning), None);
    }

    #[test]
    fn record_event_occupies_every_gm() {
        let mut idx = OccupancyIndex::new();
        let store = Ulid::new();
        let gms = vec![Ulid::new(), Ulid::new()];
        let ev = event(store, gms.clone(), "2024-03-01", 19);
        let eid = ev.id;
        idx.record_event(ev);

        assert_eq!(
            idx.store_occupant(store, d("2024-03-01"), TimeSlot::Evening),
            Some(Occupant::Schedule(eid))
        );
        for gm in &gms {
            assert_eq!(
                idx.staff_occupant(*gm, d("2024-03-01"), TimeSlot::Evening),
                Some(Occupant::Schedule(eid))
            );
        }
    }

    #[test]
    fn withdraw_event_frees_keys() {
        let mut idx = OccupancyIndex::new();
        let store = Ulid::new();
        let gm = Ulid::new();
        let ev = event(store, vec![gm], "2024-03-01", 10);
        let eid = ev.id;
        idx.record_event(ev);

        let removed = idx.withdraw_event(&eid).unwrap();
        assert_eq!(removed.id, eid);
        assert_eq!(idx.store_occupant(store, d("2024-03-01"), TimeSlot::Morning), None);
        assert_eq!(idx.staff_occupant(gm, d("2024-03-01"), TimeSlot::Morning), None);
        assert!(idx.withdraw_event(&eid).is_none());
    }

    #[test]
    fn snapshot_filters_and_sorts() {
        let mut idx = OccupancyIndex::new();
        let store = Ulid::new();
        let gm = Ulid::new();
        idx.claim_request(Ulid::new(), store, gm, d("2024-01-10"), TimeSlot::Evening);
        idx.claim_request(Ulid::new(), store, gm, d("2024-02-10"), TimeSlot::Morning);

        let jan = idx.snapshot(d("2024-01-01"), d("2024-01-31"));
        assert_eq!(jan.len(), 2); // one store + one gm tuple
        assert!(jan.iter().all(|o| o.date == d("2024-01-10")));

        let all = idx.snapshot(d("2024-01-01"), d("2024-12-31"));
        assert_eq!(all.len(), 4);
        assert!(all[0].date <= all[3].date);
    }
}
