//! Force field ledger.
//!
//! Tracks which force zones currently overlap which bodies. Contact handlers
//! only edit the ledger; the simulation clock reads `net_force` once per
//! affected body per tick and applies it itself.
//!
//! Invariant: a body has an entry iff at least one zone overlaps it.

use std::collections::BTreeMap;

use ballance_shared::{math::Vec3, net::BodyId};

/// Zone bindings and per-body overlap sets.
#[derive(Debug, Default, Clone)]
pub struct ForceLedger {
    /// Zone body -> constant force magnitude.
    zones: BTreeMap<BodyId, Vec3>,
    /// Affected body -> (zone body -> magnitude).
    entries: BTreeMap<BodyId, BTreeMap<BodyId, Vec3>>,
}

impl ForceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a force zone. Bindings are immutable once made.
    pub fn bind_zone(&mut self, zone: BodyId, magnitude: Vec3) {
        self.zones.entry(zone).or_insert(magnitude);
    }

    pub fn is_zone(&self, id: BodyId) -> bool {
        self.zones.contains_key(&id)
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Records the start of an overlap. Either side may be the zone.
    pub fn on_contact_begin(&mut self, a: BodyId, b: BodyId) {
        if let Some(&magnitude) = self.zones.get(&a) {
            self.entries.entry(b).or_default().insert(a, magnitude);
        }
        if let Some(&magnitude) = self.zones.get(&b) {
            self.entries.entry(a).or_default().insert(b, magnitude);
        }
    }

    /// Records the end of an overlap. Ending an unknown pair is a no-op.
    pub fn on_contact_end(&mut self, a: BodyId, b: BodyId) {
        if self.zones.contains_key(&a) {
            self.remove(b, a);
        }
        if self.zones.contains_key(&b) {
            self.remove(a, b);
        }
    }

    fn remove(&mut self, body: BodyId, zone: BodyId) {
        if let Some(zones) = self.entries.get_mut(&body) {
            zones.remove(&zone);
            if zones.is_empty() {
                self.entries.remove(&body);
            }
        }
    }

    /// Sum of the magnitudes of every zone overlapping `body`.
    pub fn net_force(&self, body: BodyId) -> Vec3 {
        self.entries
            .get(&body)
            .map(|zones| zones.values().copied().sum())
            .unwrap_or(Vec3::ZERO)
    }

    /// Bodies with at least one overlapping zone, in ascending id order.
    pub fn affected_bodies(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.entries.keys().copied()
    }

    pub fn has_entry(&self, body: BodyId) -> bool {
        self.entries.contains_key(&body)
    }

    /// Zones currently overlapping `body`.
    pub fn zones_over(&self, body: BodyId) -> impl Iterator<Item = BodyId> + '_ {
        self.entries
            .get(&body)
            .into_iter()
            .flat_map(|zones| zones.keys().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BALL: BodyId = BodyId(1);
    const PUSH: BodyId = BodyId(10);
    const PULL: BodyId = BodyId(11);

    fn ledger() -> ForceLedger {
        let mut l = ForceLedger::new();
        l.bind_zone(PUSH, Vec3::new(1.0, 0.0, 0.0));
        l.bind_zone(PULL, Vec3::new(-1.0, 0.0, 0.0));
        l
    }

    #[test]
    fn no_entry_means_zero_force() {
        let l = ledger();
        assert_eq!(l.net_force(BALL), Vec3::ZERO);
        assert!(!l.has_entry(BALL));
    }

    #[test]
    fn opposing_zones_cancel_and_removal_leaves_remaining() {
        let mut l = ledger();
        l.on_contact_begin(BALL, PUSH);
        l.on_contact_begin(PULL, BALL);
        assert_eq!(l.net_force(BALL), Vec3::ZERO);
        assert!(l.has_entry(BALL));

        l.on_contact_end(PUSH, BALL);
        assert_eq!(l.net_force(BALL), Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(l.zones_over(BALL).collect::<Vec<_>>(), vec![PULL]);
    }

    #[test]
    fn balanced_sequences_leave_no_entry() {
        let mut l = ledger();
        let seq = [
            (true, PUSH),
            (true, PULL),
            (false, PUSH),
            (true, PUSH),
            (false, PULL),
            (false, PUSH),
        ];
        let mut open: Vec<BodyId> = Vec::new();
        for (begin, zone) in seq {
            if begin {
                l.on_contact_begin(BALL, zone);
                open.push(zone);
            } else {
                l.on_contact_end(zone, BALL);
                open.retain(|z| *z != zone);
            }
            let expected: Vec3 = open
                .iter()
                .map(|z| if *z == PUSH { Vec3::new(1.0, 0.0, 0.0) } else { Vec3::new(-1.0, 0.0, 0.0) })
                .sum();
            assert_eq!(l.net_force(BALL), expected);
        }
        assert_eq!(l.net_force(BALL), Vec3::ZERO);
        assert!(!l.has_entry(BALL));
        assert_eq!(l.affected_bodies().count(), 0);
    }

    #[test]
    fn repeated_begin_counts_once() {
        let mut l = ledger();
        l.on_contact_begin(BALL, PUSH);
        l.on_contact_begin(BALL, PUSH);
        assert_eq!(l.net_force(BALL), Vec3::new(1.0, 0.0, 0.0));
        l.on_contact_end(BALL, PUSH);
        assert!(!l.has_entry(BALL));
    }

    #[test]
    fn contacts_without_zones_are_ignored() {
        let mut l = ledger();
        l.on_contact_begin(BALL, BodyId(2));
        l.on_contact_end(BodyId(3), BodyId(4));
        assert_eq!(l.affected_bodies().count(), 0);
    }

    #[test]
    fn ending_unknown_pair_is_a_noop() {
        let mut l = ledger();
        l.on_contact_end(BALL, PUSH);
        assert!(!l.has_entry(BALL));
    }

    #[test]
    fn bindings_are_not_overwritten() {
        let mut l = ledger();
        l.bind_zone(PUSH, Vec3::new(9.0, 9.0, 9.0));
        l.on_contact_begin(BALL, PUSH);
        assert_eq!(l.net_force(BALL), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(l.zone_count(), 2);
    }
}
