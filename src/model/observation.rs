use serde::{Deserialize, Serialize};

use super::{Manifest, Part};

/// An observed part paired with the manifest slot it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotMatch {
    pub observed: Part,
    pub slot: usize,
}

/// Classified difference between a manifest and what the sensors see.
///
/// `satisfied`, `misplaced` and `orphaned` partition the observed parts;
/// `satisfied`, `misplaced` and `missing` partition the manifest slots. The
/// defective part, if any, is reported on the side and also appears in one of
/// the sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default)]
    pub satisfied: Vec<SlotMatch>,
    #[serde(default)]
    pub misplaced: Vec<SlotMatch>,
    #[serde(default)]
    pub missing: Vec<usize>,
    #[serde(default)]
    pub orphaned: Vec<Part>,
    #[serde(default)]
    pub defective: Option<Part>,
}

/// Misplaced entry: the observed part and the slot it should occupy.
pub type Misplaced = SlotMatch;

impl Observation {
    /// Nothing left to correct.
    pub fn is_converged(&self) -> bool {
        self.defective.is_none()
            && self.orphaned.is_empty()
            && self.misplaced.is_empty()
            && self.missing.is_empty()
    }

    pub fn summary(&self) -> ObservationSummary {
        ObservationSummary {
            satisfied: self.satisfied.len(),
            misplaced: self.misplaced.len(),
            missing: self.missing.len(),
            orphaned: self.orphaned.len(),
            defective: self.defective.is_some(),
        }
    }

    /// Check the partition invariants against the manifest the observation
    /// was computed for. Returns one message per violation.
    pub fn check_partition(&self, manifest: &Manifest, observed_count: usize) -> Vec<String> {
        let mut violations = Vec::new();

        let classified = self.satisfied.len() + self.misplaced.len() + self.orphaned.len();
        if classified != observed_count {
            violations.push(format!(
                "{} observed parts but {} classified",
                observed_count, classified
            ));
        }

        let mut seen = vec![0usize; manifest.len()];
        let slot_refs = self
            .satisfied
            .iter()
            .map(|m| m.slot)
            .chain(self.misplaced.iter().map(|m| m.slot))
            .chain(self.missing.iter().copied());
        for slot in slot_refs {
            match seen.get_mut(slot) {
                Some(count) => *count += 1,
                None => violations.push(format!("slot {} is out of range", slot)),
            }
        }
        for (slot, count) in seen.iter().enumerate() {
            if *count != 1 {
                violations.push(format!("slot {} classified {} times", slot, count));
            }
        }

        for entry in self.satisfied.iter().chain(self.misplaced.iter()) {
            if let Some(wanted) = manifest.slot(entry.slot)
                && wanted.part_type != entry.observed.part_type
            {
                violations.push(format!(
                    "{} matched to slot {} which wants {}",
                    entry.observed.part_type, entry.slot, wanted.part_type
                ));
            }
        }

        violations
    }
}

/// Set sizes of an observation, for logs and audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationSummary {
    pub satisfied: usize,
    pub misplaced: usize,
    pub missing: usize,
    pub orphaned: usize,
    pub defective: bool,
}

impl std::fmt::Display for ObservationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "satisfied={} misplaced={} missing={} orphaned={} defective={}",
            self.satisfied,
            self.misplaced,
            self.missing,
            self.orphaned,
            if self.defective { "yes" } else { "no" }
        )
    }
}
