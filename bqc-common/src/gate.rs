//! Selection gate: which scanned items go on to correction

use crate::config::GateConfig;
use crate::ledger::LedgerSnapshot;
use crate::model::{CandidateItem, ItemKey, Rating};
use std::collections::HashSet;
use std::fmt;
use tracing::{info, warn};

/// Why an item was kept out of the correction pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Rated with a category that is not approved
    Rated(Rating),
    /// No initial-phase record
    Unrated,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::Rated(rating) => f.write_str(rating.as_str()),
            ExclusionReason::Unrated => f.write_str("unrated"),
        }
    }
}

/// Gate output, both lists in scan order
#[derive(Debug, Clone, Default)]
pub struct GateDecision {
    pub approved: Vec<CandidateItem>,
    pub excluded: Vec<(CandidateItem, ExclusionReason)>,
}

impl GateDecision {
    pub fn exclusion_for(&self, key: &ItemKey) -> Option<ExclusionReason> {
        self.excluded
            .iter()
            .find(|(item, _)| &item.key == key)
            .map(|(_, reason)| *reason)
    }
}

/// Approval policy over an initial-phase ledger snapshot
#[derive(Debug, Clone)]
pub struct SelectionGate {
    approved: Vec<Rating>,
    include_unrated: bool,
}

impl Default for SelectionGate {
    fn default() -> Self {
        Self {
            approved: vec![Rating::Pass],
            include_unrated: false,
        }
    }
}

impl SelectionGate {
    pub fn new(approved: Vec<Rating>, include_unrated: bool) -> Self {
        Self {
            approved,
            include_unrated,
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(config.approved.clone(), config.include_unrated)
    }

    /// Split `items` into approved and excluded
    ///
    /// Pure function of the inputs. Ledger records for keys absent from
    /// `items` are reported and otherwise ignored.
    pub fn select(&self, items: &[CandidateItem], snapshot: &LedgerSnapshot) -> GateDecision {
        let mut decision = GateDecision::default();
        for item in items {
            match snapshot.get(&item.key) {
                Some(record) if self.approved.contains(&record.rating) => {
                    decision.approved.push(item.clone())
                }
                Some(record) => decision
                    .excluded
                    .push((item.clone(), ExclusionReason::Rated(record.rating))),
                None if self.include_unrated => decision.approved.push(item.clone()),
                None => decision
                    .excluded
                    .push((item.clone(), ExclusionReason::Unrated)),
            }
        }

        let scanned: HashSet<&ItemKey> = items.iter().map(|i| &i.key).collect();
        for key in snapshot.keys().filter(|k| !scanned.contains(k)) {
            warn!("Ledger record for {} has no matching scan; ignoring", key);
        }

        info!(
            "Selection gate: {} approved, {} excluded",
            decision.approved.len(),
            decision.excluded.len()
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Phase, ReviewRecord, Stage};
    use std::path::PathBuf;

    fn item(n: u32) -> CandidateItem {
        CandidateItem {
            key: ItemKey {
                subject: format!("sub-{}", n),
                session: None,
                modality: "T1w".into(),
                scan: format!("sub-{n}/anat/sub-{n}_T1w.nii.gz"),
            },
            source: PathBuf::from(format!("/bids/sub-{n}/anat/sub-{n}_T1w.nii.gz")),
            stage: Stage::Raw,
        }
    }

    fn rate(snapshot: &mut LedgerSnapshot, item: &CandidateItem, rating: Rating) {
        snapshot.insert(
            item.key.clone(),
            ReviewRecord {
                key: item.key.clone(),
                phase: Phase::Initial,
                rating,
                annotation: String::new(),
                reviewed_at: crate::time::now(),
            },
        );
    }

    #[test]
    fn test_unrated_excluded_by_default() {
        let items = vec![item(1), item(2), item(3)];
        let mut snap = LedgerSnapshot::new();
        rate(&mut snap, &items[0], Rating::Pass);
        rate(&mut snap, &items[1], Rating::Fail);

        let decision = SelectionGate::default().select(&items, &snap);
        assert_eq!(decision.approved, vec![items[0].clone()]);
        assert_eq!(
            decision.exclusion_for(&items[1].key),
            Some(ExclusionReason::Rated(Rating::Fail))
        );
        assert_eq!(decision.exclusion_for(&items[2].key), Some(ExclusionReason::Unrated));
        assert_eq!(ExclusionReason::Unrated.to_string(), "unrated");
        assert_eq!(ExclusionReason::Rated(Rating::Fail).to_string(), "fail");
    }

    #[test]
    fn test_custom_policy() {
        let items = vec![item(1), item(2)];
        let mut snap = LedgerSnapshot::new();
        rate(&mut snap, &items[0], Rating::Uncertain);

        let gate = SelectionGate::new(vec![Rating::Pass, Rating::Uncertain], true);
        let decision = gate.select(&items, &snap);
        assert_eq!(decision.approved.len(), 2);
        assert!(decision.excluded.is_empty());
    }

    #[test]
    fn test_orphan_records_ignored() {
        let items = vec![item(1)];
        let mut snap = LedgerSnapshot::new();
        rate(&mut snap, &item(9), Rating::Pass);
        let decision = SelectionGate::default().select(&items, &snap);
        assert!(decision.approved.is_empty());
        assert_eq!(decision.excluded.len(), 1);
    }
}
