//! Review queue: progress counts and the next item to rate
//!
//! Everything here is computed from the current item list and a fresh
//! ledger snapshot, so a restarted server picks up where the ledger says
//! review stopped.

use bqc_common::ledger::LedgerSnapshot;
use bqc_common::source::ReviewItem;
use bqc_common::{ItemKey, Rating};
use serde::Serialize;

/// Rating progress of one phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub rated: usize,
    pub unrated: usize,
    pub pass: usize,
    pub fail: usize,
    pub uncertain: usize,
}

/// Count ratings over the current items; ledger rows for other keys are
/// not counted
pub fn progress(items: &[ReviewItem], snapshot: &LedgerSnapshot) -> Progress {
    let mut p = Progress {
        total: items.len(),
        ..Progress::default()
    };
    for item in items {
        match snapshot.get(&item.item.key).map(|r| r.rating) {
            Some(Rating::Pass) => p.pass += 1,
            Some(Rating::Fail) => p.fail += 1,
            Some(Rating::Uncertain) => p.uncertain += 1,
            None => p.unrated += 1,
        }
    }
    p.rated = p.total - p.unrated;
    p
}

/// First unrated item in scan order
pub fn first_unrated<'a>(items: &'a [ReviewItem], snapshot: &LedgerSnapshot) -> Option<&'a ReviewItem> {
    items.iter().find(|i| !snapshot.contains_key(&i.item.key))
}

/// Next unrated item after `current`, wrapping to the start
///
/// `current` itself is only returned if it is still unrated and nothing
/// else is.
pub fn next_unrated_after<'a>(
    items: &'a [ReviewItem],
    snapshot: &LedgerSnapshot,
    current: &ItemKey,
) -> Option<&'a ReviewItem> {
    let Some(pos) = position(items, current) else {
        return first_unrated(items, snapshot);
    };
    items[pos + 1..]
        .iter()
        .chain(items[..=pos].iter())
        .find(|i| !snapshot.contains_key(&i.item.key))
}

/// Index of `key` in the item list
pub fn position(items: &[ReviewItem], key: &ItemKey) -> Option<usize> {
    items.iter().position(|i| &i.item.key == key)
}

/// Look an item up by its scan path
pub fn find_by_scan<'a>(items: &'a [ReviewItem], scan: &str) -> Option<&'a ReviewItem> {
    items.iter().find(|i| i.item.key.scan == scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bqc_common::model::{CandidateItem, Phase, ReviewRecord, Stage};
    use std::path::PathBuf;

    fn items(n: u32) -> Vec<ReviewItem> {
        (1..=n)
            .map(|i| ReviewItem {
                item: CandidateItem {
                    key: ItemKey {
                        subject: format!("sub-{}", i),
                        session: None,
                        modality: "T1w".into(),
                        scan: format!("sub-{i}/anat/sub-{i}_T1w.nii.gz"),
                    },
                    source: PathBuf::from("x"),
                    stage: Stage::Raw,
                },
                artifacts: Vec::new(),
                stats: None,
            })
            .collect()
    }

    fn rate(snap: &mut LedgerSnapshot, item: &ReviewItem, rating: Rating) {
        snap.insert(
            item.item.key.clone(),
            ReviewRecord {
                key: item.item.key.clone(),
                phase: Phase::Initial,
                rating,
                annotation: String::new(),
                reviewed_at: bqc_common::time::now(),
            },
        );
    }

    #[test]
    fn test_progress_counts() {
        let list = items(4);
        let mut snap = LedgerSnapshot::new();
        rate(&mut snap, &list[0], Rating::Pass);
        rate(&mut snap, &list[1], Rating::Fail);
        let p = progress(&list, &snap);
        assert_eq!(p.total, 4);
        assert_eq!(p.rated, 2);
        assert_eq!(p.unrated, 2);
        assert_eq!(p.pass, 1);
        assert_eq!(p.fail, 1);
    }

    #[test]
    fn test_next_skips_rated_and_wraps() {
        let list = items(4);
        let mut snap = LedgerSnapshot::new();
        rate(&mut snap, &list[2], Rating::Pass);
        rate(&mut snap, &list[3], Rating::Pass);
        rate(&mut snap, &list[1], Rating::Pass);
        // after item 2: items 3 and 4 rated, wraps to item 1
        let next = next_unrated_after(&list, &snap, &list[1].item.key).unwrap();
        assert_eq!(next.item.key.subject, "sub-1");
    }

    #[test]
    fn test_next_none_when_complete() {
        let list = items(2);
        let mut snap = LedgerSnapshot::new();
        rate(&mut snap, &list[0], Rating::Pass);
        rate(&mut snap, &list[1], Rating::Uncertain);
        assert!(next_unrated_after(&list, &snap, &list[0].item.key).is_none());
        assert!(first_unrated(&list, &snap).is_none());
    }

    #[test]
    fn test_first_unrated_resumes() {
        let list = items(3);
        let mut snap = LedgerSnapshot::new();
        rate(&mut snap, &list[0], Rating::Fail);
        assert_eq!(first_unrated(&list, &snap).unwrap().item.key.subject, "sub-2");
    }
}
