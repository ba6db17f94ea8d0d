//! Change-set classification.
//!
//! Compares the scanner's view of the directory with the database's
//! last-known `path → checksum` map and sorts every path into new,
//! modified, deleted or moved. Pure: no IO.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::scanner::ScanResult;

/// Classification of one sync pass.
///
/// `new`, `modified`, `deleted` and the move destinations are pairwise
/// disjoint. A move source may also appear in `modified` when different
/// content now sits at the old path.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub new: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    /// old path → new path
    pub moves: BTreeMap<String, String>,
    /// Current checksum of every path that needs inserting or updating.
    #[serde(skip)]
    pub checksums: HashMap<String, String>,
}

impl SyncReport {
    pub fn total(&self) -> usize {
        self.new.len() + self.modified.len() + self.deleted.len() + self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// First unclaimed new path carrying `checksum`, in path order.
fn move_destination(scan: &ScanResult, new: &BTreeSet<String>, checksum: &str) -> Option<String> {
    scan.checksums
        .get(checksum)?
        .iter()
        .find(|path| new.contains(*path))
        .cloned()
}

pub fn build_change_set(scan: &ScanResult, db_state: &HashMap<String, Option<String>>) -> SyncReport {
    let mut report = SyncReport::default();

    for (path, checksum) in &scan.files {
        match db_state.get(path) {
            None => {
                report.new.insert(path.clone());
            }
            Some(stored) if stored.as_deref() != Some(checksum.as_str()) => {
                report.modified.insert(path.clone());
            }
            Some(_) => continue,
        }
        report.checksums.insert(path.clone(), checksum.clone());
    }

    let mut db_paths: Vec<(&String, &Option<String>)> = db_state.iter().collect();
    db_paths.sort();

    for (db_path, stored) in db_paths {
        let still_present = scan.files.contains_key(db_path);
        if still_present && !report.modified.contains(db_path) {
            continue;
        }

        let destination = stored
            .as_deref()
            .and_then(|sum| move_destination(scan, &report.new, sum));

        match destination {
            Some(dest) => {
                report.new.remove(&dest);
                report.moves.insert(db_path.clone(), dest);
            }
            None if !still_present => {
                report.deleted.insert(db_path.clone());
            }
            None => {}
        }
    }

    report
}
