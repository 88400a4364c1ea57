// ============================================================
// Layer 3 — Patient Domain Types
// ============================================================
// The diagnosis table is the single source of truth for patient
// histories: one entry per patient, each an ordered list of
// visits, each visit an ordered list of diagnosis-code strings.
//
// Immutable once loaded. Downstream components hold it behind
// an Arc and only ever read from it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A patient identifier as it appears in the split files.
pub type PatientId = u64;

/// One hospital visit: the diagnosis codes recorded during it,
/// in recording order.
pub type Visit = Vec<String>;

/// The full diagnosis table artifact.
///
/// `resolution` tags which coarseness of the code vocabulary this
/// table was built at (e.g. full codes vs. 3-character categories)
/// and must match the tokenizer selected for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisTable {
    /// Code-resolution tag embedded in the artifact
    pub resolution: String,

    /// Patient id → visits in temporal order
    pub patients: HashMap<PatientId, Vec<Visit>>,
}

impl DiagnosisTable {
    /// Visits for one patient, or None if the id is unknown.
    pub fn visits(&self, id: PatientId) -> Option<&[Visit]> {
        self.patients.get(&id).map(|v| v.as_slice())
    }

    pub fn contains(&self, id: PatientId) -> bool {
        self.patients.contains_key(&id)
    }

    pub fn patient_count(&self) -> usize {
        self.patients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_and_unknown() {
        let mut patients = HashMap::new();
        patients.insert(7u64, vec![vec!["A01".to_string()]]);
        let table = DiagnosisTable { resolution: "code".into(), patients };

        assert!(table.contains(7));
        assert_eq!(table.visits(7).unwrap().len(), 1);
        assert!(table.visits(8).is_none());
    }
}
