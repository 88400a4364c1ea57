// ============================================================
// Layer 4 — Artifact Loader
// ============================================================
// Loads the startup artifacts, all read exactly once:
//
//   {data_dir}/diagnoses.{resolution}.json     diagnosis table
//   {data_dir}/splits/{phase}_ids.txt          id list per phase
//
// The diagnosis table embeds its own resolution tag; a mismatch
// with the resolution selected on the command line is a fatal
// configuration error (the tokenizer and the table must describe
// the same vocabulary coarseness).

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::domain::patient::{DiagnosisTable, PatientId};
use crate::domain::split::{Phase, SplitIndex};

/// Load and validate the diagnosis table for one resolution.
pub fn load_diagnosis_table(data_dir: &Path, resolution: &str) -> Result<DiagnosisTable> {
    let path = data_dir.join(format!("diagnoses.{resolution}.json"));

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Cannot read diagnosis table '{}'", path.display()))?;

    let table: DiagnosisTable = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed diagnosis table '{}'", path.display()))?;

    if table.resolution != resolution {
        bail!(
            "diagnosis table '{}' was built at resolution '{}' but the run selected '{}'",
            path.display(),
            table.resolution,
            resolution
        );
    }

    tracing::info!(
        "Loaded diagnosis table: {} patients (resolution '{}')",
        table.patient_count(),
        table.resolution
    );
    Ok(table)
}

/// Load the three phase id lists and build a validated SplitIndex.
pub fn load_split_index(data_dir: &Path) -> Result<SplitIndex> {
    let splits_dir = data_dir.join("splits");

    let mut lists: Vec<Vec<PatientId>> = Vec::with_capacity(Phase::ALL.len());
    for phase in Phase::ALL {
        let path = splits_dir.join(format!("{}_ids.txt", phase.stem()));
        lists.push(load_id_file(&path)?);
    }

    let mut iter = lists.into_iter();
    let (train, val, test) = (
        iter.next().unwrap_or_default(),
        iter.next().unwrap_or_default(),
        iter.next().unwrap_or_default(),
    );

    tracing::info!(
        "Loaded splits: {} train, {} val, {} test ids",
        train.len(),
        val.len(),
        test.len()
    );
    SplitIndex::new(train, val, test)
}

/// Parse one id per line. Blank lines are skipped; anything else
/// that fails to parse as an id is a fatal error with the line
/// number in the message.
fn load_id_file(path: &Path) -> Result<Vec<PatientId>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Cannot read split file '{}'", path.display()))?;

    let mut ids = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let id: PatientId = line.parse().with_context(|| {
            format!(
                "Invalid patient id '{}' at {}:{}",
                line,
                path.display(),
                lineno + 1
            )
        })?;
        ids.push(id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_file_parsing() {
        let dir = std::env::temp_dir().join("icd_bert_loader_test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ids.txt");
        fs::write(&path, "101\n\n202\n303\n").unwrap();

        let ids = load_id_file(&path).unwrap();
        assert_eq!(ids, vec![101, 202, 303]);
    }

    #[test]
    fn test_id_file_rejects_garbage() {
        let dir = std::env::temp_dir().join("icd_bert_loader_test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad_ids.txt");
        fs::write(&path, "101\nnot-an-id\n").unwrap();

        let err = load_id_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("not-an-id"));
    }

    #[test]
    fn test_table_resolution_mismatch_is_fatal() {
        let dir = std::env::temp_dir().join("icd_bert_loader_test");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("diagnoses.category.json"),
            r#"{"resolution":"code","patients":{"1":[["A01"]]}}"#,
        )
        .unwrap();

        let err = load_diagnosis_table(&dir, "category").unwrap_err();
        assert!(format!("{err:#}").contains("resolution"));
    }

    #[test]
    fn test_table_roundtrip() {
        let dir = std::env::temp_dir().join("icd_bert_loader_test");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("diagnoses.code.json"),
            r#"{"resolution":"code","patients":{"1":[["A01","B02"],["C03"]]}}"#,
        )
        .unwrap();

        let table = load_diagnosis_table(&dir, "code").unwrap();
        assert_eq!(table.patient_count(), 1);
        assert_eq!(table.visits(1).unwrap().len(), 2);
    }
}
