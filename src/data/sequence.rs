// ============================================================
// Layer 4 — Sequence Builder
// ============================================================
// Turns one patient's visit history into a flat token sequence:
//
//   visit 1 codes ... [SEP] visit 2 codes ... [SEP] visit 3 ...
//
// Placement policy: the separator appears strictly BETWEEN
// consecutive visits — never before the first visit, never after
// the last, never inside a visit. N visits produce exactly N-1
// separators. Any [CLS]/trailing-[SEP] framing is added later by
// the tokenizer's post-processor.
//
// Shuffling: when enabled, the codes of each visit are permuted
// uniformly at random (Fisher-Yates) on a copy; visit order is
// never permuted. The RNG is caller-supplied so the same seed
// reproduces the same sequence.
//
// Truncation: none here. Sequences longer than the model's
// maximum are tail-dropped by the tokenizer's truncation params
// (see PatientSequenceDataset).

use rand::seq::SliceRandom;
use rand::Rng;

use crate::domain::patient::Visit;

/// Builds token sequences from visit histories.
#[derive(Debug, Clone)]
pub struct SequenceBuilder {
    /// Separator token inserted between consecutive visits
    separator: String,

    /// Permute codes within each visit on every build
    shuffle_in_visit: bool,
}

impl SequenceBuilder {
    pub fn new(separator: impl Into<String>, shuffle_in_visit: bool) -> Self {
        Self {
            separator: separator.into(),
            shuffle_in_visit,
        }
    }

    pub fn shuffles(&self) -> bool {
        self.shuffle_in_visit
    }

    /// Build the token sequence for one patient.
    ///
    /// With `shuffle_in_visit` off this is a pure function of
    /// `visits`; with it on, a function of (`visits`, RNG state).
    pub fn build<R: Rng + ?Sized>(&self, visits: &[Visit], rng: &mut R) -> Vec<String> {
        // Worst case: all codes plus one separator per gap.
        let code_count: usize = visits.iter().map(|v| v.len()).sum();
        let mut tokens = Vec::with_capacity(code_count + visits.len().saturating_sub(1));

        for (i, visit) in visits.iter().enumerate() {
            if i > 0 {
                tokens.push(self.separator.clone());
            }
            if self.shuffle_in_visit {
                let mut codes = visit.clone();
                codes.shuffle(rng);
                tokens.extend(codes);
            } else {
                tokens.extend(visit.iter().cloned());
            }
        }

        tokens
    }

    /// The sequence joined with single spaces, ready for the
    /// tokenizer's whitespace pre-tokenizer.
    pub fn build_text<R: Rng + ?Sized>(&self, visits: &[Visit], rng: &mut R) -> String {
        self.build(visits, rng).join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    const SEP: &str = "[SEP]";

    fn visits(spec: &[&[&str]]) -> Vec<Visit> {
        spec.iter()
            .map(|v| v.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn sep_count(tokens: &[String]) -> usize {
        tokens.iter().filter(|t| t.as_str() == SEP).count()
    }

    #[test]
    fn test_single_visit_has_no_separator() {
        let builder = SequenceBuilder::new(SEP, false);
        let mut rng = StdRng::seed_from_u64(0);
        let tokens = builder.build(&visits(&[&["A01", "B02"]]), &mut rng);
        assert_eq!(tokens, vec!["A01", "B02"]);
        assert_eq!(sep_count(&tokens), 0);
    }

    #[test]
    fn test_n_visits_have_n_minus_one_separators() {
        let builder = SequenceBuilder::new(SEP, false);
        let mut rng = StdRng::seed_from_u64(0);
        let history = visits(&[&["A01"], &["B02", "C03"], &["D04"], &["E05"]]);
        let tokens = builder.build(&history, &mut rng);

        assert_eq!(sep_count(&tokens), 3);
        // Strictly between visits: no leading or trailing separator.
        assert_ne!(tokens.first().map(String::as_str), Some(SEP));
        assert_ne!(tokens.last().map(String::as_str), Some(SEP));
        assert_eq!(
            tokens,
            vec!["A01", SEP, "B02", "C03", SEP, "D04", SEP, "E05"]
        );
    }

    #[test]
    fn test_no_shuffle_is_deterministic() {
        let builder = SequenceBuilder::new(SEP, false);
        let history = visits(&[&["A01", "B02", "C03"], &["D04", "E05"]]);
        let mut rng_a = StdRng::seed_from_u64(1);
        let mut rng_b = StdRng::seed_from_u64(2);
        // Different RNG states must not matter when shuffling is off.
        assert_eq!(
            builder.build(&history, &mut rng_a),
            builder.build(&history, &mut rng_b)
        );
    }

    #[test]
    fn test_shuffle_reproducible_with_same_seed() {
        let builder = SequenceBuilder::new(SEP, true);
        let history = visits(&[&["A01", "B02", "C03", "D04"], &["E05", "F06"]]);
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        assert_eq!(
            builder.build(&history, &mut rng_a),
            builder.build(&history, &mut rng_b)
        );
    }

    #[test]
    fn test_shuffle_preserves_per_visit_multiset() {
        let builder = SequenceBuilder::new(SEP, true);
        let history = visits(&[&["A01", "B02", "C03"], &["D04", "E05", "F06"]]);
        let mut rng = StdRng::seed_from_u64(7);
        let tokens = builder.build(&history, &mut rng);

        // Split back on the separator and compare visit contents
        // as sets: only the intra-visit order may change.
        let parts: Vec<Vec<&String>> = tokens
            .split(|t| t.as_str() == SEP)
            .map(|chunk| chunk.iter().collect())
            .collect();
        assert_eq!(parts.len(), history.len());
        for (part, visit) in parts.iter().zip(&history) {
            let got: HashSet<&str> = part.iter().map(|s| s.as_str()).collect();
            let want: HashSet<&str> = visit.iter().map(|s| s.as_str()).collect();
            assert_eq!(got, want);
            assert_eq!(part.len(), visit.len());
        }
    }

    #[test]
    fn test_empty_history_builds_empty_sequence() {
        let builder = SequenceBuilder::new(SEP, true);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(builder.build(&[], &mut rng).is_empty());
    }

    #[test]
    fn test_build_text_joins_with_spaces() {
        let builder = SequenceBuilder::new(SEP, false);
        let mut rng = StdRng::seed_from_u64(0);
        let text = builder.build_text(&visits(&[&["A01"], &["B02"]]), &mut rng);
        assert_eq!(text, "A01 [SEP] B02");
    }
}
