use std::collections::HashMap;

use tracing::debug;

/// One target the reconciliation expects a file for.
#[derive(Debug, Clone)]
pub struct ExpectedTarget {
    pub target_id: String,
    /// The exact filename the download phase aimed for.
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct UnmatchedTarget {
    pub target_id: String,
    /// Every discovered name, for diagnostics.
    pub discovered: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// target id -> discovered filename.
    pub matched: HashMap<String, String>,
    pub unmatched: Vec<UnmatchedTarget>,
}

/// Match each expected target against the discovered files.
///
/// Only names carrying the session prefix are ever considered, so files
/// left behind by earlier batches in the same folder can never satisfy a
/// target. Zero-length content is treated as absent. Precedence per
/// target: exact expected filename, then any candidate containing the
/// target id as a substring.
pub fn match_files(
    session_id: &str,
    expected: &[ExpectedTarget],
    discovered: &HashMap<String, Vec<u8>>,
) -> Reconciliation {
    let mut candidates: Vec<&str> = discovered
        .iter()
        .filter(|(name, content)| {
            if !name.starts_with(session_id) {
                return false;
            }
            if content.is_empty() {
                debug!("{} is empty (0 bytes), excluded from matching", name);
                return false;
            }
            true
        })
        .map(|(name, _)| name.as_str())
        .collect();
    candidates.sort_unstable();

    let mut all_names: Vec<String> = discovered.keys().cloned().collect();
    all_names.sort_unstable();

    let mut outcome = Reconciliation::default();
    for target in expected {
        let exact = candidates.iter().find(|name| **name == target.filename);
        let fallback = || {
            candidates
                .iter()
                .find(|name| name.contains(target.target_id.as_str()))
        };
        match exact.or_else(fallback) {
            Some(name) => {
                outcome
                    .matched
                    .insert(target.target_id.clone(), (*name).to_string());
            }
            None => outcome.unmatched.push(UnmatchedTarget {
                target_id: target.target_id.clone(),
                discovered: all_names.clone(),
            }),
        }
    }
    outcome
}
