//! Report claims checked against the repository.
//!
//! Runs after every fact finder has finished because it reads their
//! combined output: paths the report names are compared with the files the
//! repository investigation actually saw.

use std::collections::BTreeSet;

use tribunal_core::{normalize_location, Evidence, EvidenceMap};

use super::document::references_in;
use super::repo::MANIFEST_LOCATION;
use crate::evidence::producers::{CROSS_REFERENCE, DOCUMENT_ANALYST, REPO_INVESTIGATOR};

pub const VERIFIED_LOCATION: &str = "crossref:verified-claims";
pub const HALLUCINATED_LOCATION: &str = "crossref:hallucinated-claims";

/// Cross-check evidence, or nothing when either side is absent.
pub fn cross_reference(evidences: &EvidenceMap) -> Vec<Evidence> {
    let repo = match evidences.get(REPO_INVESTIGATOR) {
        Some(repo) if !repo.is_empty() => repo,
        _ => return Vec::new(),
    };

    let claimed: BTreeSet<String> = evidences
        .get(DOCUMENT_ANALYST)
        .into_iter()
        .flatten()
        .flat_map(references_in)
        .map(|p| normalize_location(&p))
        .collect();
    if claimed.is_empty() {
        return Vec::new();
    }

    let verified = verified_paths(repo);
    let (confirmed, hallucinated): (Vec<&String>, Vec<&String>) = claimed
        .iter()
        .partition(|claim| verified.iter().any(|path| path_matches(path, claim)));

    let join = |paths: &[&String]| paths.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ");

    vec![
        if confirmed.is_empty() {
            Evidence::missing(CROSS_REFERENCE, VERIFIED_LOCATION, "No report file claims could be verified", 0.8)
        } else {
            Evidence::found(
                CROSS_REFERENCE,
                VERIFIED_LOCATION,
                format!("Verified files: {}", join(&confirmed)),
                0.9,
            )
        },
        if hallucinated.is_empty() {
            Evidence::missing(CROSS_REFERENCE, HALLUCINATED_LOCATION, "All file references verified", 0.9)
        } else {
            Evidence::found(
                CROSS_REFERENCE,
                HALLUCINATED_LOCATION,
                format!("Hallucinated files: {}", join(&hallucinated)),
                0.95,
            )
        },
    ]
}

/// Every path the repository investigation saw: the manifest plus the
/// locations of found, path-like evidence.
pub fn verified_paths<'a>(evidence: impl IntoIterator<Item = &'a Evidence>) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    for evidence in evidence.into_iter().filter(|e| e.found) {
        if evidence.location == MANIFEST_LOCATION {
            if let Some(content) = &evidence.content {
                paths.extend(content.lines().map(normalize_location).filter(|p| !p.is_empty()));
            }
        } else if evidence.location.contains('/') || evidence.location.contains('\\') {
            paths.insert(normalize_location(&evidence.location));
        }
    }
    paths
}

/// A verified path confirms a claim when they are equal or the claim is a
/// project-relative suffix of it.
pub fn path_matches(verified: &str, claim: &str) -> bool {
    verified == claim || verified.ends_with(&format!("/{}", claim))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(manifest: &str, claims: &str) -> EvidenceMap {
        let mut map = EvidenceMap::new();
        map.insert(
            REPO_INVESTIGATOR.into(),
            vec![
                Evidence::found(REPO_INVESTIGATOR, MANIFEST_LOCATION, manifest, 1.0),
                Evidence::found(REPO_INVESTIGATOR, "/tmp/tribunal-x/repo/src/tools/git.py", "sandbox", 0.8),
            ],
        );
        map.insert(
            DOCUMENT_ANALYST.into(),
            vec![Evidence::found(
                DOCUMENT_ANALYST,
                super::super::document::FILE_REFERENCES_LOCATION,
                format!("File references: {}", claims),
                0.9,
            )],
        );
        map
    }

    #[test]
    fn test_flags_hallucinated_claims() {
        let evidences = cross_reference(&pool(
            "src/core/graph.py\nsrc/core/state.py",
            "src/core/graph.py, src/ghost.py, src/tools/git.py",
        ));
        assert_eq!(evidences.len(), 2);

        let verified = evidences.iter().find(|e| e.location == VERIFIED_LOCATION).unwrap();
        assert!(verified.found);
        assert!(verified.content.as_deref().unwrap().contains("src/core/graph.py"));
        assert!(verified.content.as_deref().unwrap().contains("src/tools/git.py"));

        let hallucinated = evidences.iter().find(|e| e.location == HALLUCINATED_LOCATION).unwrap();
        assert!(hallucinated.found);
        assert_eq!(hallucinated.content.as_deref(), Some("Hallucinated files: src/ghost.py"));
        assert!(hallucinated.producer == CROSS_REFERENCE);
    }

    #[test]
    fn test_all_claims_verified() {
        let evidences = cross_reference(&pool("src/a.py", "src/a.py"));
        let hallucinated = evidences.iter().find(|e| e.location == HALLUCINATED_LOCATION).unwrap();
        assert!(!hallucinated.found);
    }

    #[test]
    fn test_nothing_to_compare() {
        assert!(cross_reference(&EvidenceMap::new()).is_empty());

        let mut no_claims = pool("src/a.py", "x");
        no_claims.remove(DOCUMENT_ANALYST);
        assert!(cross_reference(&no_claims).is_empty());
    }
}
