//! Pattern catalogue: the metadata side of an index snapshot.
//!
//! The catalogue holds every [`Pattern`] of a snapshot in row order plus a
//! reverse lookup from pattern id to row. It is built together with the
//! vector rows and bundled into the same [`crate::index::IndexSnapshot`],
//! so vectors and metadata cannot drift apart across a reload.

use std::collections::{BTreeMap, HashMap};

use crate::error::EngineError;
use crate::models::Pattern;

/// Read-only `pattern_id → Pattern` mapping for one snapshot.
#[derive(Debug, Default)]
pub struct PatternCatalogue {
    patterns: Vec<Pattern>,
    rows: HashMap<String, usize>,
}

impl PatternCatalogue {
    /// Builds a catalogue from patterns in row order.
    ///
    /// Rejects duplicate ids; the caller (the index builder) has already
    /// validated pattern structure.
    pub fn new(patterns: Vec<Pattern>) -> Result<Self, EngineError> {
        let mut rows = HashMap::with_capacity(patterns.len());
        for (row, pattern) in patterns.iter().enumerate() {
            if rows.insert(pattern.id.clone(), row).is_some() {
                return Err(EngineError::Load(format!(
                    "duplicate pattern id `{}`",
                    pattern.id
                )));
            }
        }
        Ok(Self { patterns, rows })
    }

    /// Hydration lookup by pattern id.
    pub fn lookup(&self, pattern_id: &str) -> Result<&Pattern, EngineError> {
        self.rows
            .get(pattern_id)
            .map(|&row| &self.patterns[row])
            .ok_or_else(|| EngineError::UnknownPattern(pattern_id.to_string()))
    }

    /// The pattern stored at a vector row.
    pub fn by_row(&self, row: usize) -> &Pattern {
        &self.patterns[row]
    }

    /// The row index of a pattern id, if present.
    pub fn row_of(&self, pattern_id: &str) -> Option<usize> {
        self.rows.get(pattern_id).copied()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter()
    }

    /// Pattern counts per domain, sorted by domain name. Patterns without
    /// a domain are grouped under `"(none)"`.
    pub fn domains(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for pattern in &self.patterns {
            let key = pattern.domain.clone().unwrap_or_else(|| "(none)".to_string());
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn pattern(id: &str, domain: Option<&str>) -> Pattern {
        Pattern {
            id: id.to_string(),
            description: format!("description of {id}"),
            domain: domain.map(str::to_string),
            area: None,
            topic: None,
            theme: None,
            focus: None,
            form: None,
            mixins: Vec::new(),
            sample_texts: vec!["sample".to_string()],
            metadata: StdHashMap::new(),
        }
    }

    #[test]
    fn lookup_finds_patterns_by_id() {
        let cat = PatternCatalogue::new(vec![
            pattern("health/meals", Some("health")),
            pattern("child_development/sleep", Some("child_development")),
        ])
        .unwrap();
        assert_eq!(cat.len(), 2);
        assert_eq!(cat.lookup("health/meals").unwrap().id, "health/meals");
        assert_eq!(cat.row_of("child_development/sleep"), Some(1));
    }

    #[test]
    fn unknown_id_is_an_error() {
        let cat = PatternCatalogue::new(vec![pattern("health/meals", None)]).unwrap();
        assert!(matches!(
            cat.lookup("health/naps"),
            Err(EngineError::UnknownPattern(_))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = PatternCatalogue::new(vec![
            pattern("health/meals", None),
            pattern("health/meals", None),
        ]);
        assert!(matches!(result, Err(EngineError::Load(_))));
    }

    #[test]
    fn domain_counts_group_missing_domains() {
        let cat = PatternCatalogue::new(vec![
            pattern("health/meals", Some("health")),
            pattern("health/sleep", Some("health")),
            pattern("misc/note", None),
        ])
        .unwrap();
        let domains = cat.domains();
        assert_eq!(domains.get("health"), Some(&2));
        assert_eq!(domains.get("(none)"), Some(&1));
    }
}
