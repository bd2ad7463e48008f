//! Client-side reshaping of aggregate view rows into chart-ready pivot tables.
//!
//! Each aggregate view yields flat `(category, label, count)` rows. Charts want
//! one row per category with one column per option label, so [`pivot`] folds the
//! flat rows in first-seen order. The transform is pure: the same input always
//! serializes to the same bytes.
use std::collections::{BTreeMap, HashMap};

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::models::AggregateRow;

/// Grouping dimension, also the key of the category field in a pivot row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    State,
    AgeRange,
    Gender,
}

impl Dimension {
    pub fn key(&self) -> &'static str {
        match self {
            Dimension::State => "state",
            Dimension::AgeRange => "age_range",
            Dimension::Gender => "gender",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotRow {
    pub dimension: Dimension,
    pub category: String,
    /// `(option label, count)` in first-seen order.
    pub counts: Vec<(String, i64)>,
}

impl PivotRow {
    pub fn count(&self, label: &str) -> Option<i64> {
        self.counts
            .iter()
            .find(|(existing, _)| existing == label)
            .map(|(_, count)| *count)
    }

    pub fn total(&self) -> i64 {
        self.counts.iter().map(|(_, count)| count).sum()
    }

    fn set(&mut self, label: &str, count: i64) {
        match self.counts.iter_mut().find(|(existing, _)| existing == label) {
            Some(entry) => entry.1 = count,
            None => self.counts.push((label.to_string(), count)),
        }
    }
}

impl Serialize for PivotRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.counts.len() + 1))?;
        map.serialize_entry(self.dimension.key(), &self.category)?;
        for (label, count) in &self.counts {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }
}

/// One pivot row per distinct category, in order of first occurrence.
///
/// Categories are grouped by exact equality, `"Texas"` and `"texas"` stay apart.
/// A repeated `(category, label)` pair overwrites the earlier count.
pub fn pivot(dimension: Dimension, rows: &[AggregateRow]) -> Vec<PivotRow> {
    let mut pivoted: Vec<PivotRow> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for row in rows {
        let position = *index.entry(row.category.as_str()).or_insert_with(|| {
            pivoted.push(PivotRow {
                dimension,
                category: row.category.clone(),
                counts: Vec::new(),
            });
            pivoted.len() - 1
        });

        pivoted[position].set(&row.label, row.vote_count);
    }

    pivoted
}

/// Frequency count of votes per option id.
pub fn tally(option_ids: &[i64]) -> BTreeMap<i64, u64> {
    let mut counts = BTreeMap::new();
    for option_id in option_ids {
        *counts.entry(*option_id).or_insert(0) += 1;
    }
    counts
}
