use crate::classify::EntityCategory;
use crate::period::CanonicalPeriod;
use crate::reconcile::{CellState, CoverageCell};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per category, the last period any source is ever expected to report.
/// Categories without an entry are open-ended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeriesBounds {
    bounds: BTreeMap<EntityCategory, CanonicalPeriod>,
}

impl SeriesBounds {
    pub fn new(bounds: BTreeMap<EntityCategory, CanonicalPeriod>) -> Self {
        SeriesBounds { bounds }
    }

    pub fn bound(&self, category: EntityCategory) -> Option<CanonicalPeriod> {
        self.bounds.get(&category).copied()
    }
}

/// The auditor's verdict: per category, the interior periods with no
/// populated cell, plus the populated cells themselves for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapReport {
    pub missing: BTreeMap<EntityCategory, Vec<CanonicalPeriod>>,
    pub populated: Vec<CoverageCell>,
}

impl GapReport {
    pub fn has_gaps(&self) -> bool {
        self.missing.values().any(|periods| !periods.is_empty())
    }

    pub fn total_missing(&self) -> usize {
        self.missing.values().map(Vec::len).sum()
    }
}

/// Read-only verification over the produced cell set. Reports interior gaps
/// only: nothing before a category's first observed period, nothing past its
/// series bound.
#[derive(Debug, Clone)]
pub struct CoverageAuditor {
    bounds: SeriesBounds,
}

impl CoverageAuditor {
    pub fn new(bounds: SeriesBounds) -> Self {
        CoverageAuditor { bounds }
    }

    pub fn audit(&self, cells: &[CoverageCell]) -> GapReport {
        let mut populated: Vec<CoverageCell> =
            cells.iter().filter(|c| c.is_populated()).cloned().collect();
        populated.sort_by_key(|c| (c.category, c.period));

        let mut by_category: BTreeMap<EntityCategory, BTreeSet<CanonicalPeriod>> = BTreeMap::new();
        for cell in &populated {
            by_category.entry(cell.category).or_default().insert(cell.period);
        }

        let mut missing: BTreeMap<EntityCategory, Vec<CanonicalPeriod>> = BTreeMap::new();
        for (category, periods) in &by_category {
            missing.insert(*category, self.gaps_for(*category, periods));
        }

        GapReport { missing, populated }
    }

    fn gaps_for(
        &self,
        category: EntityCategory,
        periods: &BTreeSet<CanonicalPeriod>,
    ) -> Vec<CanonicalPeriod> {
        let (Some(first), Some(last)) = (periods.iter().next(), periods.iter().next_back()) else {
            return Vec::new();
        };
        let bound = self.bounds.bound(category);

        let mut gaps = Vec::new();
        let mut cursor = first.next();
        while cursor < *last {
            if !periods.contains(&cursor) && bound.map_or(true, |b| cursor <= b) {
                gaps.push(cursor);
            }
            cursor = cursor.next();
        }
        gaps
    }
}

/// Render the per-quarter breakdown of filer and variable counts per
/// category, for eyeballing a run's coverage.
pub fn summary_table(cells: &[CoverageCell]) -> String {
    let categories = EntityCategory::output_categories();
    let mut by_key: BTreeMap<CanonicalPeriod, BTreeMap<EntityCategory, (usize, usize)>> =
        BTreeMap::new();
    for cell in cells {
        if let CellState::Populated { rows, columns, .. } = cell.state {
            by_key.entry(cell.period).or_default().insert(cell.category, (rows, columns));
        }
    }

    let mut out = String::new();
    out.push_str(&format!("{:<8} {:>10} {:>10} {:>10} | {:>8} {:>8} {:>8}\n",
        "Quarter", "031/041", "002", "2886b", "031/041", "002", "2886b"));
    out.push_str(&format!("{:<8} {:>10} {:>10} {:>10} | {:>8} {:>8} {:>8}\n",
        "", "Filers", "Filers", "Filers", "Vars", "Vars", "Vars"));
    for (period, counts) in &by_key {
        let filers: Vec<String> = categories
            .iter()
            .map(|c| counts.get(c).map_or_else(|| "-".to_string(), |(r, _)| r.to_string()))
            .collect();
        // Variable counts exclude the two leading metadata columns.
        let vars: Vec<String> = categories
            .iter()
            .map(|c| {
                counts
                    .get(c)
                    .map_or_else(|| "-".to_string(), |(_, cols)| cols.saturating_sub(2).to_string())
            })
            .collect();
        out.push_str(&format!(
            "{:<8} {:>10} {:>10} {:>10} | {:>8} {:>8} {:>8}\n",
            period.to_string(),
            filers[0], filers[1], filers[2],
            vars[0], vars[1], vars[2]
        ));
    }
    out
}
