use crate::classify::EntityCategory;
use crate::error::{PipelineError, Result};
use crate::period::CanonicalPeriod;
use crate::types::{RecordBatch, SourceTag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Configured priority ranks per source; lower rank = higher precedence.
///
/// Two enabled sources sharing a rank is a configuration defect, rejected at
/// construction so a run can never reach an ambiguous selection.
#[derive(Debug, Clone)]
pub struct Precedence {
    ranks: BTreeMap<SourceTag, u32>,
}

impl Precedence {
    pub fn new(ranks: BTreeMap<SourceTag, u32>) -> Result<Self> {
        let mut seen: BTreeMap<u32, SourceTag> = BTreeMap::new();
        for (source, rank) in &ranks {
            if let Some(other) = seen.insert(*rank, *source) {
                return Err(PipelineError::AmbiguousPrecedence {
                    key: "source ranks".to_string(),
                    detail: format!("{other} and {source} both configured with rank {rank}"),
                });
            }
        }
        Ok(Precedence { ranks })
    }

    pub fn rank(&self, source: SourceTag) -> Result<u32> {
        self.ranks.get(&source).copied().ok_or_else(|| {
            PipelineError::Config(format!("no priority rank configured for source {source}"))
        })
    }
}

/// Categorically suppresses a (source, category, period-range) combination.
/// An excluded batch can never win its cell, even as the sole candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionRule {
    pub source: SourceTag,
    pub category: EntityCategory,
    /// Applies to periods strictly after this one, when set.
    #[serde(default)]
    pub after: Option<CanonicalPeriod>,
    /// Applies to periods strictly before this one, when set.
    #[serde(default)]
    pub before: Option<CanonicalPeriod>,
}

impl ExclusionRule {
    pub fn applies(&self, source: SourceTag, category: EntityCategory, period: CanonicalPeriod) -> bool {
        source == self.source
            && category == self.category
            && self.after.map_or(true, |p| period > p)
            && self.before.map_or(true, |p| period < p)
    }
}

/// Final authoritative state of one (period, category) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageCell {
    pub period: CanonicalPeriod,
    pub category: EntityCategory,
    #[serde(flatten)]
    pub state: CellState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CellState {
    /// A winning batch exists for this cell.
    Populated { source: SourceTag, rows: usize, columns: usize },
    /// No eligible candidate; distinct from "never seen".
    Absent,
}

impl CoverageCell {
    pub fn is_populated(&self) -> bool {
        matches!(self.state, CellState::Populated { .. })
    }
}

/// The outcome for one key: the cell record, plus the winning batch to hand to
/// the writer when populated.
#[derive(Debug, Clone, PartialEq)]
pub struct CellDecision {
    pub cell: CoverageCell,
    pub winner: Option<RecordBatch>,
}

/// The central merge/precedence decision. A pure selection function over the
/// full candidate set of a run; it never merges rows across sources.
#[derive(Debug, Clone)]
pub struct Reconciler {
    precedence: Precedence,
    exclusions: Vec<ExclusionRule>,
}

impl Reconciler {
    pub fn new(precedence: Precedence, exclusions: Vec<ExclusionRule>) -> Self {
        Reconciler { precedence, exclusions }
    }

    fn is_excluded(&self, batch: &RecordBatch) -> bool {
        self.exclusions.iter().any(|rule| rule.applies(batch.source, batch.category, batch.period))
    }

    /// Decide every (period, category) key in the candidate set.
    ///
    /// Requires the complete candidate set for the run: precedence can only be
    /// decided once all competing sources for a key are visible. Deterministic
    /// in the face of any input ordering, so re-running over the same
    /// candidates reproduces the same cells.
    pub fn reconcile(&self, candidates: Vec<RecordBatch>) -> Result<Vec<CellDecision>> {
        let mut by_key: BTreeMap<(CanonicalPeriod, EntityCategory), Vec<RecordBatch>> =
            BTreeMap::new();
        for batch in candidates {
            by_key.entry((batch.period, batch.category)).or_default().push(batch);
        }

        let mut decisions = Vec::with_capacity(by_key.len());
        for ((period, category), batches) in by_key {
            let decision = self.decide_cell(period, category, batches)?;
            decisions.push(decision);
        }
        Ok(decisions)
    }

    fn decide_cell(
        &self,
        period: CanonicalPeriod,
        category: EntityCategory,
        batches: Vec<RecordBatch>,
    ) -> Result<CellDecision> {
        let (suppressed, eligible): (Vec<_>, Vec<_>) =
            batches.into_iter().partition(|b| self.is_excluded(b));
        for batch in &suppressed {
            debug!(
                period = %period,
                category = %category,
                source = %batch.source,
                origin = %batch.origin,
                "candidate suppressed by exclusion rule"
            );
        }

        if eligible.is_empty() {
            // Exclusions are absolute: no fallback to a suppressed batch.
            return Ok(CellDecision {
                cell: CoverageCell { period, category, state: CellState::Absent },
                winner: None,
            });
        }

        let mut ranked: Vec<(u32, RecordBatch)> = Vec::with_capacity(eligible.len());
        for batch in eligible {
            ranked.push((self.precedence.rank(batch.source)?, batch));
        }
        let best = ranked.iter().map(|(rank, _)| *rank).min().unwrap();
        let mut winners: Vec<RecordBatch> =
            ranked.into_iter().filter(|(rank, _)| *rank == best).map(|(_, b)| b).collect();

        if winners.len() > 1 {
            let origins: Vec<&str> = winners.iter().map(|b| b.origin.as_str()).collect();
            return Err(PipelineError::AmbiguousPrecedence {
                key: format!("{period}/{category}"),
                detail: format!("rank {best} shared by candidates {}", origins.join(", ")),
            });
        }

        let winner = winners.pop().unwrap();
        debug!(
            period = %period,
            category = %category,
            source = %winner.source,
            rows = winner.batch.n_rows(),
            "cell decided"
        );
        Ok(CellDecision {
            cell: CoverageCell {
                period,
                category,
                state: CellState::Populated {
                    source: winner.source,
                    rows: winner.batch.n_rows(),
                    columns: winner.batch.n_columns(),
                },
            },
            winner: Some(winner),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, ColumnType, Scalar, TableBatch};

    fn period(year: i32, quarter: u8) -> CanonicalPeriod {
        CanonicalPeriod::new(year, quarter).unwrap()
    }

    fn candidate(
        source: SourceTag,
        category: EntityCategory,
        year: i32,
        quarter: u8,
        rows: usize,
    ) -> RecordBatch {
        RecordBatch {
            period: period(year, quarter),
            category,
            source,
            origin: format!("{source}-{year}q{quarter}"),
            batch: TableBatch::new(
                vec![Column::new("RSSD_ID", ColumnType::Numeric)],
                (0..rows).map(|i| vec![Scalar::Number(i as f64)]).collect(),
            )
            .unwrap(),
        }
    }

    fn reconciler(exclusions: Vec<ExclusionRule>) -> Reconciler {
        let mut ranks = BTreeMap::new();
        ranks.insert(SourceTag::FfiecCdr, 0);
        ranks.insert(SourceTag::ChicagoFed, 1);
        Reconciler::new(Precedence::new(ranks).unwrap(), exclusions)
    }

    #[test]
    fn sole_candidate_wins_trivially() {
        let decisions = reconciler(vec![])
            .reconcile(vec![candidate(SourceTag::ChicagoFed, EntityCategory::Ffiec002, 1995, 3, 12)])
            .unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(
            decisions[0].cell.state,
            CellState::Populated { source: SourceTag::ChicagoFed, rows: 12, columns: 1 }
        );
        assert_eq!(decisions[0].winner.as_ref().unwrap().source, SourceTag::ChicagoFed);
    }

    #[test]
    fn lower_rank_wins_regardless_of_input_order() {
        let a = candidate(SourceTag::FfiecCdr, EntityCategory::Ffiec031041, 2005, 2, 8000);
        let b = candidate(SourceTag::ChicagoFed, EntityCategory::Ffiec031041, 2005, 2, 8200);

        for input in [vec![a.clone(), b.clone()], vec![b, a]] {
            let decisions = reconciler(vec![]).reconcile(input).unwrap();
            assert_eq!(
                decisions[0].cell.state,
                CellState::Populated { source: SourceTag::FfiecCdr, rows: 8000, columns: 1 }
            );
        }
    }

    #[test]
    fn exclusion_is_absolute_even_for_sole_candidate() {
        let rules = vec![ExclusionRule {
            source: SourceTag::ChicagoFed,
            category: EntityCategory::Ffiec031041,
            after: Some(period(2010, 4)),
            before: None,
        }];
        let decisions = reconciler(rules)
            .reconcile(vec![candidate(SourceTag::ChicagoFed, EntityCategory::Ffiec031041, 2011, 1, 194)])
            .unwrap();
        assert_eq!(decisions[0].cell.state, CellState::Absent);
        assert!(decisions[0].winner.is_none());
    }

    #[test]
    fn exclusion_respects_its_period_range() {
        let rules = vec![ExclusionRule {
            source: SourceTag::ChicagoFed,
            category: EntityCategory::Ffiec031041,
            after: Some(period(2010, 4)),
            before: None,
        }];
        // 2010Q4 itself is not after the boundary, so Chicago still wins it.
        let decisions = reconciler(rules)
            .reconcile(vec![candidate(SourceTag::ChicagoFed, EntityCategory::Ffiec031041, 2010, 4, 7000)])
            .unwrap();
        assert!(decisions[0].cell.is_populated());
    }

    #[test]
    fn excluded_source_never_beats_an_eligible_one() {
        let rules = vec![ExclusionRule {
            source: SourceTag::FfiecCdr,
            category: EntityCategory::Ffiec031041,
            after: None,
            before: None,
        }];
        let decisions = reconciler(rules)
            .reconcile(vec![
                candidate(SourceTag::FfiecCdr, EntityCategory::Ffiec031041, 2005, 2, 100),
                candidate(SourceTag::ChicagoFed, EntityCategory::Ffiec031041, 2005, 2, 90),
            ])
            .unwrap();
        assert_eq!(
            decisions[0].cell.state,
            CellState::Populated { source: SourceTag::ChicagoFed, rows: 90, columns: 1 }
        );
    }

    #[test]
    fn tied_rank_fails_fast() {
        let a = candidate(SourceTag::ChicagoFed, EntityCategory::Ffiec002, 2000, 1, 10);
        let b = candidate(SourceTag::ChicagoFed, EntityCategory::Ffiec002, 2000, 1, 11);
        let err = reconciler(vec![]).reconcile(vec![a, b]).unwrap_err();
        assert!(matches!(err, PipelineError::AmbiguousPrecedence { .. }));
        assert!(err.is_run_fatal());
    }

    #[test]
    fn duplicate_configured_ranks_are_rejected() {
        let mut ranks = BTreeMap::new();
        ranks.insert(SourceTag::FfiecCdr, 1);
        ranks.insert(SourceTag::ChicagoFed, 1);
        let err = Precedence::new(ranks).unwrap_err();
        assert!(matches!(err, PipelineError::AmbiguousPrecedence { .. }));
    }

    #[test]
    fn reconcile_is_idempotent() {
        let candidates = vec![
            candidate(SourceTag::FfiecCdr, EntityCategory::Ffiec031041, 2005, 2, 8000),
            candidate(SourceTag::ChicagoFed, EntityCategory::Ffiec031041, 2005, 2, 8200),
            candidate(SourceTag::ChicagoFed, EntityCategory::Ffiec002, 2005, 2, 240),
        ];
        let r = reconciler(vec![]);
        let first = r.reconcile(candidates.clone()).unwrap();
        let second = r.reconcile(candidates).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn one_decision_per_key() {
        let decisions = reconciler(vec![])
            .reconcile(vec![
                candidate(SourceTag::ChicagoFed, EntityCategory::Ffiec002, 1995, 3, 10),
                candidate(SourceTag::ChicagoFed, EntityCategory::Frb2886b, 1995, 3, 4),
                candidate(SourceTag::ChicagoFed, EntityCategory::Ffiec002, 1995, 4, 10),
            ])
            .unwrap();
        assert_eq!(decisions.len(), 3);
        let mut keys: Vec<_> =
            decisions.iter().map(|d| (d.cell.period, d.cell.category)).collect();
        keys.dedup();
        assert_eq!(keys.len(), 3);
    }
}
