use crate::classify::EntityCategory;
use crate::period::CanonicalPeriod;
use crate::reconcile::{CellState, CoverageCell};
use crate::types::SourceTag;
use rusqlite::{params, Connection};
use std::path::Path;

/// The persisted output index: one row per (period, category) decided by the
/// Reconciler. The only state that survives across runs; re-deriving from the
/// same inputs reproduces the same rows.
pub struct CoverageIndex {
    conn: Connection,
}

/// A cell as stored, with the artifact bookkeeping the writer left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedCell {
    pub cell: CoverageCell,
    pub checksum: Option<String>,
    pub artifact: Option<String>,
}

impl CoverageIndex {
    pub fn open_at_root<P: AsRef<Path>>(data_root: P) -> anyhow::Result<Self> {
        let db_path = data_root.as_ref().join("index").join("coverage.db");
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS coverage_cells (
                period        TEXT NOT NULL,
                category      TEXT NOT NULL,
                state         TEXT NOT NULL,
                source        TEXT,
                row_count     INTEGER,
                column_count  INTEGER,
                checksum      TEXT,
                artifact      TEXT,
                updated_at    INTEGER NOT NULL,
                PRIMARY KEY (period, category)
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn upsert_cell(
        &self,
        cell: &CoverageCell,
        checksum: Option<&str>,
        artifact: Option<&str>,
    ) -> anyhow::Result<()> {
        let (state, source, rows, columns) = match &cell.state {
            CellState::Populated { source, rows, columns } => {
                ("populated", Some(source.as_str()), Some(*rows as i64), Some(*columns as i64))
            }
            CellState::Absent => ("absent", None, None, None),
        };
        self.conn.execute(
            "INSERT INTO coverage_cells
                 (period, category, state, source, row_count, column_count, checksum, artifact, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(period, category) DO UPDATE SET
                 state=excluded.state, source=excluded.source,
                 row_count=excluded.row_count, column_count=excluded.column_count,
                 checksum=excluded.checksum, artifact=excluded.artifact,
                 updated_at=excluded.updated_at",
            params![
                cell.period.to_string(),
                cell.category.as_str(),
                state,
                source,
                rows,
                columns,
                checksum,
                artifact,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn get_cell(
        &self,
        period: CanonicalPeriod,
        category: EntityCategory,
    ) -> anyhow::Result<Option<IndexedCell>> {
        let mut stmt = self.conn.prepare(
            "SELECT period, category, state, source, row_count, column_count, checksum, artifact
             FROM coverage_cells WHERE period = ?1 AND category = ?2",
        )?;
        let mut rows = stmt.query(params![period.to_string(), category.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::cell_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// All cells in (period, category) order.
    pub fn all_cells(&self) -> anyhow::Result<Vec<IndexedCell>> {
        let mut stmt = self.conn.prepare(
            "SELECT period, category, state, source, row_count, column_count, checksum, artifact
             FROM coverage_cells ORDER BY period, category",
        )?;
        let mut cells = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            cells.push(Self::cell_from_row(row)?);
        }
        Ok(cells)
    }

    fn cell_from_row(row: &rusqlite::Row<'_>) -> anyhow::Result<IndexedCell> {
        let period: String = row.get(0)?;
        let category: String = row.get(1)?;
        let state: String = row.get(2)?;
        let state = match state.as_str() {
            "populated" => {
                let source: String = row.get(3)?;
                let rows_n: i64 = row.get(4)?;
                let columns: i64 = row.get(5)?;
                CellState::Populated {
                    source: source.parse::<SourceTag>()?,
                    rows: rows_n as usize,
                    columns: columns as usize,
                }
            }
            "absent" => CellState::Absent,
            other => anyhow::bail!("corrupt coverage index: unknown state '{other}'"),
        };
        Ok(IndexedCell {
            cell: CoverageCell {
                period: period.parse()?,
                category: category.parse()?,
                state,
            },
            checksum: row.get(6)?,
            artifact: row.get(7)?,
        })
    }
}
