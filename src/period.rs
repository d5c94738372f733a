use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which filename encoding a source family uses for its reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFamily {
    /// Two-digit year + two-digit quarter-end month, e.g. `call9203.xpt`
    Compact,
    /// Eight-digit date, either `YYYYMMDD` or `MMDDYYYY`, e.g. `FFIEC_20240630.txt`
    FullDate,
}

/// A canonical reporting period: one calendar quarter.
///
/// Ordered chronologically; rendered as `YYYYQn` (e.g. `2005Q1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalPeriod {
    year: i32,
    quarter: u8,
}

// Years the pivot rule and full-date parsing are willing to accept.
const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

impl CanonicalPeriod {
    pub fn new(year: i32, quarter: u8) -> Result<Self> {
        if !(1..=4).contains(&quarter) {
            return Err(PipelineError::UnparseableIdentifier(format!(
                "quarter {quarter} out of range for year {year}"
            )));
        }
        Ok(CanonicalPeriod { year, quarter })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn quarter(&self) -> u8 {
        self.quarter
    }

    /// The quarter-end calendar date: 03-31, 06-30, 09-30 or 12-31.
    pub fn end_date(&self) -> NaiveDate {
        let (month, day) = match self.quarter {
            1 => (3, 31),
            2 => (6, 30),
            3 => (9, 30),
            _ => (12, 31),
        };
        // Always a real date for quarter in 1..=4
        NaiveDate::from_ymd_opt(self.year, month, day).unwrap()
    }

    /// The quarter immediately after this one.
    pub fn next(&self) -> CanonicalPeriod {
        if self.quarter == 4 {
            CanonicalPeriod { year: self.year + 1, quarter: 1 }
        } else {
            CanonicalPeriod { year: self.year, quarter: self.quarter + 1 }
        }
    }
}

impl fmt::Display for CanonicalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

impl FromStr for CanonicalPeriod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let (year, quarter) = s
            .to_ascii_uppercase()
            .split_once('Q')
            .and_then(|(y, q)| Some((y.parse::<i32>().ok()?, q.parse::<u8>().ok()?)))
            .ok_or_else(|| {
                PipelineError::UnparseableIdentifier(format!("invalid period literal '{s}'"))
            })?;
        CanonicalPeriod::new(year, quarter)
    }
}

impl TryFrom<String> for CanonicalPeriod {
    type Error = PipelineError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<CanonicalPeriod> for String {
    fn from(p: CanonicalPeriod) -> String {
        p.to_string()
    }
}

/// Resolve a source file's identifier to its canonical reporting period.
///
/// Pure function of the identifier and the source family; never inspects file
/// contents. Extensions and other trailing noise are ignored because the
/// encodings are searched for inside the identifier.
pub fn resolve(identifier: &str, family: SourceFamily) -> Result<CanonicalPeriod> {
    match family {
        SourceFamily::Compact => resolve_compact(identifier),
        SourceFamily::FullDate => resolve_full_date(identifier),
    }
}

// Chicago Fed naming: call9203.xpt, calp8503.zip, CALL0012.xpt
static COMPACT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)call?p?(\d{2})(\d{2})").unwrap());

static EIGHT_DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{8}").unwrap());

fn resolve_compact(identifier: &str) -> Result<CanonicalPeriod> {
    let caps = COMPACT_RE.captures(identifier).ok_or_else(|| {
        PipelineError::UnparseableIdentifier(format!(
            "no compact period encoding in '{identifier}'"
        ))
    })?;
    let yy: i32 = caps[1].parse().unwrap();
    let month: u32 = caps[2].parse().unwrap();

    // Century pivot: 76-99 -> 1900s, 00-75 -> 2000s. Spans the dataset's
    // 1985-2075 operating window without ambiguity.
    let year = if yy >= 76 { 1900 + yy } else { 2000 + yy };

    match month {
        3 | 6 | 9 | 12 => CanonicalPeriod::new(year, (month / 3) as u8),
        _ => Err(PipelineError::InvalidQuarterEndMonth { identifier: identifier.to_string(), month }),
    }
}

fn is_quarter_end(date: NaiveDate) -> bool {
    use chrono::Datelike;
    matches!((date.month(), date.day()), (3, 31) | (6, 30) | (9, 30) | (12, 31))
}

fn date_from_parts(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn resolve_full_date(identifier: &str) -> Result<CanonicalPeriod> {
    let run = EIGHT_DIGITS_RE.find(identifier).ok_or_else(|| {
        PipelineError::UnparseableIdentifier(format!(
            "no eight-digit date in '{identifier}'"
        ))
    })?;
    let digits = run.as_str();
    let num = |range: std::ops::Range<usize>| digits[range].parse::<u32>().unwrap();

    // Two candidate readings of the same digit run. Which four-digit slice is
    // the year decides between them; when both are real dates, the one landing
    // exactly on a quarter end wins.
    let as_yyyymmdd = date_from_parts(num(0..4) as i32, num(4..6), num(6..8));
    let as_mmddyyyy = date_from_parts(num(4..8) as i32, num(0..2), num(2..4));

    let candidates: Vec<NaiveDate> = [as_yyyymmdd, as_mmddyyyy].into_iter().flatten().collect();
    if candidates.is_empty() {
        return Err(PipelineError::UnparseableIdentifier(format!(
            "'{digits}' is not a plausible date in '{identifier}'"
        )));
    }

    let date = candidates
        .iter()
        .copied()
        .find(|d| is_quarter_end(*d))
        .ok_or_else(|| PipelineError::NonQuarterEndDate {
            identifier: identifier.to_string(),
            date: candidates[0].to_string(),
        })?;

    use chrono::Datelike;
    CanonicalPeriod::new(date.year(), (date.month() / 3) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_pivot_and_quarter() {
        assert_eq!(resolve("call0503.xpt", SourceFamily::Compact).unwrap(), period(2005, 1));
        assert_eq!(resolve("call9912.xpt", SourceFamily::Compact).unwrap(), period(1999, 4));
        assert_eq!(resolve("calp8503.zip", SourceFamily::Compact).unwrap(), period(1985, 1));
        assert_eq!(resolve("CALL0012.xpt", SourceFamily::Compact).unwrap(), period(2000, 4));
        assert_eq!(resolve("call7606.xpt", SourceFamily::Compact).unwrap(), period(1976, 2));
        assert_eq!(resolve("call7509.xpt", SourceFamily::Compact).unwrap(), period(2075, 3));
    }

    #[test]
    fn compact_rejects_non_quarter_end_month() {
        let err = resolve("call9204.xpt", SourceFamily::Compact).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidQuarterEndMonth { month: 4, .. }));
    }

    #[test]
    fn compact_rejects_unrelated_names() {
        let err = resolve("readme.txt", SourceFamily::Compact).unwrap_err();
        assert!(matches!(err, PipelineError::UnparseableIdentifier(_)));
    }

    #[test]
    fn full_date_is_order_independent() {
        let a = resolve("FFIEC_20240630.txt", SourceFamily::FullDate).unwrap();
        let b = resolve("FFIEC CDR Call Bulk All Schedules 06302024.zip", SourceFamily::FullDate).unwrap();
        assert_eq!(a, period(2024, 2));
        assert_eq!(a, b);
    }

    #[test]
    fn full_date_mmddyyyy() {
        let p = resolve("FFIEC CDR Call Bulk All Schedules 03312011.zip", SourceFamily::FullDate).unwrap();
        assert_eq!(p, period(2011, 1));
    }

    #[test]
    fn full_date_rejects_mid_quarter_dates() {
        let err = resolve("Call_20240515.txt", SourceFamily::FullDate).unwrap_err();
        assert!(matches!(err, PipelineError::NonQuarterEndDate { .. }));
    }

    #[test]
    fn full_date_rejects_names_without_dates() {
        let err = resolve("schedule_index.txt", SourceFamily::FullDate).unwrap_err();
        assert!(matches!(err, PipelineError::UnparseableIdentifier(_)));
    }

    #[test]
    fn period_ordering_and_rendering() {
        assert!(period(1999, 4) < period(2000, 1));
        assert!(period(2000, 1) < period(2000, 2));
        assert_eq!(period(2005, 1).to_string(), "2005Q1");
        assert_eq!("2005Q1".parse::<CanonicalPeriod>().unwrap(), period(2005, 1));
        assert_eq!(period(2000, 4).next(), period(2001, 1));
        assert_eq!(period(2024, 2).end_date(), NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());
    }

    fn period(year: i32, quarter: u8) -> CanonicalPeriod {
        CanonicalPeriod::new(year, quarter).unwrap()
    }
}
