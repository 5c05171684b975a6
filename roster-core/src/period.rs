//! Reporting periods. A period is one calendar month.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    year: i32,
    month: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid period {0:?}, expected YYYY-MM")]
pub struct PeriodParseError(pub String);

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    /// The month containing `today`.
    pub fn containing(today: NaiveDate) -> Self {
        Self {
            year: today.year(),
            month: today.month(),
        }
    }

    pub fn start(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last day of the month.
    pub fn end(&self) -> NaiveDate {
        match self.start().checked_add_months(Months::new(1)) {
            Some(next) => next.pred_opt().unwrap_or_else(|| self.start()),
            // Only the last month chrono can represent has no successor.
            None => NaiveDate::MAX,
        }
    }

    /// The following month, or `None` past the last representable date.
    pub fn next(&self) -> Option<Self> {
        self.start()
            .checked_add_months(Months::new(1))
            .map(Self::containing)
    }

    /// A period is complete once its last day lies strictly before `today`.
    pub fn is_complete(&self, today: NaiveDate) -> bool {
        self.end() < today
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || PeriodParseError(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(err)?;
        let year: i32 = year.parse().map_err(|_| err())?;
        let month: u32 = month.parse().map_err(|_| err())?;
        Period::new(year, month).ok_or_else(err)
    }
}
