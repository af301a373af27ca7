// nowcast_core/src/epiweek.rs

//! Epidemiological week arithmetic.
//!
//! An epiweek is written `YYYYWW`. Years carry 52 or 53 weeks, and a flu
//! season runs from week 40 of one year through week 20 of the next. Weeks
//! 21..=39 are off-season: they belong to no season and are never estimated.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{NowcastError, Result};

/// First year for which the week count is known.
pub const MIN_YEAR: u16 = 1900;
/// One past the last year for which the week count is known.
pub const MAX_YEAR: u16 = 2100;
/// First in-season week (of the season's start year).
pub const SEASON_START_WEEK: u8 = 40;
/// Last in-season week (of the year after the season's start year).
pub const SEASON_END_WEEK: u8 = 20;

/// The 53-week years repeat every 28 years, five per cycle.
const CYCLE_YEARS: u16 = 28;
const CYCLE_WEEKS: i64 = 28 * 52 + 5;

/// Number of epiweeks in `year`.
pub fn weeks_in_year(year: u16) -> Option<u8> {
    if !(MIN_YEAR..MAX_YEAR).contains(&year) {
        return None;
    }
    match year % 28 {
        4 | 9 | 15 | 20 | 26 => Some(53),
        _ => Some(52),
    }
}

/// A validated `(year, week)` pair. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Epiweek {
    year: u16,
    week: u8,
}

impl Epiweek {
    pub fn new(year: u16, week: u8) -> Result<Self> {
        let code = year as u32 * 100 + week as u32;
        match weeks_in_year(year) {
            Some(n) if (1..=n).contains(&week) => Ok(Self { year, week }),
            _ => Err(NowcastError::InvalidEpiweek(code)),
        }
    }

    /// Parses the integer `YYYYWW` form.
    pub fn from_code(code: u32) -> Result<Self> {
        let year = u16::try_from(code / 100).map_err(|_| NowcastError::InvalidEpiweek(code))?;
        let week = (code % 100) as u8;
        Self::new(year, week).map_err(|_| NowcastError::InvalidEpiweek(code))
    }

    pub fn code(self) -> u32 {
        self.year as u32 * 100 + self.week as u32
    }

    pub fn year(self) -> u16 {
        self.year
    }

    pub fn week(self) -> u8 {
        self.week
    }

    /// Weeks elapsed since week 1 of `MIN_YEAR`.
    fn ordinal(self) -> i64 {
        let cycles = (self.year - MIN_YEAR) / CYCLE_YEARS;
        let cycle_start = MIN_YEAR + cycles * CYCLE_YEARS;
        let before: i64 = (cycle_start..self.year)
            .map(|y| weeks_in_year(y).unwrap_or(52) as i64)
            .sum();
        cycles as i64 * CYCLE_WEEKS + before + self.week as i64 - 1
    }

    fn from_ordinal(ordinal: i64) -> Option<Self> {
        if ordinal < 0 {
            return None;
        }
        let cycles = u16::try_from(ordinal / CYCLE_WEEKS).ok()?;
        let mut year = cycles.checked_mul(CYCLE_YEARS)?.checked_add(MIN_YEAR)?;
        let mut rest = ordinal % CYCLE_WEEKS;
        loop {
            let n = weeks_in_year(year)? as i64;
            if rest < n {
                return Some(Self {
                    year,
                    week: rest as u8 + 1,
                });
            }
            rest -= n;
            year += 1;
        }
    }

    /// Shifts by `weeks` (negative moves backwards), crossing year
    /// boundaries as needed.
    pub fn add_weeks(self, weeks: i64) -> Result<Self> {
        Self::from_ordinal(self.ordinal() + weeks)
            .ok_or(NowcastError::InvalidEpiweek(self.code()))
    }

    pub fn next(self) -> Result<Self> {
        self.add_weeks(1)
    }

    pub fn prev(self) -> Result<Self> {
        self.add_weeks(-1)
    }

    /// Signed number of weeks from `self` to `other`.
    pub fn weeks_until(self, other: Epiweek) -> i64 {
        other.ordinal() - self.ordinal()
    }

    /// The season containing this week, or `None` for off-season weeks.
    pub fn season(self) -> Option<Season> {
        if self.week <= SEASON_END_WEEK {
            Some(Season {
                start_year: self.year - 1,
            })
        } else if self.week >= SEASON_START_WEEK {
            Some(Season {
                start_year: self.year,
            })
        } else {
            None
        }
    }

    pub fn is_in_season(self) -> bool {
        self.season().is_some()
    }

    /// Iterates `start..=end` in chronological order. Empty if `start > end`.
    pub fn range_inclusive(start: Epiweek, end: Epiweek) -> EpiweekRange {
        EpiweekRange {
            next: (start <= end).then_some(start),
            end,
        }
    }
}

impl TryFrom<u32> for Epiweek {
    type Error = NowcastError;

    fn try_from(code: u32) -> Result<Self> {
        Self::from_code(code)
    }
}

impl From<Epiweek> for u32 {
    fn from(ew: Epiweek) -> Self {
        ew.code()
    }
}

impl fmt::Display for Epiweek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:02}", self.year, self.week)
    }
}

/// Inclusive, ascending epiweek iterator.
#[derive(Debug, Clone)]
pub struct EpiweekRange {
    next: Option<Epiweek>,
    end: Epiweek,
}

impl Iterator for EpiweekRange {
    type Item = Epiweek;

    fn next(&mut self) -> Option<Epiweek> {
        let current = self.next?;
        self.next = current.next().ok().filter(|n| *n <= self.end);
        Some(current)
    }
}

/// A flu season, identified by the year in which it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Season {
    pub start_year: u16,
}

impl Season {
    pub fn first_week(self) -> Result<Epiweek> {
        Epiweek::new(self.start_year, SEASON_START_WEEK)
    }

    pub fn last_week(self) -> Result<Epiweek> {
        Epiweek::new(self.start_year + 1, SEASON_END_WEEK)
    }

    pub fn contains(self, ew: Epiweek) -> bool {
        ew.season() == Some(self)
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:02}", self.start_year, (self.start_year + 1) % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ew(code: u32) -> Epiweek {
        Epiweek::from_code(code).unwrap()
    }

    #[test]
    fn test_week_counts() {
        // 2014 % 28 == 26 and 2020 % 28 == 4 are long years.
        assert_eq!(weeks_in_year(2014), Some(53));
        assert_eq!(weeks_in_year(2020), Some(53));
        assert_eq!(weeks_in_year(2015), Some(52));
        assert_eq!(weeks_in_year(1899), None);
        assert_eq!(weeks_in_year(2100), None);
    }

    #[test]
    fn test_validation() {
        assert!(Epiweek::from_code(201453).is_ok());
        assert_eq!(
            Epiweek::from_code(201553),
            Err(NowcastError::InvalidEpiweek(201553))
        );
        assert!(Epiweek::from_code(201500).is_err());
        assert!(Epiweek::from_code(7).is_err());
    }

    #[test]
    fn test_add_weeks_crosses_years() {
        assert_eq!(ew(201452).add_weeks(1).unwrap(), ew(201453));
        assert_eq!(ew(201453).add_weeks(1).unwrap(), ew(201501));
        assert_eq!(ew(201552).add_weeks(1).unwrap(), ew(201601));
        assert_eq!(ew(201601).add_weeks(-1).unwrap(), ew(201552));
        assert_eq!(ew(201045).add_weeks(156).unwrap(), ew(201345));
        assert_eq!(ew(201501).prev().unwrap(), ew(201453));
    }

    #[test]
    fn test_ordinal_agrees_with_year_by_year_count() {
        let mut expected = 0i64;
        for year in MIN_YEAR..MAX_YEAR {
            let n = weeks_in_year(year).unwrap();
            for week in [1, n] {
                let epiweek = Epiweek::new(year, week).unwrap();
                let ordinal = expected + week as i64 - 1;
                assert_eq!(epiweek.ordinal(), ordinal);
                assert_eq!(Epiweek::from_ordinal(ordinal), Some(epiweek));
            }
            expected += n as i64;
        }
        assert_eq!(Epiweek::from_ordinal(expected), None);
        assert!(ew(209952).add_weeks(1).is_err());
        assert!(ew(190001).prev().is_err());
    }

    #[test]
    fn test_weeks_until_is_signed() {
        assert_eq!(ew(201440).weeks_until(ew(201520)), 33);
        assert_eq!(ew(201520).weeks_until(ew(201440)), -33);
        assert_eq!(ew(201540).weeks_until(ew(201540)), 0);
    }

    #[test]
    fn test_seasons() {
        assert_eq!(ew(201540).season(), Some(Season { start_year: 2015 }));
        assert_eq!(ew(201620).season(), Some(Season { start_year: 2015 }));
        assert_eq!(ew(201621).season(), None);
        assert_eq!(ew(201639).season(), None);

        let season = Season { start_year: 2014 };
        assert_eq!(season.first_week().unwrap(), ew(201440));
        assert_eq!(season.last_week().unwrap(), ew(201520));
        // 2014 is a long year, so its season has 34 weeks.
        let n = Epiweek::range_inclusive(season.first_week().unwrap(), season.last_week().unwrap())
            .count();
        assert_eq!(n, 34);
        assert_eq!(season.to_string(), "2014/15");
    }

    #[test]
    fn test_range_inclusive() {
        let weeks: Vec<u32> = Epiweek::range_inclusive(ew(201551), ew(201602))
            .map(Epiweek::code)
            .collect();
        assert_eq!(weeks, vec![201551, 201552, 201601, 201602]);
        assert_eq!(Epiweek::range_inclusive(ew(201602), ew(201551)).count(), 0);
    }
}
