//! Date and time types.
//!
//! IMAP uses two fixed textual formats: `date-time` for `INTERNALDATE` and
//! `APPEND` (`"dd-Mon-yyyy HH:MM:SS +zzzz"`, always quoted) and the bare
//! `date` for `SEARCH` criteria (`d-Mon-yyyy` or `dd-Mon-yyyy`). Both are
//! strict; anything chrono would merely tolerate is rejected here.

use std::fmt;

use chrono::{DateTime as ChronoDateTime, Datelike, FixedOffset, NaiveDate as ChronoNaiveDate};
use thiserror::Error;

/// An `INTERNALDATE`-style timestamp with a mandatory zone offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateTime(ChronoDateTime<FixedOffset>);

impl DateTime {
    pub fn verify(value: &ChronoDateTime<FixedOffset>) -> Result<(), DateTimeError> {
        // Four-digit years only; the wire format has no room for more.
        if !(0..=9999).contains(&value.year()) {
            return Err(DateTimeError::YearOutOfRange { year: value.year() });
        }

        Ok(())
    }

    pub fn inner(&self) -> &ChronoDateTime<FixedOffset> {
        &self.0
    }
}

impl TryFrom<ChronoDateTime<FixedOffset>> for DateTime {
    type Error = DateTimeError;

    fn try_from(value: ChronoDateTime<FixedOffset>) -> Result<Self, Self::Error> {
        Self::verify(&value)?;

        Ok(Self(value))
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // `%e` space-pads single-digit days, matching `date-day-fixed`.
        write!(f, "\"{}\"", self.0.format("%e-%b-%Y %H:%M:%S %z"))
    }
}

/// A `SEARCH` date, i.e., a day without time or zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaiveDate(ChronoNaiveDate);

impl NaiveDate {
    pub fn verify(value: &ChronoNaiveDate) -> Result<(), DateTimeError> {
        if !(0..=9999).contains(&value.year()) {
            return Err(DateTimeError::YearOutOfRange { year: value.year() });
        }

        Ok(())
    }

    pub fn inner(&self) -> &ChronoNaiveDate {
        &self.0
    }
}

impl TryFrom<ChronoNaiveDate> for NaiveDate {
    type Error = DateTimeError;

    fn try_from(value: ChronoNaiveDate) -> Result<Self, Self::Error> {
        Self::verify(&value)?;

        Ok(Self(value))
    }
}

impl fmt::Display for NaiveDate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.format("%-d-%b-%Y"))
    }
}

#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum DateTimeError {
    #[error("Year {year} does not fit the wire format")]
    YearOutOfRange { year: i32 },
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn datetime_formats_with_zone() {
        let inner = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(1994, 2, 17, 15, 2, 23)
            .unwrap();
        let datetime = DateTime::try_from(inner).unwrap();

        assert_eq!(datetime.to_string(), "\"17-Feb-1994 15:02:23 +0200\"");
    }

    #[test]
    fn date_formats_without_padding() {
        let date = NaiveDate::try_from(ChronoNaiveDate::from_ymd_opt(2023, 7, 1).unwrap()).unwrap();

        assert_eq!(date.to_string(), "1-Jul-2023");
    }
}
