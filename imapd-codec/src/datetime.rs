//! Parsers for dates and datetimes.
//!
//! Both formats are fixed-width enough to parse field-by-field; chrono then
//! validates that the calendar date actually exists.

use std::str::from_utf8;

use abnf_core::streaming::{dquote, sp};
use chrono::{FixedOffset, LocalResult, NaiveDate as ChronoNaiveDate, NaiveTime, TimeZone};
use imapd_types::datetime::{DateTime, NaiveDate};
use nom::{
    branch::alt,
    bytes::streaming::{tag, tag_no_case, take_while_m_n},
    character::{is_digit, streaming::char},
    combinator::{map, map_res, opt, value},
    sequence::{delimited, tuple},
};

use crate::decode::{ImapErrorKind, ImapParseError, ImapResult};

/// `date = date-text / DQUOTE date-text DQUOTE`
pub(crate) fn date(input: &[u8]) -> ImapResult<NaiveDate> {
    fn date_text(input: &[u8]) -> ImapResult<NaiveDate> {
        let (remaining, (day, _, month, _, year)) =
            tuple((date_day, char('-'), date_month, char('-'), date_year))(input)?;

        let date = ChronoNaiveDate::from_ymd_opt(year.into(), month, day.into())
            .and_then(|date| NaiveDate::try_from(date).ok())
            .ok_or(nom::Err::Failure(ImapParseError {
                input,
                kind: ImapErrorKind::BadDateTime,
            }))?;

        Ok((remaining, date))
    }

    alt((delimited(dquote, date_text, dquote), date_text))(input)
}

/// `date-day = 1*2DIGIT`
fn date_day(input: &[u8]) -> ImapResult<u8> {
    digit_1_2(input)
}

/// `date-month = "Jan" / "Feb" / "Mar" / "Apr" / "May" / "Jun" /
///               "Jul" / "Aug" / "Sep" / "Oct" / "Nov" / "Dec"`
fn date_month(input: &[u8]) -> ImapResult<u32> {
    alt((
        value(1, tag_no_case(b"Jan")),
        value(2, tag_no_case(b"Feb")),
        value(3, tag_no_case(b"Mar")),
        value(4, tag_no_case(b"Apr")),
        value(5, tag_no_case(b"May")),
        value(6, tag_no_case(b"Jun")),
        value(7, tag_no_case(b"Jul")),
        value(8, tag_no_case(b"Aug")),
        value(9, tag_no_case(b"Sep")),
        value(10, tag_no_case(b"Oct")),
        value(11, tag_no_case(b"Nov")),
        value(12, tag_no_case(b"Dec")),
    ))(input)
}

/// `date-year = 4DIGIT`
fn date_year(input: &[u8]) -> ImapResult<u16> {
    digit_exactly(input, 4)
}

/// `date-day-fixed = (SP DIGIT) / 2DIGIT`
fn date_day_fixed(input: &[u8]) -> ImapResult<u8> {
    alt((
        map(tuple((sp, digit_exactly_u8(1))), |(_, day)| day),
        digit_exactly_u8(2),
    ))(input)
}

/// `date-time = DQUOTE date-day-fixed "-" date-month "-" date-year
///              SP time SP zone DQUOTE`
pub(crate) fn date_time(input: &[u8]) -> ImapResult<DateTime> {
    let (remaining, (day, _, month, _, year, _, time, _, zone)) = delimited(
        dquote,
        tuple((
            date_day_fixed,
            char('-'),
            date_month,
            char('-'),
            date_year,
            sp,
            time,
            sp,
            zone,
        )),
        dquote,
    )(input)?;

    let fail = nom::Err::Failure(ImapParseError {
        input,
        kind: ImapErrorKind::BadDateTime,
    });

    let date = ChronoNaiveDate::from_ymd_opt(year.into(), month, day.into()).ok_or_else(|| {
        nom::Err::Failure(ImapParseError {
            input,
            kind: ImapErrorKind::BadDateTime,
        })
    })?;

    let offset = FixedOffset::east_opt(zone).ok_or_else(|| {
        nom::Err::Failure(ImapParseError {
            input,
            kind: ImapErrorKind::BadDateTime,
        })
    })?;

    match offset.from_local_datetime(&date.and_time(time)) {
        LocalResult::Single(datetime) => match DateTime::try_from(datetime) {
            Ok(datetime) => Ok((remaining, datetime)),
            Err(_) => Err(fail),
        },
        _ => Err(fail),
    }
}

/// `time = 2DIGIT ":" 2DIGIT ":" 2DIGIT`
fn time(input: &[u8]) -> ImapResult<NaiveTime> {
    let (remaining, (hour, _, minute, _, second)) = tuple((
        digit_exactly_u8(2),
        char(':'),
        digit_exactly_u8(2),
        char(':'),
        digit_exactly_u8(2),
    ))(input)?;

    let time = NaiveTime::from_hms_opt(hour.into(), minute.into(), second.into()).ok_or(
        nom::Err::Failure(ImapParseError {
            input,
            kind: ImapErrorKind::BadDateTime,
        }),
    )?;

    Ok((remaining, time))
}

/// `zone = ("+" / "-") 4DIGIT`
///
/// Returns the offset in seconds east of UTC.
fn zone(input: &[u8]) -> ImapResult<i32> {
    let (remaining, (sign, hours, minutes)) = tuple((
        alt((value(1i32, char('+')), value(-1i32, char('-')))),
        digit_exactly_u8(2),
        digit_exactly_u8(2),
    ))(input)?;

    Ok((
        remaining,
        sign * (i32::from(hours) * 3600 + i32::from(minutes) * 60),
    ))
}

fn digit_1_2(input: &[u8]) -> ImapResult<u8> {
    map_res(
        map(take_while_m_n(1, 2, is_digit), |bytes| {
            from_utf8(bytes).unwrap()
        }),
        str::parse::<u8>,
    )(input)
}

fn digit_exactly(input: &[u8], n: usize) -> ImapResult<u16> {
    map_res(
        map(take_while_m_n(n, n, is_digit), |bytes| {
            from_utf8(bytes).unwrap()
        }),
        str::parse::<u16>,
    )(input)
}

fn digit_exactly_u8(n: usize) -> impl Fn(&[u8]) -> ImapResult<u8> {
    move |input| {
        map_res(
            map(take_while_m_n(n, n, is_digit), |bytes| {
                from_utf8(bytes).unwrap()
            }),
            str::parse::<u8>,
        )(input)
    }
}
