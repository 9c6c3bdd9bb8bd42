//! Pure calendar math: the next annual occurrence of a month/day in a
//! zone, and wall-clock day offsets for early reminders.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tortik_core::error::{Result, TortikError};

/// Local hour reminders fire at.
pub const FIRE_HOUR: u32 = 9;

/// Parse an IANA zone name.
pub fn parse_zone(name: &str) -> Result<Tz> {
    name.parse::<Tz>().map_err(|_| TortikError::InvalidZone(name.to_string()))
}

/// Reject month/day pairs no year can represent. Feb 29 passes because
/// leap years exist; outside them it clamps to Feb 28.
pub fn validate_month_day(month: u32, day: u32) -> Result<()> {
    // Probing a leap year accepts every pair that is valid somewhere.
    if NaiveDate::from_ymd_opt(2000, month, day).is_some() {
        Ok(())
    } else {
        Err(TortikError::InvalidDate(format!("{day:02}.{month:02}")))
    }
}

/// The next 09:00-local instant matching (month, day), strictly after
/// `now`. Same-year when that composed instant is still ahead, else the
/// following year.
pub fn next_annual_occurrence(
    month: u32,
    day: u32,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    validate_month_day(month, day)?;
    let year = now.with_timezone(&tz).year();
    let this_year = occurrence_in_year(year, month, day, tz)?;
    if this_year > now {
        Ok(this_year)
    } else {
        occurrence_in_year(year + 1, month, day, tz)
    }
}

/// The instant `days` whole local days ahead of `occurrence`, keeping
/// the 09:00 wall-clock time in `tz`. DST shifts change the elapsed
/// seconds, never the local time-of-day.
pub fn offset_instant(occurrence: DateTime<Utc>, days: u16, tz: Tz) -> Result<DateTime<Utc>> {
    let local_date = occurrence.with_timezone(&tz).date_naive();
    let target = local_date
        .checked_sub_days(chrono::Days::new(u64::from(days)))
        .ok_or_else(|| TortikError::InvalidDate(format!("{days} days before {local_date}")))?;
    Ok(at_fire_hour(target, tz).with_timezone(&Utc))
}

fn occurrence_in_year(year: i32, month: u32, day: u32, tz: Tz) -> Result<DateTime<Utc>> {
    let date = clamped_date(year, month, day)
        .ok_or_else(|| TortikError::InvalidDate(format!("{day:02}.{month:02}")))?;
    Ok(at_fire_hour(date, tz).with_timezone(&Utc))
}

/// Largest valid day of (year, month) not exceeding `day`. Only Feb 29
/// actually clamps; validate_month_day rejects everything else.
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    (1..=day).rev().find_map(|d| NaiveDate::from_ymd_opt(year, month, d))
}

/// Resolve 09:00 on `date` in `tz`. An ambiguous wall-clock time (DST
/// fall-back) resolves to the earlier instant; inside a spring-forward
/// gap the first valid later hour is used.
fn at_fire_hour(date: NaiveDate, tz: Tz) -> DateTime<Tz> {
    let mut naive = date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(FIRE_HOUR));
    for _ in 0..24 {
        if let Some(resolved) = tz.from_local_datetime(&naive).earliest() {
            return resolved;
        }
        naive = naive + Duration::hours(1);
    }
    // No real zone has a gap spanning a whole day.
    tz.from_utc_datetime(&naive)
}
