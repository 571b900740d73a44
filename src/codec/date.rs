//! Hand-rolled Julian-day calendar conversion.
//!
//! The wire `date` type transports signed days relative to 2000-01-01; this
//! module converts between that integer and a (year, month, day) triple using
//! the conventional integer Julian-day formulation, not a calendar crate. A
//! day-of-week/day-of-month mixup here is the classic way to break the
//! round-trip property, so the conversion always operates on day-of-month.

/// PostgreSQL's date epoch (2000-01-01) expressed as a Julian Day Number.
const POSTGRES_EPOCH_JDN: i32 = 2_451_545;

/// Absolute Julian Day Number for a (year, month, day-of-month) triple.
pub fn date2j(year: i32, month: u32, day: u32) -> i32 {
    let (y, m) = if month > 2 {
        (year + 4800, month as i32 + 1)
    } else {
        (year + 4799, month as i32 + 13)
    };
    let century = y.div_euclid(100);
    let mut jdn = y * 365 - 32167;
    jdn += y.div_euclid(4) - century + century.div_euclid(4);
    jdn += 7834 * m / 256 + day as i32;
    jdn
}

/// Inverse of [`date2j`]: Julian Day Number to (year, month, day-of-month).
pub fn j2date(jdn: i32) -> (i32, u32, u32) {
    let mut julian = jdn as i64 + 32044;
    let quad = julian.div_euclid(146097);
    let extra = (julian - quad * 146097) * 4 + 3;
    julian += 60 + quad * 3 + extra.div_euclid(146097);
    let quad = julian.div_euclid(1461);
    julian -= quad * 1461;
    let mut y = julian * 4 / 1461;
    julian = if y != 0 {
        (julian + 305) % 365
    } else {
        (julian + 306) % 366
    } + 123;
    y += quad * 4;
    let year = (y - 4800) as i32;
    let quad = julian * 2141 / 65536;
    let day = (julian - 7834 * quad / 256) as u32;
    let month = ((quad + 10) % 12 + 1) as u32;
    (year, month, day)
}

/// Days since 2000-01-01 for a (year, month, day) triple — the wire value of
/// the `date` type.
pub fn date_to_pg_days(year: i32, month: u32, day: u32) -> i32 {
    date2j(year, month, day) - POSTGRES_EPOCH_JDN
}

/// Inverse of [`date_to_pg_days`].
pub fn pg_days_to_date(days: i32) -> (i32, u32, u32) {
    j2date(days + POSTGRES_EPOCH_JDN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_round_trips_to_zero_days() {
        assert_eq!(date_to_pg_days(2000, 1, 1), 0);
        assert_eq!(pg_days_to_date(0), (2000, 1, 1));
    }

    #[test]
    fn round_trip_over_two_centuries() {
        for year in 1900..=2100 {
            for &(month, day) in &[(1u32, 1u32), (2, 28), (6, 15), (12, 31)] {
                let jd = date2j(year, month, day);
                assert_eq!(j2date(jd), (year, month, day), "year={year} month={month} day={day}");
            }
        }
    }

    #[test]
    fn handles_leap_day() {
        let jd = date2j(2024, 2, 29);
        assert_eq!(j2date(jd), (2024, 2, 29));
    }
}
