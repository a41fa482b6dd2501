//! Date alignment for periodic mosaics.
//!
//! Mosaics are computed per week (or per two weeks) so they can be reused across
//! runs. Arbitrary start/end dates are therefore snapped onto period boundaries:
//!
//! - the start moves *forward* to the next boundary Monday
//! - the end moves *backward* to the previous boundary Monday, so a partial
//!   trailing period is never included (the end is exclusive)
//!
//! For biweekly cadence a boundary Monday must also be "even" under the
//! configured `WeekParity`.

use chrono::{Datelike, Days, NaiveDate};

use crate::domain::{Cadence, Period, WeekParity};
use crate::error::{CoreError, Result};

/// Alignment policy: cadence plus the biweekly parity convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodAligner {
    cadence: Cadence,
    parity: WeekParity,
}

impl PeriodAligner {
    pub fn new(cadence: Cadence, parity: WeekParity) -> Result<Self> {
        if let WeekParity::Epoch(epoch) = parity {
            if epoch.weekday().num_days_from_monday() != 0 {
                return Err(CoreError::InvalidConfig(format!(
                    "week parity epoch {epoch} is not a Monday"
                )));
            }
        }
        Ok(Self { cadence, parity })
    }

    pub fn weekly() -> Self {
        Self {
            cadence: Cadence::Weekly,
            parity: WeekParity::IsoWeek,
        }
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Align `[start, end)` onto period boundaries.
    ///
    /// `end_date_subtract_days` is removed from `end` before snapping. With
    /// `end_date_subtract_days = 0` the operation is idempotent.
    pub fn align(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        end_date_subtract_days: u32,
    ) -> Result<(NaiveDate, NaiveDate)> {
        let end = if end_date_subtract_days > 0 {
            end.checked_sub_days(Days::new(u64::from(end_date_subtract_days)))
                .ok_or(CoreError::DateOutOfRange(end))?
        } else {
            end
        };

        let aligned_start = self.snap_forward(start)?;
        let aligned_end = self.snap_backward(end)?;

        if aligned_start >= aligned_end {
            return Err(CoreError::InvalidPeriod {
                start: aligned_start,
                end: aligned_end,
            });
        }

        Ok((aligned_start, aligned_end))
    }

    /// Whether `date` is a boundary Monday for this policy.
    pub fn is_boundary(&self, date: NaiveDate) -> bool {
        is_monday(date)
            && match self.cadence {
                Cadence::Weekly => true,
                Cadence::Biweekly => is_even_week(date, self.parity),
            }
    }

    /// The first boundary strictly after `boundary`.
    pub fn next_boundary(&self, boundary: NaiveDate) -> Result<NaiveDate> {
        let mut next = add_week(boundary)?;
        while !self.is_boundary(next) {
            next = add_week(next)?;
        }
        Ok(next)
    }

    /// Split an aligned range into consecutive periods.
    ///
    /// Under `WeekParity::IsoWeek` a biweekly period can span three weeks when it
    /// crosses the end of an ISO year with 53 weeks.
    pub fn enumerate_periods(&self, aligned_start: NaiveDate, aligned_end: NaiveDate) -> Result<Vec<Period>> {
        if !self.is_boundary(aligned_start) || !self.is_boundary(aligned_end) {
            return Err(CoreError::InvalidConfig(format!(
                "period range {aligned_start}..{aligned_end} is not aligned on {} boundaries",
                self.cadence.display_name()
            )));
        }
        if aligned_start >= aligned_end {
            return Err(CoreError::InvalidPeriod {
                start: aligned_start,
                end: aligned_end,
            });
        }

        let mut periods = Vec::new();
        let mut cur = aligned_start;
        while cur < aligned_end {
            let next = self.next_boundary(cur)?.min(aligned_end);
            periods.push(Period {
                start: cur,
                end: next,
                cadence: self.cadence,
            });
            cur = next;
        }
        Ok(periods)
    }

    fn snap_forward(&self, date: NaiveDate) -> Result<NaiveDate> {
        let mut monday = next_monday(date)?;
        while !self.is_boundary(monday) {
            monday = add_week(monday)?;
        }
        Ok(monday)
    }

    fn snap_backward(&self, date: NaiveDate) -> Result<NaiveDate> {
        let mut monday = previous_monday(date)?;
        while !self.is_boundary(monday) {
            monday = monday
                .checked_sub_days(Days::new(7))
                .ok_or(CoreError::DateOutOfRange(monday))?;
        }
        Ok(monday)
    }
}

/// Align with the default ISO-week parity convention.
pub fn align(
    cadence: Cadence,
    start: NaiveDate,
    end: NaiveDate,
    end_date_subtract_days: u32,
) -> Result<(NaiveDate, NaiveDate)> {
    PeriodAligner {
        cadence,
        parity: WeekParity::IsoWeek,
    }
    .align(start, end, end_date_subtract_days)
}

/// The Monday on or after `date`.
pub fn next_monday(date: NaiveDate) -> Result<NaiveDate> {
    let offset = date.weekday().num_days_from_monday();
    if offset == 0 {
        return Ok(date);
    }
    date.checked_add_days(Days::new(u64::from(7 - offset)))
        .ok_or(CoreError::DateOutOfRange(date))
}

/// The Monday on or before `date`.
pub fn previous_monday(date: NaiveDate) -> Result<NaiveDate> {
    let offset = date.weekday().num_days_from_monday();
    date.checked_sub_days(Days::new(u64::from(offset)))
        .ok_or(CoreError::DateOutOfRange(date))
}

fn is_monday(date: NaiveDate) -> bool {
    date.weekday().num_days_from_monday() == 0
}

fn is_even_week(monday: NaiveDate, parity: WeekParity) -> bool {
    match parity {
        WeekParity::IsoWeek => monday.iso_week().week() % 2 == 0,
        WeekParity::Epoch(epoch) => (monday - epoch).num_days().div_euclid(7).rem_euclid(2) == 0,
    }
}

fn add_week(date: NaiveDate) -> Result<NaiveDate> {
    date.checked_add_days(Days::new(7))
        .ok_or(CoreError::DateOutOfRange(date))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn weekly_snaps_start_forward_and_end_backward() {
        // 2024-03-01 is a Friday, 2024-03-31 a Sunday.
        let (s, e) = align(Cadence::Weekly, d(2024, 3, 1), d(2024, 3, 31), 0).unwrap();
        assert_eq!(s, d(2024, 3, 4));
        assert_eq!(e, d(2024, 3, 25));
    }

    #[test]
    fn weekly_alignment_always_yields_mondays() {
        let base = d(2023, 12, 1);
        for start_offset in 0..21u64 {
            for len in 14..60u64 {
                let start = base + Days::new(start_offset);
                let end = start + Days::new(len);
                let (s, e) = align(Cadence::Weekly, start, end, 0).unwrap();
                assert_eq!(s.weekday(), Weekday::Mon);
                assert_eq!(e.weekday(), Weekday::Mon);
                assert!(e > s);
                assert!(s >= start && e <= end);
                assert_eq!(align(Cadence::Weekly, s, e, 0).unwrap(), (s, e));
            }
        }
    }

    #[test]
    fn biweekly_start_lands_on_even_iso_week() {
        let (s, _) = align(Cadence::Biweekly, d(2024, 3, 1), d(2024, 6, 1), 0).unwrap();
        assert_eq!(s, d(2024, 3, 4));
        assert_eq!(s.iso_week().week(), 10);
    }

    #[test]
    fn biweekly_end_retreats_to_even_iso_week() {
        // Previous Monday of 2024-03-31 is 2024-03-25 (week 13) -> 2024-03-18 (week 12).
        let (_, e) = align(Cadence::Biweekly, d(2024, 3, 1), d(2024, 3, 31), 0).unwrap();
        assert_eq!(e, d(2024, 3, 18));
    }

    #[test]
    fn biweekly_alignment_is_idempotent() {
        let base = d(2020, 11, 2);
        for start_offset in 0..30u64 {
            let start = base + Days::new(start_offset);
            let end = start + Days::new(90);
            let aligned = align(Cadence::Biweekly, start, end, 0).unwrap();
            assert_eq!(align(Cadence::Biweekly, aligned.0, aligned.1, 0).unwrap(), aligned);
            assert_eq!(aligned.0.iso_week().week() % 2, 0);
            assert_eq!(aligned.1.iso_week().week() % 2, 0);
        }
    }

    #[test]
    fn biweekly_skips_week_53_and_week_1() {
        // 2020 has 53 ISO weeks; 2020-12-28 is week 53 and 2021-01-04 week 1.
        let (s, _) = align(Cadence::Biweekly, d(2020, 12, 28), d(2021, 3, 1), 0).unwrap();
        assert_eq!(s, d(2021, 1, 11));
    }

    #[test]
    fn subtract_days_applies_before_snapping() {
        let (_, e) = align(Cadence::Weekly, d(2024, 3, 4), d(2024, 3, 26), 0).unwrap();
        assert_eq!(e, d(2024, 3, 25));
        let (_, e) = align(Cadence::Weekly, d(2024, 3, 4), d(2024, 3, 26), 2).unwrap();
        assert_eq!(e, d(2024, 3, 18));
    }

    #[test]
    fn empty_period_is_rejected() {
        let err = align(Cadence::Weekly, d(2024, 3, 5), d(2024, 3, 10), 0).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidPeriod {
                start: d(2024, 3, 11),
                end: d(2024, 3, 4)
            }
        );
        assert!(align(Cadence::Weekly, d(2024, 3, 4), d(2024, 3, 4), 0).is_err());
    }

    #[test]
    fn epoch_parity_counts_weeks_from_epoch() {
        let aligner = PeriodAligner::new(Cadence::Biweekly, WeekParity::Epoch(d(2024, 1, 8))).unwrap();
        // 2024-03-04 is 8 weeks after the epoch -> even.
        let (s, e) = aligner.align(d(2024, 3, 1), d(2024, 3, 31), 0).unwrap();
        assert_eq!(s, d(2024, 3, 4));
        assert_eq!(e, d(2024, 3, 18));

        assert!(PeriodAligner::new(Cadence::Biweekly, WeekParity::Epoch(d(2024, 1, 9))).is_err());
    }

    #[test]
    fn enumerate_weekly_periods() {
        let aligner = PeriodAligner::weekly();
        let periods = aligner.enumerate_periods(d(2024, 3, 4), d(2024, 3, 25)).unwrap();
        assert_eq!(periods.len(), 3);
        assert!(periods.iter().all(|p| p.days() == 7));
        assert_eq!(periods[2].end, d(2024, 3, 25));
        assert_eq!(periods[0].label(), "2024-03-04");
    }

    #[test]
    fn enumerate_biweekly_periods_across_53_week_year() {
        let aligner = PeriodAligner::new(Cadence::Biweekly, WeekParity::IsoWeek).unwrap();
        let periods = aligner.enumerate_periods(d(2020, 12, 21), d(2021, 1, 25)).unwrap();
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].days(), 21);
        assert_eq!(periods[1].start, d(2021, 1, 11));
        assert_eq!(periods[1].days(), 14);
    }

    #[test]
    fn enumerate_rejects_unaligned_range() {
        let aligner = PeriodAligner::weekly();
        assert!(aligner.enumerate_periods(d(2024, 3, 5), d(2024, 3, 25)).is_err());
    }

    #[test]
    fn monday_helpers() {
        assert_eq!(next_monday(d(2024, 3, 4)).unwrap(), d(2024, 3, 4));
        assert_eq!(next_monday(d(2024, 3, 10)).unwrap(), d(2024, 3, 11));
        assert_eq!(previous_monday(d(2024, 3, 10)).unwrap(), d(2024, 3, 4));
    }
}
