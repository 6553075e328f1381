use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Days since a client's enrollment, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub start: i64,
    pub end: i64,
}

impl AnalysisWindow {
    pub fn length(&self) -> i64 {
        self.end - self.start + 1
    }
}

/// The rows of source data an analysis may look at.
///
/// Every client enrolled between `first_enrollment_date` and
/// `last_enrollment_date` has complete data for every window, so the
/// newest window of the last enrollee ends at `last_date_data_required`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLimits {
    pub first_enrollment_date: NaiveDate,
    pub last_enrollment_date: NaiveDate,
    pub first_date_data_required: NaiveDate,
    pub last_date_data_required: NaiveDate,
    pub analysis_windows: Vec<AnalysisWindow>,
}

impl TimeLimits {
    /// Consecutive windows of `period_days` days, as many as are complete
    /// on `last_date_full_data`. `None` while not even one is.
    pub fn for_ts(
        first_enrollment_date: NaiveDate,
        last_date_full_data: NaiveDate,
        period_days: i64,
        num_dates_enrollment: i64,
    ) -> Option<Self> {
        if period_days < 1 || num_dates_enrollment < 1 {
            return None;
        }
        let last_enrollment_date = add_days(first_enrollment_date, num_dates_enrollment - 1)?;
        let dates_available = (last_date_full_data - last_enrollment_date).num_days() + 1;
        let n_windows = dates_available.div_euclid(period_days);
        if n_windows < 1 {
            return None;
        }

        let analysis_windows: Vec<_> = (0..n_windows)
            .map(|i| AnalysisWindow {
                start: i * period_days,
                end: (i + 1) * period_days - 1,
            })
            .collect();
        let last_window = analysis_windows[analysis_windows.len() - 1];
        Some(TimeLimits {
            first_enrollment_date,
            last_enrollment_date,
            first_date_data_required: first_enrollment_date,
            last_date_data_required: add_days(last_enrollment_date, last_window.end)?,
            analysis_windows,
        })
    }

    /// A single window starting `analysis_start_days` after enrollment.
    /// `None` if its data is not complete on `last_date_full_data`.
    pub fn for_single_analysis_window(
        first_enrollment_date: NaiveDate,
        last_date_full_data: NaiveDate,
        analysis_start_days: i64,
        analysis_length_dates: i64,
        num_dates_enrollment: i64,
    ) -> Option<Self> {
        if analysis_length_dates < 1 || num_dates_enrollment < 1 || analysis_start_days < 0 {
            return None;
        }
        let window = AnalysisWindow {
            start: analysis_start_days,
            end: analysis_start_days + analysis_length_dates - 1,
        };
        let last_enrollment_date = add_days(first_enrollment_date, num_dates_enrollment - 1)?;
        let last_date_data_required = add_days(last_enrollment_date, window.end)?;
        if last_date_data_required > last_date_full_data {
            return None;
        }
        Some(TimeLimits {
            first_enrollment_date,
            last_enrollment_date,
            first_date_data_required: add_days(first_enrollment_date, window.start)?,
            last_date_data_required,
            analysis_windows: vec![window],
        })
    }

    /// 1-based number of the newest window.
    pub fn window_index(&self) -> usize {
        self.analysis_windows.len()
    }

    /// The same limits restricted to the newest window.
    pub fn last_window_only(&self) -> Self {
        let last_window = self.analysis_windows[self.analysis_windows.len() - 1];
        TimeLimits {
            first_date_data_required: self.first_enrollment_date + Duration::days(last_window.start),
            analysis_windows: vec![last_window],
            ..self.clone()
        }
    }
}

/// Far beyond the calendar `NaiveDate` covers, well within `Duration`.
const MAX_DAY_OFFSET: i64 = 1_000_000_000;

/// `None` past the end of the calendar.
pub(crate) fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    if days.abs() > MAX_DAY_OFFSET {
        return None;
    }
    date.checked_add_signed(Duration::days(days))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd(y, m, d)
    }

    #[test]
    fn no_windows_before_enrollment_ends() {
        assert!(TimeLimits::for_ts(date(2019, 12, 1), date(2019, 12, 7), 1, 8).is_none());
        assert!(TimeLimits::for_ts(date(2019, 12, 1), date(2019, 11, 20), 1, 8).is_none());
    }

    #[test]
    fn first_daily_window_on_last_enrollment_date() {
        let limits = TimeLimits::for_ts(date(2019, 12, 1), date(2019, 12, 8), 1, 8).unwrap();
        assert_eq!(limits.last_enrollment_date, date(2019, 12, 8));
        assert_eq!(limits.analysis_windows, vec![AnalysisWindow { start: 0, end: 0 }]);
        assert_eq!(limits.last_date_data_required, date(2019, 12, 8));
    }

    #[test]
    fn weekly_windows_close_every_seven_days() {
        assert!(TimeLimits::for_ts(date(2019, 12, 1), date(2019, 12, 13), 7, 8).is_none());
        let limits = TimeLimits::for_ts(date(2019, 12, 1), date(2019, 12, 14), 7, 8).unwrap();
        assert_eq!(limits.window_index(), 1);
        let limits = TimeLimits::for_ts(date(2019, 12, 1), date(2019, 12, 27), 7, 8).unwrap();
        assert_eq!(limits.window_index(), 2);
        assert_eq!(limits.analysis_windows[1], AnalysisWindow { start: 7, end: 13 });
        assert_eq!(limits.last_date_data_required, date(2019, 12, 21));
    }

    #[test]
    fn last_window_only_moves_the_first_required_date() {
        let limits = TimeLimits::for_ts(date(2019, 12, 1), date(2019, 12, 27), 7, 8).unwrap();
        let last = limits.last_window_only();
        assert_eq!(last.analysis_windows, vec![AnalysisWindow { start: 7, end: 13 }]);
        assert_eq!(last.first_date_data_required, date(2019, 12, 8));
        assert_eq!(last.last_date_data_required, limits.last_date_data_required);
    }

    #[test]
    fn enrollment_past_the_calendar_is_never_ready() {
        let huge = i64::from(u32::MAX) + 1;
        assert!(TimeLimits::for_ts(date(2019, 12, 1), date(2020, 1, 1), 1, huge).is_none());
        assert!(TimeLimits::for_ts(date(2019, 12, 1), date(2020, 1, 1), 7, 200_000_001).is_none());
        assert!(
            TimeLimits::for_single_analysis_window(date(2019, 12, 1), date(2020, 1, 1), 0, 21, huge)
                .is_none()
        );
        assert!(add_days(date(2019, 12, 1), i64::MAX).is_none());
    }

    #[test]
    fn single_window_must_be_complete() {
        let limits =
            TimeLimits::for_single_analysis_window(date(2019, 12, 1), date(2020, 3, 1), 0, 84, 8)
                .unwrap();
        assert_eq!(limits.last_date_data_required, date(2020, 2, 29));
        assert_eq!(limits.analysis_windows[0].length(), 84);
        assert!(
            TimeLimits::for_single_analysis_window(date(2019, 12, 1), date(2020, 2, 28), 0, 84, 8)
                .is_none()
        );
    }
}
