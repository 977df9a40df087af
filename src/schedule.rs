use chrono::{DateTime, Datelike, Duration, LocalResult, Months, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use thiserror::Error;

pub const MIN_DURATION_MINUTES: i64 = 1;
pub const MAX_DURATION_MINUTES: i64 = 720;
pub const MAX_OCCURRENCES: u32 = 1000;

/// The event categories an assignment can carry.
pub const EVENT_TYPES: &[&str] = &[
    "Academic",
    "Elective",
    "Therapy",
    "Vocational",
    "Testing",
    "Extra-curricular",
];

pub fn is_event_type(s: &str) -> bool {
    EVENT_TYPES.contains(&s)
}

/// Validation failures for scheduling input. These are caller errors, not
/// system failures; each maps to a stable IPC error code via `code()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("startTime plus either endTime or duration is required")]
    MissingTimeFields,
    #[error("duration {provided} does not match the supplied end time (computed {computed})")]
    DurationMismatch { provided: i64, computed: i64 },
    #[error("duration {0} minutes is outside {MIN_DURATION_MINUTES}..={MAX_DURATION_MINUTES}")]
    DurationOutOfRange(i64),
    #[error("recurrence end date is required for recurring assignments")]
    RecurrenceEndDateRequired,
    #[error("recurrence end date must be after the first occurrence")]
    RecurrenceEndDateInvalid,
    #[error("recurrence spans more than {MAX_OCCURRENCES} occurrences")]
    RecurrenceHorizonTooLarge,
    #[error("unknown recurrence: {0}")]
    UnknownRecurrence(String),
    #[error("unknown view: {0}")]
    UnknownViewType(String),
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
    #[error("invalid instant: {0}")]
    BadInstant(String),
    #[error("invalid date: {0}")]
    BadDate(String),
}

impl ScheduleError {
    pub fn code(&self) -> &'static str {
        match self {
            ScheduleError::MissingTimeFields => "missing_time_fields",
            ScheduleError::DurationMismatch { .. } => "duration_mismatch",
            ScheduleError::DurationOutOfRange(_) => "duration_out_of_range",
            ScheduleError::RecurrenceEndDateRequired => "recurrence_end_date_required",
            ScheduleError::RecurrenceEndDateInvalid => "recurrence_end_date_invalid",
            ScheduleError::RecurrenceHorizonTooLarge => "recurrence_horizon_too_large",
            ScheduleError::UnknownRecurrence(_)
            | ScheduleError::UnknownViewType(_)
            | ScheduleError::UnknownTimezone(_)
            | ScheduleError::BadInstant(_)
            | ScheduleError::BadDate(_) => "bad_params",
        }
    }
}

/// A validated assignment window. `end_utc` is always re-derived from
/// `start_utc + duration_minutes`, so the invariant holds exactly even when
/// the caller supplied an end instant with sub-minute drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub duration_minutes: i64,
}

pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, ScheduleError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ScheduleError::BadInstant(s.to_string()))
}

pub fn parse_date(s: &str) -> Result<NaiveDate, ScheduleError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ScheduleError::BadDate(s.to_string()))
}

pub fn parse_timezone(s: &str) -> Result<Tz, ScheduleError> {
    s.parse::<Tz>()
        .map_err(|_| ScheduleError::UnknownTimezone(s.to_string()))
}

/// RFC 3339 with a trailing `Z` and whole seconds. Every instant stored in
/// the workspace database goes through this, so lexicographic comparison in
/// SQL matches chronological order.
pub fn fmt_instant(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Resolve a raw (start, end?, duration?) triple into a `TimeWindow`.
///
/// Either the end instant or the duration must be present; when both are,
/// they must agree to the minute. Durations are bounded to `1..=720` minutes.
pub fn resolve_time_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    duration_minutes: Option<i64>,
) -> Result<TimeWindow, ScheduleError> {
    let start = start.ok_or(ScheduleError::MissingTimeFields)?;
    if end.is_none() && duration_minutes.is_none() {
        return Err(ScheduleError::MissingTimeFields);
    }

    let resolved = match end {
        Some(end) => {
            let ms = (end - start).num_milliseconds();
            // Round to the nearest minute, half away from start.
            let computed = (ms + 30_000).div_euclid(60_000);
            if let Some(provided) = duration_minutes {
                if provided != computed {
                    return Err(ScheduleError::DurationMismatch { provided, computed });
                }
            }
            computed
        }
        None => duration_minutes.unwrap_or_default(),
    };

    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&resolved) {
        return Err(ScheduleError::DurationOutOfRange(resolved));
    }

    Ok(TimeWindow {
        start_utc: start,
        end_utc: start + Duration::minutes(resolved),
        duration_minutes: resolved,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    None,
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    pub fn parse(s: &str) -> Result<Self, ScheduleError> {
        match s {
            "None" => Ok(Recurrence::None),
            "Daily" => Ok(Recurrence::Daily),
            "Weekly" => Ok(Recurrence::Weekly),
            "Monthly" => Ok(Recurrence::Monthly),
            other => Err(ScheduleError::UnknownRecurrence(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::None => "None",
            Recurrence::Daily => "Daily",
            Recurrence::Weekly => "Weekly",
            Recurrence::Monthly => "Monthly",
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Recurrence::None)
    }
}

/// Check a recurrence policy against the window it decorates and return the
/// end date to store: `None` for non-recurring policies (any supplied date is
/// cleared), the validated date otherwise.
pub fn validate_recurrence(
    kind: Recurrence,
    end_date: Option<NaiveDate>,
    start_utc: DateTime<Utc>,
) -> Result<Option<NaiveDate>, ScheduleError> {
    if !kind.is_recurring() {
        return Ok(None);
    }
    let end_date = end_date.ok_or(ScheduleError::RecurrenceEndDateRequired)?;
    if end_date <= start_utc.date_naive() {
        return Err(ScheduleError::RecurrenceEndDateInvalid);
    }
    Ok(Some(end_date))
}

/// Lazy, finite occurrence sequence for a recurrence. Restartable: cloning
/// (or rebuilding with the same arguments) yields an identical sequence.
#[derive(Debug, Clone)]
pub struct Occurrences {
    start_utc: DateTime<Utc>,
    kind: Recurrence,
    count: u32,
    next_index: u32,
}

impl Occurrences {
    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Iterator for Occurrences {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        if self.next_index >= self.count {
            return None;
        }
        let i = self.next_index;
        self.next_index += 1;
        match self.kind {
            Recurrence::None => Some(self.start_utc),
            Recurrence::Daily => self.start_utc.checked_add_signed(Duration::days(i64::from(i))),
            Recurrence::Weekly => self.start_utc.checked_add_signed(Duration::weeks(i64::from(i))),
            Recurrence::Monthly => self.start_utc.checked_add_months(Months::new(i)),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.count - self.next_index) as usize;
        (left, Some(left))
    }
}

/// Enumerate the occurrence instants of a recurrence, stepping 1 day, 7 days
/// or 1 calendar month from the window start. The final occurrence is the
/// last one whose UTC calendar date is on or before `end_date`. Monthly steps
/// clamp to the end of shorter months.
///
/// The occurrence count is computed up front and capped; callers are expected
/// to have run `validate_recurrence` already.
pub fn occurrences(
    kind: Recurrence,
    start_utc: DateTime<Utc>,
    end_date: NaiveDate,
) -> Result<Occurrences, ScheduleError> {
    let start_date = start_utc.date_naive();
    let count = match kind {
        Recurrence::None => 1,
        Recurrence::Daily => span_count((end_date - start_date).num_days(), 1),
        Recurrence::Weekly => span_count((end_date - start_date).num_days(), 7),
        Recurrence::Monthly => monthly_count(start_utc, start_date, end_date),
    };
    if count > i64::from(MAX_OCCURRENCES) {
        return Err(ScheduleError::RecurrenceHorizonTooLarge);
    }
    Ok(Occurrences {
        start_utc,
        kind,
        count: count as u32,
        next_index: 0,
    })
}

fn span_count(days: i64, step: i64) -> i64 {
    if days < 0 {
        0
    } else {
        days / step + 1
    }
}

fn monthly_count(start_utc: DateTime<Utc>, start_date: NaiveDate, end_date: NaiveDate) -> i64 {
    let months = i64::from(end_date.year() - start_date.year()) * 12
        + i64::from(end_date.month() as i32 - start_date.month() as i32);
    if months < 0 {
        return 0;
    }
    // The coarse month difference can overshoot by one when the end date's
    // day-of-month falls before the (possibly clamped) occurrence day.
    let last = start_utc.checked_add_months(Months::new(months as u32));
    match last {
        Some(dt) if dt.date_naive() <= end_date => months + 1,
        _ => months,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewType {
    Student,
    Cohort,
    Program,
}

impl ViewType {
    pub fn parse(s: &str) -> Result<Self, ScheduleError> {
        match s {
            "student" => Ok(ViewType::Student),
            "cohort" => Ok(ViewType::Cohort),
            "program" => Ok(ViewType::Program),
            other => Err(ScheduleError::UnknownViewType(other.to_string())),
        }
    }
}

/// Roster membership lookups the scope planner needs. Implemented for the
/// workspace database connection in `db.rs`; tests substitute an in-memory
/// map.
pub trait RosterDirectory {
    fn active_student_ids_in_cohort(&self, cohort_id: &str) -> anyhow::Result<Vec<String>>;
    fn cohort_ids_in_program(&self, program_id: &str) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScope {
    /// Deduplicated, sorted for deterministic query plans and payloads.
    pub student_ids: Vec<String>,
    pub day_start_utc: DateTime<Utc>,
    pub day_end_utc: DateTime<Utc>,
}

/// A cohort or program scope that expands to zero active students is a
/// distinct outcome, not an error and not a bare empty list: callers
/// short-circuit to an empty schedule without querying assignments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeOutcome {
    Resolved(ResolvedScope),
    Empty,
}

/// Expand a schedule view into the student ids it covers and the UTC range
/// for the requested calendar date in the given timezone.
pub fn resolve_scope(
    dir: &dyn RosterDirectory,
    view: ViewType,
    target_id: &str,
    date: NaiveDate,
    tz: Tz,
) -> anyhow::Result<ScopeOutcome> {
    let student_ids = match view {
        ViewType::Student => vec![target_id.to_string()],
        ViewType::Cohort => {
            let mut ids = dir.active_student_ids_in_cohort(target_id)?;
            ids.sort();
            ids.dedup();
            ids
        }
        ViewType::Program => {
            let mut ids = BTreeSet::new();
            for cohort_id in dir.cohort_ids_in_program(target_id)? {
                ids.extend(dir.active_student_ids_in_cohort(&cohort_id)?);
            }
            ids.into_iter().collect()
        }
    };

    if student_ids.is_empty() {
        return Ok(ScopeOutcome::Empty);
    }

    let (day_start_utc, day_end_utc) = day_bounds_utc(date, tz);
    Ok(ScopeOutcome::Resolved(ResolvedScope {
        student_ids,
        day_start_utc,
        day_end_utc,
    }))
}

/// The half-open UTC range `[local midnight of date, local midnight of the
/// next date)` in the given timezone. One explicit timezone and one boundary
/// convention for every date filter in the daemon.
pub fn day_bounds_utc(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_midnight(date, tz);
    let end = local_midnight(date.succ_opt().unwrap_or(date), tz);
    (start.with_timezone(&Utc), end.with_timezone(&Utc))
}

fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Tz> {
    let mut naive = date.and_time(NaiveTime::MIN);
    loop {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return dt,
            // DST fall-back repeats the hour around midnight; take the
            // earlier instant so the day covers both.
            LocalResult::Ambiguous(earlier, _) => return earlier,
            // DST spring-forward skipped local midnight; the day starts at
            // the first valid local time after it.
            LocalResult::None => naive += Duration::minutes(30),
        }
    }
}
