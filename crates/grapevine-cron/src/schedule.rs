// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Schedule arithmetic: digest cron expressions per user timezone, the
//! daily cleanup slot, and the anti-burst stagger.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use croner::Cron;

use grapevine_core::GrapevineError;
use grapevine_core::types::DigestFrequency;
use grapevine_store::models::DigestSettings;

/// Per-user digest offset: +5 minutes per position, wrapping inside the
/// hour, so simultaneous settings never fire as one LLM burst.
pub fn stagger_minutes(position: usize) -> u32 {
    ((position % 12) * 5) as u32
}

/// Cron expression `(minute hour dom * dow)` for the user's digest slot.
pub fn digest_cron_expr(
    settings: &DigestSettings,
    stagger: u32,
) -> Result<String, GrapevineError> {
    let (hour, minute) = parse_send_time(&settings.send_time)?;
    let minute = minute + stagger;
    let hour = (hour + minute / 60) % 24;
    let minute = minute % 60;
    Ok(match settings.frequency {
        DigestFrequency::Daily => format!("{minute} {hour} * * *"),
        DigestFrequency::Weekly => format!("{minute} {hour} * * 1"),
        DigestFrequency::Monthly => format!("{minute} {hour} 1 * *"),
    })
}

/// The next digest slot after `now`, evaluated in the user's timezone and
/// returned in UTC.
pub fn next_digest_occurrence(
    settings: &DigestSettings,
    stagger: u32,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, GrapevineError> {
    let tz: Tz = settings
        .timezone
        .parse()
        .map_err(|_| GrapevineError::Validation(format!("unknown timezone {}", settings.timezone)))?;
    let expr = digest_cron_expr(settings, stagger)?;
    let cron: Cron = expr
        .parse()
        .map_err(|e| GrapevineError::Internal(format!("bad cron expression {expr}: {e}")))?;
    let next = cron
        .find_next_occurrence(&now.with_timezone(&tz), false)
        .map_err(|e| GrapevineError::Internal(format!("no next occurrence for {expr}: {e}")))?;
    Ok(next.with_timezone(&Utc))
}

/// The digest content window ending at `now`: since the last delivery, or
/// one period when there has been none.
pub fn digest_window(settings: &DigestSettings, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let period = Duration::days(i64::from(settings.frequency.period_days()));
    let from = settings
        .last_sent_at
        .filter(|last| *last > now - period * 2)
        .unwrap_or(now - period);
    (from, now)
}

/// The next `hour:minute` wall-clock occurrence in `tz`, in UTC. A slot
/// that does not exist on a DST-transition day slides to the next day.
pub fn next_local_time(now: DateTime<Utc>, tz: Tz, hour: u32, minute: u32) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    for day_offset in 0..3 {
        let date = local_now.date_naive() + Duration::days(day_offset);
        let candidate = tz
            .with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, 0)
            .earliest();
        if let Some(candidate) = candidate {
            if candidate > local_now {
                return candidate.with_timezone(&Utc);
            }
        }
    }
    // Unreachable for a sane clock; fall back to a day from now.
    now + Duration::days(1)
}

fn parse_send_time(raw: &str) -> Result<(u32, u32), GrapevineError> {
    let (h, m) = raw
        .split_once(':')
        .ok_or_else(|| GrapevineError::Validation(format!("send_time '{raw}' is not HH:MM")))?;
    let hour: u32 = h
        .parse()
        .map_err(|_| GrapevineError::Validation(format!("send_time '{raw}' is not HH:MM")))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| GrapevineError::Validation(format!("send_time '{raw}' is not HH:MM")))?;
    if hour >= 24 || minute >= 60 {
        return Err(GrapevineError::Validation(format!(
            "send_time '{raw}' out of range"
        )));
    }
    Ok((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn settings(frequency: DigestFrequency, send_time: &str, timezone: &str) -> DigestSettings {
        let mut s = DigestSettings::defaults(1);
        s.frequency = frequency;
        s.send_time = send_time.to_string();
        s.timezone = timezone.to_string();
        s
    }

    #[test]
    fn stagger_steps_by_five_and_wraps() {
        assert_eq!(stagger_minutes(0), 0);
        assert_eq!(stagger_minutes(1), 5);
        assert_eq!(stagger_minutes(11), 55);
        assert_eq!(stagger_minutes(12), 0);
    }

    #[test]
    fn cron_expressions_per_frequency() {
        let s = settings(DigestFrequency::Daily, "09:00", "UTC");
        assert_eq!(digest_cron_expr(&s, 0).unwrap(), "0 9 * * *");

        let s = settings(DigestFrequency::Weekly, "09:00", "UTC");
        assert_eq!(digest_cron_expr(&s, 10).unwrap(), "10 9 * * 1");

        let s = settings(DigestFrequency::Monthly, "23:58", "UTC");
        // Stagger overflow carries into the hour, wrapping midnight.
        assert_eq!(digest_cron_expr(&s, 5).unwrap(), "3 0 1 * *");
    }

    #[test]
    fn bad_send_time_is_rejected()  {
        let s = settings(DigestFrequency::Daily, "25:00", "UTC");
        assert!(digest_cron_expr(&s, 0).is_err());
        let s = settings(DigestFrequency::Daily, "nine", "UTC");
        assert!(digest_cron_expr(&s, 0).is_err());
    }

    #[test]
    fn next_occurrence_respects_the_user_timezone() {
        // 06:00 UTC = 09:00 Moscow; a 09:30 Moscow slot is half an hour out.
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap();
        let s = settings(DigestFrequency::Daily, "09:30", "Europe/Moscow");
        let next = next_digest_occurrence(&s, 0, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 6, 30, 0).unwrap());
    }

    #[test]
    fn weekly_lands_on_monday() {
        // 2026-03-02 is a Monday; asking after its slot lands a week later.
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let s = settings(DigestFrequency::Weekly, "09:00", "UTC");
        let next = next_digest_occurrence(&s, 0, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 0).unwrap());
        assert_eq!(next.weekday(), chrono::Weekday::Mon);
    }

    #[test]
    fn unknown_timezone_is_a_validation_error() {
        let s = settings(DigestFrequency::Daily, "09:00", "Mars/Olympus");
        assert!(matches!(
            next_digest_occurrence(&s, 0, Utc::now()),
            Err(GrapevineError::Validation(_))
        ));
    }

    #[test]
    fn next_local_time_today_or_tomorrow() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap();
        let next = next_local_time(now, chrono_tz::UTC, 3, 30);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 3, 30, 0).unwrap());

        let next = next_local_time(now, chrono_tz::UTC, 0, 30);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 3, 0, 30, 0).unwrap());
        assert_eq!(next.minute(), 30);
    }

    #[test]
    fn digest_window_uses_last_sent_when_recent() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let mut s = settings(DigestFrequency::Daily, "09:00", "UTC");

        let (from, to) = digest_window(&s, now);
        assert_eq!(to - from, Duration::days(1));

        s.last_sent_at = Some(now - Duration::hours(20));
        let (from, _) = digest_window(&s, now);
        assert_eq!(from, now - Duration::hours(20));

        // A stale delivery long ago does not blow the window open.
        s.last_sent_at = Some(now - Duration::days(30));
        let (from, _) = digest_window(&s, now);
        assert_eq!(from, now - Duration::days(1));
    }
}
