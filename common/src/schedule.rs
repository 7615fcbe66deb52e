// Cron schedule parsing and next fire time calculation for producers

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// A cron expression bound to the timezone it is evaluated in
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expression: String,
    schedule: CronSchedule,
    timezone: Tz,
}

impl CronTrigger {
    pub fn new(expression: &str, timezone: &str) -> Result<Self, ScheduleError> {
        Ok(Self {
            expression: expression.to_string(),
            schedule: parse_cron_expression(expression)?,
            timezone: parse_timezone(timezone)?,
        })
    }

    /// Next fire time strictly after `reference`
    pub fn next_after(&self, reference: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let reference_in_tz = reference.with_timezone(&self.timezone);

        self.schedule
            .after(&reference_in_tz)
            .next()
            .map(|next| next.with_timezone(&Utc))
            .ok_or_else(|| ScheduleError::NoNextExecution(self.expression.clone()))
    }
}

/// Parse and validate a cron expression with second precision
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    CronSchedule::from_str(expression).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Parse an IANA timezone name such as `UTC` or `Africa/Lagos`
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    Tz::from_str(name).map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_parse_valid_cron_expression() {
        assert!(parse_cron_expression("0 0 * * * *").is_ok());
        assert!(parse_cron_expression("0 0 */6 * * *").is_ok());
    }

    #[test]
    fn test_parse_invalid_cron_expression() {
        let result = parse_cron_expression("invalid");
        assert!(matches!(
            result,
            Err(ScheduleError::InvalidCronExpression { .. })
        ));
    }

    #[test]
    fn test_parse_invalid_timezone() {
        assert!(matches!(
            parse_timezone("Mars/Olympus"),
            Err(ScheduleError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_hourly_trigger_fires_on_the_hour() {
        let trigger = CronTrigger::new("0 0 * * * *", "UTC").unwrap();
        let reference = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap();
        let next = trigger.next_after(reference).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_next_after_is_strictly_later() {
        let trigger = CronTrigger::new("0 0 * * * *", "UTC").unwrap();
        let on_the_hour = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();
        let next = trigger.next_after(on_the_hour).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_trigger_respects_timezone() {
        // Midnight in Lagos (UTC+1) is 23:00 UTC the previous day
        let trigger = CronTrigger::new("0 0 0 * * *", "Africa/Lagos").unwrap();
        let reference = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let next = trigger.next_after(reference).unwrap();
        assert_eq!(next.hour(), 23);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 0).unwrap());
    }
}
