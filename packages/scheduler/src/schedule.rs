// ABOUTME: Schedule expressions for recurring and one-shot tasks
// ABOUTME: Parses 5/6/7-field cron, @aliases and "@once <RFC3339>" and computes next fire times

use crate::error::{Result, SchedulerError};
use chrono::{DateTime, Utc};
use std::str::FromStr;

const ONCE_PREFIX: &str = "@once ";
const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone)]
pub enum Schedule {
    Cron(Box<cron::Schedule>),
    Once(DateTime<Utc>),
}

impl Schedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let expr = expression.trim();
        let invalid = |reason: String| SchedulerError::InvalidSchedule {
            expression: expression.to_string(),
            reason,
        };

        if let Some(at) = expr.strip_prefix(ONCE_PREFIX) {
            let at = DateTime::parse_from_rfc3339(at.trim())
                .map_err(|e| invalid(e.to_string()))?;
            return Ok(Self::Once(at.with_timezone(&Utc)));
        }

        let normalized = if expr.starts_with('@') {
            expr.to_string()
        } else {
            let fields: Vec<&str> = expr.split_whitespace().collect();
            match fields.len() {
                5 => format!(
                    "0 {} {} {} {} {}",
                    fields[0],
                    fields[1],
                    fields[2],
                    fields[3],
                    translate_day_of_week(fields[4])
                ),
                6 | 7 => fields.join(" "),
                n => return Err(invalid(format!("expected 5, 6 or 7 fields, got {}", n))),
            }
        };

        cron::Schedule::from_str(&normalized)
            .map(|s| Self::Cron(Box::new(s)))
            .map_err(|e| invalid(e.to_string()))
    }

    /// Expression for a single fire at `at`
    pub fn once_expression(at: DateTime<Utc>) -> String {
        format!("{}{}", ONCE_PREFIX, at.to_rfc3339())
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::Once(_))
    }

    /// First fire time for a newly scheduled task. One-shots in the past fire immediately.
    pub fn first_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Once(at) => Some((*at).max(now)),
            Self::Cron(_) => self.next_after(now),
        }
    }

    /// Next fire strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&after).next(),
            Self::Once(at) => (*at > after).then_some(*at),
        }
    }
}

/// Map numeric day-of-week (0 or 7 = Sunday) onto day names.
fn translate_day_of_week(field: &str) -> String {
    let map_token = |token: &str| -> String {
        match token.parse::<usize>() {
            Ok(n) if n <= 7 => DAY_NAMES[n % 7].to_string(),
            _ => token.to_string(),
        }
    };

    field
        .split(',')
        .map(|part| {
            let (base, step) = match part.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (part, None),
            };
            let base = match base.split_once('-') {
                Some((from, to)) => format!("{}-{}", map_token(from), map_token(to)),
                None if base == "*" || base == "?" => base.to_string(),
                None => map_token(base),
            };
            match step {
                Some(step) => format!("{}/{}", base, step),
                None => base,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
