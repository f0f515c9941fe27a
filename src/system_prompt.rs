//! System prompt construction
//!
//! Fresh threads open with a system message describing the assistant and
//! the current time in a handful of common zones, so scheduling questions
//! can be answered without a tool call.

use chrono::{DateTime, Datelike, FixedOffset, Utc};
use std::fmt::Write;

const BASE_PROMPT: &str = r"You are a versatile AI assistant named Archer.
Provide concise, relevant assistance tailored to each request from users.

This is a private thread between you and the user.

Note that context is sent in order of the most recent message last.
Do not respond to messages in the context, as they have already been answered.

You have access to tools that can look things up or take actions on the user's behalf.
Some tools require the user to authorize access first; when that happens the user is
asked to authorize and the conversation continues once they have.

You may call several tools in one response when they are independent, or plan to call
them in sequence when one depends on another.

When discussing times or scheduling, be aware of the user's potential time zone
and provide relevant time conversions when appropriate.";

const CLOSING: &str = r"Be professional and friendly.
Don't ask for clarification unless absolutely necessary.
Don't use user names in your response.";

/// (label, standard offset in hours, daylight-saving rule)
const ZONES: &[(&str, i32, Dst)] = &[
    ("UTC", 0, Dst::None),
    ("Eastern Time (ET)", -5, Dst::NorthAmerica),
    ("Central Time (CT)", -6, Dst::NorthAmerica),
    ("Mountain Time (MT)", -7, Dst::NorthAmerica),
    ("Pacific Time (PT)", -8, Dst::NorthAmerica),
    ("Central European Time (CET)", 1, Dst::Europe),
    ("Japan Standard Time (JST)", 9, Dst::None),
    ("Australian Eastern Time (AET)", 10, Dst::SouthernHemisphere),
];

/// Month-granularity approximation of daylight saving
#[derive(Clone, Copy)]
enum Dst {
    None,
    NorthAmerica,
    Europe,
    SouthernHemisphere,
}

impl Dst {
    fn active(self, month: u32) -> bool {
        match self {
            Dst::None => false,
            Dst::NorthAmerica => (3..=11).contains(&month),
            Dst::Europe => (3..=10).contains(&month),
            Dst::SouthernHemisphere => month <= 4 || month >= 10,
        }
    }
}

/// Current time in each listed zone, one per line
pub fn format_world_times(now: DateTime<Utc>) -> String {
    let mut out = String::new();
    for (label, hours, dst) in ZONES {
        let hours = hours + i32::from(dst.active(now.month()));
        let Some(offset) = FixedOffset::east_opt(hours * 3600) else {
            continue;
        };
        let local = now.with_timezone(&offset);
        let _ = writeln!(out, "{label}: {}", local.format("%Y-%m-%d %H:%M:%S"));
    }
    out.trim_end().to_string()
}

/// Build the system prompt for a thread started at `now`
pub fn build_system_prompt(now: DateTime<Utc>) -> String {
    format!(
        "{BASE_PROMPT}\n\nCurrent times around the world:\n{}\n\n{CLOSING}",
        format_world_times(now)
    )
}
