//! Deterministic first-login passwords for provisioned accounts.
//!
//! One rule for both roles: the first five non-space characters of the
//! upper-cased name, followed by the birth year. When no date of birth is on
//! file the suffix falls back to a per-role default (students `2000`,
//! teachers `1234`). Hashing and verification live in the identity store,
//! not here.

use chrono::{Datelike, NaiveDate};

const STUDENT_FALLBACK_SUFFIX: &str = "2000";
const TEACHER_FALLBACK_SUFFIX: &str = "1234";

fn name_prefix(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .take(5)
        .collect::<String>()
        .to_uppercase()
}

fn dob_year(dob: Option<&str>) -> Option<String> {
    let parsed = NaiveDate::parse_from_str(dob?, "%Y-%m-%d").ok()?;
    Some(parsed.year().to_string())
}

pub fn student_password(name: &str, dob: Option<&str>) -> String {
    let suffix = dob_year(dob).unwrap_or_else(|| STUDENT_FALLBACK_SUFFIX.to_string());
    format!("{}{}", name_prefix(name), suffix)
}

pub fn teacher_password(name: &str, dob: Option<&str>) -> String {
    let suffix = dob_year(dob).unwrap_or_else(|| TEACHER_FALLBACK_SUFFIX.to_string());
    format!("{}{}", name_prefix(name), suffix)
}
