//! Read-side aggregation over the attendance ledger.
//!
//! Everything here is a pure query + fold: handlers own the request envelope,
//! this module owns the numbers. Percentages are ratios of present periods to
//! total recorded periods, rounded to two decimals, and 0 whenever the
//! denominator is 0.

use rusqlite::Connection;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub struct CalcError {
    pub code: &'static str,
    pub message: String,
}

impl CalcError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        CalcError {
            code,
            message: message.into(),
        }
    }

    fn db() -> Self {
        CalcError::new("internal", "database operation failed")
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn percentage(present: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(present as f64 / total as f64 * 100.0)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectBreakdown {
    pub subject: String,
    pub present: i64,
    pub total: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    pub present: i64,
    pub total: i64,
    pub percentage: f64,
    pub subjects: Vec<SubjectBreakdown>,
}

/// Month ratio plus a per-subject breakdown grouped by subject name.
pub fn monthly_summary(
    conn: &Connection,
    student_id: &str,
    month_key: &str,
) -> Result<MonthlySummary, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.name, a.status
             FROM attendance a
             JOIN subjects s ON s.id = a.subject_id
             WHERE a.student_id = ? AND substr(a.date, 1, 7) = ?",
        )
        .map_err(|_| CalcError::db())?;
    let rows = stmt
        .query_map((student_id, month_key), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| CalcError::db())?;

    let mut present = 0i64;
    let mut total = 0i64;
    let mut by_subject: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    for (subject, status) in rows {
        let slot = by_subject.entry(subject).or_insert((0, 0));
        slot.1 += 1;
        total += 1;
        if status == "P" {
            slot.0 += 1;
            present += 1;
        }
    }

    let subjects = by_subject
        .into_iter()
        .map(|(subject, (p, t))| SubjectBreakdown {
            subject,
            present: p,
            total: t,
            percentage: percentage(p, t),
        })
        .collect();

    Ok(MonthlySummary {
        present,
        total,
        percentage: percentage(present, total),
        subjects,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRecord {
    pub date: String,
    pub period: i64,
    pub start_time: String,
    pub end_time: String,
    pub subject: String,
    pub teacher: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub date: String,
    pub present: i64,
    pub total: i64,
    pub percentage: f64,
    pub records: Vec<DayRecord>,
}

pub fn daily_summary(
    conn: &Connection,
    student_id: &str,
    date: &str,
) -> Result<DailySummary, CalcError> {
    let records = day_records(conn, student_id, date, date)?;
    let total = records.len() as i64;
    let present = records.iter().filter(|r| r.status == "P").count() as i64;
    Ok(DailySummary {
        date: date.to_string(),
        present,
        total,
        percentage: percentage(present, total),
        records,
    })
}

/// Ledger rows for a student between two dates (inclusive), ordered by
/// date then period number.
pub fn day_records(
    conn: &Connection,
    student_id: &str,
    from: &str,
    to: &str,
) -> Result<Vec<DayRecord>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT a.date, p.number, p.start_time, p.end_time, s.name, t.name, a.status
             FROM attendance a
             JOIN periods p ON p.id = a.period_id
             JOIN subjects s ON s.id = a.subject_id
             JOIN teachers t ON t.id = a.teacher_id
             WHERE a.student_id = ? AND a.date >= ? AND a.date <= ?
             ORDER BY a.date, p.number",
        )
        .map_err(|_| CalcError::db())?;
    stmt.query_map((student_id, from, to), |r| {
        Ok(DayRecord {
            date: r.get(0)?,
            period: r.get(1)?,
            start_time: r.get(2)?,
            end_time: r.get(3)?,
            subject: r.get(4)?,
            teacher: r.get(5)?,
            status: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|_| CalcError::db())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub student_id: String,
    pub name: String,
    pub register_number: String,
    pub present: i64,
    pub total: i64,
    pub percentage: f64,
}

/// Descending by percentage; ties keep their prior relative order.
pub fn rank_descending(mut rows: Vec<RankedStudent>) -> Vec<RankedStudent> {
    rows.sort_by(|a, b| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(Ordering::Equal)
    });
    rows
}

pub fn low_attendance(ranked: &[RankedStudent]) -> Vec<RankedStudent> {
    ranked
        .iter()
        .filter(|s| s.percentage < 75.0)
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterRanking {
    pub total_classes_conducted: i64,
    pub students: Vec<RankedStudent>,
    pub low_attendance: Vec<RankedStudent>,
}

pub fn semester_ranking(
    conn: &Connection,
    department_id: &str,
    semester: i64,
    month_key: &str,
) -> Result<SemesterRanking, CalcError> {
    // Distinct (date, period) pairs among matching ledger rows. A period held
    // for only some subjects still counts once.
    let total_classes: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM (
               SELECT DISTINCT a.date, a.period_id
               FROM attendance a
               JOIN students st ON st.id = a.student_id
               WHERE st.department_id = ? AND st.semester = ? AND substr(a.date, 1, 7) = ?
             )",
            (department_id, semester, month_key),
            |r| r.get(0),
        )
        .map_err(|_| CalcError::db())?;

    let mut stmt = conn
        .prepare(
            "SELECT id, name, register_number
             FROM students
             WHERE department_id = ? AND semester = ?
             ORDER BY register_number",
        )
        .map_err(|_| CalcError::db())?;
    let cohort = stmt
        .query_map((department_id, semester), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| CalcError::db())?;

    let mut rows = Vec::with_capacity(cohort.len());
    for (student_id, name, register_number) in cohort {
        let summary = monthly_summary(conn, &student_id, month_key)?;
        rows.push(RankedStudent {
            student_id,
            name,
            register_number,
            present: summary.present,
            total: summary.total,
            percentage: summary.percentage,
        });
    }

    let ranked = rank_descending(rows);
    let low = low_attendance(&ranked);
    Ok(SemesterRanking {
        total_classes_conducted: total_classes,
        students: ranked,
        low_attendance: low,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherSubjectCount {
    pub subject: String,
    pub classes: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherMonthly {
    pub total_classes: i64,
    pub days_taught: i64,
    pub subjects: Vec<TeacherSubjectCount>,
}

/// A "class" is one distinct (subject, date, period) the teacher marked.
pub fn teacher_monthly(
    conn: &Connection,
    teacher_id: &str,
    month_key: &str,
) -> Result<TeacherMonthly, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT s.name, a.date, a.period_id
             FROM attendance a
             JOIN subjects s ON s.id = a.subject_id
             WHERE a.teacher_id = ? AND substr(a.date, 1, 7) = ?",
        )
        .map_err(|_| CalcError::db())?;
    let classes = stmt
        .query_map((teacher_id, month_key), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|_| CalcError::db())?;

    let total_classes = classes.len() as i64;
    let mut per_subject: BTreeMap<String, i64> = BTreeMap::new();
    let mut days: std::collections::HashSet<String> = std::collections::HashSet::new();
    for (subject, date) in classes {
        *per_subject.entry(subject).or_insert(0) += 1;
        days.insert(date);
    }

    Ok(TeacherMonthly {
        total_classes,
        days_taught: days.len() as i64,
        subjects: per_subject
            .into_iter()
            .map(|(subject, classes)| TeacherSubjectCount { subject, classes })
            .collect(),
    })
}

/// All-time present ratio of one student in one subject (student dashboard).
pub fn subject_percentage(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
) -> Result<f64, CalcError> {
    let (present, total): (i64, i64) = conn
        .query_row(
            "SELECT
               COALESCE(SUM(CASE WHEN status = 'P' THEN 1 ELSE 0 END), 0),
               COUNT(*)
             FROM attendance
             WHERE student_id = ? AND subject_id = ?",
            (student_id, subject_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(|_| CalcError::db())?;
    Ok(percentage(present, total))
}
