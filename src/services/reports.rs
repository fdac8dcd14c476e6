//! Monthly attendance report, its CSV export, and the per-child calendar.

use chrono::{Datelike, NaiveDate, Weekday};
use sqlx::SqlitePool;

use crate::database::local::{attendance as attendance_db, children as children_db};
use crate::models::attendance::{Attendance, CalendarDay, MonthlyReportRow};
use crate::models::roster::Child;

pub const CSV_HEADER: [&str; 5] = ["Criança", "Responsável", "Presença", "Falta", "Total"];

fn month_start(year: i32, month: u32) -> Result<NaiveDate, String> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| format!("Invalid month {}-{}", year, month))
}

/// One row per child with their present/absent counts for the month
pub fn build_monthly_report(
    children: Vec<Child>,
    attendance: &[Attendance],
    year: i32,
    month: u32,
) -> Vec<MonthlyReportRow> {
    children
        .into_iter()
        .map(|child| {
            let (present, absent) = attendance
                .iter()
                .filter(|a| a.child_id == child.id)
                .filter(|a| a.date.year() == year && a.date.month() == month)
                .fold((0, 0), |(p, ab), a| if a.present { (p + 1, ab) } else { (p, ab + 1) });

            MonthlyReportRow {
                child,
                present,
                absent,
                total: present + absent,
            }
        })
        .collect()
}

pub async fn monthly_report(
    pool: &SqlitePool,
    year: i32,
    month: u32,
) -> Result<Vec<MonthlyReportRow>, String> {
    month_start(year, month)?;
    let children = children_db::list_children(pool).await;
    let attendance = attendance_db::attendance_for_month(pool, year, month).await;
    Ok(build_monthly_report(children, &attendance, year, month))
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Header plus one line per report row, every field quoted
pub fn report_csv(rows: &[MonthlyReportRow]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(CSV_HEADER.iter().map(|h| quote(h)).collect::<Vec<_>>().join(","));

    for row in rows {
        let fields = [
            row.child.name.clone(),
            row.child.responsible.clone().unwrap_or_default(),
            row.present.to_string(),
            row.absent.to_string(),
            row.total.to_string(),
        ];
        lines.push(fields.iter().map(|f| quote(f)).collect::<Vec<_>>().join(","));
    }
    lines.join("\n")
}

/// `relatorio_2024_05.csv`
pub fn report_file_name(year: i32, month: u32) -> String {
    format!("relatorio_{}_{:02}.csv", year, month)
}

/// Monday through Friday of the month, with whatever was recorded for the child
pub fn build_month_calendar(
    child_id: &str,
    attendance: &[Attendance],
    year: i32,
    month: u32,
) -> Result<Vec<CalendarDay>, String> {
    let first = month_start(year, month)?;

    let days = first
        .iter_days()
        .take_while(|d| d.month() == month)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .map(|date| CalendarDay {
            date,
            day: date.day(),
            weekday: date.weekday(),
            present: attendance
                .iter()
                .find(|a| a.child_id == child_id && a.date == date)
                .map(|a| a.present),
        })
        .collect();
    Ok(days)
}

pub async fn month_calendar(
    pool: &SqlitePool,
    child_id: &str,
    year: i32,
    month: u32,
) -> Result<Vec<CalendarDay>, String> {
    let attendance = attendance_db::attendance_by_child(pool, child_id).await;
    build_month_calendar(child_id, &attendance, year, month)
}
