use chrono::NaiveDate;
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use std::collections::HashMap;

use crate::model::{attendance::AttendanceRecord, student::Student};
use crate::utils::dates::ReportType;

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const REPORT_HEADERS: [&str; 7] = [
    "Date",
    "Student Name",
    "Roll Number",
    "Floor",
    "Room",
    "Status",
    "Marked At",
];
const REPORT_WIDTHS: [u32; 7] = [12, 25, 15, 8, 10, 10, 18];

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceReportRow {
    pub date: String,
    pub student_name: String,
    pub roll_number: String,
    pub floor: u8,
    pub room: String,
    pub status: String,
    pub marked_at: String,
}

/// Joins records with their students; records of unknown students are dropped.
/// Floor and room come from the student, matching the absentee sheet.
pub fn build_report_rows(
    records: &[AttendanceRecord],
    students: &HashMap<u64, Student>,
) -> Vec<AttendanceReportRow> {
    records
        .iter()
        .filter_map(|record| {
            let student = students.get(&record.student_id)?;
            Some(AttendanceReportRow {
                date: record.date.format("%Y-%m-%d").to_string(),
                student_name: student.name.clone(),
                roll_number: student.roll_number.clone(),
                floor: student.floor_number,
                room: student.room_number.clone(),
                status: record.status.to_uppercase(),
                marked_at: record.marked_at.format("%d/%m/%Y %H:%M").to_string(),
            })
        })
        .collect()
}

pub fn attendance_report_workbook(rows: &[AttendanceReportRow]) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();

    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Attendance Report")?;

        for (col, (header, width)) in REPORT_HEADERS.iter().zip(REPORT_WIDTHS).enumerate() {
            sheet.write_string_with_format(0, col as u16, *header, &bold)?;
            sheet.set_column_width(col as u16, width)?;
        }

        for (i, row) in rows.iter().enumerate() {
            let r = i as u32 + 1;
            sheet.write_string(r, 0, &row.date)?;
            sheet.write_string(r, 1, &row.student_name)?;
            sheet.write_string(r, 2, &row.roll_number)?;
            sheet.write_number(r, 3, row.floor)?;
            sheet.write_string(r, 4, &row.room)?;
            sheet.write_string(r, 5, &row.status)?;
            sheet.write_string(r, 6, &row.marked_at)?;
        }
    }

    workbook.save_to_buffer()
}

pub fn attendance_report_filename(report_type: ReportType, generated_on: NaiveDate) -> String {
    format!(
        "HostelTrack_{}_{}.xlsx",
        report_type,
        generated_on.format("%Y-%m-%d")
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbsentStudentRow {
    pub roll_number: String,
    pub name: String,
    pub floor: u8,
    pub room: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_students: u32,
    pub present: u32,
    pub absent: u32,
    pub absent_students: Vec<AbsentStudentRow>,
}

impl DailySummary {
    /// Two decimals with a trailing `%`.
    pub fn attendance_percentage(&self) -> String {
        if self.total_students == 0 {
            return "0.00%".to_string();
        }
        format!(
            "{:.2}%",
            f64::from(self.present) / f64::from(self.total_students) * 100.0
        )
    }
}

pub fn build_daily_summary(
    date: NaiveDate,
    records: &[AttendanceRecord],
    students: &[Student],
) -> DailySummary {
    let by_id: HashMap<u64, &Student> = students.iter().map(|s| (s.id, s)).collect();

    let absent_students: Vec<AbsentStudentRow> = records
        .iter()
        .filter(|r| r.date == date && r.is_absent())
        .filter_map(|r| {
            let student = by_id.get(&r.student_id)?;
            Some(AbsentStudentRow {
                roll_number: student.roll_number.clone(),
                name: student.name.clone(),
                floor: student.floor_number,
                room: student.room_number.clone(),
            })
        })
        .collect();

    let total_students = students.len() as u32;
    let absent = (absent_students.len() as u32).min(total_students);

    DailySummary {
        date,
        total_students,
        present: total_students - absent,
        absent,
        absent_students,
    }
}

pub fn daily_summary_workbook(summary: &DailySummary) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();

    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Summary")?;
        sheet.write_string_with_format(0, 0, "metric", &bold)?;
        sheet.write_string_with_format(0, 1, "value", &bold)?;
        sheet.set_column_width(0, 18)?;
        sheet.set_column_width(1, 12)?;

        sheet.write_string(1, 0, "Total Students")?;
        sheet.write_number(1, 1, summary.total_students)?;
        sheet.write_string(2, 0, "Present")?;
        sheet.write_number(2, 1, summary.present)?;
        sheet.write_string(3, 0, "Absent")?;
        sheet.write_number(3, 1, summary.absent)?;
        sheet.write_string(4, 0, "Attendance %")?;
        sheet.write_string(4, 1, summary.attendance_percentage())?;
    }

    if !summary.absent_students.is_empty() {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Absent Students")?;
        for (col, header) in ["rollNumber", "name", "floor", "room"].iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *header, &bold)?;
        }
        for (i, row) in summary.absent_students.iter().enumerate() {
            let r = i as u32 + 1;
            sheet.write_string(r, 0, &row.roll_number)?;
            sheet.write_string(r, 1, &row.name)?;
            sheet.write_number(r, 2, row.floor)?;
            sheet.write_string(r, 3, &row.room)?;
        }
    }

    workbook.save_to_buffer()
}

pub fn daily_summary_filename(date: NaiveDate) -> String {
    format!("Daily_Summary_{}.xlsx", date.format("%Y-%m-%d"))
}
