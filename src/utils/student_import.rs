use calamine::{Data, Reader, open_workbook_auto_from_rs};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use utoipa::ToSchema;

/// Only this many row errors are reported back to the uploader.
const MAX_REPORTED_ERRORS: usize = 5;

#[derive(Debug, Display)]
pub enum ImportError {
    #[display(fmt = "Please upload a CSV or Excel file (.csv, .xlsx, .xls)")]
    UnsupportedFormat,
    #[display(fmt = "No data found in file")]
    Empty,
    #[display(fmt = "Failed to parse CSV file: {}", _0)]
    Csv(csv::Error),
    #[display(fmt = "Failed to read spreadsheet: {}", _0)]
    Spreadsheet(String),
}

impl std::error::Error for ImportError {}

/// A student as entered by staff, before it gets an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StudentInput {
    #[schema(example = "Arif Hossain")]
    pub name: String,
    #[schema(example = "CSE-2101")]
    pub roll_number: String,
    #[schema(example = "204")]
    pub room_number: String,
    #[schema(example = 2)]
    pub floor_number: i64,
    #[schema(example = 1)]
    pub bed_number: i64,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl StudentInput {
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.roll_number = self.roll_number.trim().to_string();
        self.room_number = self.room_number.trim().to_string();
        self.email = self.email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());
        self.phone = self.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        self
    }

    pub fn validate(&self, floor_count: u8) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Name is required".to_string());
        }
        if self.roll_number.trim().is_empty() {
            return Err("Roll Number is required".to_string());
        }
        if self.room_number.trim().is_empty() {
            return Err("Room Number is required".to_string());
        }
        if self.floor_number < 1 || self.floor_number > i64::from(floor_count) {
            return Err(format!("Floor Number must be between 1 and {floor_count}"));
        }
        if self.bed_number < 1 {
            return Err("Bed Number is required".to_string());
        }
        Ok(())
    }
}

/// One data row keyed by normalized header.
pub type RawRow = HashMap<String, String>;

/// `Roll Number`, `rollNumber` and `roll_number` all become `rollnumber`.
fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn extension(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

pub fn parse_upload(filename: &str, bytes: &[u8]) -> Result<Vec<RawRow>, ImportError> {
    let rows = match extension(filename).as_deref() {
        Some("csv") => parse_csv(bytes)?,
        Some("xlsx") | Some("xls") => parse_spreadsheet(bytes)?,
        _ => return Err(ImportError::UnsupportedFormat),
    };

    if rows.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok(rows)
}

fn is_blank(row: &RawRow) -> bool {
    row.values().all(|v| v.trim().is_empty())
}

fn parse_csv(bytes: &[u8]) -> Result<Vec<RawRow>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(ImportError::Csv)?
        .iter()
        .map(normalize_header)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(ImportError::Csv)?;
        let row: RawRow = headers
            .iter()
            .cloned()
            .zip(record.iter().map(str::to_string))
            .collect();
        if !is_blank(&row) {
            rows.push(row);
        }
    }
    Ok(rows)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn parse_spreadsheet(bytes: &[u8]) -> Result<Vec<RawRow>, ImportError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ImportError::Spreadsheet(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ImportError::Empty)?
        .map_err(|e| ImportError::Spreadsheet(e.to_string()))?;

    let mut rows_iter = range.rows();
    let headers: Vec<String> = match rows_iter.next() {
        Some(header_row) => header_row
            .iter()
            .map(|c| normalize_header(&cell_to_string(c)))
            .collect(),
        None => return Ok(Vec::new()),
    };

    let rows = rows_iter
        .map(|cells| {
            headers
                .iter()
                .cloned()
                .zip(cells.iter().map(cell_to_string))
                .collect::<RawRow>()
        })
        .filter(|row| !is_blank(row))
        .collect();

    Ok(rows)
}

fn field(row: &RawRow, key: &str) -> String {
    row.get(key).map(|v| v.trim().to_string()).unwrap_or_default()
}

fn number(row: &RawRow, key: &str) -> i64 {
    let raw = field(row, key);
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|f| f.trunc() as i64))
        .unwrap_or(0)
}

fn optional(row: &RawRow, key: &str) -> Option<String> {
    Some(field(row, key)).filter(|v| !v.is_empty())
}

pub fn row_to_student(row: &RawRow) -> StudentInput {
    StudentInput {
        name: field(row, "name"),
        roll_number: field(row, "rollnumber"),
        room_number: field(row, "roomnumber"),
        floor_number: number(row, "floornumber"),
        bed_number: number(row, "bednumber"),
        email: optional(row, "email"),
        phone: optional(row, "phone"),
    }
}

/// Validates every row; any failure rejects the batch. Error lines use
/// spreadsheet numbering, so the first data row is row 2.
pub fn validate_rows(rows: &[RawRow], floor_count: u8) -> Result<Vec<StudentInput>, Vec<String>> {
    let mut students = Vec::with_capacity(rows.len());
    let mut errors = Vec::new();
    let mut seen_rolls = HashSet::new();

    for (index, row) in rows.iter().enumerate() {
        let student = row_to_student(row);
        let checked = student.validate(floor_count).and_then(|()| {
            if seen_rolls.insert(student.roll_number.to_uppercase()) {
                Ok(())
            } else {
                Err(format!("Roll Number {} appears more than once", student.roll_number))
            }
        });
        match checked {
            Ok(()) => students.push(student),
            Err(msg) => errors.push(format!("Row {}: {}", index + 2, msg)),
        }
    }

    if errors.is_empty() {
        Ok(students)
    } else {
        Err(errors)
    }
}

pub fn summarize_errors(errors: &[String]) -> String {
    let mut message = format!(
        "Validation errors:\n{}",
        errors
            .iter()
            .take(MAX_REPORTED_ERRORS)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    );
    if errors.len() > MAX_REPORTED_ERRORS {
        message.push_str("\n...");
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_headers_accept_several_spellings() {
        let csv = "Name,Roll Number,room_number,floorNumber,Bed Number,Email\n\
                   Arif Hossain,CSE-2101,204,2,1,arif@example.edu\n\
                   ,,,,,\n\
                   Nusrat Jahan,EEE-1907,305,3,2,\n";

        let rows = parse_upload("students.CSV", csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);

        let students = validate_rows(&rows, 8).unwrap();
        assert_eq!(students[0].name, "Arif Hossain");
        assert_eq!(students[0].roll_number, "CSE-2101");
        assert_eq!(students[0].room_number, "204");
        assert_eq!(students[0].floor_number, 2);
        assert_eq!(students[0].email.as_deref(), Some("arif@example.edu"));
        assert_eq!(students[1].email, None);
    }

    #[test]
    fn invalid_rows_are_reported_with_sheet_numbering() {
        let csv = "name,rollNumber,roomNumber,floorNumber,bedNumber\n\
                   Arif,CSE-1,101,1,1\n\
                   ,CSE-2,101,1,2\n\
                   Rahim,CSE-3,101,9,1\n\
                   Karim,CSE-4,101,1,0\n";

        let rows = parse_upload("s.csv", csv.as_bytes()).unwrap();
        let errors = validate_rows(&rows, 8).unwrap_err();

        assert_eq!(
            errors,
            vec![
                "Row 3: Name is required".to_string(),
                "Row 4: Floor Number must be between 1 and 8".to_string(),
                "Row 5: Bed Number is required".to_string(),
            ]
        );
    }

    #[test]
    fn repeated_roll_numbers_within_a_file_are_rejected() {
        let csv = "name,rollNumber,roomNumber,floorNumber,bedNumber\n\
                   Arif,CSE-1,101,1,1\n\
                   Rahim,cse-1,102,1,1\n";

        let rows = parse_upload("s.csv", csv.as_bytes()).unwrap();
        let errors = validate_rows(&rows, 8).unwrap_err();
        assert_eq!(errors, vec!["Row 3: Roll Number cse-1 appears more than once".to_string()]);
    }

    #[test]
    fn error_summary_is_capped() {
        let errors: Vec<String> = (2..10).map(|n| format!("Row {n}: Name is required")).collect();
        let summary = summarize_errors(&errors);

        assert!(summary.starts_with("Validation errors:\nRow 2"));
        assert!(summary.contains("Row 6"));
        assert!(!summary.contains("Row 7"));
        assert!(summary.ends_with("\n..."));
        assert!(!summarize_errors(&errors[..2]).ends_with("..."));
    }

    #[test]
    fn unknown_extensions_and_empty_files_are_rejected() {
        assert!(matches!(
            parse_upload("students.pdf", b"x"),
            Err(ImportError::UnsupportedFormat)
        ));
        assert!(matches!(
            parse_upload("students", b"x"),
            Err(ImportError::UnsupportedFormat)
        ));
        assert!(matches!(
            parse_upload("students.csv", b"name,rollNumber\n"),
            Err(ImportError::Empty)
        ));
    }

    #[test]
    fn spreadsheet_floats_become_whole_numbers() {
        let row: RawRow = [
            ("name".to_string(), "A".to_string()),
            ("rollnumber".to_string(), "R1".to_string()),
            ("roomnumber".to_string(), "101".to_string()),
            ("floornumber".to_string(), "2.0".to_string()),
            ("bednumber".to_string(), cell_to_string(&Data::Float(3.0))),
        ]
        .into_iter()
        .collect();

        let student = row_to_student(&row);
        assert_eq!(student.floor_number, 2);
        assert_eq!(student.bed_number, 3);
    }
}
