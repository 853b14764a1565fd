//! CSV export of the listing
//!
//! Exports exactly the records handed in (normally the current search view),
//! in the order given.

use chrono::{NaiveDate, Utc};
use preg_common::RegisteredPerson;
use serde::Serialize;

/// Column names, in order
pub const CSV_COLUMNS: [&str; 14] = [
    "Full Name",
    "Phone",
    "Email",
    "ID Number",
    "District",
    "Sector",
    "Cell",
    "Village",
    "Isibo",
    "Isibo Leader",
    "RPF Member",
    "House Number",
    "Education",
    "Housing Status",
];

/// A finished export, ready to be offered as a download
#[derive(Debug, Clone, Serialize)]
pub struct CsvExport {
    pub file_name: String,
    pub contents: String,
}

/// Quote a field, doubling any embedded quotes
fn escape(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn join_quoted(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| escape(field))
        .collect::<Vec<_>>()
        .join(",")
}

/// Header line; quoted like every data field
pub fn header_line() -> String {
    join_quoted(&CSV_COLUMNS)
}

fn row(person: &RegisteredPerson) -> String {
    let rpf_member = if person.rpf_member { "Yes" } else { "No" };

    join_quoted(&[
        person.full_name.as_str(),
        person.phone.as_str(),
        person.email.as_deref().unwrap_or(""),
        person.id_number.as_str(),
        person.district.as_str(),
        person.sector.as_str(),
        person.cell.as_str(),
        person.village.as_str(),
        person.isibo.as_str(),
        person.isibo_leader.as_str(),
        rpf_member,
        person.house_number.as_str(),
        person.education.as_str(),
        person.housing_status.as_str(),
    ])
}

/// Render the header plus one line per record, joined by `\n`
pub fn to_csv<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = &'a RegisteredPerson>,
{
    let mut lines = vec![header_line()];
    lines.extend(records.into_iter().map(row));
    lines.join("\n")
}

/// `registered_people_YYYY-MM-DD.csv`
pub fn export_file_name(date: NaiveDate) -> String {
    format!("registered_people_{}.csv", date.format("%Y-%m-%d"))
}

/// Build the export for today's UTC date
pub fn export_csv_today<'a, I>(records: I) -> CsvExport
where
    I: IntoIterator<Item = &'a RegisteredPerson>,
{
    export_csv(records, Utc::now().date_naive())
}

pub fn export_csv<'a, I>(records: I, date: NaiveDate) -> CsvExport
where
    I: IntoIterator<Item = &'a RegisteredPerson>,
{
    CsvExport {
        file_name: export_file_name(date),
        contents: to_csv(records),
    }
}
