//! CSV row parser.
//!
//! Turns one `;`-separated export line into a typed [`RecordDraft`].
//! Columns are positional; short rows are padded and extra columns are
//! ignored. A row either yields a complete draft, is blank and skipped, or
//! yields a [`RowError`]; there is no partially parsed record.

use chrono::NaiveDate;
use thiserror::Error;

use pharma_types::{normalize_serial, RecordDraft};

use crate::forms::split_name_and_form;

/// Columns of an inventory export, in file order.
pub const COLUMNS: [&str; 16] = [
    "name",
    "manufacturer",
    "country",
    "serial",
    "price",
    "quantity",
    "total_price",
    "expiry_date",
    "category",
    "import_date",
    "internal_code",
    "wholesale_price",
    "retail_price",
    "distributor",
    "internal_id",
    "branch_number",
];

const COL_NAME: usize = 0;
const COL_MANUFACTURER: usize = 1;
const COL_COUNTRY: usize = 2;
const COL_SERIAL: usize = 3;
const COL_PRICE: usize = 4;
const COL_QUANTITY: usize = 5;
const COL_TOTAL_PRICE: usize = 6;
const COL_EXPIRY_DATE: usize = 7;
const COL_CATEGORY: usize = 8;
const COL_IMPORT_DATE: usize = 9;
const COL_INTERNAL_CODE: usize = 10;
const COL_WHOLESALE_PRICE: usize = 11;
const COL_RETAIL_PRICE: usize = 12;
const COL_DISTRIBUTOR: usize = 13;
const COL_INTERNAL_ID: usize = 14;

/// Categories whose product text carries a dosage form.
const PHARMACEUTICAL_CATEGORIES: [&str; 2] = ["лексредства", "pharmaceutical"];

const DATE_FORMAT: &str = "%d.%m.%Y";

/// A rejected row.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Row {row}: {message}")]
pub struct RowError {
    /// 1-based row number in the file
    pub row: usize,
    pub message: String,
    /// Columns as read
    pub raw: Vec<String>,
}

impl RowError {
    pub fn new<S: AsRef<str>>(row: usize, message: impl Into<String>, raw: &[S]) -> Self {
        Self {
            row,
            message: message.into(),
            raw: raw.iter().map(|c| c.as_ref().to_string()).collect(),
        }
    }

    /// Sample line stored in the task result.
    pub fn detail(&self) -> String {
        format!("Row error: {} | Data: {}", self.message, self.raw.join(";"))
    }
}

fn column<S: AsRef<str>>(columns: &[S], index: usize) -> &str {
    columns.get(index).map(|c| c.as_ref().trim()).unwrap_or("")
}

fn parse_number(field: &str, value: &str) -> Result<f64, String> {
    if value.is_empty() {
        return Ok(0.0);
    }
    value
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| format!("Invalid number in {}: '{}'", field, value))
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| format!("Invalid date format: {}", value))
}

fn is_pharmaceutical(category: &str) -> bool {
    let lower = category.to_lowercase();
    PHARMACEUTICAL_CATEGORIES.iter().any(|c| *c == lower)
}

/// Parse one row. `row` is the 1-based row number used in errors.
///
/// Returns `Ok(None)` for a row whose columns are all blank.
pub fn parse_row<S: AsRef<str>>(
    row: usize,
    columns: &[S],
) -> Result<Option<RecordDraft>, RowError> {
    if columns.iter().all(|c| c.as_ref().trim().is_empty()) {
        return Ok(None);
    }
    build_draft(columns).map(Some).map_err(|message| RowError::new(row, message, columns))
}

fn build_draft<S: AsRef<str>>(columns: &[S]) -> Result<RecordDraft, String> {
    let text = column(columns, COL_NAME);
    let category = column(columns, COL_CATEGORY);
    let (name, form) = if is_pharmaceutical(category) {
        split_name_and_form(text)
    } else if text.is_empty() {
        ("-".to_string(), "-".to_string())
    } else {
        (text.to_string(), "-".to_string())
    };

    let price = parse_number("price", column(columns, COL_PRICE))?;
    let quantity = parse_number("quantity", column(columns, COL_QUANTITY))?;
    let total_price = match parse_number("total_price", column(columns, COL_TOTAL_PRICE))? {
        total if total == 0.0 => price * quantity,
        total => total,
    };

    Ok(RecordDraft {
        name,
        form,
        manufacturer: column(columns, COL_MANUFACTURER).to_string(),
        country: column(columns, COL_COUNTRY).to_string(),
        serial: normalize_serial(column(columns, COL_SERIAL)),
        price,
        quantity,
        total_price,
        expiry_date: parse_date(column(columns, COL_EXPIRY_DATE))?,
        category: category.to_string(),
        import_date: parse_date(column(columns, COL_IMPORT_DATE))?,
        internal_code: column(columns, COL_INTERNAL_CODE).to_string(),
        wholesale_price: parse_number("wholesale_price", column(columns, COL_WHOLESALE_PRICE))?,
        retail_price: parse_number("retail_price", column(columns, COL_RETAIL_PRICE))?,
        distributor: column(columns, COL_DISTRIBUTOR).to_string(),
        internal_id: column(columns, COL_INTERNAL_ID).to_string(),
    })
}
