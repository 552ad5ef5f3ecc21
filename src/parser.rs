use std::io::Cursor;
use std::sync::OnceLock;

use calamine::{Data, Reader};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::{CuentasError, Result};
use crate::models::RawRow;
use crate::normalizer::{normalize_whitespace, strip_diacritics};

/// Days between the spreadsheet epoch (1899-12-30) and 1970-01-01.
const SERIAL_EPOCH_OFFSET: f64 = 25569.0;
const DEFAULT_SHEET: &str = "hoja1";

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// Spreadsheet-agnostic cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    /// Native date cell, as a spreadsheet serial.
    Date(f64),
}

impl Cell {
    fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Number(n) | Cell::Date(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Some(format!("{}", *n as i64))
                } else {
                    Some(n.to_string())
                }
            }
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::String(s) => Cell::Text(s.clone()),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(dt) => Cell::Date(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(_) | Data::Empty => Cell::Empty,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn normalize_header(value: &str) -> String {
    normalize_whitespace(&strip_diacritics(value).to_lowercase())
}

/// Parse a locale-formatted amount. European (`1.234,56`) and US (`1,234.56`)
/// grouping are told apart by whichever separator comes last.
pub fn parse_amount(raw: &str) -> f64 {
    let mut s: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if s.is_empty() {
        return 0.0;
    }

    let last_comma = s.rfind(',');
    let last_dot = s.rfind('.');
    match (last_comma, last_dot) {
        (Some(comma), Some(dot)) => {
            if comma > dot {
                s = s.replace('.', "").replacen(',', ".", 1);
            } else {
                s = s.replace(',', "");
            }
        }
        (Some(_), None) => s = s.replacen(',', ".", 1),
        (None, Some(_)) if s.matches('.').count() > 1 => s = s.replace('.', ""),
        _ => {}
    }
    leading_float(&s).unwrap_or(0.0)
}

/// Parse the longest numeric prefix, the way a lenient float reader would.
fn leading_float(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut end = 0;
    if bytes.first() == Some(&b'-') {
        end = 1;
    }
    let mut seen_digit = false;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }
    if !seen_digit {
        return None;
    }
    s[..end].trim_end_matches('.').parse().ok()
}

pub fn serial_to_date(serial: f64) -> Option<String> {
    if !serial.is_finite() {
        return None;
    }
    let millis = ((serial - SERIAL_EPOCH_OFFSET) * 86_400.0 * 1000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.date_naive().format("%Y-%m-%d").to_string())
}

fn dmy_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,2})[/-](\d{1,2})[/-](\d{2,4})(?:[ T].*)?$").expect("static date pattern")
    })
}

/// Parse `DD/MM/YYYY`, `DD-MM-YY` and friends, falling back to ISO forms.
pub fn parse_date_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(caps) = dmy_pattern().captures(trimmed) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year_text = &caps[3];
        let year: i32 = if year_text.len() == 2 {
            format!("20{year_text}").parse().ok()?
        } else {
            year_text.parse().ok()?
        };
        if (1..=31).contains(&day) && (1..=12).contains(&month) && year > 1900 {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return Some(date.format("%Y-%m-%d").to_string());
            }
        }
    }

    parse_generic_date(trimmed).map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_generic_date(s: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc().date());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%d %b %Y", "%b %d %Y", "%B %d, %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}

pub fn parse_date_cell(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Empty => None,
        Cell::Number(n) | Cell::Date(n) => serial_to_date(*n),
        Cell::Text(s) => parse_date_text(s),
    }
}

fn parse_amount_cell(cell: &Cell) -> f64 {
    match cell {
        Cell::Number(n) => *n,
        Cell::Text(s) => parse_amount(s),
        Cell::Date(_) | Cell::Empty => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Header detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Date,
    ValueDate,
    Description,
    Amount,
    Balance,
    Reference1,
    Reference2,
}

impl Column {
    fn label(&self) -> &'static str {
        match self {
            Column::Date => "F. Operativa",
            Column::ValueDate => "F. Valor",
            Column::Description => "Concepto",
            Column::Amount => "Importe",
            Column::Balance => "Saldo",
            Column::Reference1 => "Referencia 1",
            Column::Reference2 => "Referencia 2",
        }
    }

    fn from_header(header: &str) -> Option<Self> {
        match normalize_header(header).as_str() {
            "f. operativa" | "fecha operativa" | "fecha operacion" | "fecha" | "date" => {
                Some(Column::Date)
            }
            "f. valor" | "fecha valor" | "value date" => Some(Column::ValueDate),
            "concepto" | "descripcion" | "description" => Some(Column::Description),
            "importe" | "amount" => Some(Column::Amount),
            "saldo" | "balance" => Some(Column::Balance),
            "referencia 1" => Some(Column::Reference1),
            "referencia 2" => Some(Column::Reference2),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct HeaderMap {
    date: Option<usize>,
    value_date: Option<usize>,
    description: Option<usize>,
    amount: Option<usize>,
    balance: Option<usize>,
    reference1: Option<usize>,
    reference2: Option<usize>,
}

impl HeaderMap {
    fn from_row(row: &[Cell]) -> Self {
        let mut map = HeaderMap::default();
        for (idx, cell) in row.iter().enumerate() {
            let Some(text) = cell.as_text() else { continue };
            let slot = match Column::from_header(&text) {
                Some(Column::Date) => &mut map.date,
                Some(Column::ValueDate) => &mut map.value_date,
                Some(Column::Description) => &mut map.description,
                Some(Column::Amount) => &mut map.amount,
                Some(Column::Balance) => &mut map.balance,
                Some(Column::Reference1) => &mut map.reference1,
                Some(Column::Reference2) => &mut map.reference2,
                None => continue,
            };
            // later duplicates win, as a header lookup table would
            *slot = Some(idx);
        }
        map
    }

    fn missing_required(&self) -> Vec<String> {
        [
            (Column::Date, self.date),
            (Column::Description, self.description),
            (Column::Amount, self.amount),
        ]
        .into_iter()
        .filter(|(_, idx)| idx.is_none())
        .map(|(col, _)| col.label().to_string())
        .collect()
    }
}

fn is_header_row(row: &[Cell]) -> bool {
    row.iter()
        .filter_map(Cell::as_text)
        .any(|t| Column::from_header(&t) == Some(Column::Date))
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ParsedStatement {
    pub rows: Vec<RawRow>,
    /// Data rows dropped for a missing date or description.
    pub skipped: usize,
    pub sheet: String,
}

/// Parse a statement from its raw bytes: XLSX/XLS/ODS workbooks through
/// calamine, anything else as delimited text.
pub fn parse_statement(bytes: &[u8]) -> Result<ParsedStatement> {
    let (sheet, grid) = if is_workbook(bytes) {
        read_workbook(bytes)?
    } else {
        ("csv".to_string(), read_delimited(bytes)?)
    };
    let mut parsed = parse_grid(&grid)?;
    parsed.sheet = sheet;
    Ok(parsed)
}

fn is_workbook(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0])
}

fn read_workbook(bytes: &[u8]) -> Result<(String, Vec<Vec<Cell>>)> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let names = workbook.sheet_names();
    let sheet = names
        .iter()
        .find(|n| n.eq_ignore_ascii_case(DEFAULT_SHEET))
        .or_else(|| names.first())
        .cloned()
        .ok_or_else(|| CuentasError::MissingHeader(vec![Column::Date.label().to_string()]))?;
    let range = workbook.worksheet_range(&sheet)?;
    let grid = range
        .rows()
        .map(|row| row.iter().map(Cell::from).collect())
        .collect();
    Ok((sheet, grid))
}

fn read_delimited(bytes: &[u8]) -> Result<Vec<Vec<Cell>>> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let delimiter = sniff_delimiter(bytes);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(bytes);
    let mut grid = Vec::new();
    for record in rdr.byte_records() {
        let record = record?;
        grid.push(
            record
                .iter()
                .map(|field| {
                    let text = String::from_utf8_lossy(field);
                    if text.trim().is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(text.into_owned())
                    }
                })
                .collect(),
        );
    }
    Ok(grid)
}

fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let first_line = bytes
        .split(|b| *b == b'\n')
        .find(|line| line.iter().any(|b| !b.is_ascii_whitespace()));
    match first_line {
        Some(line) if line.contains(&b';') => b';',
        _ => b',',
    }
}

/// Locate the header row and turn the rows below it into `RawRow`s.
pub fn parse_grid(grid: &[Vec<Cell>]) -> Result<ParsedStatement> {
    // A preamble line like "Fecha | 05/11/2025" also carries a date label, so
    // keep scanning until a row has every required column.
    let mut closest: Option<Vec<String>> = None;
    let mut found = None;
    for (idx, row) in grid.iter().enumerate() {
        if !is_header_row(row) {
            continue;
        }
        let header = HeaderMap::from_row(row);
        let missing = header.missing_required();
        if missing.is_empty() {
            found = Some((idx, header));
            break;
        }
        if closest.as_ref().map_or(true, |c| missing.len() < c.len()) {
            closest = Some(missing);
        }
    }
    let Some((header_idx, header)) = found else {
        return Err(CuentasError::MissingHeader(
            closest.unwrap_or_else(|| vec![Column::Date.label().to_string()]),
        ));
    };

    let (Some(date_idx), Some(desc_idx), Some(amount_idx)) =
        (header.date, header.description, header.amount)
    else {
        return Err(CuentasError::MissingHeader(header.missing_required()));
    };

    let empty = Cell::Empty;
    let mut parsed = ParsedStatement::default();
    for row in &grid[header_idx + 1..] {
        if row.iter().all(Cell::is_blank) {
            continue;
        }
        let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).unwrap_or(&empty);

        let date = parse_date_cell(cell(Some(date_idx)));
        let description = cell(Some(desc_idx)).as_text().unwrap_or_default();
        let (Some(date), false) = (date, description.is_empty()) else {
            parsed.skipped += 1;
            continue;
        };

        parsed.rows.push(RawRow {
            date,
            value_date: parse_date_cell(cell(header.value_date)),
            description,
            amount: parse_amount_cell(cell(Some(amount_idx))),
            balance: header.balance.map(|i| parse_amount_cell(row.get(i).unwrap_or(&empty))),
            reference1: cell(header.reference1).as_text().filter(|s| !s.trim().is_empty()),
            reference2: cell(header.reference2).as_text().filter(|s| !s.trim().is_empty()),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Cell {
        if s.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(s.to_string())
        }
    }

    fn grid(rows: &[&[&str]]) -> Vec<Vec<Cell>> {
        rows.iter().map(|r| r.iter().map(|c| text(c)).collect()).collect()
    }

    const HEADER: &[&str] = &[
        "F. Operativa", "Concepto", "F. Valor", "Importe", "Saldo", "Referencia 1", "Referencia 2",
    ];

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("-10,50"), -10.5);
        assert_eq!(parse_amount("1.234,56"), 1234.56);
        assert_eq!(parse_amount("1,234.56"), 1234.56);
        assert_eq!(parse_amount("1.234.567"), 1234567.0);
        assert_eq!(parse_amount("12.5"), 12.5);
        assert_eq!(parse_amount("-1.000,00 EUR"), -1000.0);
        assert_eq!(parse_amount("€ 42"), 42.0);
        assert_eq!(parse_amount(""), 0.0);
        assert_eq!(parse_amount("n/a"), 0.0);
        assert_eq!(parse_amount("-"), 0.0);
    }

    #[test]
    fn test_parse_date_text() {
        assert_eq!(parse_date_text("01/11/2025").as_deref(), Some("2025-11-01"));
        assert_eq!(parse_date_text("1-2-25").as_deref(), Some("2025-02-01"));
        assert_eq!(parse_date_text("03/11/2025 10:22").as_deref(), Some("2025-11-03"));
        assert_eq!(parse_date_text("2025-11-01").as_deref(), Some("2025-11-01"));
        assert_eq!(parse_date_text("2025-11-01T08:00:00Z").as_deref(), Some("2025-11-01"));
        assert_eq!(parse_date_text("32/01/2025"), None);
        assert_eq!(parse_date_text("mañana"), None);
        assert_eq!(parse_date_text(""), None);
    }

    #[test]
    fn test_serial_to_date() {
        assert_eq!(serial_to_date(45997.0).as_deref(), Some("2025-12-06"));
        assert_eq!(serial_to_date(45667.0).as_deref(), Some("2025-01-10"));
        assert_eq!(serial_to_date(45997.75).as_deref(), Some("2025-12-06"));
        assert_eq!(serial_to_date(f64::NAN), None);
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  F.  Operativa "), "f. operativa");
        assert_eq!(normalize_header("Descripción"), "descripcion");
    }

    #[test]
    fn test_parse_grid_detects_header_after_preamble() {
        let rows = grid(&[
            &["Resumen de cuenta"],
            &["Cliente", "Demo"],
            HEADER,
            &["01/11/2025", "COMPRA TARJ. AMAZON", "02/11/2025", "-10,50", "1000,00", "R1", "R2"],
            &["03/11/2025", "TRANSFERENCIA A/DE JOHN DOE", "03/11/2025", "100,00", "1100,00", "", ""],
        ]);
        let parsed = parse_grid(&rows).unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.skipped, 0);
        let first = &parsed.rows[0];
        assert_eq!(first.date, "2025-11-01");
        assert_eq!(first.value_date.as_deref(), Some("2025-11-02"));
        assert_eq!(first.amount, -10.5);
        assert_eq!(first.balance, Some(1000.0));
        assert_eq!(first.description, "COMPRA TARJ. AMAZON");
        assert_eq!(first.reference1.as_deref(), Some("R1"));
        assert_eq!(parsed.rows[1].reference1, None);
    }

    #[test]
    fn test_parse_grid_native_cells() {
        let rows = vec![
            grid(&[HEADER]).remove(0),
            vec![
                Cell::Date(45997.0),
                text("PAGO TGSS"),
                Cell::Number(45997.0),
                Cell::Number(-250.0),
                Cell::Number(900.5),
                Cell::Number(123456.0),
            ],
        ];
        let parsed = parse_grid(&rows).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        let row = &parsed.rows[0];
        assert_eq!(row.date, "2025-12-06");
        assert_eq!(row.value_date.as_deref(), Some("2025-12-06"));
        assert_eq!(row.amount, -250.0);
        assert_eq!(row.reference1.as_deref(), Some("123456"));
        assert_eq!(row.reference2, None);
    }

    #[test]
    fn test_parse_grid_skips_blank_and_counts_incomplete_rows() {
        let rows = grid(&[
            HEADER,
            &["", "", "", "", ""],
            &["fecha rota", "COMPRA", "", "-1", ""],
            &["01/11/2025", "", "", "-1", ""],
            &["02/11/2025", "RECIBO LUZ", "", "-30,00", ""],
        ]);
        let parsed = parse_grid(&rows).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.skipped, 2);
        assert_eq!(parsed.rows[0].value_date, None);
    }

    #[test]
    fn test_parse_grid_missing_header() {
        let rows = grid(&[&["Fecha contable", "Concepto", "Importe"], &["01/11/2025", "X", "1"]]);
        match parse_grid(&rows) {
            Err(CuentasError::MissingHeader(cols)) => assert_eq!(cols, vec!["F. Operativa"]),
            other => panic!("expected MissingHeader, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_grid_names_all_missing_columns() {
        let rows = grid(&[&["F. Operativa", "Saldo"]]);
        let err = parse_grid(&rows).unwrap_err();
        assert!(matches!(
            &err,
            CuentasError::MissingHeader(cols) if cols == &vec!["Concepto".to_string(), "Importe".to_string()]
        ));
        assert_eq!(
            err.to_string(),
            "Missing required header column(s): Concepto, Importe"
        );
    }

    #[test]
    fn test_parse_statement_semicolon_csv() {
        let content = "\u{feff}Movimientos de la cuenta;;\n\
F. Operativa;Concepto;F. Valor;Importe;Saldo;Referencia 1;Referencia 2\n\
01/11/2025;COMPRA TARJ. AMAZON;02/11/2025;-10,50;1000,00;;\n\
03/11/2025;TRANSFERENCIA A/DE JOHN DOE;03/11/2025;100,00;1100,00;;\n";
        let parsed = parse_statement(content.as_bytes()).unwrap();
        assert_eq!(parsed.sheet, "csv");
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].amount, -10.5);
        assert_eq!(parsed.rows[1].amount, 100.0);
        assert_eq!(parsed.rows[1].balance, Some(1100.0));
    }

    #[test]
    fn test_parse_statement_comma_csv_with_english_headers() {
        let content = "Date,Description,Amount\n2025-01-15,\"ADOBE, INC\",\"-1,234.56\"\n";
        let parsed = parse_statement(content.as_bytes()).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].description, "ADOBE, INC");
        assert_eq!(parsed.rows[0].amount, -1234.56);
        assert_eq!(parsed.rows[0].balance, None);
    }

    #[test]
    fn test_parse_grid_skips_preamble_with_date_label() {
        let rows = grid(&[
            &["Fecha", "05/11/2025"],
            &["F. Operativa", "Concepto", "Importe"],
            &["01/11/2025", "X", "-1"],
        ]);
        let parsed = parse_grid(&rows).unwrap();
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].date, "2025-11-01");
        assert_eq!(parsed.rows[0].amount, -1.0);
    }

    #[test]
    fn test_parse_grid_reports_closest_header() {
        let rows = grid(&[
            &["Fecha", "05/11/2025"],
            &["F. Operativa", "Concepto", "Saldo"],
            &["01/11/2025", "X", "-1"],
        ]);
        match parse_grid(&rows) {
            Err(CuentasError::MissingHeader(cols)) => assert_eq!(cols, vec!["Importe"]),
            other => panic!("expected MissingHeader, got {other:?}"),
        }
    }

    enum XCell<'a> {
        Str(&'a str),
        Num(f64),
        /// Serial styled with the built-in date format.
        Date(f64),
    }

    fn sheet_xml(rows: &[Vec<XCell<'_>>]) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
        );
        for (r, row) in rows.iter().enumerate() {
            xml.push_str(&format!(r#"<row r="{}">"#, r + 1));
            for (c, cell) in row.iter().enumerate() {
                let reference = format!("{}{}", (b'A' + c as u8) as char, r + 1);
                xml.push_str(&match cell {
                    XCell::Str(s) => {
                        format!(r#"<c r="{reference}" t="inlineStr"><is><t>{s}</t></is></c>"#)
                    }
                    XCell::Num(n) => format!(r#"<c r="{reference}"><v>{n}</v></c>"#),
                    XCell::Date(n) => format!(r#"<c r="{reference}" s="1"><v>{n}</v></c>"#),
                });
            }
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData></worksheet>");
        xml
    }

    fn build_xlsx(sheets: &[(&str, Vec<Vec<XCell<'_>>>)]) -> Vec<u8> {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
        const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
        const PKG_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

        let mut content_types = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#,
        );
        let mut workbook = format!(r#"<workbook xmlns="{MAIN_NS}" xmlns:r="{REL_NS}"><sheets>"#);
        let mut rels = format!(r#"<Relationships xmlns="{PKG_NS}">"#);
        for (i, (name, _)) in sheets.iter().enumerate() {
            let n = i + 1;
            content_types.push_str(&format!(
                r#"<Override PartName="/xl/worksheets/sheet{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
            ));
            workbook.push_str(&format!(r#"<sheet name="{name}" sheetId="{n}" r:id="rId{n}"/>"#));
            rels.push_str(&format!(
                r#"<Relationship Id="rId{n}" Type="{REL_NS}/worksheet" Target="worksheets/sheet{n}.xml"/>"#
            ));
        }
        content_types.push_str("</Types>");
        workbook.push_str("</sheets></workbook>");
        rels.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="{REL_NS}/styles" Target="styles.xml"/></Relationships>"#,
            sheets.len() + 1
        ));
        let root_rels = format!(
            r#"<Relationships xmlns="{PKG_NS}"><Relationship Id="rId1" Type="{REL_NS}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
        );
        // xf 1 uses built-in number format 14 (m/d/yyyy)
        let styles = format!(
            r#"<styleSheet xmlns="{MAIN_NS}"><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="14" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/></cellXfs></styleSheet>"#
        );

        let mut parts = vec![
            ("[Content_Types].xml".to_string(), content_types),
            ("_rels/.rels".to_string(), root_rels),
            ("xl/workbook.xml".to_string(), workbook),
            ("xl/_rels/workbook.xml.rels".to_string(), rels),
            ("xl/styles.xml".to_string(), styles),
        ];
        for (i, (_, rows)) in sheets.iter().enumerate() {
            parts.push((format!("xl/worksheets/sheet{}.xml", i + 1), sheet_xml(rows)));
        }

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, body) in parts {
            writer.start_file(name, options).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn statement_rows() -> Vec<Vec<XCell<'static>>> {
        use XCell::*;
        vec![
            vec![Str("Movimientos de la cuenta")],
            vec![
                Str("F. Operativa"),
                Str("Concepto"),
                Str("F. Valor"),
                Str("Importe"),
                Str("Saldo"),
                Str("Referencia 1"),
                Str("Referencia 2"),
            ],
            vec![
                Date(45962.0),
                Str("COMPRA TARJ. AMAZON"),
                Date(45962.0),
                Num(-10.5),
                Num(100.0),
            ],
            vec![
                Date(45963.0),
                Str("TRANSFERENCIA A/DE JOHN DOE"),
                Date(45963.0),
                Num(100.0),
                Num(200.0),
                Str("REF-7"),
            ],
        ]
    }

    #[test]
    fn test_parse_statement_xlsx_prefers_hoja1() {
        let bytes = build_xlsx(&[
            ("Resumen", vec![vec![XCell::Str("Saldo total"), XCell::Num(200.0)]]),
            ("Hoja1", statement_rows()),
        ]);
        let parsed = parse_statement(&bytes).unwrap();
        assert_eq!(parsed.sheet, "Hoja1");
        assert_eq!(parsed.skipped, 0);
        assert_eq!(parsed.rows.len(), 2);

        let purchase = &parsed.rows[0];
        assert_eq!(purchase.date, "2025-11-01");
        assert_eq!(purchase.value_date.as_deref(), Some("2025-11-01"));
        assert_eq!(purchase.description, "COMPRA TARJ. AMAZON");
        assert_eq!(purchase.amount, -10.5);
        assert_eq!(purchase.balance, Some(100.0));

        let transfer = &parsed.rows[1];
        assert_eq!(transfer.date, "2025-11-02");
        assert_eq!(transfer.description, "TRANSFERENCIA A/DE JOHN DOE");
        assert_eq!(transfer.amount, 100.0);
        assert_eq!(transfer.reference1.as_deref(), Some("REF-7"));
    }

    #[test]
    fn test_parse_statement_xlsx_falls_back_to_first_sheet() {
        let bytes = build_xlsx(&[
            ("Movimientos", statement_rows()),
            ("Notas", vec![vec![XCell::Str("nada")]]),
        ]);
        let parsed = parse_statement(&bytes).unwrap();
        assert_eq!(parsed.sheet, "Movimientos");
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[1].date, "2025-11-02");
    }

    #[test]
    fn test_parse_statement_rejects_corrupt_workbook() {
        let bytes = b"PK\x03\x04not really a zip";
        assert!(parse_statement(bytes).is_err());
    }
}
