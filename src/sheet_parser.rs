//! Tabular data parsing for uploaded import files (CSV and Excel workbooks).

use crate::error::ImportError;
use crate::normalize::normalize;
use calamine::{open_workbook_from_rs, Data, Reader, Xls, Xlsb, Xlsx};
use chrono::{NaiveDate, TimeDelta};
use std::io::{Cursor, Read, Seek};

/// Source type of the parsed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Csv,
    Excel,
}

/// Header row plus data rows, before any field mapping.
#[derive(Debug, Clone)]
pub struct RawSheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub source_type: SourceType,
}

/// Dispatch file parsing by extension.
pub fn parse_file(filename: &str, data: &[u8]) -> Result<RawSheet, ImportError> {
    let ext = filename
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "csv" | "txt" => parse_csv(filename, data),
        "xlsx" | "xlsm" => parse_workbook::<Xlsx<_>>(data),
        "xls" => parse_workbook::<Xls<_>>(data),
        "xlsb" => parse_workbook::<Xlsb<_>>(data),
        _ => Err(ImportError::UnsupportedFile(ext)),
    }
}

/// Decode uploaded bytes as UTF-8 text, dropping a leading byte-order mark.
pub fn decode(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    text.strip_prefix('\u{feff}').unwrap_or(&text).to_string()
}

/// Split text into non-blank lines, accepting `\r\n`, `\n` and bare `\r` endings.
pub fn split_lines(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Split one comma-delimited line into fields.
///
/// Double quotes delimit fields that may contain commas; `""` inside a quoted
/// field is a literal quote. An unterminated quote runs to the end of the
/// line. Every field is trimmed and passed through [`normalize`].
pub fn parse_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(normalize(&current).trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(normalize(&current).trim().to_string());

    fields
}

/// Parse a CSV file. The first non-blank line is the header row.
fn parse_csv(filename: &str, data: &[u8]) -> Result<RawSheet, ImportError> {
    let text = decode(data);
    let lines = split_lines(&text);

    let mut iter = lines.iter();
    let header_line = iter
        .next()
        .ok_or_else(|| ImportError::Parse("file is empty".to_string()))?;
    let headers = parse_line(header_line);

    if headers.iter().all(|h| h.is_empty()) {
        return Err(ImportError::Parse("header row is empty".to_string()));
    }

    let rows: Vec<Vec<String>> = iter.map(|line| parse_line(line)).collect();
    if rows.is_empty() {
        return Err(ImportError::Parse("file has a header row but no data rows".to_string()));
    }

    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim_end_matches(".csv")
        .to_string();

    Ok(RawSheet {
        name,
        headers,
        rows,
        source_type: SourceType::Csv,
    })
}

/// Parse the first worksheet holding a header row and at least one data row.
fn parse_workbook<'a, R>(data: &'a [u8]) -> Result<RawSheet, ImportError>
where
    R: Reader<Cursor<&'a [u8]>>,
{
    let mut workbook: R = open_workbook_from_rs(Cursor::new(data))
        .map_err(|e| ImportError::Parse(format!("failed to open workbook: {:?}", e)))?;
    first_sheet(&mut workbook)
}

fn first_sheet<RS, R>(workbook: &mut R) -> Result<RawSheet, ImportError>
where
    RS: Read + Seek,
    R: Reader<RS>,
{
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();

    for name in &sheet_names {
        let range = match workbook.worksheet_range(name) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Skipping sheet '{}': {:?}", name, e);
                continue;
            }
        };

        if let Some(sheet) = range_to_raw_sheet(name, &range) {
            return Ok(sheet);
        }
    }

    Err(ImportError::Parse("no worksheet with data rows found".to_string()))
}

/// First row = headers. Completely empty rows are dropped, like blank CSV lines.
fn range_to_raw_sheet(name: &str, range: &calamine::Range<Data>) -> Option<RawSheet> {
    let mut row_iter = range.rows();

    let headers: Vec<String> = row_iter.next()?.iter().map(cell_to_string).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return None;
    }

    let rows: Vec<Vec<String>> = row_iter
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>())
        .filter(|values| values.iter().any(|v| !v.is_empty()))
        .collect();

    if rows.is_empty() {
        return None;
    }

    Some(RawSheet {
        name: name.to_string(),
        headers,
        rows,
        source_type: SourceType::Excel,
    })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => normalize(s).trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            // Whole numbers without the trailing ".0"
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()),
        Data::DateTimeIso(s) => s.chars().take(10).collect(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR:{:?}", e),
    }
}

/// Convert an Excel serial day number to `YYYY-MM-DD` (time of day dropped).
fn excel_serial_to_date(serial: f64) -> String {
    // Day 0 of the 1900 date system, shifted for Excel's phantom 1900-02-29
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .zip(TimeDelta::try_days(serial.floor() as i64))
        .and_then(|(epoch, days)| epoch.checked_add_signed(days))
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| format!("{}", serial))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_quoted_comma() {
        let fields = parse_line(r#"L001,"Élégance, Nocturne",Black Opium,Yves Saint Laurent"#);
        assert_eq!(
            fields,
            vec!["L001", "Élégance, Nocturne", "Black Opium", "Yves Saint Laurent"]
        );
    }

    #[test]
    fn test_parse_line_escaped_quotes() {
        let fields = parse_line(r#"a,"say ""hello""",b"#);
        assert_eq!(fields, vec!["a", r#"say "hello""#, "b"]);
    }

    #[test]
    fn test_parse_line_quoting_round_trip() {
        for s in [
            "plain, with comma",
            r#"a "quoted" word"#,
            r#"both "x", and y"#,
            r#""""#,
        ] {
            let field = format!("\"{}\"", s.replace('"', "\"\""));
            assert_eq!(parse_line(&field)[0], s, "round trip failed for {s:?}");
        }
    }

    #[test]
    fn test_parse_line_trailing_empty_field() {
        assert_eq!(parse_line("a,b,"), vec!["a", "b", ""]);
        assert_eq!(parse_line(""), vec![""]);
    }

    #[test]
    fn test_parse_line_unterminated_quote() {
        assert_eq!(parse_line(r#"a,"open, still open"#), vec!["a", "open, still open"]);
    }

    #[test]
    fn test_parse_line_trims_and_repairs() {
        assert_eq!(parse_line("  cafÃ© , x "), vec!["café", "x"]);
        // The second byte of a broken "à" is a no-break space
        assert_eq!(parse_line("dÃ©jÃ\u{a0},\"voilÃ\u{a0}\""), vec!["déjà", "voilà"]);
    }

    #[test]
    fn test_split_lines_mixed_endings() {
        let lines = split_lines("a,b\r\n1,2\r3,4\n\n   \n5,6");
        assert_eq!(lines, vec!["a,b", "1,2", "3,4", "5,6"]);
    }

    #[test]
    fn test_decode_strips_bom() {
        let mut bytes = "\u{feff}code,nom".as_bytes().to_vec();
        assert_eq!(decode(&bytes), "code,nom");
        bytes.drain(..3);
        assert_eq!(decode(&bytes), "code,nom");
    }

    #[test]
    fn test_parse_csv_basic() {
        let data = "\u{feff}code_produit,nom\nL001,Nuit\nL002,Jour\n".as_bytes();
        let sheet = parse_file("exports/produits.csv", data).unwrap();
        assert_eq!(sheet.name, "produits");
        assert_eq!(sheet.headers, vec!["code_produit", "nom"]);
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.source_type, SourceType::Csv);
    }

    #[test]
    fn test_parse_csv_without_data_rows() {
        let err = parse_file("empty.csv", b"code,nom\n\n").unwrap_err();
        assert!(matches!(err, ImportError::Parse(_)));

        let err = parse_file("empty.csv", b"").unwrap_err();
        assert!(matches!(err, ImportError::Parse(_)));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = parse_file("catalogue.pdf", b"data").unwrap_err();
        assert!(matches!(err, ImportError::UnsupportedFile(ext) if ext == "pdf"));
    }

    #[test]
    fn test_excel_serial_to_date() {
        assert_eq!(excel_serial_to_date(25569.0), "1970-01-01");
        assert_eq!(excel_serial_to_date(45292.5), "2024-01-01");
        assert_eq!(excel_serial_to_date(32874.0), "1990-01-01");
    }
}
