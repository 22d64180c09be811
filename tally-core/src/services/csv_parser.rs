//! CSV parser - raw statement bytes into a header row and a row matrix
//!
//! No semantic interpretation happens here: every cell stays a string.

use crate::domain::result::{Error, Result};

/// Candidate delimiters, in tie-break order
const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Example statement offered to users who want to see the expected shape
const SAMPLE_CSV: &str = "\
Date,Description,Category,Amount
2024-01-02,Opening deposit,Transfer,1500.00
2024-01-03,Grocery Mart,Groceries,-82.45
2024-01-05,Salary ACME Corp,Income,2500.00
2024-01-06,Rent January,Housing,-900.00
2024-01-09,Coffee Corner,Dining,-4.75
2024-01-12,Electric Company,Utilities,-61.30
";

/// A parsed file: header row plus data rows, all with the header's width
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub delimiter: u8,
}

/// Parse statement bytes. The first non-blank row is always the header.
pub fn parse_csv(bytes: &[u8]) -> Result<ParsedCsv> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::malformed_csv("file is not valid UTF-8 text"))?;

    if text.trim().is_empty() {
        return Err(Error::malformed_csv("file is empty"));
    }

    let first_line = text
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default();
    let delimiter = sniff_delimiter(first_line);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut headers: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for result in reader.records() {
        let record = result.map_err(|e| Error::malformed_csv(e.to_string()))?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let fields: Vec<String> = record.iter().map(|field| field.to_string()).collect();

        match &headers {
            None => {
                headers = Some(fields.iter().map(|h| h.trim().to_string()).collect());
            }
            Some(header_row) => {
                if fields.len() != header_row.len() {
                    return Err(Error::malformed_csv(format!(
                        "line {}: expected {} columns, found {}",
                        line,
                        header_row.len(),
                        fields.len()
                    )));
                }
                rows.push(fields);
            }
        }
    }

    let headers = headers.ok_or_else(|| Error::malformed_csv("file is empty"))?;

    Ok(ParsedCsv {
        headers,
        rows,
        delimiter,
    })
}

/// Bytes of the downloadable example statement
pub fn sample_csv() -> &'static [u8] {
    SAMPLE_CSV.as_bytes()
}

/// Pick the delimiter that occurs most often (outside quotes) in the header line
fn sniff_delimiter(line: &str) -> u8 {
    let mut counts = [0usize; DELIMITERS.len()];
    let mut in_quotes = false;

    for byte in line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(pos) = DELIMITERS.iter().position(|d| *d == byte) {
            counts[pos] += 1;
        }
    }

    let mut best = 0;
    for (i, count) in counts.iter().enumerate() {
        if *count > counts[best] {
            best = i;
        }
    }
    DELIMITERS[best]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_file() {
        let parsed = parse_csv(b"Date,Label,Debit,Credit\n2024-01-05,Salary,,2500.00\n2024-01-06,Rent,900.00,\n").unwrap();
        assert_eq!(parsed.headers, vec!["Date", "Label", "Debit", "Credit"]);
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0], vec!["2024-01-05", "Salary", "", "2500.00"]);
        assert_eq!(parsed.rows[1][2], "900.00");
        assert_eq!(parsed.delimiter, b',');
    }

    #[test]
    fn test_quoted_fields_keep_delimiters() {
        let parsed = parse_csv(b"Date,Description,Amount\n2024-01-05,\"Smith, John\",\"1,200.00\"\n").unwrap();
        assert_eq!(parsed.rows[0][1], "Smith, John");
        assert_eq!(parsed.rows[0][2], "1,200.00");
    }

    #[test]
    fn test_semicolon_delimiter_detected() {
        let parsed = parse_csv("Datum;Omschrijving;Bedrag\n05-01-2024;Salaris;2500,00\n".as_bytes()).unwrap();
        assert_eq!(parsed.delimiter, b';');
        assert_eq!(parsed.rows[0], vec!["05-01-2024", "Salaris", "2500,00"]);
    }

    #[test]
    fn test_tab_delimiter_detected() {
        let parsed = parse_csv(b"Date\tAmount\n2024-01-05\t10.00\n").unwrap();
        assert_eq!(parsed.delimiter, b'\t');
        assert_eq!(parsed.headers, vec!["Date", "Amount"]);
    }

    #[test]
    fn test_bom_is_stripped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"Date,Amount\n2024-01-05,1\n");
        let parsed = parse_csv(&bytes).unwrap();
        assert_eq!(parsed.headers[0], "Date");
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let parsed = parse_csv(b"Date,Amount\n\n2024-01-05,1\n,\n2024-01-06,2\n").unwrap();
        assert_eq!(parsed.rows.len(), 2);
    }

    #[test]
    fn test_header_only_file_has_no_rows() {
        let parsed = parse_csv(b"Date,Amount\n").unwrap();
        assert!(parsed.rows.is_empty());
    }

    #[test]
    fn test_empty_file_is_malformed() {
        assert!(matches!(parse_csv(b""), Err(Error::MalformedCsv(_))));
        assert!(matches!(parse_csv(b"  \n\n"), Err(Error::MalformedCsv(_))));
    }

    #[test]
    fn test_inconsistent_columns_are_malformed() {
        let err = parse_csv(b"Date,Amount\n2024-01-05,1\n2024-01-06,2,extra\n").unwrap_err();
        match err {
            Error::MalformedCsv(msg) => {
                assert!(msg.contains("line 3"), "{}", msg);
                assert!(msg.contains("expected 2 columns, found 3"), "{}", msg);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_utf8_is_malformed() {
        assert!(matches!(
            parse_csv(&[0x44, 0x61, 0xff, 0xfe, 0x0a]),
            Err(Error::MalformedCsv(_))
        ));
    }

    #[test]
    fn test_sample_csv_parses() {
        let parsed = parse_csv(sample_csv()).unwrap();
        assert_eq!(parsed.headers, vec!["Date", "Description", "Category", "Amount"]);
        assert_eq!(parsed.rows.len(), 6);
    }
}
