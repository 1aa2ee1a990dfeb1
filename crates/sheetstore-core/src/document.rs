//! Workbook container: ordered named sheets of string cells
//!
//! Local and remote-file documents are stored as
//! `{"sheets":[{"name":"...","rows":[["header",...],["cell",...]]}]}`.
//! The first row of a sheet is its header.

use serde::{Deserialize, Serialize};

use crate::{Result, StoreError};

/// A header plus data rows, as found in the user's document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Vec<&str>) -> Self {
        self.rows.push(row.into_iter().map(str::to_string).collect());
        self
    }

    /// Cell at `row`/`col`; short rows read as empty
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// One named sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
    pub name: String,
    pub table: RawTable,
}

/// Ordered list of sheets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

#[derive(Serialize, Deserialize)]
struct WireWorkbook {
    sheets: Vec<WireSheet>,
}

#[derive(Serialize, Deserialize)]
struct WireSheet {
    name: String,
    #[serde(default)]
    rows: Vec<Vec<serde_json::Value>>,
}

/// Normalizes a JSON cell into its string form
pub(crate) fn cell_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a sheet from rows whose first entry is the header
    pub(crate) fn sheet_from_rows(name: impl Into<String>, mut rows: Vec<Vec<String>>) -> Sheet {
        let headers = if rows.is_empty() {
            Vec::new()
        } else {
            rows.remove(0)
        };
        Sheet {
            name: name.into(),
            table: RawTable { headers, rows },
        }
    }

    /// Frames bytes as a workbook or fails with `Corrupt`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }
        let wire: WireWorkbook = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::Corrupt(format!("not a workbook container: {}", e)))?;

        let sheets = wire
            .sheets
            .into_iter()
            .map(|s| {
                let rows = s
                    .rows
                    .iter()
                    .map(|r| r.iter().map(cell_to_string).collect())
                    .collect();
                Self::sheet_from_rows(s.name, rows)
            })
            .collect();
        Ok(Self { sheets })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = WireWorkbook {
            sheets: self
                .sheets
                .iter()
                .map(|s| WireSheet {
                    name: s.name.clone(),
                    rows: s
                        .rows_with_header()
                        .into_iter()
                        .map(|r| r.into_iter().map(serde_json::Value::String).collect())
                        .collect(),
                })
                .collect(),
        };
        Ok(serde_json::to_vec_pretty(&wire)?)
    }

    /// Sheet lookup; names compare case- and accent-insensitively
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        let wanted = crate::mapper::normalize_header(name);
        self.sheets
            .iter()
            .find(|s| crate::mapper::normalize_header(&s.name) == wanted)
    }

    /// Replaces the named sheet's contents, appending the sheet when absent
    pub fn put_sheet(&mut self, name: &str, table: RawTable) {
        let wanted = crate::mapper::normalize_header(name);
        match self
            .sheets
            .iter_mut()
            .find(|s| crate::mapper::normalize_header(&s.name) == wanted)
        {
            Some(sheet) => sheet.table = table,
            None => self.sheets.push(Sheet {
                name: name.to_string(),
                table,
            }),
        }
    }
}

impl Sheet {
    /// Header followed by data rows
    pub fn rows_with_header(&self) -> Vec<Vec<String>> {
        let mut rows = Vec::with_capacity(self.table.rows.len() + 1);
        if !self.table.headers.is_empty() || !self.table.rows.is_empty() {
            rows.push(self.table.headers.clone());
        }
        rows.extend(self.table.rows.iter().cloned());
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_normalizes_cells() {
        let json = r#"{"sheets":[{"name":"Transações","rows":[["ID","Valor","Pago"],[1,350.5,true],[null,"12,00",false]]}]}"#;
        let wb = Workbook::decode(json.as_bytes()).unwrap();
        let sheet = wb.sheet("transacoes").unwrap();
        assert_eq!(sheet.table.headers, vec!["ID", "Valor", "Pago"]);
        assert_eq!(sheet.table.rows[0], vec!["1", "350.5", "TRUE"]);
        assert_eq!(sheet.table.rows[1], vec!["", "12,00", "FALSE"]);
    }

    #[test]
    fn test_decode_rejects_foreign_bytes() {
        let err = Workbook::decode(b"PK\x03\x04 not json").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));

        let err = Workbook::decode(br#"{"tabs":[]}"#).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn test_empty_bytes_are_an_empty_workbook() {
        assert!(Workbook::decode(b"").unwrap().sheets.is_empty());
    }

    #[test]
    fn test_put_sheet_keeps_other_sheets() {
        let mut wb = Workbook::new();
        wb.put_sheet("Perfil", RawTable::new(vec!["Campo".into()]).with_row(vec!["nome"]));
        wb.put_sheet("Notas", RawTable::new(vec!["Texto".into()]).with_row(vec!["livre"]));
        wb.put_sheet("perfil", RawTable::new(vec!["Campo".into()]).with_row(vec!["email"]));

        assert_eq!(wb.sheets.len(), 2);
        assert_eq!(wb.sheets[0].name, "Perfil");
        assert_eq!(wb.sheets[0].table.rows[0], vec!["email"]);

        let decoded = Workbook::decode(&wb.encode().unwrap()).unwrap();
        assert_eq!(decoded, wb);
    }
}
