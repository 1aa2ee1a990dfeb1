//! Cloud-native sheet (Sheets v4 values API)
//!
//! Tabs are read with one `values:batchGet` and framed into the workbook
//! container, so the layers above see the same bytes as for file backends.
//! A write sends one `values:batchUpdate` holding only the tabs whose cells
//! changed, each padded with empty cells over its previous extent, so a failed
//! request leaves the sheet as it was and untouched tabs keep their formulas.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::remote_file::{check_status, DriveClient};
use super::{
    ensure_unchanged, extract_document_id, BackendKind, ConnectionStatus, Provenance, RawDocument,
    StorageBackend,
};
use crate::config::BackendSettings;
use crate::document::{cell_to_string, Sheet, Workbook};
use crate::{Result, StoreError};

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    value_ranges: Vec<ValueRange>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// A1 range covering a whole tab
fn tab_range(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

/// Frames batchGet results as a workbook, pairing ranges with titles in order
fn workbook_from_ranges(titles: &[String], ranges: Vec<ValueRange>) -> Workbook {
    let sheets = titles
        .iter()
        .zip(ranges)
        .map(|(title, range)| {
            let rows = range
                .values
                .iter()
                .map(|r| r.iter().map(cell_to_string).collect())
                .collect();
            Workbook::sheet_from_rows(title.clone(), rows)
        })
        .collect();
    Workbook { sheets }
}

/// Rows of `next`, padded with blanks to cover what `previous` held
fn padded_grid(previous: Option<&Sheet>, next: &Sheet) -> Vec<Vec<String>> {
    let old = previous.map(Sheet::rows_with_header).unwrap_or_default();
    let mut grid = next.rows_with_header();
    let width = old.iter().chain(grid.iter()).map(Vec::len).max().unwrap_or(0);
    grid.resize(grid.len().max(old.len()), Vec::new());
    for row in &mut grid {
        row.resize(width, String::new());
    }
    grid
}

/// `values:batchUpdate` data entries for the tabs that differ from `previous`
fn update_data(previous: &Workbook, next: &Workbook) -> Vec<serde_json::Value> {
    next.sheets
        .iter()
        .filter_map(|sheet| {
            let old = previous.sheets.iter().find(|p| p.name == sheet.name);
            if old.is_some_and(|o| o.rows_with_header() == sheet.rows_with_header()) {
                return None;
            }
            Some(json!({
                "range": format!("{}!A1", tab_range(&sheet.name)),
                "majorDimension": "ROWS",
                "values": padded_grid(old, sheet),
            }))
        })
        .collect()
}

pub struct RemoteNativeSheet {
    spreadsheet_id: String,
    drive: DriveClient,
    sheets_base: String,
}

impl RemoteNativeSheet {
    pub fn from_location(location: &str, settings: &BackendSettings) -> Result<Self> {
        let spreadsheet_id = extract_document_id(location).ok_or_else(|| {
            StoreError::InvalidConfig(format!("no spreadsheet id in location: {}", location))
        })?;
        Ok(Self {
            spreadsheet_id,
            drive: DriveClient::new(settings)?,
            sheets_base: settings.sheets_api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/spreadsheets/{}{}", self.sheets_base, self.spreadsheet_id, suffix)
    }

    async fn titles(&self) -> Result<Vec<String>> {
        let resp = self
            .drive
            .authorized(self.drive.http().get(self.url("")))
            .query(&[("fields", "sheets.properties.title")])
            .send()
            .await?;
        let meta: SpreadsheetMeta = check_status(resp, "spreadsheet metadata").await?.json().await?;
        Ok(meta.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    /// Every tab's values, framed as a workbook
    async fn fetch(&self) -> Result<Workbook> {
        let titles = self.titles().await?;

        let mut query: Vec<(&str, String)> = titles.iter().map(|t| ("ranges", tab_range(t))).collect();
        query.push(("majorDimension", "ROWS".into()));
        query.push(("valueRenderOption", "UNFORMATTED_VALUE".into()));
        query.push(("dateTimeRenderOption", "FORMATTED_STRING".into()));

        let resp = self
            .drive
            .authorized(self.drive.http().get(self.url("/values:batchGet")))
            .query(&query)
            .send()
            .await?;
        let batch: BatchGetResponse = check_status(resp, "values batchGet")
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Corrupt(format!("unexpected values payload: {}", e)))?;

        Ok(workbook_from_ranges(&titles, batch.value_ranges))
    }

    async fn post(&self, suffix: &str, body: serde_json::Value, what: &str) -> Result<()> {
        let resp = self
            .drive
            .authorized(self.drive.http().post(self.url(suffix)))
            .json(&body)
            .send()
            .await?;
        check_status(resp, what).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for RemoteNativeSheet {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteNativeSheet
    }

    fn describe(&self) -> String {
        format!("sheet {}", self.spreadsheet_id)
    }

    async fn read(&self) -> Result<RawDocument> {
        let provenance = self.drive.metadata(&self.spreadsheet_id).await?.provenance();
        let bytes = self.fetch().await?.encode()?;
        Ok(RawDocument { bytes, provenance })
    }

    async fn write(&self, bytes: &[u8], expected: &Provenance) -> Result<Provenance> {
        let workbook = Workbook::decode(bytes)?;
        let current = self.drive.metadata(&self.spreadsheet_id).await?.provenance();
        ensure_unchanged(expected, &current)?;

        let previous = self.fetch().await?;
        let data = update_data(&previous, &workbook);
        if data.is_empty() {
            return Ok(current);
        }

        let missing: Vec<_> = workbook
            .sheets
            .iter()
            .filter(|s| !previous.sheets.iter().any(|p| p.name == s.name))
            .map(|s| json!({ "addSheet": { "properties": { "title": s.name } } }))
            .collect();
        if !missing.is_empty() {
            self.post(":batchUpdate", json!({ "requests": missing }), "add tabs")
                .await?;
        }

        tracing::debug!("Writing {} changed tabs to sheet {}", data.len(), self.spreadsheet_id);
        self.post(
            "/values:batchUpdate",
            json!({ "valueInputOption": "RAW", "data": data }),
            "values batchUpdate",
        )
        .await?;

        Ok(self.drive.metadata(&self.spreadsheet_id).await?.provenance())
    }

    async fn provenance(&self) -> Result<Provenance> {
        Ok(self.drive.metadata(&self.spreadsheet_id).await?.provenance())
    }

    async fn check_connection(&self) -> ConnectionStatus {
        match self.titles().await {
            Ok(titles) => ConnectionStatus::up(format!(
                "sheet {} ({} tabs)",
                self.spreadsheet_id,
                titles.len()
            )),
            Err(e) => ConnectionStatus::down(e.to_string()),
        }
    }
}
