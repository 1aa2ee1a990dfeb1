//! Remote document file (Drive v3 media)
//!
//! The file's bytes are the workbook container. Provenance is the Drive
//! `version`, which increases on every content change.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::{
    ensure_unchanged, extract_document_id, BackendKind, ConnectionStatus, Provenance, RawDocument,
    StorageBackend,
};
use crate::config::BackendSettings;
use crate::document::Workbook;
use crate::{Result, StoreError};

/// Drive metadata fields used for provenance
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DriveMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
    pub modified_time: Option<String>,
}

impl DriveMetadata {
    pub fn provenance(&self) -> Provenance {
        match (&self.version, &self.modified_time) {
            (Some(v), _) => Provenance::new(format!("version:{}", v)),
            (None, Some(t)) => Provenance::new(format!("modified:{}", t)),
            (None, None) => Provenance::new("unknown"),
        }
    }

    /// `name (provenance)`, with `fallback` standing in for a missing name
    pub fn label(&self, fallback: &str) -> String {
        format!(
            "{} ({})",
            self.name.as_deref().unwrap_or(fallback),
            self.provenance()
        )
    }
}

/// HTTP plumbing shared by the remote variants
pub(crate) struct DriveClient {
    client: Client,
    drive_base: String,
    token: Option<String>,
}

impl DriveClient {
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        let client = Client::builder().timeout(settings.io_timeout()).build()?;
        Ok(Self {
            client,
            drive_base: settings.drive_api_base.trim_end_matches('/').to_string(),
            token: settings.access_token.clone(),
        })
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    pub async fn metadata(&self, file_id: &str) -> Result<DriveMetadata> {
        let url = format!("{}/files/{}", self.drive_base, file_id);
        let resp = self
            .authorized(self.client.get(url))
            .query(&[
                ("fields", "name,version,modifiedTime"),
                ("supportsAllDrives", "true"),
            ])
            .send()
            .await?;
        let resp = check_status(resp, "metadata").await?;
        Ok(resp.json().await?)
    }
}

/// Maps non-success HTTP statuses to store errors
pub(crate) async fn check_status(resp: Response, what: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::PRECONDITION_FAILED => Err(StoreError::Conflict {
            expected: "unchanged remote document".into(),
            found: format!("{} rejected: {}", what, snippet),
        }),
        _ => Err(StoreError::Unavailable(format!(
            "{} returned {}: {}",
            what, status, snippet
        ))),
    }
}

pub struct RemoteDocumentFile {
    file_id: String,
    drive: DriveClient,
    upload_base: String,
}

impl RemoteDocumentFile {
    pub fn from_location(location: &str, settings: &BackendSettings) -> Result<Self> {
        let file_id = extract_document_id(location).ok_or_else(|| {
            StoreError::InvalidConfig(format!("no document id in location: {}", location))
        })?;
        Ok(Self {
            file_id,
            drive: DriveClient::new(settings)?,
            upload_base: settings.upload_api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }
}

#[async_trait]
impl StorageBackend for RemoteDocumentFile {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteDocumentFile
    }

    fn describe(&self) -> String {
        format!("drive file {}", self.file_id)
    }

    async fn read(&self) -> Result<RawDocument> {
        let provenance = self.drive.metadata(&self.file_id).await?.provenance();

        let url = format!("{}/files/{}", self.drive.drive_base, self.file_id);
        let resp = self
            .drive
            .authorized(self.drive.http().get(url))
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .send()
            .await?;
        let bytes = check_status(resp, "download").await?.bytes().await?.to_vec();
        Workbook::decode(&bytes)?;

        Ok(RawDocument { bytes, provenance })
    }

    async fn write(&self, bytes: &[u8], expected: &Provenance) -> Result<Provenance> {
        let current = self.drive.metadata(&self.file_id).await?.provenance();
        ensure_unchanged(expected, &current)?;

        let url = format!("{}/files/{}", self.upload_base, self.file_id);
        let resp = self
            .drive
            .authorized(self.drive.http().patch(url))
            .query(&[("uploadType", "media"), ("supportsAllDrives", "true")])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes.to_vec())
            .send()
            .await?;
        check_status(resp, "upload").await?;

        Ok(self.drive.metadata(&self.file_id).await?.provenance())
    }

    async fn provenance(&self) -> Result<Provenance> {
        Ok(self.drive.metadata(&self.file_id).await?.provenance())
    }

    async fn check_connection(&self) -> ConnectionStatus {
        match self.drive.metadata(&self.file_id).await {
            Ok(meta) => ConnectionStatus::up(format!("drive file {}", meta.label(&self.file_id))),
            Err(e) => ConnectionStatus::down(e.to_string()),
        }
    }
}
