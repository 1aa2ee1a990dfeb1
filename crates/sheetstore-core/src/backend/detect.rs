//! Location classification
//!
//! Total and deterministic: every string maps to exactly one kind.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref PATH_ID: Regex = Regex::new(r"/d/([A-Za-z0-9_-]+)").unwrap();
    static ref QUERY_ID: Regex = Regex::new(r"[?&]id=([A-Za-z0-9_-]+)").unwrap();
}

/// Query marker set when an uploaded document is opened in the sheet viewer
const DOCUMENT_VIEW_MARKER: &str = "rtpof=true";

/// The closed set of storage kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    LocalDocument,
    RemoteDocumentFile,
    RemoteNativeSheet,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::LocalDocument => write!(f, "local_document"),
            BackendKind::RemoteDocumentFile => write!(f, "remote_document_file"),
            BackendKind::RemoteNativeSheet => write!(f, "remote_native_sheet"),
        }
    }
}

/// Classifies a location string
pub fn detect(location: &str) -> BackendKind {
    let lower = location.trim().to_ascii_lowercase();

    if lower.contains("drive.google.com") && lower.contains("/file/") {
        return BackendKind::RemoteDocumentFile;
    }
    if lower.contains("docs.google.com/spreadsheets") {
        if lower.contains(DOCUMENT_VIEW_MARKER) {
            return BackendKind::RemoteDocumentFile;
        }
        return BackendKind::RemoteNativeSheet;
    }
    BackendKind::LocalDocument
}

/// Remote document ID from `/d/<id>` or `id=<id>`
pub fn extract_document_id(location: &str) -> Option<String> {
    PATH_ID
        .captures(location)
        .or_else(|| QUERY_ID.captures(location))
        .map(|c| c[1].to_string())
}
