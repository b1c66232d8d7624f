//! The persisted report document: `settings`, `hosts`, `metadata`.
//!
//! Field names here are a compatibility contract with other consumers of the
//! file; change them only together with `FORMAT_VERSION`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::types::{HostScanResult, PortProbeResult, ScanConfiguration, ScanReport};

pub const FORMAT_VERSION: &str = "1.0";
pub const TOOL_NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExportDocument {
    pub settings: ScanConfiguration,
    pub hosts: Vec<ExportHost>,
    pub metadata: ExportMetadata,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportHost {
    pub ip: String,
    pub is_alive: bool,
    pub ports: Vec<PortProbeResult>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub version: String,
    pub tool: String,
    pub total_hosts: usize,
    pub alive_hosts: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub started_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub finished_at: String,
}

impl From<&ScanReport> for ExportDocument {
    fn from(report: &ScanReport) -> Self {
        Self {
            settings: report.settings.clone(),
            hosts: report
                .hosts
                .iter()
                .map(|h| ExportHost {
                    ip: h.address.clone(),
                    is_alive: h.is_alive,
                    ports: h.ports.clone(),
                })
                .collect(),
            metadata: ExportMetadata {
                version: FORMAT_VERSION.to_string(),
                tool: TOOL_NAME.to_string(),
                total_hosts: report.hosts.len(),
                alive_hosts: report.alive_hosts(),
                started_at: report.started_at.clone(),
                finished_at: report.finished_at.clone(),
            },
        }
    }
}

impl From<ExportDocument> for ScanReport {
    fn from(doc: ExportDocument) -> Self {
        Self {
            settings: doc.settings,
            hosts: doc
                .hosts
                .into_iter()
                .map(|h| HostScanResult {
                    address: h.ip,
                    is_alive: h.is_alive,
                    ports: h.ports,
                })
                .collect(),
            started_at: doc.metadata.started_at,
            finished_at: doc.metadata.finished_at,
        }
    }
}

/// Render a report as JSON, two-space indented when `pretty`.
pub fn to_json(report: &ScanReport, pretty: bool) -> Result<String> {
    let doc = ExportDocument::from(report);
    let text = if pretty {
        serde_json::to_string_pretty(&doc)?
    } else {
        serde_json::to_string(&doc)?
    };
    Ok(text)
}

/// Parse a document previously written by [`to_json`].
pub fn from_json(text: &str) -> Result<ScanReport> {
    let doc: ExportDocument = serde_json::from_str(text).context("invalid scan report document")?;
    Ok(doc.into())
}

pub fn save_to_file(report: &ScanReport, path: impl AsRef<Path>, pretty: bool) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("failed to create report file: {}", path.display()))?;
    let mut w = BufWriter::new(file);
    let doc = ExportDocument::from(report);
    if pretty {
        serde_json::to_writer_pretty(&mut w, &doc)?;
    } else {
        serde_json::to_writer(&mut w, &doc)?;
    }
    w.flush()
        .with_context(|| format!("failed to write report file: {}", path.display()))?;
    Ok(())
}
