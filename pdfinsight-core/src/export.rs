use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::insight::{InsightContent, InsightResult, InsightState};

/// A finished artifact ready to be saved as a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedArtifact {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Builds the downloadable file for a finished result. Pending results have
/// nothing to export.
pub fn export_artifact(result: &InsightResult, date: NaiveDate) -> Option<ExportedArtifact> {
    let stem = format!(
        "{}-{}-{}",
        result.kind.slug(),
        result.id.simple(),
        date.format("%Y-%m-%d")
    );

    match &result.state {
        InsightState::Pending => None,
        InsightState::Succeeded(InsightContent::Image(image)) => Some(ExportedArtifact {
            file_name: format!("{stem}.{}", image.extension()),
            content_type: image.mime_type.clone(),
            bytes: image.bytes.clone(),
        }),
        InsightState::Succeeded(InsightContent::Text(text)) => {
            Some(markdown(stem, result.kind.title(), text))
        }
        InsightState::Failed(message) => Some(markdown(stem, result.kind.title(), message)),
    }
}

fn markdown(stem: String, title: &str, body: &str) -> ExportedArtifact {
    let mut document = format!("# {title}\n\n{}", body.trim_end());
    document.push('\n');
    ExportedArtifact {
        file_name: format!("{stem}.md"),
        content_type: "text/markdown".to_owned(),
        bytes: document.into_bytes(),
    }
}

/// Writes the artifact into `dir` and returns the final path.
pub fn write_export(dir: &Path, artifact: &ExportedArtifact) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create export directory {:?}", dir))?;
    let path = dir.join(&artifact.file_name);
    let tmp = path.with_extension("part");
    let written = File::create(&tmp)
        .with_context(|| format!("failed to open temp file {:?}", tmp))
        .and_then(|mut file| {
            file.write_all(&artifact.bytes)?;
            file.flush()?;
            drop(file);
            fs::rename(&tmp, &path)
                .with_context(|| format!("failed to move export into place at {:?}", path))
        });
    if let Err(err) = written {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!(?tmp, %cleanup, "failed to remove partial export");
            }
        }
        return Err(err);
    }
    info!(?path, bytes = artifact.bytes.len(), "artifact exported");
    Ok(path)
}
