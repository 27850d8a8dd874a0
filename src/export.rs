use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("image is not a base64 data URI")]
    NotDataUri,

    #[error("image payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

pub fn to_data_uri(mime_type: &str, base64_payload: &str) -> String {
    format!("data:{mime_type};base64,{base64_payload}")
}

pub fn parse_data_uri(uri: &str) -> Result<InlineImage, ExportError> {
    let rest = uri.strip_prefix("data:").ok_or(ExportError::NotDataUri)?;
    let (header, payload) = rest.split_once(',').ok_or(ExportError::NotDataUri)?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or(ExportError::NotDataUri)?;
    let bytes = STANDARD.decode(payload.trim())?;
    Ok(InlineImage {
        mime_type: mime_type.to_string(),
        bytes,
    })
}

/// Writes the decoded image to `dir/file_name`, creating `dir` if needed.
pub fn export_image(data_uri: &str, dir: &Path, file_name: &str) -> Result<PathBuf, ExportError> {
    let image = parse_data_uri(data_uri)?;
    fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(file_name);
    fs::write(&path, &image.bytes).map_err(|source| ExportError::Io {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), bytes = image.bytes.len(), mime = %image.mime_type, "image exported");
    Ok(path)
}
