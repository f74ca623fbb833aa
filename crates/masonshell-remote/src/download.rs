use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use masonshell_core::ArchiveSource;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(
        "archive not found at {url} (HTTP {status}); the release may not exist for this ref, try 'latest'"
    )]
    NotFound { url: String, status: u16 },
    #[error("download failed for {url}: {detail}")]
    Transport { url: String, detail: String },
}

pub(crate) fn download_archive(
    client: &reqwest::blocking::Client,
    source: &ArchiveSource,
    dest: &Path,
    progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<u64, DownloadError> {
    let transport = |detail: String| DownloadError::Transport {
        url: source.url.clone(),
        detail,
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| transport(format!("failed to create {}: {err}", parent.display())))?;
    }

    let mut response = client
        .get(&source.url)
        .send()
        .map_err(|err| transport(err.to_string()))?;

    let status = response.status();
    if status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND {
        return Err(DownloadError::NotFound {
            url: source.url.clone(),
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        return Err(transport(format!("unexpected HTTP status {status}")));
    }

    let total = response.content_length().or(source.size_hint);
    let part_path = dest.with_file_name(format!(
        "{}.part",
        dest.file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("archive")
    ));

    let streamed = stream_body(&mut response, &part_path, total, progress, &transport);
    let written = match streamed {
        Ok(written) => written,
        Err(err) => {
            let _ = fs::remove_file(&part_path);
            return Err(err);
        }
    };

    if dest.exists() {
        if let Err(err) = fs::remove_file(dest) {
            let _ = fs::remove_file(&part_path);
            return Err(transport(format!(
                "failed to replace {}: {err}",
                dest.display()
            )));
        }
    }
    if let Err(err) = fs::rename(&part_path, dest) {
        let _ = fs::remove_file(&part_path);
        return Err(transport(format!(
            "failed to move download into {}: {err}",
            dest.display()
        )));
    }

    Ok(written)
}

fn stream_body(
    response: &mut reqwest::blocking::Response,
    part_path: &Path,
    total: Option<u64>,
    progress: &mut dyn FnMut(u64, Option<u64>),
    transport: &dyn Fn(String) -> DownloadError,
) -> Result<u64, DownloadError> {
    let mut file = File::create(part_path)
        .map_err(|err| transport(format!("failed to create {}: {err}", part_path.display())))?;

    progress(0, total);

    let mut buffer = [0u8; 8192];
    let mut written: u64 = 0;
    loop {
        let read = response
            .read(&mut buffer)
            .map_err(|err| transport(err.to_string()))?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .map_err(|err| transport(format!("failed to write {}: {err}", part_path.display())))?;
        written += read as u64;
        progress(written, total);
    }

    Ok(written)
}
