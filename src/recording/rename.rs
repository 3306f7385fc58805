//! # Title Renamer
//!
//! Moves every on-disk artifact of a recording over to a new title:
//!
//! 1. `{old_stem}.wav` → `{new_stem}.wav`
//! 2. files in `TRANSCRIPTIONS/` whose names carry the old stem
//! 3. old names inside transcription text/log files
//! 4. the recording directory itself, last, so a failure above leaves the
//!    directory where the registry expects it
//!
//! Every move goes through [`safe_rename`], which never overwrites.

use crate::error::{RecorderError, RecorderResult};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Subdirectory the transcription worker writes into.
pub const TRANSCRIPTIONS_DIR: &str = "TRANSCRIPTIONS";

/// Extensions of worker output whose contents may quote the old name.
const TEXT_EXTENSIONS: &[&str] = &["txt", "log", "srt", "vtt", "json"];

/// Rename `src` to `dst`, refusing a missing source or an existing destination.
pub fn safe_rename(src: &Path, dst: &Path) -> RecorderResult<()> {
    if !src.exists() {
        error!(source = %src.display(), "Rename source not found");
        return Err(RecorderError::RenameSourceMissing(src.to_path_buf()));
    }
    if dst.exists() {
        error!(destination = %dst.display(), "Rename destination already exists");
        return Err(RecorderError::RenameDestinationExists(dst.to_path_buf()));
    }
    std::fs::rename(src, dst)?;
    info!(source = %src.display(), destination = %dst.display(), "Renamed");
    Ok(())
}

/// Where a recording ended up after [`rename_artifacts`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenamedPaths {
    pub directory: PathBuf,
    pub file_path: PathBuf,
}

/// Rename the artifacts of one recording.
///
/// `new_dir_name` and `new_stem` must already be sanitized.
pub fn rename_artifacts(
    directory: &Path,
    audio_file: &Path,
    new_dir_name: &str,
    new_stem: &str,
) -> RecorderResult<RenamedPaths> {
    let old_stem = file_stem_of(audio_file);
    let old_dir_name = directory
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = audio_file
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| crate::recording::naming::AUDIO_EXTENSION.to_string());

    let new_directory = directory.with_file_name(new_dir_name);
    if new_directory != directory && new_directory.exists() {
        return Err(RecorderError::RenameDestinationExists(new_directory));
    }

    let mut file_path = audio_file.to_path_buf();
    if old_stem != new_stem {
        let renamed = directory.join(format!("{}.{}", new_stem, extension));
        safe_rename(audio_file, &renamed)?;
        file_path = renamed;

        let transcriptions = directory.join(TRANSCRIPTIONS_DIR);
        if transcriptions.is_dir() {
            rename_transcription_outputs(&transcriptions, &old_stem, new_stem)?;
            let old_file_ref = format!("{}.", old_stem);
            let new_file_ref = format!("{}.", new_stem);
            rewrite_transcription_logs(
                &transcriptions,
                &[
                    (old_dir_name.as_str(), new_dir_name),
                    (old_file_ref.as_str(), new_file_ref.as_str()),
                ],
            )?;
        }
    }

    if new_directory != directory {
        safe_rename(directory, &new_directory)?;
        file_path = new_directory.join(file_path.file_name().unwrap_or_default());
    }

    Ok(RenamedPaths {
        directory: new_directory,
        file_path,
    })
}

fn file_stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn rename_transcription_outputs(dir: &Path, old_stem: &str, new_stem: &str) -> RecorderResult<()> {
    if old_stem.is_empty() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if name.contains(old_stem) {
            safe_rename(&path, &dir.join(name.replace(old_stem, new_stem)))?;
        }
    }
    Ok(())
}

fn rewrite_transcription_logs(dir: &Path, replacements: &[(&str, &str)]) -> RecorderResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| TEXT_EXTENSIONS.contains(&e));
        if !path.is_file() || !is_text {
            continue;
        }

        // Worker output is not guaranteed to be UTF-8; leave binary-ish files alone.
        let Ok(content) = std::fs::read_to_string(&path) else {
            debug!(path = %path.display(), "Skipping non-UTF-8 transcription file");
            continue;
        };
        let mut rewritten = content.clone();
        for (old, new) in replacements {
            if old.len() > 1 {
                rewritten = rewritten.replace(old, new);
            }
        }
        if rewritten != content {
            std::fs::write(&path, rewritten)?;
            debug!(path = %path.display(), "Rewrote names in transcription file");
        }
    }
    Ok(())
}
