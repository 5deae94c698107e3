//! Snapshot upload packaging.
//!
//! Directories are zipped into temporary files, plain files are attached as
//! they are. All parts share the multipart field name `files`.

use std::fs::File;
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use reqwest::blocking::multipart::{Form, Part};
use tempfile::NamedTempFile;
use walkdir::{DirEntry, WalkDir};
use zip::{write::FileOptions, ZipWriter};

use crate::error::{Result, TestMachineError};

pub const FORM_FIELD: &str = "files";
pub const REMAPPINGS_NAME: &str = "remappings.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// Directory uploaded as a zip archive.
    Archive(PathBuf),
    /// Regular file uploaded under its base name.
    File(PathBuf),
    /// Dependency remappings, always uploaded as `remappings.txt`.
    Remappings(PathBuf),
}

/// A multipart form ready to send. Temporary archives are removed when this
/// value is dropped.
pub struct Upload {
    pub form: Form,
    _archives: Vec<NamedTempFile>,
}

/// Classifies upload paths, failing if any of them is missing on disk.
pub fn plan_attachments(files: &[PathBuf], remappings: Option<&Path>) -> Result<Vec<Attachment>> {
    if files.is_empty() {
        return Err(TestMachineError::MissingArgument("--file"));
    }
    if let Some(missing) = files
        .iter()
        .map(PathBuf::as_path)
        .chain(remappings)
        .find(|path| !path.exists())
    {
        return Err(TestMachineError::MissingFile(missing.to_path_buf()));
    }

    let (dirs, plain): (Vec<&PathBuf>, Vec<&PathBuf>) = files.iter().partition(|p| p.is_dir());
    let mut attachments: Vec<Attachment> = dirs
        .into_iter()
        .map(|p| Attachment::Archive(p.clone()))
        .collect();
    attachments.extend(plain.into_iter().map(|p| Attachment::File(p.clone())));
    if let Some(path) = remappings {
        attachments.push(Attachment::Remappings(path.to_path_buf()));
    }
    Ok(attachments)
}

pub fn build_upload(attachments: &[Attachment]) -> Result<Upload> {
    let mut form = Form::new();
    let mut archives = Vec::new();

    for attachment in attachments {
        let part = match attachment {
            Attachment::Archive(dir) => {
                let mut archive = tempfile::Builder::new().suffix(".zip").tempfile()?;
                build_zip_archive(dir, archive.as_file_mut())?;
                let part = Part::file(archive.path())?
                    .file_name(format!("{}.zip", unique_id()))
                    .mime_str("application/zip")?;
                archives.push(archive);
                part
            }
            Attachment::File(path) => Part::file(path)?,
            Attachment::Remappings(path) => Part::file(path)?.file_name(REMAPPINGS_NAME),
        };
        form = form.part(FORM_FIELD, part);
    }

    Ok(Upload {
        form,
        _archives: archives,
    })
}

/// Collision-resistant archive name.
pub fn unique_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Writes the contents of `dir` into a zip archive with entry paths relative
/// to `dir`. Every entry is included, hidden ones too.
pub fn build_zip_archive<W: Write + Seek>(dir: &Path, file: W) -> Result<W> {
    let mut writer = ZipWriter::new(file);
    let mut entries = walk_directory(dir);

    while let Some(entry) = entries.next().transpose()? {
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let Some(name) = relative.to_str() else {
            log::warn!(
                "skipping {}: path is not valid unicode",
                entry.path().display()
            );
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let name = name.replace('\\', "/");

        if entry.file_type().is_dir() {
            writer.add_directory(name, FileOptions::default())?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, FileOptions::default())?;
            io::copy(&mut File::open(entry.path())?, &mut writer)?;
        }
    }

    Ok(writer.finish()?)
}

fn walk_directory(dir: &Path) -> impl Iterator<Item = std::result::Result<DirEntry, walkdir::Error>> {
    WalkDir::new(dir).sort_by_file_name().into_iter()
}
