//! Traversal-safe archive extraction.
//!
//! Zip, `.tar.gz` and `.tar.xz` archives are recognised by their leading
//! bytes. Every member name is validated before anything is written, and
//! every write goes through [`safe_join`]. Archives are unpacked into a
//! scratch directory next to the target and moved into place only once
//! extraction has succeeded, so a failed extraction never leaves a partial
//! install behind.

use crate::error::ExtractError;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, warn};
use tvm_config::paths::normalize_lexically;
use xz2::read::XzDecoder;

/// Archive container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    TarXz,
}

impl ArchiveFormat {
    /// Recognise a format from an archive's leading bytes.
    pub fn from_magic(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06") {
            Some(Self::Zip)
        } else if bytes.starts_with(&[0x1f, 0x8b]) {
            Some(Self::TarGz)
        } else if bytes.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Some(Self::TarXz)
        } else {
            None
        }
    }

    /// Sniff the format of the file at `path`.
    pub fn detect(path: &Path) -> Result<Self, ExtractError> {
        let mut file = File::open(path).map_err(|e| ExtractError::io("Failed to open archive", path, e))?;
        let mut magic = [0u8; 6];
        let mut read = 0;
        while read < magic.len() {
            match file.read(&mut magic[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ExtractError::io("Failed to read archive", path, e)),
            }
        }
        Self::from_magic(&magic[..read]).ok_or_else(|| ExtractError::UnknownFormat(path.to_path_buf()))
    }
}

#[derive(Debug)]
struct Member {
    name: String,
    is_dir: bool,
}

/// Reject member names that are absolute or climb out of the target.
pub fn check_member(name: &str) -> Result<(), ExtractError> {
    let rooted = name.starts_with('/') || name.starts_with('\\');
    let drive = name.len() >= 2 && name.as_bytes()[1] == b':' && name.as_bytes()[0].is_ascii_alphabetic();
    let parent = name.split(['/', '\\']).any(|part| part == "..");
    if rooted || drive || parent {
        return Err(ExtractError::UnsafePath(name.to_string()));
    }
    Ok(())
}

/// Join an archive member name onto `base`, failing if the result would
/// land outside `base`.
pub fn safe_join(base: &Path, name: &str) -> Result<PathBuf, ExtractError> {
    check_member(name)?;
    let mut joined = base.to_path_buf();
    for part in name.split(['/', '\\']) {
        if part.is_empty() || part == "." {
            continue;
        }
        joined.push(part);
    }
    let base = normalize_lexically(base);
    let resolved = normalize_lexically(&joined);
    if !resolved.starts_with(&base) {
        return Err(ExtractError::Escape(name.to_string()));
    }
    Ok(joined)
}

/// First path component of a member name, ignoring a leading `./`.
fn top_level(name: &str) -> Option<&str> {
    name.split(['/', '\\']).find(|part| !part.is_empty() && *part != ".")
}

/// The shared root directory, if the archive has exactly one and lists it
/// first.
fn single_root(members: &[Member]) -> Option<String> {
    let first = members.first()?;
    if !first.is_dir {
        return None;
    }
    let root = top_level(&first.name)?;
    members
        .iter()
        .all(|m| top_level(&m.name).is_none_or(|top| top == root))
        .then(|| root.to_string())
}

/// Extract `archive` into `target`, replacing whatever is there.
///
/// A single-root archive (`jdk-17/bin/java`, ...) has that root's contents
/// placed directly in `target`.
pub fn extract_archive(archive: &Path, target: &Path) -> Result<(), ExtractError> {
    let format = ArchiveFormat::detect(archive)?;
    let members = list_members(archive, format)?;
    for member in &members {
        check_member(&member.name)?;
    }
    let root = single_root(&members);
    debug!(
        "Extracting {} ({:?}, {} members, root {:?}) to {}",
        archive.display(),
        format,
        members.len(),
        root,
        target.display()
    );

    let parent = target.parent().ok_or_else(|| {
        ExtractError::io(
            "Install target has no parent directory",
            target,
            io::Error::from(io::ErrorKind::InvalidInput),
        )
    })?;
    fs::create_dir_all(parent).map_err(|e| ExtractError::io("Failed to create install root", parent, e))?;
    let scratch = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(parent)
        .map_err(|e| ExtractError::io("Failed to create scratch directory", parent, e))?;

    unpack(archive, format, scratch.path())?;

    let source = match &root {
        Some(root) => scratch.path().join(root),
        None => scratch.path().to_path_buf(),
    };
    if target.exists() {
        fs::remove_dir_all(target).map_err(|e| ExtractError::io("Failed to remove previous install", target, e))?;
    }
    fs::rename(&source, target).map_err(|e| ExtractError::io("Failed to move extracted files into place", target, e))?;
    Ok(())
}

fn archive_error(path: &Path, err: impl std::fmt::Display) -> ExtractError {
    ExtractError::Archive {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn open_tar(path: &Path, format: ArchiveFormat) -> Result<Archive<Box<dyn Read>>, ExtractError> {
    let file = File::open(path).map_err(|e| ExtractError::io("Failed to open archive", path, e))?;
    let reader = BufReader::new(file);
    let decoder: Box<dyn Read> = match format {
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(reader)),
        ArchiveFormat::TarXz => Box::new(XzDecoder::new(reader)),
        ArchiveFormat::Zip => return Err(ExtractError::UnknownFormat(path.to_path_buf())),
    };
    Ok(Archive::new(decoder))
}

fn open_zip(path: &Path) -> Result<zip::ZipArchive<File>, ExtractError> {
    let file = File::open(path).map_err(|e| ExtractError::io("Failed to open archive", path, e))?;
    zip::ZipArchive::new(file).map_err(|e| archive_error(path, e))
}

fn list_members(path: &Path, format: ArchiveFormat) -> Result<Vec<Member>, ExtractError> {
    let mut members = Vec::new();
    match format {
        ArchiveFormat::Zip => {
            let mut archive = open_zip(path)?;
            for i in 0..archive.len() {
                let file = archive.by_index_raw(i).map_err(|e| archive_error(path, e))?;
                members.push(Member {
                    name: file.name().to_string(),
                    is_dir: file.is_dir(),
                });
            }
        }
        ArchiveFormat::TarGz | ArchiveFormat::TarXz => {
            let mut archive = open_tar(path, format)?;
            for entry in archive.entries().map_err(|e| archive_error(path, e))? {
                let entry = entry.map_err(|e| archive_error(path, e))?;
                let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
                if matches!(entry.header().entry_type(), EntryType::XGlobalHeader | EntryType::XHeader) {
                    continue;
                }
                members.push(Member {
                    is_dir: entry.header().entry_type().is_dir(),
                    name,
                });
            }
        }
    }
    Ok(members)
}

fn unpack(path: &Path, format: ArchiveFormat, dest: &Path) -> Result<(), ExtractError> {
    match format {
        ArchiveFormat::Zip => unpack_zip(path, dest),
        ArchiveFormat::TarGz | ArchiveFormat::TarXz => unpack_tar(path, format, dest),
    }
}

fn create_parent(path: &Path) -> Result<(), ExtractError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ExtractError::io("Failed to create directory", parent, e))?;
    }
    Ok(())
}

fn unpack_zip(path: &Path, dest: &Path) -> Result<(), ExtractError> {
    let mut archive = open_zip(path)?;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| archive_error(path, e))?;
        let out = safe_join(dest, file.name())?;

        if file.is_dir() {
            fs::create_dir_all(&out).map_err(|e| ExtractError::io("Failed to create directory", &out, e))?;
            continue;
        }
        create_parent(&out)?;
        let mut outfile = File::create(&out).map_err(|e| ExtractError::io("Failed to create file", &out, e))?;
        io::copy(&mut file, &mut outfile).map_err(|e| ExtractError::io("Failed to write file", &out, e))?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o777))
                .map_err(|e| ExtractError::io("Failed to set permissions", &out, e))?;
        }
    }
    Ok(())
}

/// Fail if the deepest existing ancestor of `out`, with symlinks resolved,
/// is not inside `root`. Links already unpacked can redirect later members.
fn ensure_inside(root: &Path, out: &Path, name: &str) -> Result<(), ExtractError> {
    let mut ancestor = out.parent();
    while let Some(dir) = ancestor {
        if fs::symlink_metadata(dir).is_ok() {
            break;
        }
        ancestor = dir.parent();
    }
    let resolved = ancestor.and_then(|dir| dir.canonicalize().ok());
    match resolved {
        Some(dir) if dir.starts_with(root) => Ok(()),
        _ => Err(ExtractError::Escape(name.to_string())),
    }
}

fn unpack_tar(path: &Path, format: ArchiveFormat, dest: &Path) -> Result<(), ExtractError> {
    let root = dest
        .canonicalize()
        .map_err(|e| ExtractError::io("Failed to resolve scratch directory", dest, e))?;
    let mut archive = open_tar(path, format)?;
    for entry in archive.entries().map_err(|e| archive_error(path, e))? {
        let mut entry = entry.map_err(|e| archive_error(path, e))?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let kind = entry.header().entry_type();
        let out = match kind {
            EntryType::XGlobalHeader | EntryType::XHeader => continue,
            _ => safe_join(dest, &name)?,
        };
        if out == dest {
            continue;
        }

        if kind.is_hard_link() {
            warn!("Skipping hard link {} in {}", name, path.display());
            continue;
        }
        if kind.is_symlink() {
            let link = entry
                .link_name()
                .map_err(|e| archive_error(path, e))?
                .ok_or_else(|| ExtractError::UnsafePath(name.clone()))?;
            let resolved = normalize_lexically(&out.parent().unwrap_or(dest).join(&link));
            if link.is_absolute() || !resolved.starts_with(normalize_lexically(dest)) {
                return Err(ExtractError::Escape(format!("{} -> {}", name, link.display())));
            }
        }

        ensure_inside(&root, &out, &name)?;
        entry
            .unpack_in(dest)
            .map_err(|e| ExtractError::io("Failed to unpack entry", &out, e))?;
    }
    Ok(())
}
