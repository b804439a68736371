use std::fs::File;
use std::io::Read;
use std::path::Path;

use climan_backend::ClimanError;
use log::{debug, warn};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    TarXz,
}

impl ArchiveFormat {
    /// Archive extension used by the upstream distribution for this format.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Zip => ".zip",
            Self::TarGz => ".tar.gz",
            Self::TarXz => ".tar.xz",
        }
    }

    fn from_magic(header: &[u8]) -> Option<Self> {
        if header.starts_with(ZIP_MAGIC) {
            Some(Self::Zip)
        } else if header.starts_with(GZIP_MAGIC) {
            Some(Self::TarGz)
        } else if header.starts_with(XZ_MAGIC) {
            Some(Self::TarXz)
        } else {
            None
        }
    }

    fn from_name(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") {
            Some(Self::TarXz)
        } else {
            None
        }
    }

    /// Sniff the format from the file header, falling back to the file name.
    ///
    /// # Errors
    /// Returns an extract error when neither identifies a supported format.
    pub fn detect(path: &Path) -> Result<Self, ClimanError> {
        let mut header = [0_u8; 6];
        let read = File::open(path)
            .and_then(|mut file| read_prefix(&mut file, &mut header))
            .map_err(|e| ClimanError::io_at("failed to read archive header", path, &e))?;

        Self::from_magic(&header[..read])
            .or_else(|| Self::from_name(path))
            .ok_or_else(|| ClimanError::extract(path, "unrecognized archive format"))
    }
}

fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Unpack `archive` into `dest`, which must already exist.
///
/// # Errors
/// Returns an extract error when the archive is corrupt or an entry cannot be
/// written.
pub fn extract(archive: &Path, dest: &Path) -> Result<(), ClimanError> {
    let format = ArchiveFormat::detect(archive)?;
    debug!(
        "Extracting {} ({format:?}) into {}",
        archive.display(),
        dest.display()
    );

    match format {
        ArchiveFormat::Zip => extract_zip(archive, dest),
        ArchiveFormat::TarGz => {
            let file = open(archive)?;
            unpack_tar(archive, flate2::read::GzDecoder::new(file), dest)
        }
        ArchiveFormat::TarXz => {
            let file = open(archive)?;
            unpack_tar(archive, xz2::read::XzDecoder::new(file), dest)
        }
    }
}

fn open(archive: &Path) -> Result<File, ClimanError> {
    File::open(archive).map_err(|e| ClimanError::io_at("failed to open archive", archive, &e))
}

fn unpack_tar(archive: &Path, reader: impl Read, dest: &Path) -> Result<(), ClimanError> {
    let mut tarball = tar::Archive::new(reader);
    tarball.set_preserve_permissions(true);
    tarball
        .unpack(dest)
        .map_err(|e| ClimanError::extract(archive, e))
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<(), ClimanError> {
    let mut zip = zip::ZipArchive::new(open(archive)?)
        .map_err(|e| ClimanError::extract(archive, e))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| ClimanError::extract(archive, e))?;
        let Some(name) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe path: {}", entry.name());
            continue;
        };
        let out_path = dest.join(name);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| {
                ClimanError::io_at("failed to create extraction directory", &out_path, &e)
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ClimanError::io_at("failed to create extraction directory", parent, &e)
            })?;
        }
        let mut outfile = File::create(&out_path)
            .map_err(|e| ClimanError::io_at("failed to create extracted file", &out_path, &e))?;
        std::io::copy(&mut entry, &mut outfile)
            .map_err(|e| ClimanError::io_at("failed to extract archive entry", &out_path, &e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
            }
        }
    }

    Ok(())
}
