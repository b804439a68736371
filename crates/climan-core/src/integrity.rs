use std::io::Read;
use std::path::Path;

use climan_backend::ClimanError;
use sha2::{Digest, Sha256};

/// Find the digest listed for `file_name` in a `SHASUMS256.txt`-style listing.
pub fn expected_checksum(listing: &str, file_name: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let digest = parts.next()?;
        let name = parts.next()?.trim_start_matches('*');
        let name = name.strip_prefix("./").unwrap_or(name);
        (name == file_name).then(|| digest.to_ascii_lowercase())
    })
}

/// # Errors
/// Returns an IO error when the file cannot be read.
pub fn sha256_file(path: &Path) -> Result<String, ClimanError> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| ClimanError::io_at("failed to open file for checksum", path, &e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 16 * 1024];

    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| ClimanError::io_at("failed to read file for checksum", path, &e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compare the digest of `path` against the one published for `file_name`.
///
/// A listing that does not mention `file_name` is treated as a mismatch.
///
/// # Errors
/// Returns [`ClimanError::ChecksumMismatch`] when the digests differ.
pub fn verify_file(path: &Path, file_name: &str, listing: &str) -> Result<(), ClimanError> {
    let actual = sha256_file(path)?;
    let Some(expected) = expected_checksum(listing, file_name) else {
        return Err(ClimanError::ChecksumMismatch {
            file: file_name.to_string(),
            expected: "<not listed>".to_string(),
            actual,
        });
    };

    if actual.eq_ignore_ascii_case(&expected) {
        log::debug!("Checksum verified for {file_name}");
        Ok(())
    } else {
        Err(ClimanError::ChecksumMismatch {
            file: file_name.to_string(),
            expected,
            actual,
        })
    }
}
