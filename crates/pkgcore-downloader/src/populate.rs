//! Donor-archive byte donation during init (spec §4.5.2 step f), modelled
//! on `cascette-cache`'s multi-layer local/CDN fallback: scan a list of
//! local archives and copy bytes for entries the target doesn't have yet
//! from any archive that is byte-compatible for that entry.

use pkgcore_archive::PackageArchive;
use pkgcore_types::FilePath;
use std::collections::HashMap;
use std::path::Path;

use crate::error::DownloaderResult;

/// Two archives are compatible for cross-population (spec §3) iff: same
/// platform, same obfuscation flag, same compression-dict presence (and
/// byte-identical dictionary), same dual-CRC discipline. Per-entry
/// donation additionally requires matching `(compressed_size,
/// uncompressed_size, crc32_post)`.
fn archives_compatible(target: &PackageArchive, donor: &PackageArchive) -> bool {
    let (Ok(target_header), Ok(donor_header)) = (target.header(), donor.header()) else {
        return false;
    };
    target_header.platform_tag == donor_header.platform_tag
        && target_header.obfuscated == donor_header.obfuscated
        && target_header.flags.has_compression_dict == donor_header.flags.has_compression_dict
        && target_header.version.has_dual_crc() == donor_header.version.has_dual_crc()
}

/// For every `path` in `missing`, scan `donor_paths` in order and return the
/// raw on-disk bytes (still obfuscated/compressed, ready to copy verbatim
/// into the target's canonical offset) of the first compatible donor whose
/// entry for that path matches `(compressed_size, uncompressed_size,
/// crc32_post)`. An incompatible donor is skipped entirely rather than
/// treated as an error (spec §4.5.2: "no donation rather than hard error").
pub fn scan_donors(
    target: &PackageArchive,
    donor_paths: &[impl AsRef<Path>],
    missing: &[FilePath],
) -> DownloaderResult<HashMap<FilePath, Vec<u8>>> {
    let mut donated = HashMap::new();
    let target_table = target.file_table()?;

    for donor_path in donor_paths {
        let donor = match PackageArchive::open(donor_path) {
            Ok(archive) if archive.is_ok() => archive,
            _ => {
                tracing::warn!(path = %donor_path.as_ref().display(), "donor archive unreadable, skipping");
                continue;
            }
        };

        if !archives_compatible(target, &donor) {
            tracing::debug!(path = %donor_path.as_ref().display(), "donor archive incompatible, skipping");
            continue;
        }

        let Ok(donor_table) = donor.file_table() else {
            continue;
        };

        for path in missing {
            if donated.contains_key(path) {
                continue;
            }
            let (Some(target_row), Some(donor_row)) = (target_table.get(path), donor_table.get(path))
            else {
                continue;
            };
            let matches = target_row.entry.compressed_size == donor_row.entry.compressed_size
                && target_row.entry.uncompressed_size == donor_row.entry.uncompressed_size
                && target_row.entry.crc32_post() == donor_row.entry.crc32_post();
            if !matches {
                continue;
            }

            if let Ok(bytes) = donor.read_raw_entry_bytes(path) {
                donated.insert(path.clone(), bytes);
            }
        }
    }

    Ok(donated)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Exercised end-to-end from `worker.rs`'s init tests, which build two
    // on-disk archives sharing an entry; this module's unit surface is
    // covered there since `scan_donors` needs real `PackageArchive`
    // fixtures to be meaningful.
}
