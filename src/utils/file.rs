use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use flate2::read::GzDecoder;

use crate::config::defs::GZIP_EXT;

const STRIPPED_EXTS: &[&str] = &["fastq", "fq", "fasta", "fa", "fna", "bam", "sam", "vcf", "tsv", "csv", "bed", "gtf", "txt"];


pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}


/// Resolves a user-supplied path against the working directory.
///
/// # Arguments
///
/// * `path` - Path as given on the command line or in the design table.
/// * `cwd` - Directory relative paths are anchored to.
///
/// # Returns
/// Absolute PathBuf.
pub fn resolve_path(path: &str, cwd: &Path) -> PathBuf {
    let p = PathBuf::from(path);
    if p.is_absolute() {
        p
    } else {
        cwd.join(p)
    }
}


/// File name with a trailing `.gz` and one known data extension removed,
/// e.g. `A_1.fq.gz` -> `A_1`, `A_slamdunk_mapped.bam` -> `A_slamdunk_mapped`.
pub fn extension_remover(path: &Path) -> String {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(stripped) = name.strip_suffix(&format!(".{}", GZIP_EXT)) {
        name = stripped.to_string();
    }
    if let Some((stem, ext)) = name.rsplit_once('.') {
        if STRIPPED_EXTS.contains(&ext.to_ascii_lowercase().as_str()) {
            return stem.to_string();
        }
    }
    name
}


/// Decompresses a gzip file to `dst`.
pub fn decompress_gzip(src: &Path, dst: &Path) -> Result<()> {
    let input = File::open(src).map_err(|e| anyhow!("Failed to open {}: {}", src.display(), e))?;
    let mut decoder = GzDecoder::new(BufReader::new(input));
    let output = File::create(dst).map_err(|e| anyhow!("Failed to create {}: {}", dst.display(), e))?;
    let mut writer = BufWriter::new(output);
    io::copy(&mut decoder, &mut writer)
        .map_err(|e| anyhow!("Failed to decompress {}: {}", src.display(), e))?;
    writer.flush()?;
    Ok(())
}
