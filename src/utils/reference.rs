use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use tokio::task;

use crate::cli::Arguments;
use crate::config::defs::{PipelineError, GZIP_EXT};
use crate::utils::file::{is_gzipped, decompress_gzip, resolve_path};


/// Source of the 3' UTR coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    Bed(PathBuf),
    Gtf(PathBuf),
}

/// Shared read-only reference files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceBundle {
    pub fasta: PathBuf,
    pub annotation: Annotation,
    pub mapping_bed: Option<PathBuf>,
    pub vcf: Option<PathBuf>,
}

impl ReferenceBundle {
    /// Collects reference paths from the arguments. Fails on a missing fasta or when neither a BED nor a GTF
    /// is given; a BED wins over a GTF.
    pub fn from_args(args: &Arguments, cwd: &Path) -> Result<Self, PipelineError> {
        let fasta = args
            .fasta
            .as_deref()
            .map(|f| resolve_path(f, cwd))
            .ok_or(PipelineError::MissingParameter("fasta"))?;
        let annotation = match (&args.bed, &args.gtf) {
            (Some(bed), _) => Annotation::Bed(resolve_path(bed, cwd)),
            (None, Some(gtf)) => Annotation::Gtf(resolve_path(gtf, cwd)),
            (None, None) => return Err(PipelineError::MissingParameter("bed or gtf (3' UTR annotation)")),
        };
        Ok(ReferenceBundle {
            fasta,
            annotation,
            mapping_bed: args.mapping_bed.as_deref().map(|b| resolve_path(b, cwd)),
            vcf: args.vcf.as_deref().map(|v| resolve_path(v, cwd)),
        })
    }

    /// Decompresses every gzipped reference once into `<out_dir>/reference/`. The returned bundle points at the
    /// decompressed copies, which is what every stage sees.
    ///
    /// # Arguments
    ///
    /// * `out_dir` - Run output directory.
    ///
    /// # Returns
    /// ReferenceBundle with plain-text paths.
    pub async fn prepare(self, out_dir: &Path) -> Result<Self, PipelineError> {
        let ref_dir = out_dir.join("reference");
        let annotation = match self.annotation {
            Annotation::Bed(p) => Annotation::Bed(unpack(p, &ref_dir).await?),
            Annotation::Gtf(p) => Annotation::Gtf(unpack(p, &ref_dir).await?),
        };
        Ok(ReferenceBundle {
            fasta: unpack(self.fasta, &ref_dir).await?,
            annotation,
            mapping_bed: match self.mapping_bed {
                Some(p) => Some(unpack(p, &ref_dir).await?),
                None => None,
            },
            vcf: match self.vcf {
                Some(p) => Some(unpack(p, &ref_dir).await?),
                None => None,
            },
        })
    }
}


async fn unpack(path: PathBuf, ref_dir: &Path) -> Result<PathBuf, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::IOError(format!("Reference file not found: {}", path.display())));
    }
    let gz = is_gzipped(&path).map_err(|e| PipelineError::IOError(e.to_string()))?;
    if !gz {
        return Ok(path);
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "reference".to_string());
    let target_name = name
        .strip_suffix(&format!(".{}", GZIP_EXT))
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{}.unpacked", name));
    let target = ref_dir.join(target_name);

    fs::create_dir_all(ref_dir).map_err(|e| PipelineError::IOError(e.to_string()))?;
    info!("Decompressing {} to {}", path.display(), target.display());
    let (src, dst) = (path.clone(), target.clone());
    task::spawn_blocking(move || decompress_gzip(&src, &dst))
        .await
        .map_err(|e| PipelineError::Other(e.into()))??;
    Ok(target)
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use clap::Parser;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_missing_fasta() {
        let args = Arguments::parse_from(["slamflow", "--bed", "utr.bed"]);
        let err = ReferenceBundle::from_args(&args, Path::new("/w")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingParameter("fasta")));
    }

    #[test]
    fn test_missing_annotation() {
        let args = Arguments::parse_from(["slamflow", "--fasta", "g.fa"]);
        assert!(matches!(
            ReferenceBundle::from_args(&args, Path::new("/w")),
            Err(PipelineError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_bed_preferred_over_gtf() -> Result<()> {
        let args = Arguments::parse_from(["slamflow", "--fasta", "g.fa", "--bed", "utr.bed", "--gtf", "genes.gtf"]);
        let refs = ReferenceBundle::from_args(&args, Path::new("/w"))?;
        assert_eq!(refs.annotation, Annotation::Bed(PathBuf::from("/w/utr.bed")));
        assert_eq!(refs.vcf, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_prepare_decompresses_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let gz = dir.path().join("genome.fa.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&gz)?, Compression::default());
        encoder.write_all(b">chr1\nACGT\n")?;
        encoder.finish()?;
        let bed = dir.path().join("utr.bed");
        fs::write(&bed, "chr1\t0\t4\tutr1\t0\t+\n")?;

        let refs = ReferenceBundle {
            fasta: gz,
            annotation: Annotation::Bed(bed.clone()),
            mapping_bed: None,
            vcf: None,
        };
        let prepared = refs.prepare(dir.path()).await?;
        assert_eq!(prepared.fasta, dir.path().join("reference").join("genome.fa"));
        assert_eq!(fs::read_to_string(&prepared.fasta)?, ">chr1\nACGT\n");
        assert_eq!(prepared.annotation, Annotation::Bed(bed));
        Ok(())
    }
}
