/// Design table parsing: tab-separated, one header line, one row per sample.
use std::fs;
use std::path::Path;

use log::debug;

use crate::config::defs::{
    PipelineError, DEFAULT_SAMPLE_TIME, DEFAULT_SAMPLE_TYPE, DESIGN_GROUP_COL, DESIGN_NAME_COL, DESIGN_READS_COL,
    DESIGN_TIME_COL, DESIGN_TYPE_COL,
};
use crate::engine::registry::{Sample, SampleRegistry};
use crate::utils::file::resolve_path;


/// Reads the design table into a SampleRegistry.
///
/// # Arguments
///
/// * `path` - Design table path.
/// * `cwd` - Directory relative reads paths are resolved against.
///
/// # Returns
/// SampleRegistry in row order.
pub fn load_design(path: &Path, cwd: &Path) -> Result<SampleRegistry, PipelineError> {
    let text = fs::read_to_string(path)
        .map_err(|e| PipelineError::IOError(format!("Failed to read design table {}: {}", path.display(), e)))?;
    let samples = parse_design(&text, cwd)?;
    debug!("Design table {} lists {} sample(s)", path.display(), samples.len());
    SampleRegistry::new(samples)
}


/// Parses design table text. Columns are located by header name; `name`, `reads` and `group` are required,
/// `type` and `time` fall back to defaults. Blank lines and `#` comments are skipped.
pub fn parse_design(text: &str, cwd: &Path) -> Result<Vec<Sample>, PipelineError> {
    let mut lines = text
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'));

    let header: Vec<String> = lines
        .next()
        .ok_or_else(|| PipelineError::InvalidDesign("design table is empty".to_string()))?
        .split('\t')
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    let column = |name: &str| header.iter().position(|h| h == name);
    let required = |name: &'static str| {
        column(name).ok_or_else(|| PipelineError::InvalidDesign(format!("missing column '{}'", name)))
    };
    let name_col = required(DESIGN_NAME_COL)?;
    let reads_col = required(DESIGN_READS_COL)?;
    let group_col = required(DESIGN_GROUP_COL)?;
    let type_col = column(DESIGN_TYPE_COL);
    let time_col = column(DESIGN_TIME_COL);

    let mut samples = Vec::new();
    for (i, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split('\t').map(|f| f.trim()).collect();
        let field = |col: usize| fields.get(col).copied().unwrap_or("");
        let optional = |col: Option<usize>, default: &str| {
            col.map(|c| field(c))
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };

        let name = field(name_col);
        if name.is_empty() {
            return Err(PipelineError::InvalidDesign(format!("row {} has no sample name", i + 1)));
        }
        let reads = field(reads_col);
        if reads.is_empty() {
            return Err(PipelineError::InvalidDesign(format!("sample {} has no reads path", name)));
        }
        let group = field(group_col);
        if group.is_empty() {
            return Err(PipelineError::InvalidDesign(format!("sample {} has no group", name)));
        }

        samples.push(Sample {
            name: name.to_string(),
            reads: resolve_path(reads, cwd),
            sample_type: optional(type_col, DEFAULT_SAMPLE_TYPE),
            time: optional(time_col, DEFAULT_SAMPLE_TIME),
            group: group.to_string(),
        });
    }
    Ok(samples)
}


#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::path::PathBuf;

    #[test]
    fn test_parse_full_design() -> Result<()> {
        let text = "name\treads\ttype\ttime\tgroup\nA\treads/A.fq.gz\tchase\t60\tG1\nB\t/data/B.fq.gz\tpulse\t0\tG1\n";
        let samples = parse_design(text, Path::new("/work"))?;
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].reads, PathBuf::from("/work/reads/A.fq.gz"));
        assert_eq!(samples[0].sample_type, "chase");
        assert_eq!(samples[0].time, "60");
        assert_eq!(samples[1].reads, PathBuf::from("/data/B.fq.gz"));
        Ok(())
    }

    #[test]
    fn test_column_order_and_defaults() -> Result<()> {
        let text = "# comment\ngroup\tname\treads\n\nG2\tC\tC.fq\n";
        let samples = parse_design(text, Path::new("/w"))?;
        assert_eq!(samples[0].name, "C");
        assert_eq!(samples[0].group, "G2");
        assert_eq!(samples[0].sample_type, "pulse");
        assert_eq!(samples[0].time, "0");
        Ok(())
    }

    #[test]
    fn test_missing_reads_is_fatal() {
        let text = "name\treads\tgroup\nA\t\tG1\n";
        let err = parse_design(text, Path::new("/w")).unwrap_err();
        assert!(err.to_string().contains("reads"));
    }

    #[test]
    fn test_missing_group_column() {
        let text = "name\treads\nA\tA.fq\n";
        assert!(matches!(parse_design(text, Path::new("/w")), Err(PipelineError::InvalidDesign(_))));
    }

    #[test]
    fn test_load_rejects_duplicates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("design.tsv");
        std::fs::write(&path, "name\treads\tgroup\nA\tA.fq\tG1\nA\tA2.fq\tG1\n")?;
        assert!(load_design(&path, dir.path()).is_err());
        Ok(())
    }
}
