use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use speccore::data::samples::SampleSource;

use crate::error::{DataError, DataResult};

/// Text file of `<index> <count>` records, one per line.
///
/// Only the count column is kept, in file order. Blank lines and lines
/// starting with `#` are skipped; a trailing `# ...` on a record is ignored.
#[derive(Clone, Debug)]
pub struct SampleFile {
    path: PathBuf,
}

impl SampleFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        SampleFile {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses records from any reader; `path` only labels errors.
    pub fn parse<R: BufRead>(reader: R, path: &Path) -> DataResult<Vec<i64>> {
        let mut counts = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            let record = match line.split_once('#') {
                Some((before, _)) => before,
                None => line.as_str(),
            };
            let fields: Vec<&str> = record.split_whitespace().collect();
            match fields.as_slice() {
                [] => continue,
                [index, count] => {
                    let lineno = number + 1;
                    parse_whole(index)
                        .ok_or_else(|| DataError::sample_parse(path, lineno, format!("bad index `{}`", index)))?;
                    let count = parse_whole(count)
                        .ok_or_else(|| DataError::sample_parse(path, lineno, format!("bad count `{}`", count)))?;
                    if count < 0 {
                        return Err(DataError::sample_parse(path, lineno, format!("negative count {}", count)));
                    }
                    counts.push(count);
                }
                _ => {
                    return Err(DataError::sample_parse(
                        path,
                        number + 1,
                        format!("expected `<index> <count>`, got {} fields", fields.len()),
                    ))
                }
            }
        }
        Ok(counts)
    }
}

/// Accepts `12` as well as `12.0`, as written by numeric exporters.
fn parse_whole(token: &str) -> Option<i64> {
    token.parse::<i64>().ok().or_else(|| {
        let v = token.parse::<f64>().ok()?;
        (v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64).then_some(v as i64)
    })
}

impl SampleSource for SampleFile {
    type Error = DataError;

    fn read_samples(&mut self) -> DataResult<Vec<i64>> {
        let file = File::open(&self.path)?;
        let counts = SampleFile::parse(BufReader::new(file), &self.path)?;
        tracing::debug!(path = %self.path.display(), samples = counts.len(), "read sample file");
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_samples(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_reads_count_column() {
        let file = write_samples("# channel counts\n0 12\n1 15\n\n2 9.0  # tail comment\n3\t0\n");
        let mut source = SampleFile::new(file.path());
        assert_eq!(source.read_samples().unwrap(), vec![12, 15, 9, 0]);
    }

    #[test]
    fn test_malformed_record_names_line() {
        let file = write_samples("0 12\n1 abc\n");
        let err = SampleFile::new(file.path()).read_samples().unwrap_err();
        match err {
            DataError::SampleParse { line, ref reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("abc"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_rejects_wrong_field_count_and_negative_counts() {
        let path = Path::new("mem");
        let err = SampleFile::parse("0 1 2\n".as_bytes(), path).unwrap_err();
        assert!(matches!(err, DataError::SampleParse { line: 1, .. }));
        let err = SampleFile::parse("0 1\n1 -4\n".as_bytes(), path).unwrap_err();
        assert!(matches!(err, DataError::SampleParse { line: 2, .. }));
        let err = SampleFile::parse("0 1.5\n".as_bytes(), path).unwrap_err();
        assert!(matches!(err, DataError::SampleParse { line: 1, .. }));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SampleFile::new(dir.path().join("missing.txt")).read_samples().unwrap_err();
        assert!(matches!(err, DataError::Io(_)));
    }
}
