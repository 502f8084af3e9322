//! Reading validation targets from CSV.
//!
//! Every row is `identifier,url` without a header. Lines starting with `#`
//! are comments. Unquoted commas inside the URL are kept as part of it.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use linkvet_lib::ValidationTarget;

/// Read all targets from `reader`
pub(crate) fn from_reader<R: Read>(reader: R) -> Result<Vec<ValidationTarget>> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut targets = Vec::new();
    for (row, record) in csv.records().enumerate() {
        let record = record.with_context(|| format!("Cannot read target in row {}", row + 1))?;
        let mut fields = record.iter();
        let Some(identifier) = fields.next() else {
            continue;
        };
        let url = fields.collect::<Vec<_>>().join(",");
        if identifier.is_empty() && url.is_empty() {
            continue;
        }
        // A row without a URL is kept: it is reported as malformed like any
        // other unusable URL
        targets.push(ValidationTarget::new(identifier, url));
    }
    Ok(targets)
}

/// Read all targets from the file at `path`, or from stdin if `path` is `-`
pub(crate) fn load(path: &Path) -> Result<Vec<ValidationTarget>> {
    if path == Path::new("-") {
        from_reader(std::io::stdin().lock())
    } else {
        let file = File::open(path)
            .with_context(|| format!("Cannot open target file: {}", path.display()))?;
        from_reader(file)
    }
}
