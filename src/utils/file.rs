use std::path::Path;

use crate::error::Result;

/// Read ticker symbols from the first column of a header-less CSV file.
///
/// Blank cells and lines starting with `#` are skipped; symbols are returned as written.
pub fn read_symbol_file(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path.as_ref())?;

    let mut symbols = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(symbol) = record.get(0).map(str::trim).filter(|s| !s.is_empty()) {
            symbols.push(symbol.to_string());
        }
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reads_first_column_and_skips_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchlist.csv");
        fs::write(&path, "# watchlist\nAAPL,Apple\n msft \n\n,empty\nibm\n").unwrap();

        let symbols = read_symbol_file(&path).unwrap();
        assert_eq!(symbols, vec!["AAPL", "msft", "ibm"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_symbol_file(dir.path().join("absent.csv")).is_err());
    }
}
