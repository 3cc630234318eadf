//! Serial-number → passcode lookup table.
//! The wheel gates command access behind a passcode derived from its
//! serial number; the pairs ship as a two-column CSV asset.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use log::info;
use tokio::fs;

/// In-memory passcode table with exact-match lookup on trimmed serials.
#[derive(Debug, Default)]
pub struct PasscodeTable {
    entries: HashMap<String, String>,
}

impl PasscodeTable {
    /// Parses CSV text, one `serial,passcode` row per line.
    /// Rows that do not have exactly two columns are skipped; both
    /// columns are trimmed; the first row for a serial wins.
    pub fn parse(contents: &str) -> Self {
        let mut entries = HashMap::new();
        for line in contents.lines() {
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() == 2 {
                entries
                    .entry(parts[0].trim().to_string())
                    .or_insert_with(|| parts[1].trim().to_string());
            }
        }
        Self { entries }
    }

    /// Reads and parses the table from a file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).await?;
        let table = Self::parse(&contents);
        info!("Loaded {} passcode entries from {:?}", table.len(), path);
        Ok(table)
    }

    /// Looks up the passcode for a serial number.
    pub fn lookup(&self, serial: &str) -> Option<&str> {
        self.entries.get(serial.trim()).map(String::as_str)
    }

    /// Number of known serials.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table holds no rows at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_looks_up() {
        let table = PasscodeTable::parse("ABCDEFGHIJKLMN,A1B2C3\nOTHERSERIAL001,FFEE00\n");
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("ABCDEFGHIJKLMN"), Some("A1B2C3"));
        assert_eq!(table.lookup("OTHERSERIAL001"), Some("FFEE00"));
        assert_eq!(table.lookup("UNKNOWNSERIAL0"), None);
    }

    #[test]
    fn trims_both_columns_and_queries() {
        let table = PasscodeTable::parse("  ABCDEFGHIJKLMN , A1B2C3  \n");
        assert_eq!(table.lookup("ABCDEFGHIJKLMN"), Some("A1B2C3"));
        assert_eq!(table.lookup(" ABCDEFGHIJKLMN "), Some("A1B2C3"));
    }

    #[test]
    fn first_row_wins_for_duplicate_serials() {
        let table = PasscodeTable::parse("SAME,111111\nSAME,222222\n");
        assert_eq!(table.lookup("SAME"), Some("111111"));
    }

    #[test]
    fn skips_malformed_rows() {
        let table = PasscodeTable::parse("no-comma-here\nA,B,C\n\nGOOD,CAFE\n");
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("GOOD"), Some("CAFE"));
    }
}
