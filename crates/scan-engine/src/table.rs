//! Position tables for [`TabularScan`](crate::TabularScan).
//!
//! A table is line-oriented text with one `label, position` row per entry.
//! Lines starting with `#` are comments. Positions are quantities
//! (`12.5 mm`) or bare numbers in the table's default unit:
//!
//! ```text
//! # label, position
//! home,   0
//! sample, 12.5 mm
//! ref,    20000 um
//! ```

use scan_core::data::Axis;
use scan_core::error::{ScanError, ScanResult};
use scan_core::units::{Quantity, Unit};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Labelled positions in table order.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionTable {
    labels: Vec<String>,
    positions: Vec<Quantity>,
}

impl PositionTable {
    /// Build a table from `(label, position)` pairs.
    pub fn new(entries: Vec<(String, Quantity)>) -> ScanResult<Self> {
        if entries.is_empty() {
            return Err(ScanError::configuration("position table is empty"));
        }
        let (labels, positions) = entries.into_iter().unzip();
        Ok(Self { labels, positions })
    }

    /// Read a table file. A missing or unreadable file is a configuration
    /// error.
    pub fn from_path(path: impl AsRef<Path>, default_unit: Unit) -> ScanResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            ScanError::configuration(format!(
                "cannot open position table {}: {}",
                path.display(),
                e
            ))
        })?;
        let table = Self::from_reader(file, default_unit)?;
        debug!(path = %path.display(), entries = table.len(), "position table loaded");
        Ok(table)
    }

    /// Parse table text; bare numbers are read in `default_unit`.
    pub fn from_reader<R: Read>(reader: R, default_unit: Unit) -> ScanResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| {
                ScanError::configuration(format!("malformed position table: {}", e))
            })?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            // Indented comments are not caught by the reader
            if record.get(0).is_some_and(|field| field.starts_with('#')) {
                continue;
            }
            if record.len() != 2 {
                return Err(ScanError::configuration(format!(
                    "line {}: expected `label, position`, found {} fields",
                    line,
                    record.len()
                )));
            }

            let label = record[0].to_string();
            let position = parse_position(&record[1], default_unit).map_err(|e| {
                ScanError::configuration(format!("line {}: {}", line, e))
            })?;
            entries.push((label, position));
        }
        Self::new(entries)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Entry labels in table order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Label of entry `index`
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Entry positions in table order
    pub fn positions(&self) -> &[Quantity] {
        &self.positions
    }

    /// Positions in `unit`, in table order.
    pub fn to_axis(&self, unit: Unit) -> ScanResult<Axis> {
        let values = self
            .positions
            .iter()
            .map(|p| p.value_in(unit))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ScanError::configuration(format!("position table: {}", e)))?;
        Ok(Axis::new(values, unit).with_name("table"))
    }
}

fn parse_position(field: &str, default_unit: Unit) -> Result<Quantity, String> {
    let quantity = match field.parse::<f64>() {
        Ok(value) => Quantity::new(value, default_unit),
        Err(_) => field
            .parse::<Quantity>()
            .map_err(|e| format!("invalid position {:?}: {}", field, e))?,
    };
    if !quantity.value().is_finite() {
        return Err(format!("position {:?} is not finite", field));
    }
    if !quantity.unit().is_compatible(&default_unit) {
        return Err(format!(
            "position {} is not compatible with {}",
            quantity, default_unit
        ));
    }
    Ok(quantity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_core::units::{DEGREE, MICROMETER, MILLIMETER};
    use std::io::Write;

    #[test]
    fn test_parse_mixed_units_and_comments() {
        let text = concat!(
            "# label, position\n",
            "home, 0\n",
            "\n",
            "  # indented comment\n",
            "sample, 12.5 mm\n",
            "ref, 20000 um\n",
        );
        let table = PositionTable::from_reader(text.as_bytes(), MILLIMETER).unwrap();

        assert_eq!(table.labels(), &["home", "sample", "ref"]);
        assert_eq!(table.positions()[2], Quantity::new(20000.0, MICROMETER));

        let axis = table.to_axis(MILLIMETER).unwrap();
        assert_eq!(&axis.values()[..2], &[0.0, 12.5]);
        assert!((axis.values()[2] - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_keeps_table_order() {
        let text = "c, 3\na, 1\nb, 2\n";
        let axis = PositionTable::from_reader(text.as_bytes(), DEGREE)
            .unwrap()
            .to_axis(DEGREE)
            .unwrap();
        assert_eq!(axis.values(), &[3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_malformed_rows() {
        for text in ["only-label\n", "a, 1, extra\n", "a, twelve\n", "a, 5 deg\n", "# nothing\n"] {
            let err = PositionTable::from_reader(text.as_bytes(), MILLIMETER).unwrap_err();
            assert!(matches!(err, ScanError::Configuration(_)), "{text:?}: {err}");
        }
    }

    #[test]
    fn test_non_finite_positions_are_rejected() {
        for text in ["a, inf\n", "a, NaN\n", "a, -inf mm\n", "a, nan um\n"] {
            let err = PositionTable::from_reader(text.as_bytes(), MILLIMETER).unwrap_err();
            assert!(matches!(err, ScanError::Configuration(_)), "{text:?}: {err}");
            assert!(err.to_string().contains("not finite"), "{err}");
        }
    }

    #[test]
    fn test_missing_file() {
        let err = PositionTable::from_path("/nonexistent/positions.csv", MILLIMETER).unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "start, 1 mm").unwrap();
        writeln!(file, "end, 2 mm").unwrap();
        let table = PositionTable::from_path(file.path(), MILLIMETER).unwrap();
        assert_eq!(table.label(1), Some("end"));
    }
}
