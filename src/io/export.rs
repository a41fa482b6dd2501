//! Export consolidation results to CSV.
//!
//! The export is meant to be easy to consume in spreadsheets or downstream scripts.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::{ConsolidationResult, PredictionRecord};
use crate::error::AppError;

/// Write per-parcel results to a CSV file.
///
/// `records` is matched to `results` by position; when given, the declared
/// class and the top two predictions are exported too.
pub fn write_results_csv(
    path: &Path,
    results: &[ConsolidationResult],
    records: Option<&[PredictionRecord]>,
) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    let mut file = BufWriter::new(file);

    writeln!(
        file,
        "parcel_id,input_class,pred1,pred1_prob,pred2,pred2_prob,consolidated_class,status,detail"
    )
    .map_err(|e| AppError::new(2, format!("Failed to write export CSV header: {e}")))?;

    for (i, r) in results.iter().enumerate() {
        let record = records.and_then(|rs| rs.get(i));
        let ranked = record.map(|rec| rec.ranked()).unwrap_or_default();
        let pred = |k: usize| ranked.get(k).map(|p| p.class.as_str()).unwrap_or("");
        let prob = |k: usize| ranked.get(k).map(|p| format!("{:.4}", p.probability)).unwrap_or_default();

        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{}",
            csv_field(&r.parcel_id),
            csv_field(record.map(|rec| rec.input_class().name.as_str()).unwrap_or("")),
            csv_field(pred(0)),
            prob(0),
            csv_field(pred(1)),
            prob(1),
            csv_field(&r.consolidated_class),
            r.status.as_str(),
            csv_field(&r.detail),
        )
        .map_err(|e| AppError::new(2, format!("Failed to write export CSV row: {e}")))?;
    }

    file.flush()
        .map_err(|e| AppError::new(2, format!("Failed to write export CSV '{}': {e}", path.display())))
}

/// Quote a field when it contains a separator, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClassLabel, ClassProbability, ConsolidationStatus};

    #[test]
    fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        let records = vec![
            PredictionRecord::new(
                "p1",
                vec![ClassProbability::new("MAIS", 0.9), ClassProbability::new("POTATO", 0.05)],
                ClassLabel::trainable("MAIS"),
                false,
            )
            .unwrap(),
        ];
        let results = vec![ConsolidationResult {
            parcel_id: "p1".to_string(),
            consolidated_class: "MAIS".to_string(),
            status: ConsolidationStatus::Ok,
            detail: "OK".to_string(),
        }];
        write_results_csv(&path, &results, Some(&records)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("parcel_id,input_class,pred1"));
        assert_eq!(lines[1], "p1,MAIS,MAIS,0.9000,POTATO,0.0500,MAIS,OK,OK");
    }

    #[test]
    fn fields_with_separators_are_quoted() {
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("DOUBT:PROBA1<2*PROBA2;DOUBT:X"), "DOUBT:PROBA1<2*PROBA2;DOUBT:X");
    }
}
