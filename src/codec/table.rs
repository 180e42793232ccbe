use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::core::error::{FieldmapError, FieldmapResult};
use crate::core::model::ConsensusResult;

const PROB_PREFIX: &str = "prob.";

/// One classifier row for one source segment.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRow {
    pub label: Option<u32>,
    pub response: u32,
    pub probabilities: BTreeMap<u32, f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionTable {
    pub rows: Vec<PredictionRow>,
    pub has_labels: bool,
}

impl PredictionTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn unquote(field: &str) -> &str {
    let field = field.trim();
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap_or(field)
}

fn parse_class(value: &str) -> Option<u32> {
    if let Ok(n) = value.parse::<u32>() {
        return Some(n);
    }
    let float = value.parse::<f64>().ok()?;
    (float >= 0.0 && float.fract() == 0.0 && float <= u32::MAX as f64).then_some(float as u32)
}

pub fn parse_predictions(path: &Path, text: &str) -> FieldmapResult<PredictionTable> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());
    let (_, header) = lines
        .next()
        .ok_or_else(|| FieldmapError::input_format(path, "empty prediction table"))?;
    let columns: Vec<&str> = header.split('\t').map(unquote).collect();

    let response_col = columns
        .iter()
        .position(|c| *c == "response")
        .ok_or_else(|| FieldmapError::input_format(path, "missing 'response' column"))?;
    let label_col = columns.iter().position(|c| *c == "label");
    let prob_cols = columns
        .iter()
        .enumerate()
        .filter_map(|(idx, c)| {
            let class = c.strip_prefix(PROB_PREFIX)?;
            Some(
                parse_class(class)
                    .map(|class| (idx, class))
                    .ok_or_else(|| FieldmapError::input_format(path, format!("bad class column {c:?}"))),
            )
        })
        .collect::<FieldmapResult<Vec<_>>>()?;
    if prob_cols.is_empty() {
        return Err(FieldmapError::input_format(path, "no 'prob.<class>' columns"));
    }

    let mut rows = Vec::new();
    for (line_idx, line) in lines {
        let line_no = line_idx + 1;
        let fields: Vec<&str> = line.split('\t').map(unquote).collect();
        let field = |idx: usize| {
            fields.get(idx).copied().ok_or_else(|| {
                FieldmapError::input_format(path, format!("line {line_no}: expected {} fields", columns.len()))
            })
        };

        let response_text = field(response_col)?;
        let response = parse_class(response_text).ok_or_else(|| {
            FieldmapError::input_format(path, format!("line {line_no}: bad response {response_text:?}"))
        })?;
        let label = match label_col {
            Some(col) => {
                let text = field(col)?;
                Some(parse_class(text).ok_or_else(|| {
                    FieldmapError::input_format(path, format!("line {line_no}: bad label {text:?}"))
                })?)
            }
            None => None,
        };
        let mut probabilities = BTreeMap::new();
        for &(col, class) in &prob_cols {
            let text = field(col)?;
            let p = text.parse::<f64>().map_err(|_| {
                FieldmapError::input_format(path, format!("line {line_no}: bad probability {text:?}"))
            })?;
            probabilities.insert(class, p);
        }
        rows.push(PredictionRow {
            label,
            response,
            probabilities,
        });
    }

    Ok(PredictionTable {
        rows,
        has_labels: label_col.is_some(),
    })
}

pub fn read_predictions(path: &Path) -> FieldmapResult<PredictionTable> {
    let text = fs::read_to_string(path).map_err(|e| FieldmapError::io(path, e))?;
    parse_predictions(path, &text)
}

/// `[label]  prob.0  prob.1 ...  response`, one row per merged segment.
pub fn format_consensus(results: &[ConsensusResult], include_labels: bool) -> String {
    let classes: BTreeSet<u32> = results
        .iter()
        .flat_map(|r| r.probabilities.keys().copied())
        .collect();

    let mut header: Vec<String> = Vec::with_capacity(classes.len() + 2);
    if include_labels {
        header.push("label".to_string());
    }
    header.extend(classes.iter().map(|c| format!("{PROB_PREFIX}{c}")));
    header.push("response".to_string());

    let mut out = header.join("\t");
    out.push('\n');
    for result in results {
        if include_labels {
            let _ = write!(out, "{}\t", result.segment);
        }
        for class in &classes {
            let _ = write!(out, "{}\t", result.probability(*class));
        }
        let _ = writeln!(out, "{}", result.response);
    }
    out
}

pub fn write_consensus(path: &Path, results: &[ConsensusResult], include_labels: bool) -> FieldmapResult<()> {
    fs::write(path, format_consensus(results, include_labels)).map_err(|e| FieldmapError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_quoted_r_style_table() {
        let text = "\"label\"\t\"prob.0\"\t\"prob.1\"\t\"response\"\n\
                    \"4\"\t0.25\t0.75\t\"1\"\n\
                    \n\
                    \"2\"\t0.9\t0.1\t\"0\"\n";
        let table = parse_predictions(Path::new("p.tsv"), text).unwrap();
        assert!(table.has_labels);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].label, Some(4));
        assert_eq!(table.rows[0].response, 1);
        assert_eq!(table.rows[0].probabilities.get(&1), Some(&0.75));
        assert_eq!(table.rows[1].probabilities.get(&0), Some(&0.9));
    }

    #[test]
    fn table_without_labels_or_with_extra_columns() {
        let text = "prob.1\tfeature\tresponse\n0.4\tx\t0\n";
        let table = parse_predictions(Path::new("p.tsv"), text).unwrap();
        assert!(!table.has_labels);
        assert_eq!(table.rows[0].label, None);
        assert_eq!(table.rows[0].probabilities.len(), 1);
    }

    #[test]
    fn rejects_missing_columns_and_short_rows() {
        let missing = parse_predictions(Path::new("p.tsv"), "prob.1\n0.3\n");
        assert!(matches!(missing, Err(FieldmapError::InputFormat { .. })));

        let short = parse_predictions(Path::new("p.tsv"), "prob.0\tprob.1\tresponse\n0.3\t0.7\n");
        let message = short.unwrap_err().to_string();
        assert!(message.contains("line 2"), "{message}");
    }

    #[test]
    fn formats_consensus_with_and_without_labels() {
        let results = vec![ConsensusResult {
            segment: 3,
            probabilities: BTreeMap::from([(0, 0.25), (1, 0.75)]),
            response: 1,
        }];
        assert_eq!(
            format_consensus(&results, true),
            "label\tprob.0\tprob.1\tresponse\n3\t0.25\t0.75\t1\n"
        );
        assert_eq!(
            format_consensus(&results, false),
            "prob.0\tprob.1\tresponse\n0.25\t0.75\t1\n"
        );
    }
}
