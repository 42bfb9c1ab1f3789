//! Spec sheet discovery and field extraction.
//!
//! Sheets live as CSV exports in the input bucket. The header row comes in
//! two layouts (with or without a leading `gg` column) and any columns
//! after the required block carry change-variant codes.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::AtbError;
use crate::remote::SpecItem;

const BASE_HEADERS: [&str; 4] = ["from", "specification", "effectivityweek", "configname"];
const GG_HEADERS: [&str; 5] = ["gg", "from", "specification", "effectivityweek", "configname"];
const TRUTHY: [&str; 9] = ["1", "y", "yes", "true", "t", "x", "✓", "✔", "ok"];

/// One discovered input sheet; `id` doubles as the job identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheet {
    pub id: String,
    pub path: PathBuf,
}

/// Scan the input bucket for spec sheets, one pass, sorted by name.
///
/// Office lock files (`~$…`) and the VM filter file are skipped. A missing
/// bucket yields an empty list rather than an error.
pub fn pick_spec_sheets(dir: &Path) -> Result<Vec<SpecSheet>, AtbError> {
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "input bucket not found");
        return Ok(Vec::new());
    }

    let mut sheets = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_lowercase();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if !is_csv || name.starts_with("~$") || name.starts_with("vms_filter") {
            continue;
        }
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        sheets.push(SpecSheet { id, path });
    }
    sheets.sort_by(|a, b| a.path.cmp(&b.path));

    info!(count = sheets.len(), dir = %dir.display(), "found spec sheets");
    Ok(sheets)
}

/// Read and validate a sheet, returning its usable rows.
///
/// Fails fast: any structural problem is a parse error and the job carrying
/// this sheet fails without retry.
pub fn read_rows(path: &Path) -> Result<Vec<SpecItem>, AtbError> {
    let parse_err = |message: String| AtbError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let text = std::fs::read_to_string(path).map_err(|e| parse_err(e.to_string()))?;
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header_line = lines
        .next()
        .ok_or_else(|| parse_err("missing header row".to_string()))?;
    let original: Vec<String> = header_line.split(',').map(|c| c.trim().to_string()).collect();
    let cols: Vec<String> = original.iter().map(|c| norm(c)).collect();

    let has_gg = cols.first().is_some_and(|c| c == "gg");
    let need: &[&str] = if has_gg { &GG_HEADERS } else { &BASE_HEADERS };
    let got: Vec<&str> = cols.iter().take(need.len()).map(String::as_str).collect();
    if got != need {
        return Err(parse_err(format!(
            "invalid headers: expected first {} columns {:?}, got {:?}",
            need.len(),
            need,
            &original[..original.len().min(need.len())],
        )));
    }
    let cv_start = need.len();

    let mut rows = Vec::new();
    for line in lines {
        let cells: Vec<&str> = line.split(',').map(str::trim).collect();
        let cell = |i: usize| cells.get(i).copied().unwrap_or_default();

        let offset = usize::from(has_gg);
        let spec_id = cell(offset + 1).to_string();
        if spec_id.is_empty() {
            continue;
        }
        // `gg` defaults to true when the column is absent.
        let gg = if has_gg { to_bool(cell(0)) } else { true };
        let from_name = cell(offset).to_string();
        let spec_week = cell(offset + 2).to_string();
        let config_name = Some(cell(offset + 3).to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| {
                if from_name.is_empty() {
                    spec_id.clone()
                } else {
                    from_name.clone()
                }
            });
        let change_variants = dedupe_preserve_order(
            cells
                .iter()
                .skip(cv_start)
                .map(|c| c.trim().to_string())
                .collect(),
        );

        rows.push(SpecItem {
            from_name,
            spec_id,
            config_name,
            spec_week,
            gg,
            change_variants,
        });
    }

    Ok(rows)
}

/// Read the optional VM filter beside the sheets: one entry per line,
/// `#` comments and blanks ignored. Missing file means no filter.
pub fn read_vms_filter(dir: &Path) -> Vec<String> {
    let path = dir.join("vms_filter.txt");
    let Ok(text) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

// Normalize header names: lowercase, spaces and underscores removed.
fn norm(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn to_bool(s: &str) -> bool {
    TRUTHY.contains(&s.trim().to_lowercase().as_str())
}

fn dedupe_preserve_order(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for v in values {
        if !v.is_empty() && !out.contains(&v) {
            out.push(v);
        }
    }
    out
}
