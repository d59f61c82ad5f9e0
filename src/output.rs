//! Output formatting and persistence for pipeline tables.
//!
//! Every table is written as CSV with a header row; null cells are empty.
//! With `gzip` set, CSVs get a `.gz` suffix and are compressed with flate2.

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::pipeline::{PipelineOutputs, TRAFFIC_COLUMN};
use crate::processing::IndicatorTable;
use crate::types::{CausalResult, MonthlyPoint, Observation, SeriesProvenance};

/// Logs a value using Rust's debug pretty-print format.
pub fn print_pretty<T: std::fmt::Debug>(value: &T) {
    debug!("{:#?}", value);
}

/// Prints a value to stdout as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cell(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

/// Writes finished CSV bytes to `path`, compressing when asked.
/// Returns the path actually written.
fn persist(path: &Path, bytes: &[u8], gzip: bool) -> Result<PathBuf> {
    let target = if gzip {
        let mut name = path.as_os_str().to_owned();
        name.push(".gz");
        PathBuf::from(name)
    } else {
        path.to_path_buf()
    };

    let file = fs::File::create(&target)
        .with_context(|| format!("failed to create {}", target.display()))?;
    if gzip {
        let mut enc = GzEncoder::new(file, Compression::default());
        enc.write_all(bytes)?;
        enc.finish()?;
    } else {
        let mut file = file;
        file.write_all(bytes)?;
    }
    debug!(path = %target.display(), bytes = bytes.len(), "wrote table");
    Ok(target)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush CSV buffer: {}", e.error()))
}

/// Serializes rows with their derived header.
pub fn write_records<T: Serialize>(path: &Path, rows: &[T], gzip: bool) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    persist(path, &finish(writer)?, gzip)
}

/// `month_start,city,<value_name>` for one monthly series.
pub fn write_monthly(
    path: &Path,
    points: &[MonthlyPoint],
    value_name: &str,
    gzip: bool,
) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["month_start", "city", value_name])?;
    for p in points {
        writer.write_record([p.month_start.to_string(), p.city.clone(), cell(p.value)])?;
    }
    persist(path, &finish(writer)?, gzip)
}

/// `month_start,city,<columns...>` for the merged indicator table.
pub fn write_indicators(path: &Path, table: &IndicatorTable, gzip: bool) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let header: Vec<&str> = ["month_start", "city"]
        .into_iter()
        .chain(table.columns.iter().map(String::as_str))
        .collect();
    writer.write_record(&header)?;
    for row in &table.rows {
        let record: Vec<String> = [row.month_start.to_string(), row.city.clone()]
            .into_iter()
            .chain(row.values.iter().copied().map(cell))
            .collect();
        writer.write_record(&record)?;
    }
    persist(path, &finish(writer)?, gzip)
}

/// Raw observations in the layout `load_observations_csv` reads back.
pub fn write_observations(
    path: &Path,
    observations: &[Observation],
    gzip: bool,
) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["timestamp", "city", "value", "unit", "source"])?;
    for o in observations {
        writer.write_record([
            o.timestamp.to_rfc3339(),
            o.city.clone(),
            cell(o.value),
            o.unit.clone(),
            o.source.to_string(),
        ])?;
    }
    persist(path, &finish(writer)?, gzip)
}

/// Regression summary as text and the result record as JSON.
pub fn write_did(dir: &Path, result: &CausalResult) -> Result<(PathBuf, PathBuf)> {
    let summary = dir.join("did_summary.txt");
    fs::write(&summary, &result.summary)
        .with_context(|| format!("failed to write {}", summary.display()))?;
    let json = dir.join("did_result.json");
    fs::write(&json, serde_json::to_string_pretty(result)?)
        .with_context(|| format!("failed to write {}", json.display()))?;
    Ok((summary, json))
}

/// Writes every pipeline table into `dir`, creating it if needed.
pub fn write_all(
    dir: &Path,
    outputs: &PipelineOutputs,
    provenance: &[SeriesProvenance],
    pollution_column: &str,
    gzip: bool,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let (summary, json) = write_did(dir, &outputs.did)?;
    let written = vec![
        write_monthly(
            &dir.join("pollution_monthly.csv"),
            &outputs.pollution,
            pollution_column,
            gzip,
        )?,
        write_monthly(
            &dir.join("traffic_monthly.csv"),
            &outputs.traffic,
            TRAFFIC_COLUMN,
            gzip,
        )?,
        write_indicators(&dir.join("indicators.csv"), &outputs.indicators, gzip)?,
        summary,
        json,
        write_records(&dir.join("forecast.csv"), &outputs.forecast, gzip)?,
        write_records(&dir.join("anomalies.csv"), &outputs.anomalies, gzip)?,
        write_records(&dir.join("provenance.csv"), provenance, gzip)?,
    ];

    info!(dir = %dir.display(), files = written.len(), "outputs written");
    Ok(written)
}
