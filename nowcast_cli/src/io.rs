// nowcast_cli/src/io.rs

//! CSV in and out. The core never touches files; everything on disk goes
//! through here.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use nowcast_core::backtest::{BacktestReport, Gap, NowcastRecord};
use nowcast_core::data::SensorTable;
use nowcast_core::epiweek::Epiweek;
use nowcast_core::types::{Region, SensorId};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One row of the sensor file. An empty `value` is a missing reading; an
/// absent `issued` means the reading was known in its own week.
#[derive(Debug, Deserialize)]
struct SensorRow {
    region: String,
    epiweek: u32,
    sensor: String,
    value: Option<f64>,
    #[serde(default)]
    issued: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TruthRow {
    region: String,
    epiweek: u32,
    value: Option<f64>,
}

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(input)
}

/// Adds every sensor row to `table`. Returns the number of readings stored.
pub fn read_sensors<R: Read>(input: R, table: &mut SensorTable) -> Result<usize> {
    let mut stored = 0;
    for (i, row) in reader(input).deserialize::<SensorRow>().enumerate() {
        let line = i + 2;
        let row = row.with_context(|| format!("malformed sensor row on line {line}"))?;
        let Some(value) = row.value else {
            continue;
        };
        let epiweek = Epiweek::from_code(row.epiweek).with_context(|| format!("line {line}"))?;
        let issued = match row.issued {
            Some(code) => Epiweek::from_code(code).with_context(|| format!("line {line}"))?,
            None => epiweek,
        };
        table.insert_revision(Region::new(row.region), SensorId::new(row.sensor), epiweek, issued, value);
        stored += 1;
    }
    Ok(stored)
}

/// Adds every ground-truth row to `table`. Returns the number of values stored.
pub fn read_truth<R: Read>(input: R, table: &mut SensorTable) -> Result<usize> {
    let mut stored = 0;
    for (i, row) in reader(input).deserialize::<TruthRow>().enumerate() {
        let line = i + 2;
        let row = row.with_context(|| format!("malformed truth row on line {line}"))?;
        let Some(value) = row.value else {
            continue;
        };
        let epiweek = Epiweek::from_code(row.epiweek).with_context(|| format!("line {line}"))?;
        table.insert_truth(Region::new(row.region), epiweek, value);
        stored += 1;
    }
    Ok(stored)
}

pub fn load_table(sensors: &Path, truth: &Path) -> Result<SensorTable> {
    let mut table = SensorTable::new();
    let open = |path: &Path| File::open(path).with_context(|| format!("cannot open {}", path.display()));

    let n = read_sensors(open(sensors)?, &mut table).with_context(|| format!("reading {}", sensors.display()))?;
    info!("Loaded {} sensor readings from {}", n, sensors.display());
    let n = read_truth(open(truth)?, &mut table).with_context(|| format!("reading {}", truth.display()))?;
    info!("Loaded {} ground-truth values from {}", n, truth.display());
    debug!("Regions: {:?}, sensors: {:?}", table.regions(), table.sensors());
    Ok(table)
}

#[derive(Debug, Serialize)]
struct GapRow<'a> {
    region: &'a str,
    epiweek: u32,
    sensor: Option<&'a str>,
    kind: &'a str,
    detail: String,
}

impl<'a> From<&'a Gap> for GapRow<'a> {
    fn from(gap: &'a Gap) -> Self {
        Self {
            region: gap.region.as_str(),
            epiweek: gap.epiweek.code(),
            sensor: gap.sensor.as_ref().map(SensorId::as_str),
            kind: gap.reason.kind(),
            detail: gap.reason.to_string(),
        }
    }
}

pub fn write_records<W: Write>(output: W, records: &[NowcastRecord]) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(true).from_writer(output);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_gaps<W: Write>(output: W, gaps: &[Gap]) -> Result<()> {
    let mut wtr = WriterBuilder::new().has_headers(true).from_writer(output);
    for gap in gaps {
        wtr.serialize(GapRow::from(gap))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes `<label>.csv` and `<label>-gaps.csv`, returning both paths.
pub fn write_report(label: &str, report: &BacktestReport) -> Result<(PathBuf, PathBuf)> {
    let records_path = PathBuf::from(format!("{label}.csv"));
    let gaps_path = PathBuf::from(format!("{label}-gaps.csv"));

    let create = |path: &Path| File::create(path).with_context(|| format!("cannot create {}", path.display()));
    write_records(create(&records_path)?, &report.records)
        .with_context(|| format!("writing {}", records_path.display()))?;
    write_gaps(create(&gaps_path)?, &report.gaps).with_context(|| format!("writing {}", gaps_path.display()))?;
    Ok((records_path, gaps_path))
}
