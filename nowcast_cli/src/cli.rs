// nowcast_cli/src/cli.rs

use clap::Parser;
use std::path::PathBuf;

/// Backtests Kalman-filter nowcasting of a weekly epidemic indicator.
///
/// Replays every in-season week of `START..=END` as it was known at the
/// time and writes one record per (region, epiweek, method).
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// First epiweek to estimate, as YYYYWW.
    pub start: u32,

    /// Last epiweek to estimate, as YYYYWW.
    pub end: u32,

    /// Output name: writes `<LABEL>.csv` and `<LABEL>-gaps.csv`.
    pub output_label: String,

    /// Sensor readings CSV (`region,epiweek,sensor,value[,issued]`).
    #[arg(long)]
    pub sensors: PathBuf,

    /// Ground truth CSV (`region,epiweek,value`).
    #[arg(long)]
    pub truth: PathBuf,

    /// TOML configuration. Built-in defaults are used for anything it omits.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `nowcast_core=debug`. Overrides RUST_LOG.
    #[arg(long)]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_positional_and_flags() {
        let cli = Cli::try_parse_from([
            "nowcast",
            "201540",
            "201620",
            "out/run1",
            "--sensors",
            "s.csv",
            "--truth",
            "t.csv",
            "-c",
            "nowcast.toml",
        ])
        .unwrap();
        assert_eq!((cli.start, cli.end), (201540, 201620));
        assert_eq!(cli.output_label, "out/run1");
        assert_eq!(cli.config, Some(PathBuf::from("nowcast.toml")));
        assert_eq!(cli.log_level, None);
    }

    #[test]
    fn test_inputs_are_required() {
        assert!(Cli::try_parse_from(["nowcast", "201540", "201620", "x"]).is_err());
    }
}
