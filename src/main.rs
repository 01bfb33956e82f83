/// CLI подготовки датасета скорости трафика

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use clap::Parser;
use dialoguer::Confirm;
use tracing_subscriber::EnvFilter;

use stid_prep::pipeline::{self, CalendarSource, PrepareOptions};
use stid_prep::storage::DEFAULT_ARRAY_KEY;
use stid_prep::{DataLayout, ExperimentConfig, Registry, WindowSettings};

const DEFAULT_OUTPUT_DIR: &str = "datasets/BAST";
const DEFAULT_DATA_FILE: &str = "datasets/raw_data/BAST/BAST.npz";
const DEFAULT_TIME_FILE: &str = "datasets/raw_data/BAST/time.npz";
const DEFAULT_GRAPH_FILE: &str = "datasets/raw_data/BAST/adj_BAST.pkl";

#[derive(Parser, Debug)]
#[command(name = "stid-prep")]
#[command(
    author,
    version,
    about = "Generate train/valid/test data for the STID traffic-speed experiment",
    long_about = None
)]
struct Cli {
    /// Output directory
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Raw traffic readings (.npz or .npy, shape L x N x F)
    #[arg(long, default_value = DEFAULT_DATA_FILE)]
    data_file_path: PathBuf,

    /// Per-step calendar metadata (column 0: day of week, column 1: time of day)
    #[arg(long, default_value = DEFAULT_TIME_FILE)]
    time_file_path: PathBuf,

    /// Adjacency matrix, copied only with --copy-graph
    #[arg(long, default_value = DEFAULT_GRAPH_FILE)]
    graph_file_path: PathBuf,

    /// Copy the adjacency matrix into the output directory as adj_mx.pkl
    #[arg(long)]
    copy_graph: bool,

    /// History sequence length
    #[arg(long, default_value_t = 12)]
    history_seq_len: usize,

    /// Future sequence length
    #[arg(long, default_value_t = 12)]
    future_seq_len: usize,

    /// Add day-of-week feature
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    dow: bool,

    /// Selected channels, comma separated
    #[arg(short = 'C', long, value_delimiter = ',', default_value = "0,1")]
    channels: Vec<usize>,

    /// Train ratio
    #[arg(long, default_value_t = 0.7)]
    train_ratio: f64,

    /// Validate ratio
    #[arg(long, default_value_t = 0.1)]
    valid_ratio: f64,

    /// Time-of-day slots per day
    #[arg(long, default_value_t = 24)]
    steps_per_day: usize,

    /// Array name inside .npz inputs
    #[arg(long, default_value = DEFAULT_ARRAY_KEY)]
    array_key: String,

    /// Timestamp of the first step (YYYY-MM-DDTHH:MM:SS); replaces the time file
    #[arg(long, value_parser = parse_timestamp)]
    start_time: Option<NaiveDateTime>,

    /// Minutes between steps, used with --start-time
    #[arg(long, default_value_t = 60)]
    step_minutes: u32,

    /// Overwrite an existing output directory without asking
    #[arg(short, long)]
    yes: bool,

    /// Write the experiment config (JSON) pointing at the output directory
    #[arg(long)]
    config_out: Option<PathBuf>,
}

fn parse_timestamp(s: &str) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| format!("invalid timestamp '{}': {}", s, e))
}

impl Cli {
    fn options(&self) -> PrepareOptions {
        let calendar = match self.start_time {
            Some(start) => CalendarSource::Timestamps {
                start,
                step_minutes: self.step_minutes,
            },
            None => CalendarSource::Metadata {
                path: self.time_file_path.clone(),
                key: self.array_key.clone(),
            },
        };

        PrepareOptions {
            data_file_path: self.data_file_path.clone(),
            array_key: self.array_key.clone(),
            calendar,
            graph_file_path: self.copy_graph.then(|| self.graph_file_path.clone()),
            windows: WindowSettings {
                history_len: self.history_seq_len,
                future_len: self.future_seq_len,
                train_ratio: self.train_ratio,
                valid_ratio: self.valid_ratio,
            },
            channels: self.channels.clone(),
            add_day_in_week: self.dow,
            steps_per_day: self.steps_per_day,
        }
    }
}

/// true, если каталог уже существует и перезапись подтверждена
fn confirm_output_dir(dir: &Path, assume_yes: bool) -> Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    if !dir.is_dir() {
        bail!("{} exists and is not a directory", dir.display());
    }
    if assume_yes {
        tracing::warn!(dir = %dir.display(), "Overwriting existing output directory");
        return Ok(true);
    }

    let confirmed = Confirm::new()
        .with_prompt(format!("{} exists. Do you want to overwrite it?", dir.display()))
        .default(false)
        .interact()
        .context("overwrite confirmation failed (no terminal? use --yes)")?;
    if !confirmed {
        bail!("aborted: {} left untouched", dir.display());
    }
    Ok(true)
}

fn run(cli: &Cli) -> Result<()> {
    let exists = confirm_output_dir(&cli.output_dir, cli.yes)?;

    let options = cli.options();
    let output = pipeline::compute(&options).context("failed to prepare dataset")?;

    // Конфиг проверяется до записи артефактов
    let config = match &cli.config_out {
        Some(_) => {
            let (_, nodes, channels) = output.features.dim();
            let layout = DataLayout {
                num_nodes: nodes,
                raw_channels: cli.channels.len(),
                day_in_week: cli.dow,
                history_len: cli.history_seq_len,
                future_len: cli.future_seq_len,
            };
            let config = ExperimentConfig::stid_bast()
                .with_data_dir(&cli.output_dir)
                .with_layout(&layout);
            config.validate(&Registry::with_defaults())?;
            config.check_layout(nodes, channels)?;
            Some(config)
        }
        None => None,
    };

    if !exists {
        fs::create_dir_all(&cli.output_dir)
            .with_context(|| format!("failed to create {}", cli.output_dir.display()))?;
    }
    let paths = pipeline::persist(&output, &options, &cli.output_dir)?;
    tracing::info!(
        scaler = %paths.scaler.display(),
        index = %paths.index.display(),
        data = %paths.data.display(),
        "Dataset written"
    );

    if let (Some(config), Some(path)) = (config, &cli.config_out) {
        config.save_json(path)?;
        tracing::info!(path = %path.display(), "Experiment config written");
    }
    Ok(())
}

fn main() -> Result<()> {
    // Инициализация логирования
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    run(&cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["stid-prep"]);
        assert_eq!(cli.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(cli.channels, vec![0, 1]);
        assert!(cli.dow);
        assert!(!cli.copy_graph);

        let options = cli.options();
        assert_eq!(options.windows, WindowSettings::default());
        assert!(options.graph_file_path.is_none());
        assert!(matches!(options.calendar, CalendarSource::Metadata { .. }));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "stid-prep",
            "--dow",
            "false",
            "-C",
            "0",
            "--start-time",
            "2021-01-01T00:00:00",
            "--step-minutes",
            "5",
            "--copy-graph",
        ]);
        let options = cli.options();
        assert!(!options.add_day_in_week);
        assert_eq!(options.channels, vec![0]);
        assert!(options.graph_file_path.is_some());
        assert!(matches!(
            options.calendar,
            CalendarSource::Timestamps { step_minutes: 5, .. }
        ));
    }

    #[test]
    fn test_missing_dir_needs_no_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!confirm_output_dir(&dir.path().join("fresh"), false).unwrap());
        assert!(confirm_output_dir(dir.path(), true).unwrap());
    }

    fn write_npz<A: ndarray_npy::WritableElement, D: ndarray::Dimension>(
        path: &Path,
        arr: &ndarray::Array<A, D>,
    ) {
        let mut npz = ndarray_npy::NpzWriter::new(fs::File::create(path).unwrap());
        npz.add_array("x", arr).unwrap();
        npz.finish().unwrap();
    }

    #[test]
    fn test_config_out_follows_selected_channels() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("BAST.npz");
        let time = dir.path().join("time.npz");
        write_npz(
            &data,
            &ndarray::Array3::<f64>::from_shape_fn((60, 3, 2), |(t, n, c)| {
                (t * 5 + n + c) as f64 % 17.0
            }),
        );
        write_npz(
            &time,
            &ndarray::Array2::<i64>::from_shape_fn((60, 2), |(t, c)| match c {
                0 => ((t / 24) % 7 + 1) as i64,
                _ => (t % 24 + 1) as i64,
            }),
        );
        let out = dir.path().join("out");
        let cfg = dir.path().join("stid.json");

        let cli = Cli::parse_from([
            "stid-prep",
            "--output-dir",
            out.to_str().unwrap(),
            "--data-file-path",
            data.to_str().unwrap(),
            "--time-file-path",
            time.to_str().unwrap(),
            "--dow",
            "false",
            "-C",
            "0",
            "--config-out",
            cfg.to_str().unwrap(),
        ]);
        run(&cli).unwrap();

        let config = ExperimentConfig::from_json(&cfg).unwrap();
        assert_eq!(config.model.params.num_nodes, 3);
        assert_eq!(config.model.params.input_dim, 2);
        assert!(!config.model.params.if_d_i_w);
        assert_eq!(config.model.forward_features, vec![0, 1]);
        assert_eq!(config.model.target_features, vec![0]);

        let prepared = stid_prep::PreparedDataset::load(&out).unwrap();
        config.check_dataset(&prepared).unwrap();
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2021-03-01T08:30:00").is_ok());
        assert!(parse_timestamp("2021-03-01 08:30:00").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
