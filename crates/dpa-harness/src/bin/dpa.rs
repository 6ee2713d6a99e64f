//! CLI entrypoint for the dpa toolkit.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dpa_core::buffer::Sample;
use dpa_core::correlator::Correlator;
use dpa_core::io::{load_vec, write_buf};
use dpa_core::raster::{raster, raster_distances, RasterConfig};
use dpa_core::stats::analyze;
use dpa_harness::{ingest_directory, list_trace_files, SampleFormat};

/// Correlation power analysis toolkit.
#[derive(Debug, Parser)]
#[command(name = "dpa")]
#[command(about = "Correlation power analysis over raw trace files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Segment a raw acquisition into aligned fixed-width windows.
    Raster {
        /// Raw acquisition file.
        #[arg(long)]
        input: PathBuf,
        /// Output file for the concatenated windows.
        #[arg(long)]
        output: PathBuf,
        /// Samples per operation window.
        #[arg(long)]
        width: usize,
        /// Edge template file (same element format as the input).
        #[arg(long)]
        edge: PathBuf,
        /// JSON file overriding the raster configuration.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Input element format: u8, u16 or f32.
        #[arg(long, default_value = "u8")]
        in_format: String,
        /// Output element format: u8, u16 or f32.
        #[arg(long, default_value = "u8")]
        out_format: String,
    },
    /// Measure inter-edge distances without emitting windows.
    Distances {
        /// Raw acquisition file.
        #[arg(long)]
        input: PathBuf,
        /// Edge template file.
        #[arg(long)]
        edge: PathBuf,
        /// JSON file overriding the raster configuration.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Input element format: u8, u16 or f32.
        #[arg(long, default_value = "u8")]
        in_format: String,
    },
    /// Stream a directory of aligned traces through the correlator.
    Correlate {
        /// Directory of trace files; sorted order defines trace indices.
        #[arg(long)]
        traces: PathBuf,
        /// Hypothesis table file: keys x count bytes, row-major.
        #[arg(long)]
        hypotheses: PathBuf,
        /// Samples per trace.
        #[arg(long)]
        samples: usize,
        /// Declared trace count.
        #[arg(long)]
        count: usize,
        /// Hypothesis count.
        #[arg(long)]
        keys: usize,
        /// Worker threads feeding the correlator.
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Trace element format: u8, u16 or f32.
        #[arg(long, default_value = "u8")]
        in_format: String,
        /// Write the matrix as Octave-readable text here (default stdout).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also write the 0..=255 rescaled matrix as raw bytes here.
        #[arg(long)]
        byte_output: Option<PathBuf>,
    },
    /// Print summary statistics of one buffer file.
    Analyze {
        /// Buffer file.
        #[arg(long)]
        input: PathBuf,
        /// Element format: u8, u16 or f32.
        #[arg(long, default_value = "u8")]
        in_format: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Raster {
            input,
            output,
            width,
            edge,
            config,
            in_format,
            out_format,
        } => {
            let cfg = load_config(config.as_ref())?;
            let in_format = parse_format(&in_format)?;
            let out_format = parse_format(&out_format)?;
            match in_format {
                SampleFormat::U8 => raster_cmd::<u8>(&cfg, &input, &output, width, &edge, out_format),
                SampleFormat::U16 => raster_cmd::<u16>(&cfg, &input, &output, width, &edge, out_format),
                SampleFormat::F32 => raster_cmd::<f32>(&cfg, &input, &output, width, &edge, out_format),
            }
        }
        Command::Distances {
            input,
            edge,
            config,
            in_format,
        } => {
            let cfg = load_config(config.as_ref())?;
            match parse_format(&in_format)? {
                SampleFormat::U8 => distances_cmd::<u8>(&cfg, &input, &edge),
                SampleFormat::U16 => distances_cmd::<u16>(&cfg, &input, &edge),
                SampleFormat::F32 => distances_cmd::<f32>(&cfg, &input, &edge),
            }
        }
        Command::Correlate {
            traces,
            hypotheses,
            samples,
            count,
            keys,
            workers,
            in_format,
            output,
            byte_output,
        } => correlate_cmd(
            &traces,
            &hypotheses,
            samples,
            count,
            keys,
            workers,
            parse_format(&in_format)?,
            output.as_deref(),
            byte_output.as_deref(),
        ),
        Command::Analyze { input, in_format } => match parse_format(&in_format)? {
            SampleFormat::U8 => analyze_cmd::<u8>(&input),
            SampleFormat::U16 => analyze_cmd::<u16>(&input),
            SampleFormat::F32 => analyze_cmd::<f32>(&input),
        },
    }
}

fn parse_format(s: &str) -> Result<SampleFormat, Box<dyn std::error::Error>> {
    SampleFormat::parse(s).ok_or_else(|| format!("unknown sample format: {s}").into())
}

fn load_config(path: Option<&PathBuf>) -> Result<RasterConfig, Box<dyn std::error::Error>> {
    match path {
        None => Ok(RasterConfig::default()),
        Some(p) => Ok(serde_json::from_str(&fs::read_to_string(p)?)?),
    }
}

fn raster_cmd<TIn: Sample>(
    cfg: &RasterConfig,
    input: &PathBuf,
    output: &PathBuf,
    width: usize,
    edge: &PathBuf,
    out_format: SampleFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let acquisition: Vec<TIn> = load_vec(input)?;
    let template: Vec<TIn> = load_vec(edge)?;
    match out_format {
        SampleFormat::U8 => raster_emit::<TIn, u8>(cfg, &acquisition, width, &template, output),
        SampleFormat::U16 => raster_emit::<TIn, u16>(cfg, &acquisition, width, &template, output),
        SampleFormat::F32 => raster_emit::<TIn, f32>(cfg, &acquisition, width, &template, output),
    }
}

fn raster_emit<TIn: Sample, TOut: Sample>(
    cfg: &RasterConfig,
    acquisition: &[TIn],
    width: usize,
    template: &[TIn],
    output: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut windows: Vec<TOut> = Vec::new();
    let summary = raster(cfg, &mut windows, acquisition, width, template)?;
    write_buf(output, &windows)?;
    println!(
        "{} operations after {} pauses, max distance {}, {} samples written",
        summary.operations,
        summary.pauses,
        summary.max_distance,
        windows.len()
    );
    Ok(())
}

fn distances_cmd<TIn: Sample>(
    cfg: &RasterConfig,
    input: &PathBuf,
    edge: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let acquisition: Vec<TIn> = load_vec(input)?;
    let template: Vec<TIn> = load_vec(edge)?;
    let distances = raster_distances(cfg, &acquisition, &template)?;
    for d in distances {
        println!("{d}");
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn correlate_cmd(
    traces: &PathBuf,
    hypotheses: &PathBuf,
    samples: usize,
    count: usize,
    keys: usize,
    workers: usize,
    format: SampleFormat,
    output: Option<&std::path::Path>,
    byte_output: Option<&std::path::Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let table = fs::read(hypotheses)?;
    if table.len() != keys * count {
        return Err(format!(
            "hypothesis table is {} bytes, expected keys * count = {}",
            table.len(),
            keys * count
        )
        .into());
    }

    let mut correlator = Correlator::new(samples, count, keys);
    correlator.hypo_mut().copy_from_slice(&table);
    correlator.preprocess();

    let files = list_trace_files(traces)?;
    let ingested = ingest_directory(&correlator, &files, format, workers);
    eprintln!("{ingested} of {} trace files ingested", files.len());

    correlator.update_matrix()?;

    match output {
        Some(path) => {
            let mut sink = fs::File::create(path)?;
            correlator.dump_matrix(&mut sink)?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            correlator.dump_matrix(&mut lock)?;
            lock.flush()?;
        }
    }
    if let Some(path) = byte_output {
        fs::write(path, correlator.byte_matrix())?;
    }
    Ok(())
}

fn analyze_cmd<T: Sample>(input: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let buf: Vec<T> = load_vec(input)?;
    let a = analyze(&buf);
    println!(
        "samples: {}\naverage: {}\nvariance: {}\nmin: {}\nmax: {}",
        buf.len(),
        a.average,
        a.variance,
        a.min,
        a.max
    );
    Ok(())
}
