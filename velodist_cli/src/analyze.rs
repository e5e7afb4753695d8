use std::path::PathBuf;

use clap::Args;
use comfy_table::Table;
use serde::Serialize;
use tracing::info;
use velodist_compare::comparison::{
    ComparisonReport, DEFAULT_HISTOGRAM_BINS, HistogramBin, check_labels, compare, histogram,
};
use velodist_matrix::matrix_csv::read_matrix_file;

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Network matrix CSV
    #[arg(short, long)]
    network: PathBuf,

    /// Geodesic matrix CSV over the same stations
    #[arg(short, long)]
    geodesic: PathBuf,

    #[arg(short, long, default_value_t = DEFAULT_HISTOGRAM_BINS)]
    bins: usize,

    /// Print the histogram of the differences
    #[arg(long)]
    histogram: bool,

    /// Write the report as JSON
    #[arg(short, long)]
    json: Option<PathBuf>,
}

#[derive(Serialize)]
struct AnalysisOutput<'a> {
    #[serde(flatten)]
    report: &'a ComparisonReport,
    histogram: &'a [HistogramBin],
}

fn format_meters(value: f64) -> String {
    format!("{value:.2} m")
}

fn report_table(report: &ComparisonReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Statistic", "Value"]);

    table.add_row(vec![String::from("Pairs"), report.pairs.to_string()]);
    table.add_row(vec![
        String::from("Missing pairs"),
        report.missing_pairs.to_string(),
    ]);
    table.add_row(vec![
        String::from("Mean difference"),
        format_meters(report.mean_difference),
    ]);
    table.add_row(vec![
        String::from("Std difference"),
        format_meters(report.std_difference),
    ]);
    table.add_row(vec![
        String::from("Median difference"),
        format_meters(report.median_difference),
    ]);
    table.add_row(vec![
        String::from("Min difference"),
        format_meters(report.min_difference),
    ]);
    table.add_row(vec![
        String::from("Max difference"),
        format_meters(report.max_difference),
    ]);
    table.add_row(vec![
        String::from("Network longer"),
        format!("{:.2} %", report.network_longer_share * 100.0),
    ]);
    table.add_row(vec![
        String::from("Mean ratio"),
        report
            .mean_ratio
            .map(|ratio| format!("{ratio:.4}"))
            .unwrap_or_else(|| String::from("-")),
    ]);
    table.add_row(vec![
        String::from("t statistic"),
        format!("{:.4}", report.t_test.t_statistic),
    ]);
    table.add_row(vec![
        String::from("Degrees of freedom"),
        report.t_test.degrees_of_freedom.to_string(),
    ]);
    table.add_row(vec![
        String::from("p-value"),
        format!("{:.3e}", report.t_test.p_value),
    ]);

    table
}

fn histogram_table(bins: &[HistogramBin]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["From", "To", "Pairs"]);

    for bin in bins {
        table.add_row(vec![
            format_meters(bin.lower),
            format_meters(bin.upper),
            bin.count.to_string(),
        ]);
    }

    table
}

pub fn run(args: AnalyzeArgs) -> anyhow::Result<()> {
    let (network_ids, network) = read_matrix_file(&args.network)?;
    let (geodesic_ids, geodesic) = read_matrix_file(&args.geodesic)?;
    check_labels(&network_ids, &geodesic_ids)?;

    let report = compare(&network, &geodesic)?;
    let bins = histogram(&report.differences, args.bins);

    println!("{}", report_table(&report));
    if args.histogram {
        println!("{}", histogram_table(&bins));
    }

    if let Some(path) = args.json {
        let output = AnalysisOutput {
            report: &report,
            histogram: &bins,
        };
        std::fs::write(&path, serde_json::to_string_pretty(&output)?)?;
        info!("Report written to {:?}", path);
    }

    Ok(())
}
