//! cap-pdp - Command Line Interface
//!
//! Generates capacitated pickup-and-delivery datasets, decodes tours with
//! greedy rollout or beam search, and evaluates or benchmarks the results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use cap_pdp::benchmark::{Benchmark, BenchmarkConfig, Decoder};
use cap_pdp::cost::{collect_violations, get_costs};
use cap_pdp::dataset::{DatasetConfig, PdpDataset};
use cap_pdp::search::{NearestNeighborPolicy, SearchConfig};
use cap_pdp::solution::Solution;
use cap_pdp::state::StateConfig;
use cap_pdp::visualization::Visualizer;

use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "cap-pdp")]
#[command(author = "M2 AI2D Student")]
#[command(version = "1.0")]
#[command(about = "Capacitated pickup-and-delivery instances, tour decoding and evaluation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where instances come from: a dataset file, or sampled on the fly
#[derive(Args, Debug, Clone)]
struct DatasetArgs {
    /// Dataset file (.json); instances are sampled when omitted
    #[arg(short, long)]
    dataset: Option<PathBuf>,

    /// Locations per sampled instance (pickups + deliveries)
    #[arg(long, default_value = "20")]
    size: usize,

    /// Number of instances to sample or load
    #[arg(short, long, default_value = "100")]
    num_samples: usize,

    /// First record to load from the dataset file
    #[arg(long, default_value = "0")]
    offset: usize,

    /// Random seed for sampling
    #[arg(short, long, default_value = "1234")]
    seed: u64,
}

impl DatasetArgs {
    fn load(&self) -> Result<PdpDataset> {
        let config = DatasetConfig {
            filename: self.dataset.clone(),
            size: self.size,
            num_samples: self.num_samples,
            offset: self.offset,
            seed: self.seed,
        };
        let dataset = PdpDataset::new(&config).context("failed to build dataset")?;
        if dataset.is_empty() {
            bail!("dataset window is empty");
        }
        Ok(dataset)
    }
}

/// Policy and search parameters
#[derive(Args, Debug, Clone)]
struct SearchArgs {
    /// Softmax temperature of the nearest-neighbor policy
    #[arg(long, default_value = "0.1")]
    temperature: f64,

    /// Candidates proposed per hypothesis (all feasible nodes when omitted)
    #[arg(long)]
    expand_size: Option<usize>,

    /// Rank raw scores instead of log-probabilities
    #[arg(long)]
    no_normalize: bool,

    /// Rows scored per policy chunk
    #[arg(long, default_value = "4096")]
    max_calc_batch_size: usize,

    /// Vehicle capacity
    #[arg(long, default_value = "1.0")]
    capacity: f64,
}

impl SearchArgs {
    fn policy(&self) -> NearestNeighborPolicy {
        NearestNeighborPolicy::with_temperature(self.temperature)
    }

    fn config(&self, beam_width: usize) -> SearchConfig {
        SearchConfig {
            beam_width,
            expand_size: self.expand_size,
            normalize: !self.no_normalize,
            max_calc_batch_size: self.max_calc_batch_size,
            state: StateConfig {
                capacity: self.capacity,
                ..Default::default()
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Sample a dataset and write it to disk
    Generate {
        /// Output file (.json)
        #[arg(short, long)]
        output: PathBuf,

        /// Locations per instance (pickups + deliveries)
        #[arg(long, default_value = "20")]
        size: usize,

        /// Number of instances
        #[arg(short, long, default_value = "1000")]
        num_samples: usize,

        /// Random seed
        #[arg(short, long, default_value = "1234")]
        seed: u64,
    },

    /// Decode tours for a batch of instances
    Solve {
        #[command(flatten)]
        data: DatasetArgs,

        #[command(flatten)]
        search: SearchArgs,

        /// Decoding strategy
        #[arg(short, long, value_enum, default_value = "beam")]
        algorithm: Algorithm,

        /// Hypotheses kept per instance by beam search
        #[arg(short, long, default_value = "10")]
        beam_width: usize,

        /// Write the solutions to this JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Render the first solution (tour and load profile)
        #[arg(long)]
        visualize: Option<PathBuf>,

        /// Print every tour
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check and cost tours stored as a JSON list of node sequences
    Evaluate {
        #[command(flatten)]
        data: DatasetArgs,

        /// Tours file: `[[0, ...], ...]` or solutions written by `solve`
        #[arg(short, long)]
        tours: PathBuf,
    },

    /// Compare decoders on a dataset
    Benchmark {
        #[command(flatten)]
        data: DatasetArgs,

        #[command(flatten)]
        search: SearchArgs,

        /// Decoders to run: greedy, beam:<width>
        #[arg(long, value_delimiter = ',', default_value = "greedy,beam:5,beam:20")]
        decoders: Vec<Decoder>,

        /// Instances decoded per call
        #[arg(long, default_value = "256")]
        batch_size: usize,

        /// Output directory for results
        #[arg(short, long, default_value = "results")]
        output: PathBuf,

        /// Hide the progress bar
        #[arg(long)]
        quiet: bool,
    },

    /// Print statistics about a dataset
    Analyze {
        #[command(flatten)]
        data: DatasetArgs,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Algorithm {
    /// Follow the best expansion of every instance
    Greedy,
    /// Beam search
    Beam,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate { output, size, num_samples, seed } => generate_dataset(&output, size, num_samples, seed),
        Commands::Solve { data, search, algorithm, beam_width, output, visualize, verbose } => {
            solve_instances(&data, &search, algorithm, beam_width, output, visualize, verbose)
        }
        Commands::Evaluate { data, tours } => evaluate_tours(&data, &tours),
        Commands::Benchmark { data, search, decoders, batch_size, output, quiet } => {
            run_benchmark(&data, &search, decoders, batch_size, &output, quiet)
        }
        Commands::Analyze { data } => analyze_dataset(&data),
    }
}

fn generate_dataset(output: &Path, size: usize, num_samples: usize, seed: u64) -> Result<()> {
    let config = DatasetConfig {
        size,
        num_samples,
        seed,
        ..Default::default()
    };
    let dataset = PdpDataset::generate(&config)?;
    dataset
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Saved {} instances with {} locations to {:?}", dataset.len(), size, output);
    Ok(())
}

fn solve_instances(
    data: &DatasetArgs,
    search: &SearchArgs,
    algorithm: Algorithm,
    beam_width: usize,
    output: Option<PathBuf>,
    visualize: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let dataset = data.load()?;
    let policy = search.policy();
    let decoder = match algorithm {
        Algorithm::Greedy => Decoder::Greedy,
        Algorithm::Beam => Decoder::Beam(beam_width),
    };

    println!("Solving {} instances with {}...", dataset.len(), decoder);
    let start = Instant::now();
    let solutions = decoder.solve(dataset.instances(), &policy, &search.config(beam_width))?;
    let elapsed = start.elapsed();

    let costs: Vec<f64> = solutions.iter().map(|s| s.cost).collect();
    let avg = costs.iter().sum::<f64>() / costs.len() as f64;
    let best = costs.iter().cloned().fold(f64::INFINITY, f64::min);
    let worst = costs.iter().cloned().fold(0.0, f64::max);

    println!("\n========== Results ==========");
    println!("Algorithm: {}", solutions[0].algorithm);
    println!("Instances: {}", solutions.len());
    println!("Feasible: {}/{}", solutions.iter().filter(|s| s.feasible).count(), solutions.len());
    println!("Cost: avg {:.4} | best {:.4} | worst {:.4}", avg, best, worst);
    println!("Time: {:.4}s", elapsed.as_secs_f64());

    if verbose {
        for solution in &solutions {
            let instance = &dataset[solution.batch_index];
            println!("\n{}", solution);
            println!("  Load profile: {:?}", solution.load_profile(instance));
            println!("  Max load: {:.4}", solution.max_load(instance));
        }
    }

    if let Some(out_path) = output {
        let json = serde_json::to_string_pretty(&solutions)?;
        std::fs::write(&out_path, json).with_context(|| format!("failed to write {}", out_path.display()))?;
        println!("\nSolutions saved to {:?}", out_path);
    }

    if let Some(path) = visualize {
        render_solution(&path, &dataset, &solutions[0], search.capacity)?;
    }

    Ok(())
}

fn render_solution(path: &Path, dataset: &PdpDataset, solution: &Solution, capacity: f64) -> Result<()> {
    let instance = &dataset[solution.batch_index];
    let viz = Visualizer::new();

    let drawings = [
        (viz.generate_svg(instance, solution), path.to_path_buf()),
        (
            viz.generate_load_profile_svg(instance, solution, capacity),
            path.with_extension("load.png"),
        ),
    ];

    for (svg, png_path) in &drawings {
        match viz.save_png(svg, png_path) {
            Ok(()) => println!("Visualization saved to {:?}", png_path),
            Err(e) => {
                let svg_path = png_path.with_extension("svg");
                viz.save_svg(svg, &svg_path)?;
                println!("PNG conversion failed ({}). Saved SVG to {:?}", e, svg_path);
            }
        }
    }

    let data_path = path.with_extension("dat");
    std::fs::write(&data_path, viz.export_plot_data(instance, solution))?;
    println!("Plot data saved to {:?}", data_path);
    Ok(())
}

/// Tours as bare node lists, or taken from saved solutions
fn read_tours(path: &Path) -> Result<Vec<Vec<usize>>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if let Ok(tours) = serde_json::from_str::<Vec<Vec<usize>>>(&text) {
        return Ok(tours);
    }
    let solutions: Vec<Solution> =
        serde_json::from_str(&text).with_context(|| format!("{} holds neither tours nor solutions", path.display()))?;
    Ok(solutions.into_iter().map(|s| s.tour).collect())
}

fn evaluate_tours(data: &DatasetArgs, tours_path: &Path) -> Result<()> {
    let tours = read_tours(tours_path)?;
    let window = DatasetArgs {
        num_samples: tours.len(),
        ..data.clone()
    };
    let dataset = window.load()?;

    let violations = collect_violations(dataset.instances(), &tours);
    if !violations.is_empty() {
        println!("========== Invalid tours ==========");
        for violation in &violations {
            println!("  {}", violation);
        }
        bail!("{} rule(s) broken", violations.len());
    }

    let costs = get_costs(dataset.instances(), &tours)?;
    let avg = costs.iter().sum::<f64>() / costs.len() as f64;
    println!("========== Evaluation ==========");
    println!("Tours: {}", costs.len());
    println!("Average cost: {:.6}", avg);
    for (i, cost) in costs.iter().enumerate() {
        log::debug!("tour {}: {:.6}", i, cost);
    }
    Ok(())
}

fn run_benchmark(
    data: &DatasetArgs,
    search: &SearchArgs,
    decoders: Vec<Decoder>,
    batch_size: usize,
    output: &Path,
    quiet: bool,
) -> Result<()> {
    let dataset = data.load()?;
    println!("Benchmarking {} decoders on {} instances", decoders.len(), dataset.len());

    std::fs::create_dir_all(output).with_context(|| format!("failed to create {}", output.display()))?;

    let config = BenchmarkConfig {
        decoders,
        batch_size,
        search: search.config(1),
        show_progress: !quiet,
    };

    let mut benchmark = Benchmark::new(config);
    benchmark.run(&dataset, &search.policy());

    let results_path = output.join("results.csv");
    benchmark.export_to_csv(&results_path)?;
    println!("\nResults exported to {:?}", results_path);

    let stats_path = output.join("statistics.csv");
    benchmark.export_statistics_csv(&stats_path)?;
    println!("Statistics exported to {:?}", stats_path);

    let report = benchmark.generate_report();
    println!("\n{}", report);

    let report_path = output.join("report.txt");
    std::fs::write(&report_path, &report)?;
    println!("Report saved to {:?}", report_path);
    Ok(())
}

fn analyze_dataset(data: &DatasetArgs) -> Result<()> {
    let dataset = data.load()?;

    println!("========== Dataset Analysis ==========\n");
    println!("Instances: {}", dataset.len());

    let stats: Vec<_> = dataset.iter().map(|i| i.statistics()).collect();
    if let Some(first) = stats.first() {
        println!("\nFirst instance:");
        print!("{}", first);
    }

    let n = stats.len() as f64;
    let avg_total = stats.iter().map(|s| s.total_pickup).sum::<f64>() / n;
    let min_demand = stats.iter().map(|s| s.min_demand).fold(f64::INFINITY, f64::min);
    let max_demand = stats.iter().map(|s| s.max_demand).fold(0.0, f64::max);
    let avg_dist = stats.iter().map(|s| s.avg_distance).sum::<f64>() / n;
    let overweight = stats.iter().filter(|s| s.max_demand > 1.0).count();

    println!("\nAcross the dataset:");
    println!("  Avg total pickup load: {:.4}", avg_total);
    println!("  Pickup demand range: [{:.4}, {:.4}]", min_demand, max_demand);
    println!("  Avg distance: {:.4}", avg_dist);
    println!("  Instances with a pickup above unit capacity: {}", overweight);
    Ok(())
}
