//! Benchmarking of the decoders on generated or loaded datasets.
//!
//! Runs every configured decoder over a dataset in batches, collects one
//! [`AlgorithmResult`] per instance and aggregates them per decoder.

use crate::dataset::PdpDataset;
use crate::error::SearchError;
use crate::instance::PdpInstance;
use crate::search::{greedy_rollout, solve_beam, Policy, SearchConfig};
use crate::solution::Solution;

use indicatif::{ProgressBar, ProgressStyle};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

/// How tours are decoded from a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decoder {
    Greedy,
    /// Beam search with the given width
    Beam(usize),
}

impl Decoder {
    pub fn solve<P: Policy>(
        &self,
        instances: &[PdpInstance],
        policy: &P,
        search: &SearchConfig,
    ) -> Result<Vec<Solution>, SearchError> {
        match *self {
            Decoder::Greedy => greedy_rollout(instances, policy, search),
            Decoder::Beam(width) => {
                let config = SearchConfig { beam_width: width, ..*search };
                solve_beam(instances, policy, &config)
            }
        }
    }

    /// Name recorded on the solutions this decoder produces
    pub fn algorithm_name(&self, policy: &str) -> String {
        match *self {
            Decoder::Greedy => format!("{}-Greedy", policy),
            Decoder::Beam(width) => format!("{}-Beam{}", policy, width),
        }
    }
}

impl fmt::Display for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoder::Greedy => write!(f, "greedy"),
            Decoder::Beam(width) => write!(f, "beam:{}", width),
        }
    }
}

impl FromStr for Decoder {
    type Err = String;

    /// Parses `greedy` or `beam:<width>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "greedy" {
            return Ok(Decoder::Greedy);
        }
        match s.strip_prefix("beam:") {
            Some(width) => match width.parse::<usize>() {
                Ok(w) if w > 0 => Ok(Decoder::Beam(w)),
                _ => Err(format!("invalid beam width in '{}'", s)),
            },
            None => Err(format!("unknown decoder '{}', expected 'greedy' or 'beam:<width>'", s)),
        }
    }
}

/// Result of decoding a single instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmResult {
    /// Algorithm name
    pub algorithm: String,
    /// Index of the instance in the dataset
    pub instance: usize,
    /// Nodes per tour, depot included
    pub num_nodes: usize,
    /// Tour length, infinite when decoding failed
    pub cost: f64,
    /// Whether a valid tour was produced
    pub feasible: bool,
    /// Peak vehicle load along the tour
    pub max_load: f64,
    /// Decoding time attributed to this instance, in seconds
    pub time: f64,
    /// Percentage above the best decoder on this instance
    pub gap_to_best: Option<f64>,
}

/// Aggregated statistics for an algorithm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmStatistics {
    pub algorithm: String,
    pub num_instances: usize,
    pub num_feasible: usize,
    pub avg_cost: f64,
    pub best_cost: f64,
    pub worst_cost: f64,
    pub std_cost: f64,
    pub avg_time: f64,
    pub total_time: f64,
    pub avg_gap: Option<f64>,
    pub avg_max_load: f64,
}

/// Benchmark configuration
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Decoders to compare
    pub decoders: Vec<Decoder>,
    /// Instances decoded per call
    pub batch_size: usize,
    /// Search parameters shared by every decoder; `beam_width` is overridden by `Decoder::Beam`
    pub search: SearchConfig,
    /// Draw a progress bar on stderr
    pub show_progress: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        BenchmarkConfig {
            decoders: vec![Decoder::Greedy, Decoder::Beam(5), Decoder::Beam(20)],
            batch_size: 256,
            search: SearchConfig::default(),
            show_progress: true,
        }
    }
}

/// Benchmarking engine
pub struct Benchmark {
    config: BenchmarkConfig,
    results: Vec<AlgorithmResult>,
}

impl Benchmark {
    pub fn new(config: BenchmarkConfig) -> Self {
        Benchmark {
            config,
            results: Vec::new(),
        }
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total);
        match ProgressStyle::default_bar().template("{msg:>20} [{bar:40}] {pos}/{len} ({elapsed})") {
            Ok(style) => bar.set_style(style.progress_chars("=> ")),
            Err(e) => log::warn!("progress bar template rejected: {}", e),
        }
        bar
    }

    /// Run every decoder over `dataset`
    pub fn run<P: Policy>(&mut self, dataset: &PdpDataset, policy: &P) {
        let batch_size = self.config.batch_size.max(1);
        let decoders = self.config.decoders.clone();
        let search = self.config.search;
        let progress = self.progress_bar((decoders.len() * dataset.len()) as u64);

        log::info!(
            "Benchmarking {} decoders on {} instances (batch size {})",
            decoders.len(),
            dataset.len(),
            batch_size
        );

        for decoder in decoders {
            progress.set_message(decoder.to_string());
            let algorithm = decoder.algorithm_name(policy.name());

            for (chunk_index, chunk) in dataset.instances().chunks(batch_size).enumerate() {
                self.decode_chunk(decoder, &algorithm, chunk_index * batch_size, chunk, policy, &search);
                progress.inc(chunk.len() as u64);
            }
        }

        progress.finish_with_message("done");
        self.update_gaps();
    }

    /// Decode one chunk of instances starting at dataset index `offset`.
    ///
    /// A dead end in any row fails the whole batch, so the chunk is then
    /// decoded again one instance at a time and only the stuck instances
    /// are recorded as failures.
    fn decode_chunk<P: Policy>(
        &mut self,
        decoder: Decoder,
        algorithm: &str,
        offset: usize,
        chunk: &[PdpInstance],
        policy: &P,
        search: &SearchConfig,
    ) {
        match decoder.solve(chunk, policy, search) {
            Ok(solutions) => {
                for solution in &solutions {
                    let index = offset + solution.batch_index;
                    self.record_result(index, &chunk[solution.batch_index], solution, chunk.len());
                }
            }
            Err(e @ (SearchError::NoFeasibleMove { .. } | SearchError::Exhausted { .. })) if chunk.len() > 1 => {
                log::warn!(
                    "{} hit a dead end on instances {}..{} ({}), decoding them one by one",
                    algorithm,
                    offset,
                    offset + chunk.len(),
                    e
                );
                for (i, instance) in chunk.iter().enumerate() {
                    self.decode_chunk(decoder, algorithm, offset + i, std::slice::from_ref(instance), policy, search);
                }
            }
            Err(e) => {
                log::error!("{} failed on instances {}..{}: {}", algorithm, offset, offset + chunk.len(), e);
                for (i, instance) in chunk.iter().enumerate() {
                    self.record_failure(algorithm, offset + i, instance);
                }
            }
        }
    }

    fn record_result(&mut self, index: usize, instance: &PdpInstance, solution: &Solution, batch_len: usize) {
        self.results.push(AlgorithmResult {
            algorithm: solution.algorithm.clone(),
            instance: index,
            num_nodes: instance.num_nodes(),
            cost: solution.cost,
            feasible: solution.feasible,
            max_load: solution.max_load(instance),
            time: solution.computation_time / batch_len as f64,
            gap_to_best: None,
        });
    }

    fn record_failure(&mut self, algorithm: &str, index: usize, instance: &PdpInstance) {
        self.results.push(AlgorithmResult {
            algorithm: algorithm.to_string(),
            instance: index,
            num_nodes: instance.num_nodes(),
            cost: f64::INFINITY,
            feasible: false,
            max_load: 0.0,
            time: 0.0,
            gap_to_best: None,
        });
    }

    /// Fill `gap_to_best` against the best feasible cost of each instance
    fn update_gaps(&mut self) {
        let mut best: HashMap<usize, f64> = HashMap::new();
        for result in self.results.iter().filter(|r| r.feasible) {
            let entry = best.entry(result.instance).or_insert(result.cost);
            if result.cost < *entry {
                *entry = result.cost;
            }
        }

        for result in self.results.iter_mut().filter(|r| r.feasible) {
            if let Some(&b) = best.get(&result.instance) {
                if b > 0.0 {
                    result.gap_to_best = Some((result.cost - b) / b * 100.0);
                }
            }
        }
    }

    /// Compute statistics for each algorithm, best average cost first
    pub fn compute_statistics(&self) -> Vec<AlgorithmStatistics> {
        let mut stats_map: HashMap<&str, Vec<&AlgorithmResult>> = HashMap::new();
        for result in &self.results {
            stats_map.entry(result.algorithm.as_str()).or_default().push(result);
        }

        let mut statistics = Vec::new();

        for (algo, results) in stats_map {
            let feasible: Vec<&AlgorithmResult> = results.iter().copied().filter(|r| r.feasible).collect();
            if feasible.is_empty() {
                continue;
            }

            let costs: Vec<f64> = feasible.iter().map(|r| r.cost).collect();
            let times: Vec<f64> = feasible.iter().map(|r| r.time).collect();
            let loads: Vec<f64> = feasible.iter().map(|r| r.max_load).collect();
            let gaps: Vec<f64> = feasible.iter().filter_map(|r| r.gap_to_best).collect();

            statistics.push(AlgorithmStatistics {
                algorithm: algo.to_string(),
                num_instances: results.len(),
                num_feasible: feasible.len(),
                avg_cost: costs.iter().mean(),
                best_cost: costs.iter().cloned().fold(f64::INFINITY, f64::min),
                worst_cost: costs.iter().cloned().fold(0.0, f64::max),
                std_cost: costs.iter().population_std_dev(),
                avg_time: times.iter().mean(),
                total_time: times.iter().sum(),
                avg_gap: if gaps.is_empty() { None } else { Some(gaps.iter().mean()) },
                avg_max_load: loads.iter().mean(),
            });
        }

        statistics.sort_by_key(|s| (OrderedFloat(s.avg_cost), s.algorithm.clone()));
        statistics
    }

    /// Export results to CSV
    pub fn export_to_csv<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);

        for result in &self.results {
            writer.serialize(result)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Export statistics to CSV
    pub fn export_statistics_csv<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);

        for stat in self.compute_statistics() {
            writer.serialize(stat)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Generate summary report
    pub fn generate_report(&self) -> String {
        let mut report = String::new();

        report.push_str("========================================\n");
        report.push_str("     Capacitated PDP Benchmark Report\n");
        report.push_str("========================================\n");
        report.push_str(&format!("Generated: {}\n", chrono::Local::now().format("%Y-%m-%d %H:%M:%S")));
        report.push_str(&format!("Batch size: {}\n\n", self.config.batch_size));

        let stats = self.compute_statistics();

        report.push_str("Algorithm Performance Summary:\n");
        report.push_str("-".repeat(92).as_str());
        report.push('\n');
        report.push_str(&format!(
            "{:<28} {:>10} {:>12} {:>12} {:>10} {:>8} {:>10}\n",
            "Algorithm", "Feasible", "Avg Cost", "Std Cost", "Avg Gap%", "Max Ld", "Avg Time"
        ));
        report.push_str("-".repeat(92).as_str());
        report.push('\n');

        for stat in &stats {
            let gap_str = stat
                .avg_gap
                .map(|g| format!("{:.2}%", g))
                .unwrap_or_else(|| "-".to_string());

            report.push_str(&format!(
                "{:<28} {:>10} {:>12.4} {:>12.4} {:>10} {:>8.3} {:>10.5}\n",
                stat.algorithm,
                format!("{}/{}", stat.num_feasible, stat.num_instances),
                stat.avg_cost,
                stat.std_cost,
                gap_str,
                stat.avg_max_load,
                stat.avg_time
            ));
        }

        report.push_str("-".repeat(92).as_str());
        report.push('\n');

        report.push_str("\nInstances won (ties counted for every winner):\n");
        let mut wins: HashMap<&str, usize> = HashMap::new();
        for result in &self.results {
            if result.gap_to_best.map_or(false, |g| g.abs() < 1e-9) {
                *wins.entry(result.algorithm.as_str()).or_default() += 1;
            }
        }
        for stat in &stats {
            let count = wins.get(stat.algorithm.as_str()).copied().unwrap_or(0);
            report.push_str(&format!("  {}: {}\n", stat.algorithm, count));
        }

        report
    }

    /// Get all results
    pub fn results(&self) -> &[AlgorithmResult] {
        &self.results
    }
}
