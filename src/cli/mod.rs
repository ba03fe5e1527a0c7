//! CLI argument parsing and translation into run settings

use std::path::PathBuf;

use clap::Parser;

use bogobench_core::class::{parse_class_list, Class, ClassArg};
use bogobench_core::config::{SelectionMode, Settings};
use bogobench_core::system;

/// bogobench command line
#[derive(Parser, Debug)]
#[command(name = "bogobench")]
#[command(author, version)]
#[command(about = "Stress a machine with a fleet of workload processes and report bogo-op metrics")]
pub struct Cli {
    /// Start N workers of each stress test
    #[arg(short = 'a', long, alias = "parallel", value_name = "N", allow_negative_numbers = true)]
    pub all: Option<i32>,

    /// Run all stressors one by one, invoking N of them
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub sequential: Option<i32>,

    /// Run permutations of stressors with N workers per stressor
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub permute: Option<i32>,

    /// Start N random workers
    #[arg(short = 'r', long, value_name = "N", allow_negative_numbers = true)]
    pub random: Option<i32>,

    /// Comma-separated stressors to invoke (with --sequential, --all or --permute)
    #[arg(long, value_name = "LIST")]
    pub with: Option<String>,

    /// Stressor classes to select; append ? to a class name to list its members
    #[arg(long, value_name = "LIST")]
    pub class: Vec<String>,

    /// Comma-separated stressors to exclude
    #[arg(short = 'x', long, value_name = "LIST")]
    pub exclude: Vec<String>,

    /// Timeout after T seconds (s, m, h, d, y suffixes allowed)
    #[arg(short = 't', long, value_name = "T")]
    pub timeout: Option<String>,

    /// Wait N microseconds between starting each worker
    #[arg(short = 'b', long, value_name = "USECS", default_value_t = 0)]
    pub backoff: u64,

    /// Abort all stressors if any stressor fails
    #[arg(long)]
    pub abort: bool,

    /// Churn worker CPU affinities while waiting, to stress the scheduler
    #[arg(long)]
    pub aggressive: bool,

    /// Print metrics of activity
    #[arg(short = 'M', long)]
    pub metrics: bool,

    /// Enable metrics and only show non-zero results
    #[arg(long)]
    pub metrics_brief: bool,

    /// Verify results where the stressor supports it
    #[arg(long)]
    pub verify: bool,

    /// Enable stressors that are known to hang a machine
    #[arg(long)]
    pub pathological: bool,

    /// Parse options, fork workers, but do no stressing work
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Keep the harness process name on workers
    #[arg(short = 'k', long)]
    pub keep_name: bool,

    /// Do not remove files or directories
    #[arg(long)]
    pub keep_files: bool,

    /// Show run time summary at end of the run
    #[arg(long)]
    pub times: bool,

    /// Seed the random number generator with a 64 bit value
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,

    /// Seed random numbers with the same constant every run
    #[arg(long)]
    pub no_rand_seed: bool,

    /// Enable maximum stress options
    #[arg(long)]
    pub maximize: bool,

    /// Enable minimal stress options
    #[arg(long)]
    pub minimize: bool,

    /// Output results to a YAML formatted file
    #[arg(short = 'Y', long, value_name = "FILE")]
    pub yaml: Option<PathBuf>,

    /// Run the named job file of options, one option per line
    #[arg(short = 'j', long, value_name = "FILE")]
    pub job: Option<PathBuf>,

    /// Path for temporary directories and files
    #[arg(long, value_name = "PATH")]
    pub temp_path: Option<PathBuf>,

    /// I/O scheduling class for workers (idle, besteffort, realtime)
    #[arg(long, value_name = "CLASS")]
    pub ionice_class: Option<String>,

    /// I/O scheduling level for workers (0 max .. 7 min)
    #[arg(long, value_name = "LEVEL")]
    pub ionice_level: Option<i32>,

    /// Quiet output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Show available stressor names and exit
    #[arg(long)]
    pub stressors: bool,

    /// Show stressors grouped by verification support and exit
    #[arg(long)]
    pub verifiable: bool,

    // Per-stressor worker counts and bogo-op budgets

    /// Start N CPU workers
    #[arg(short = 'c', long, value_name = "N", allow_negative_numbers = true)]
    pub cpu: Option<i32>,
    /// Stop cpu workers after N bogo operations
    #[arg(long, value_name = "N")]
    pub cpu_ops: Option<u64>,

    /// Start N disk workers
    #[arg(short = 'd', long, value_name = "N", allow_negative_numbers = true)]
    pub hdd: Option<i32>,
    /// Stop hdd workers after N bogo operations
    #[arg(long, value_name = "N")]
    pub hdd_ops: Option<u64>,

    /// Start N memory copy workers
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub memcpy: Option<i32>,
    /// Stop memcpy workers after N bogo operations
    #[arg(long, value_name = "N")]
    pub memcpy_ops: Option<u64>,

    /// Start N null device workers
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub null: Option<i32>,
    /// Stop null workers after N bogo operations
    #[arg(long, value_name = "N")]
    pub null_ops: Option<u64>,

    /// Start N page remapping workers (pathological)
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub pagemove: Option<i32>,
    /// Stop pagemove workers after N bogo operations
    #[arg(long, value_name = "N")]
    pub pagemove_ops: Option<u64>,

    /// Start N pipe I/O workers
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub pipe: Option<i32>,
    /// Stop pipe workers after N bogo operations
    #[arg(long, value_name = "N")]
    pub pipe_ops: Option<u64>,

    /// Start N virtual memory workers
    #[arg(short = 'm', long, value_name = "N", allow_negative_numbers = true)]
    pub vm: Option<i32>,
    /// Stop vm workers after N bogo operations
    #[arg(long, value_name = "N")]
    pub vm_ops: Option<u64>,
    /// Size of each vm worker's mapping (K, M, G suffixes allowed)
    #[arg(long, value_name = "BYTES")]
    pub vm_bytes: Option<String>,

    /// Start N scheduler yield workers
    #[arg(long = "yield", value_name = "N", allow_negative_numbers = true)]
    pub yield_: Option<i32>,
    /// Stop yield workers after N bogo operations
    #[arg(long = "yield-ops", value_name = "N")]
    pub yield_ops: Option<u64>,
}

/// What the invocation asks for
#[derive(Debug)]
pub enum Action {
    /// Print stressor names and exit successfully
    ListStressors,
    /// Print stressors grouped by verify support and exit successfully
    ListVerifiable,
    /// Print the members of one class and exit successfully
    ListClass(Class),
    /// Run a stress load
    Run(Box<Settings>),
}

impl Cli {
    /// Resolve the invocation into an action, validating option shapes
    pub fn action(&self) -> Result<Action, String> {
        if self.stressors {
            return Ok(Action::ListStressors);
        }
        if self.verifiable {
            return Ok(Action::ListVerifiable);
        }

        let mut class_filter = Class::empty();
        for arg in &self.class {
            match parse_class_list(arg)? {
                ClassArg::Query(class) => return Ok(Action::ListClass(class)),
                ClassArg::Mask(mask) => class_filter |= mask,
            }
        }

        let modes_given = [
            self.random.is_some(),
            self.sequential.is_some(),
            self.all.is_some(),
            self.permute.is_some(),
        ]
        .iter()
        .filter(|&&b| b)
        .count();
        if modes_given > 1 {
            return Err(
                "cannot invoke --random, --sequential, --all or --permute options together"
                    .to_string(),
            );
        }

        let mode = if let Some(n) = self.random {
            SelectionMode::Random(n)
        } else if let Some(n) = self.sequential {
            SelectionMode::Sequential(n)
        } else if let Some(n) = self.all {
            SelectionMode::All(n)
        } else if let Some(n) = self.permute {
            SelectionMode::Permute(n)
        } else {
            SelectionMode::Explicit
        };

        let timeout = match &self.timeout {
            Some(arg) => Some(system::parse_duration_secs(arg)?),
            None => None,
        };

        let ionice_class = match self.ionice_class.as_deref() {
            None => None,
            Some("idle") => Some(3),
            Some("besteffort") | Some("be") => Some(2),
            Some("realtime") | Some("rt") => Some(1),
            Some(other) => {
                return Err(format!(
                    "invalid ionice class '{other}', expected idle, besteffort or realtime"
                ))
            }
        };

        let mut settings = Settings {
            mode,
            class_filter: (!class_filter.is_empty()).then_some(class_filter),
            exclude: split_lists(&self.exclude),
            with: self
                .with
                .as_deref()
                .map(split_list)
                .unwrap_or_default(),
            timeout,
            backoff_us: self.backoff,
            abort: self.abort,
            aggressive: self.aggressive,
            metrics: self.metrics || self.metrics_brief,
            metrics_brief: self.metrics_brief,
            verify: self.verify,
            pathological: self.pathological,
            dry_run: self.dry_run,
            keep_name: self.keep_name,
            keep_files: self.keep_files,
            times: self.times,
            seed: self.seed,
            no_rand_seed: self.no_rand_seed,
            maximize: self.maximize,
            minimize: self.minimize,
            yaml_path: self.yaml.clone(),
            temp_path: self.temp_path.clone().unwrap_or_else(|| PathBuf::from(".")),
            ionice_class,
            ionice_level: self.ionice_level,
            ..Default::default()
        };

        for (name, count, ops) in self.stressor_selections() {
            if let Some(count) = count {
                settings.explicit.push((name.to_string(), count));
            }
            if let Some(ops) = ops {
                settings.ops_budgets.push((name.to_string(), ops));
            }
        }
        if let Some(bytes) = &self.vm_bytes {
            settings
                .module_options
                .push(("vm-bytes".to_string(), bytes.clone()));
        }

        Ok(Action::Run(Box::new(settings)))
    }

    fn stressor_selections(&self) -> Vec<(&'static str, Option<i32>, Option<u64>)> {
        vec![
            ("cpu", self.cpu, self.cpu_ops),
            ("hdd", self.hdd, self.hdd_ops),
            ("memcpy", self.memcpy, self.memcpy_ops),
            ("null", self.null, self.null_ops),
            ("pagemove", self.pagemove, self.pagemove_ops),
            ("pipe", self.pipe, self.pipe_ops),
            ("vm", self.vm, self.vm_ops),
            ("yield", self.yield_, self.yield_ops),
        ]
    }
}

fn split_list(arg: &str) -> Vec<String> {
    arg.split(',')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn split_lists(args: &[String]) -> Vec<String> {
    args.iter().flat_map(|a| split_list(a)).collect()
}

/// Parse the process arguments, expanding a `--job` file when present.
///
/// Job files hold one option per line without the leading dashes;
/// blank lines and `#` comments are skipped. Options on the command line
/// override the job file.
pub fn parse() -> Result<Cli, clap::Error> {
    let args: Vec<String> = std::env::args().collect();
    let cli = Cli::try_parse_from(&args)?;

    let Some(job_path) = &cli.job else {
        return Ok(cli);
    };

    let text = std::fs::read_to_string(job_path).map_err(|err| {
        clap::Error::raw(
            clap::error::ErrorKind::Io,
            format!("cannot read job file {}: {err}\n", job_path.display()),
        )
    })?;

    let mut combined = vec![args[0].clone()];
    combined.extend(job_tokens(&text));
    combined.extend(strip_job_option(&args[1..]));
    Cli::try_parse_from(combined)
}

/// Turn job file lines into argv tokens
fn job_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        if let Some(opt) = parts.next() {
            if opt.starts_with('-') {
                tokens.push(opt.to_string());
            } else {
                tokens.push(format!("--{opt}"));
            }
            tokens.extend(parts.map(|p| p.to_string()));
        }
    }
    tokens
}

/// Drop the `--job FILE` / `-j FILE` pair from the argument list
fn strip_job_option(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut skip_value = false;
    for arg in args {
        if skip_value {
            skip_value = false;
            continue;
        }
        if arg == "--job" || arg == "-j" {
            skip_value = true;
            continue;
        }
        if arg.starts_with("--job=") || arg.starts_with("-j=") {
            continue;
        }
        out.push(arg.clone());
    }
    out
}
