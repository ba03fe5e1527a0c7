//! YAML results emission for bogobench
//!
//! The results file's key order and numeric formatting are part of the
//! output contract consumed by downstream tooling, so blocks are written
//! line by line rather than through a serializer that re-orders maps.
//!
//! Layout: a `runinfo` block, a `metrics:` list with one block per
//! run-list entry, then a `times:` block with overall totals and load
//! averages.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use bogobench_core::metrics::EntryMetrics;
use bogobench_core::system;

/// Overall run totals for the `times:` block
#[derive(Debug, Clone, Copy)]
pub struct RunTimes {
    /// Wall-clock duration of the stressing phase, seconds
    pub run_time: f64,
    /// `run_time` multiplied by the configured CPU count
    pub available_cpu_time: f64,
    /// Total user CPU time of all children
    pub user_time: f64,
    /// Total system CPU time of all children
    pub system_time: f64,
}

impl RunTimes {
    /// Total CPU time
    pub fn total_time(&self) -> f64 {
        self.user_time + self.system_time
    }

    fn percent(&self, value: f64) -> f64 {
        if self.available_cpu_time > 0.0 {
            100.0 * value / self.available_cpu_time
        } else {
            0.0
        }
    }
}

/// Writer for the YAML results file
pub struct YamlReport {
    out: BufWriter<File>,
}

impl YamlReport {
    /// Create the results file and emit the document header and run info
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut report = Self {
            out: BufWriter::new(file),
        };
        report.write_runinfo()?;
        Ok(report)
    }

    fn write_runinfo(&mut self) -> io::Result<()> {
        writeln!(self.out, "---")?;
        writeln!(self.out, "runinfo:")?;
        writeln!(self.out, "      version: {}", env!("CARGO_PKG_VERSION"))?;

        let now = chrono::Local::now();
        writeln!(self.out, "      date-yyyy-mm-dd: {}", now.format("%Y:%m:%d"))?;
        writeln!(self.out, "      time-hh-mm-ss: {}", now.format("%H:%M:%S"))?;
        writeln!(self.out, "      epoch-secs: {}", now.timestamp())?;

        if let Some(info) = system::uname_info() {
            writeln!(self.out, "      hostname: {}", info.nodename)?;
            writeln!(self.out, "      sysname: {}", info.sysname)?;
            writeln!(self.out, "      nodename: {}", info.nodename)?;
            writeln!(self.out, "      release: {}", info.release)?;
            writeln!(self.out, "      version: '{}'", info.version)?;
            writeln!(self.out, "      machine: {}", info.machine)?;
        }
        writeln!(
            self.out,
            "      cpus: {}",
            system::processors_configured()
        )?;
        writeln!(
            self.out,
            "      cpus-online: {}",
            system::processors_online()
        )?;
        writeln!(
            self.out,
            "      ticks-per-second: {}",
            system::ticks_per_second()
        )?;
        Ok(())
    }

    /// Emit the `metrics:` list, one block per entry
    pub fn metrics(&mut self, entries: &[EntryMetrics]) -> io::Result<()> {
        writeln!(self.out, "metrics:")?;
        for m in entries {
            writeln!(self.out, "    - stressor: {}", m.name)?;
            writeln!(self.out, "      bogo-ops: {}", m.bogo_ops)?;
            writeln!(
                self.out,
                "      bogo-ops-per-second-usr-sys-time: {:.6}",
                m.bogo_ops_per_second_cpu
            )?;
            writeln!(
                self.out,
                "      bogo-ops-per-second-real-time: {:.6}",
                m.bogo_ops_per_second_real
            )?;
            writeln!(self.out, "      wall-clock-time: {:.6}", m.wall_time)?;
            writeln!(self.out, "      user-time: {:.6}", m.user_time)?;
            writeln!(self.out, "      system-time: {:.6}", m.system_time)?;
            writeln!(
                self.out,
                "      cpu-usage-per-instance: {:.6}",
                m.cpu_usage_per_instance
            )?;
            writeln!(self.out, "      max-rss: {}", m.max_rss_kb)?;

            for aux in &m.aux {
                writeln!(
                    self.out,
                    "      {}: {:.6}",
                    yamlify_description(&aux.description),
                    aux.mean
                )?;
            }
            writeln!(self.out)?;
        }
        Ok(())
    }

    /// Emit the `times:` block with totals, percentages and load averages
    pub fn times(&mut self, times: &RunTimes) -> io::Result<()> {
        writeln!(self.out, "times:")?;
        writeln!(self.out, "      run-time: {:.6}", times.run_time)?;
        writeln!(
            self.out,
            "      available-cpu-time: {:.6}",
            times.available_cpu_time
        )?;
        writeln!(self.out, "      user-time: {:.6}", times.user_time)?;
        writeln!(self.out, "      system-time: {:.6}", times.system_time)?;
        writeln!(self.out, "      total-time: {:.6}", times.total_time())?;
        writeln!(
            self.out,
            "      user-time-percent: {:.6}",
            times.percent(times.user_time)
        )?;
        writeln!(
            self.out,
            "      system-time-percent: {:.6}",
            times.percent(times.system_time)
        )?;
        writeln!(
            self.out,
            "      total-time-percent: {:.6}",
            times.percent(times.total_time())
        )?;
        if let Some((min1, min5, min15)) = system::load_avg() {
            writeln!(self.out, "      load-average-1-minute: {min1:.6}")?;
            writeln!(self.out, "      load-average-5-minute: {min5:.6}")?;
            writeln!(self.out, "      load-average-15-minute: {min15:.6}")?;
        }
        Ok(())
    }

    /// Terminate the document and flush
    pub fn finish(mut self) -> io::Result<()> {
        writeln!(self.out, "...")?;
        self.out.flush()
    }
}

/// Turn a metric description into a YAML key: lowercased, spaces become
/// dashes, everything non-alphanumeric is stripped, truncated to 40 bytes
pub fn yamlify_description(description: &str) -> String {
    let mut out = String::new();
    for ch in description.chars() {
        if out.len() >= 40 {
            break;
        }
        if ch.is_ascii_alphabetic() {
            out.push(ch.to_ascii_lowercase());
        } else if ch.is_ascii_digit() {
            out.push(ch);
        } else if ch == ' ' {
            out.push('-');
        }
    }
    out
}
