//! End-to-end run sequence: plan, map, fork, reap, report

use anyhow::{Context, Result};

use bogobench_core::adapters;
use bogobench_core::config::{SelectionMode, Settings};
use bogobench_core::error::Error as CoreError;
use bogobench_core::exit::ExitStatus;
use bogobench_core::fleet::{RunOutcome, Scheduler};
use bogobench_core::metrics::{self, EntryMetrics};
use bogobench_core::plan::{self, RunList};
use bogobench_core::registry::Registry;
use bogobench_core::rng::HarnessRng;
use bogobench_core::shared::SharedPlane;
use bogobench_core::signal;
use bogobench_core::system;
use bogobench_report::{RunTimes, YamlReport};

/// Execute a stress run and return the process exit status
pub fn execute(registry: &Registry, settings: &Settings) -> Result<ExitStatus> {
    settings.validate().context("invalid options")?;
    system::set_temp_path(&settings.temp_path)
        .with_context(|| format!("temp path {}", settings.temp_path.display()))?;

    for spec in registry.specs() {
        spec.module.set_default();
    }
    apply_module_options(registry, settings)?;

    let mut rng = match settings.effective_seed() {
        Some(seed) => HarnessRng::from_seed(seed),
        None => HarnessRng::from_entropy(),
    };
    tracing::debug!(seed = rng.seed(), "prng seeded");

    if let Some(info) = system::uname_info() {
        tracing::debug!(
            system = %format!("{} {} {} {}", info.nodename, info.sysname, info.release, info.machine),
            "host"
        );
    }
    if let Some((total, free)) = system::mem_info() {
        tracing::debug!(
            total_mb = total / (1024 * 1024),
            free_mb = free / (1024 * 1024),
            "system memory"
        );
    }
    tracing::debug!(
        online = system::processors_online(),
        configured = system::processors_configured(),
        "processors"
    );

    let mut list = match plan::build(registry, settings, &mut rng) {
        Ok(list) => list,
        Err(CoreError::NothingToRun { unsupported_only }) => {
            tracing::error!(
                "no stress workers invoked{}",
                if unsupported_only {
                    " (one or more were unsupported)"
                } else {
                    ""
                }
            );
            // Dropping everything as unsupported is a successful no-op
            return if unsupported_only {
                Ok(ExitStatus::Success)
            } else {
                Ok(ExitStatus::Failure)
            };
        }
        Err(err) => return Err(err.into()),
    };

    let timeout = settings.effective_timeout();
    tracing::info!(
        "{} to a {} run per stressor",
        if settings.timeout.is_some() {
            "setting"
        } else {
            "defaulting"
        },
        system::duration_to_str(timeout as f64)
    );

    // Split each entry's process budget across its instances
    if let Some(nproc) = system::nproc_limit() {
        for entry in &list.entries {
            if entry.runnable() {
                let spec = &registry.specs()[entry.spec_idx];
                spec.module.set_limit(nproc / entry.instances as u64);
            }
        }
    }

    log_dispatch_banner(registry, &list);

    let plane = SharedPlane::create(list.total_instances())
        .context("cannot allocate shared statistics plane")?;
    signal::set_main_pid(unsafe { libc::getpid() });
    signal::register_shared(
        plane.header() as *const _ as *mut _,
        plane.stats_base(),
        plane.num_slots(),
    );

    for entry in &list.entries {
        if entry.runnable() {
            registry.specs()[entry.spec_idx].module.init();
        }
    }

    system::set_dumpable(false);
    adapters::set_oom_score_adj(-1000);
    adapters::cpuidle_init();
    adapters::klog_start();
    adapters::clocksource_check();
    adapters::vmstat_start(false);
    adapters::smart_start(false);
    adapters::thrash_start(false);
    adapters::ftrace_start(false);

    signal::install_terminate_handlers().context("cannot install signal handlers")?;
    signal::install_ignore_handlers();

    let mut outcome = RunOutcome::default();
    {
        let mut scheduler = Scheduler::new(registry, settings, &plane, rng);
        match settings.mode {
            SelectionMode::Sequential(_) => scheduler.run_sequential(&mut list, &mut outcome),
            SelectionMode::Permute(_) => scheduler.run_permute(&mut list, &mut outcome),
            _ => scheduler.run_parallel(&mut list, &mut outcome),
        }
    }

    adapters::clocksource_check();
    signal::set_alarm(0);
    adapters::thrash_stop();

    if plane
        .header()
        .caught_sigint
        .load(std::sync::atomic::Ordering::Relaxed)
    {
        tracing::warn!("run was interrupted, results may be incomplete");
    }

    let mut success = outcome.success;

    let entry_metrics = metrics::collect(registry, &mut list, &plane);

    let mut yaml = open_yaml(settings);
    if settings.metrics {
        dump_metrics(settings, &entry_metrics, yaml.as_mut());
    }

    metrics::verify_counters(registry, &list, &plane, &mut success);

    dump_times(settings, outcome.duration, yaml.as_mut());
    metrics::exit_status_summary(registry, &list);
    tracing::debug!("{}", metrics::instance_count_summary(&plane));

    adapters::klog_stop(&mut success);
    adapters::vmstat_stop();
    adapters::smart_stop();
    adapters::ftrace_stop();
    adapters::cpuidle_free();

    tracing::info!(
        "{} run completed in {}",
        if success { "successful" } else { "unsuccessful" },
        system::duration_to_str(outcome.duration)
    );

    for entry in &list.entries {
        if entry.runnable() {
            registry.specs()[entry.spec_idx].module.deinit();
        }
    }

    signal::clear_shared();
    drop(plane);

    if let Some(report) = yaml {
        if let Err(err) = report.finish() {
            tracing::error!(error = %err, "cannot finalise YAML output");
        }
    }

    Ok(if !success {
        ExitStatus::NotSuccess
    } else if !outcome.resource_success {
        ExitStatus::NoResource
    } else if !outcome.metrics_success {
        ExitStatus::MetricsUntrustworthy
    } else {
        ExitStatus::Success
    })
}

/// Resolve stressor-specific options against the modules' setters
fn apply_module_options(registry: &Registry, settings: &Settings) -> Result<()> {
    for (opt, value) in &settings.module_options {
        let mut handled = false;
        for spec in registry.specs() {
            match spec.module.set_option(opt, value) {
                Ok(true) => {
                    handled = true;
                    break;
                }
                Ok(false) => {}
                Err(err) => anyhow::bail!("option --{opt}: {err}"),
            }
        }
        if !handled {
            anyhow::bail!("unknown stressor option --{opt}");
        }
    }
    Ok(())
}

fn log_dispatch_banner(registry: &Registry, list: &RunList) {
    let hogs: Vec<String> = list
        .entries
        .iter()
        .filter(|e| e.runnable())
        .map(|e| {
            format!(
                "{} {}",
                e.instances,
                registry.specs()[e.spec_idx].munged_name()
            )
        })
        .collect();
    tracing::info!("dispatching hogs: {}", hogs.join(", "));
}

fn open_yaml(settings: &Settings) -> Option<YamlReport> {
    let path = settings.yaml_path.as_ref()?;
    match YamlReport::create(path) {
        Ok(report) => Some(report),
        Err(err) => {
            tracing::error!(
                error = %err,
                "cannot output YAML data to {}",
                path.display()
            );
            None
        }
    }
}

/// Emit the metrics table to the log and the metrics blocks to YAML
fn dump_metrics(settings: &Settings, entries: &[EntryMetrics], yaml: Option<&mut YamlReport>) {
    tracing::info!(
        "{:<13} {:>9} {:>9} {:>9} {:>9} {:>12} {:>14} {:>12} {:>13}",
        "stressor",
        "bogo ops",
        "real time",
        "usr time",
        "sys time",
        "bogo ops/s",
        "bogo ops/s",
        "CPU used per",
        "RSS Max"
    );
    tracing::info!(
        "{:<13} {:>9} {:>9} {:>9} {:>9} {:>12} {:>14} {:>12} {:>13}",
        "",
        "",
        "(secs)",
        "(secs)",
        "(secs)",
        "(real time)",
        "(usr+sys time)",
        "instance (%)",
        "(KB)"
    );

    let selected: Vec<&EntryMetrics> = entries
        .iter()
        .filter(|m| !settings.metrics_brief || m.bogo_ops != 0 || m.run_ok)
        .collect();

    for m in &selected {
        tracing::info!(
            "{:<13} {:>9} {:>9.2} {:>9.2} {:>9.2} {:>12.2} {:>14.2} {:>12.2} {:>13}",
            m.name,
            m.bogo_ops,
            m.wall_time,
            m.user_time,
            m.system_time,
            m.bogo_ops_per_second_real,
            m.bogo_ops_per_second_cpu,
            m.cpu_usage_per_instance,
            m.max_rss_kb
        );
    }

    let has_aux = selected.iter().any(|m| !m.aux.is_empty());
    if has_aux {
        tracing::info!("miscellaneous metrics:");
        for m in &selected {
            for aux in &m.aux {
                tracing::info!(
                    "{:<13} {:>13.2} {} (geometric mean of {} instances)",
                    m.name,
                    aux.geomean,
                    aux.description,
                    m.completed_instances
                );
            }
        }
    }

    if let Some(yaml) = yaml {
        let owned: Vec<EntryMetrics> = selected.into_iter().cloned().collect();
        if let Err(err) = yaml.metrics(&owned) {
            tracing::error!(error = %err, "cannot write YAML metrics");
        }
    }
}

/// Emit the end-of-run CPU time summary and the YAML times block
fn dump_times(settings: &Settings, duration: f64, yaml: Option<&mut YamlReport>) {
    let ticks = system::ticks_per_second();
    let Some((user_time, system_time)) = system::child_cpu_times(ticks) else {
        return;
    };
    let times = RunTimes {
        run_time: duration,
        available_cpu_time: f64::from(system::processors_configured()) * duration,
        user_time,
        system_time,
    };

    if settings.times {
        let pct = |v: f64| {
            if times.available_cpu_time > 0.0 {
                100.0 * v / times.available_cpu_time
            } else {
                0.0
            }
        };
        tracing::info!("for a {:.2}s run time:", times.run_time);
        tracing::info!("  {:8.2}s available CPU time", times.available_cpu_time);
        tracing::info!(
            "  {:8.2}s user time   ({:6.2}%)",
            times.user_time,
            pct(times.user_time)
        );
        tracing::info!(
            "  {:8.2}s system time ({:6.2}%)",
            times.system_time,
            pct(times.system_time)
        );
        tracing::info!(
            "  {:8.2}s total time  ({:6.2}%)",
            times.total_time(),
            pct(times.total_time())
        );
        if let Some((min1, min5, min15)) = system::load_avg() {
            tracing::info!("load average: {min1:.2} {min5:.2} {min15:.2}");
        }
    }

    if let Some(yaml) = yaml {
        if let Err(err) = yaml.times(&times) {
            tracing::error!(error = %err, "cannot write YAML times");
        }
    }
}
