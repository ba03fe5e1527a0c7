//! bogobench - process-fleet stress harness with bogo-op accounting

use std::process::ExitCode;

use bogobench_core::class::Class;
use bogobench_core::exit::ExitStatus;
use bogobench_core::registry::{Registry, VerifyMode};

mod cli;
mod run;

fn main() -> ExitCode {
    let parsed = match cli::parse() {
        Ok(parsed) => parsed,
        Err(err) => err.exit(),
    };

    // Initialize tracing; quiet/verbose shift the default level
    let default_level = if parsed.quiet {
        tracing::Level::ERROR
    } else if parsed.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_level.into()),
        )
        .init();

    let registry = bogobench_stressors::catalog();

    let action = match parsed.action() {
        Ok(action) => action,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(ExitStatus::Failure.code() as u8);
        }
    };

    let status = match action {
        cli::Action::ListStressors => {
            show_stressor_names(&registry);
            ExitStatus::Success
        }
        cli::Action::ListVerifiable => {
            show_verifiable(&registry);
            ExitStatus::Success
        }
        cli::Action::ListClass(class) => {
            show_class_members(&registry, class);
            ExitStatus::Success
        }
        cli::Action::Run(settings) => match run::execute(&registry, &settings) {
            Ok(status) => status,
            Err(err) => {
                tracing::error!("{err:#}");
                ExitStatus::Failure
            }
        },
    };

    ExitCode::from(status.code() as u8)
}

/// Print every stressor name on one line
fn show_stressor_names(registry: &Registry) {
    let names: Vec<String> = registry.specs().iter().map(|s| s.munged_name()).collect();
    println!("{}", names.join(" "));
}

/// Print the members of one class
fn show_class_members(registry: &Registry, class: Class) {
    let members: Vec<String> = registry
        .specs()
        .iter()
        .filter(|s| s.class.intersects(class))
        .map(|s| s.munged_name())
        .collect();
    let names: Vec<&str> = class.name_list();
    println!(
        "class '{}' stressors: {}",
        names.join(","),
        members.join(" ")
    );
}

/// Print stressors grouped by their verification support
fn show_verifiable(registry: &Registry) {
    let by_mode = |mode: VerifyMode| -> String {
        registry
            .specs()
            .iter()
            .filter(|s| s.verify == mode)
            .map(|s| s.munged_name())
            .collect::<Vec<_>>()
            .join(" ")
    };
    println!("Verification always enabled:");
    println!("{}", by_mode(VerifyMode::Always));
    println!();
    println!("Verification enabled by --verify option:");
    println!("{}", by_mode(VerifyMode::Optional));
    println!();
    println!("Verification not implemented:");
    println!("{}", by_mode(VerifyMode::None));
}
