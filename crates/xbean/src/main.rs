mod deployment;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;
use xbean_kernel::{KernelError, StandaloneKernel, StartStrategies};

use crate::deployment::Deployment;

/// Exit status when the deployment file can not be used at all
const EXIT_INVALID_DEPLOYMENT: u8 = 2;

/// XBean: run a set of services under a lifecycle kernel
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Log at debug level and log every service transition
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a deployment file and list its services
    Check {
        /// Deployment file (.json, .yaml, .yml or .toml)
        deployment: PathBuf,
    },
    /// Boot a kernel, start every service and run until Ctrl-C
    Run {
        /// Deployment file (.json, .yaml, .yml or .toml)
        deployment: PathBuf,

        /// Shut down right after the services have started
        #[arg(long)]
        once: bool,

        /// Seconds to wait for services to start before reporting
        #[arg(long, default_value_t = 30)]
        start_timeout: u64,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // library code logs through the `log` facade
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    match args.command {
        Commands::Check { deployment } => check(&deployment),
        Commands::Run {
            deployment,
            once,
            start_timeout,
        } => run(&deployment, args.verbose, once, Duration::from_secs(start_timeout)).await,
    }
}

fn load(path: &Path) -> Option<Deployment> {
    match Deployment::load(path) {
        Ok(deployment) => Some(deployment),
        Err(e) => {
            eprintln!("error: {}", e);
            None
        }
    }
}

fn check(path: &Path) -> ExitCode {
    let Some(deployment) = load(path) else {
        return ExitCode::from(EXIT_INVALID_DEPLOYMENT);
    };
    println!(
        "Deployment '{}' is valid: kernel '{}', {} service(s)",
        path.display(),
        deployment.kernel.kernel_name,
        deployment.services.len()
    );
    for service in &deployment.services {
        let mut flags = Vec::new();
        if !service.restartable {
            flags.push("non-restartable".to_string());
        }
        if !service.enabled {
            flags.push("disabled".to_string());
        }
        if !service.depends_on.is_empty() {
            flags.push(format!("depends on {}", service.depends_on.join(", ")));
        }
        if !service.owns.is_empty() {
            flags.push(format!("owns {}", service.owns.join(", ")));
        }
        if flags.is_empty() {
            println!("  - {}", service.name);
        } else {
            println!("  - {} ({})", service.name, flags.join("; "));
        }
    }
    ExitCode::SUCCESS
}

async fn run(path: &Path, verbose: bool, once: bool, start_timeout: Duration) -> ExitCode {
    let Some(mut deployment) = load(path) else {
        return ExitCode::from(EXIT_INVALID_DEPLOYMENT);
    };
    if verbose {
        deployment.kernel.log_transitions = true;
    }

    let kernel = StandaloneKernel::new(deployment.kernel.clone());
    let mut failed = false;

    // non-restartable services start during registration, so keep file order
    for service in &deployment.services {
        if let Err(e) = kernel.register_service(service.name.as_str(), service.factory()) {
            error!("{}", e);
            failed = true;
        }
    }

    let mut workers = JoinSet::new();
    for name in kernel.service_names() {
        // disabled services stay STOPPED; non-restartable ones are already running
        let startable = deployment
            .services
            .iter()
            .any(|s| s.name == name.as_str() && s.enabled && s.restartable);
        if !startable {
            continue;
        }
        let kernel = kernel.clone();
        workers.spawn_blocking(move || {
            let result = kernel.start_service_with(&name, &StartStrategies::Block);
            (name, result)
        });
    }

    let deadline = tokio::time::Instant::now() + start_timeout;
    while !workers.is_empty() {
        match tokio::time::timeout_at(deadline, workers.join_next()).await {
            Ok(Some(Ok((name, Err(e))))) => {
                error!("Service '{}' failed to start: {}", name, e);
                failed = true;
            }
            Ok(Some(Ok((name, Ok(()))))) => info!("Service '{}' started", name),
            Ok(Some(Err(e))) => {
                error!("Start worker failed: {}", e);
                failed = true;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    "{} service(s) still waiting to start after {:?}",
                    workers.len(),
                    start_timeout
                );
                failed = true;
                break;
            }
        }
    }

    print_status(&kernel);

    if !once {
        info!("Kernel '{}' running; press Ctrl-C to stop", kernel.kernel_name());
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {}", e);
        }
    }

    // destroy blocks on service locks
    let shutdown = {
        let kernel = kernel.clone();
        tokio::task::spawn_blocking(move || kernel.destroy()).await
    };
    match shutdown {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            report_shutdown_errors(&e);
            failed = true;
        }
        Err(e) => {
            error!("Shutdown worker failed: {}", e);
            failed = true;
        }
    }
    // blocked starts were cancelled by the shutdown
    while workers.join_next().await.is_some() {}

    if failed {
        ExitCode::FAILURE
    } else {
        println!("Kernel '{}' stopped cleanly", kernel.kernel_name());
        ExitCode::SUCCESS
    }
}

fn print_status(kernel: &StandaloneKernel) {
    println!("{:<24} {:<10} {}", "SERVICE", "STATE", "SINCE");
    for name in kernel.service_names() {
        let state = kernel
            .service_state(&name)
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "UNKNOWN".to_string());
        let since = match kernel.service_start_time(&name) {
            Ok(0) | Err(_) => "-".to_string(),
            Ok(millis) => millis.to_string(),
        };
        println!("{:<24} {:<10} {}", name.as_str(), state, since);
    }
}

fn report_shutdown_errors(error: &KernelError) {
    let errors = error.flatten();
    eprintln!("Shutdown finished with {} error(s):", errors.len());
    for e in errors {
        eprintln!("  - {}", e);
    }
}
