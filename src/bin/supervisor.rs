use anyhow::{Context, Result};
use log::error;

use kilimall_scraper::supervisor::{
    banner_lines, check_required_files, load_services, OsLauncher, ShutdownOutcome, Supervisor,
    Timings,
};
use kilimall_scraper::SupervisorError;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let root = std::env::current_dir().context("cannot determine working directory")?;
    let services = load_services(&root)?;

    for line in banner_lines(&services) {
        println!("{}", line);
    }

    if let Err(e) = check_required_files(&root, &services) {
        if let SupervisorError::MissingFiles(missing) = &e {
            println!("[ERROR] Missing required files:");
            for path in missing {
                println!("  - {}", path.display());
            }
            println!("Please run the supervisor from the project root directory.");
        }
        return Err(e.into());
    }

    let mut supervisor = Supervisor::new(OsLauncher::new(root.clone()), Timings::default());
    if let Err(e) = supervisor.start_all(&services).await {
        error!("[ERROR] Failed to start all services: {}", e);
        return Err(e.into());
    }

    println!("\n[SUCCESS] All services started successfully!");
    println!("[INFO] Press Ctrl+C to stop all services\n");

    let outcomes = supervisor
        .monitor(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await;

    for (name, outcome) in outcomes {
        let label = match outcome {
            ShutdownOutcome::Stopped => "stopped",
            ShutdownOutcome::ForceKilled => "force killed",
            ShutdownOutcome::AlreadyExited => "already exited",
        };
        println!("  {}: {}", name, label);
    }
    println!("[SUCCESS] All services stopped");
    Ok(())
}
