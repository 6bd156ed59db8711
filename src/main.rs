use simulation::{simulate, SimulationConfig};
use skein_sdk::NetworkConfig;
use tracing_subscriber::EnvFilter;

pub mod simulation;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {}", err);
            std::process::exit(1);
        }
    };
    if let Err(err) = rt.block_on(async_main()) {
        eprintln!("simulation failed: {}", err);
        std::process::exit(1);
    }
}

async fn async_main() -> skein_sdk::Result<()> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            REPLICA SIMULATIONS                              ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let runs = [
        // Reliable relay
        (SimulationConfig::new(3, 50), NetworkConfig::default()),
        // 20% loss
        (SimulationConfig::new(4, 100), NetworkConfig::lossy(0.2)),
        // Loss, duplicates and reordering, with replicas dropping off
        (SimulationConfig::new(5, 100).with_outages(0.05), NetworkConfig::chaotic()),
    ];

    let mut all_converged = true;
    for (config, network) in runs {
        let stats = simulate(config, network).await?;
        stats.print();
        all_converged &= stats.converged;
    }

    if all_converged {
        println!("\n✓ All simulations completed successfully!");
    } else {
        println!("\n✗ Some replicas did not converge");
    }
    Ok(())
}
