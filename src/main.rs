use gridkeep_sheet::{KeepSheet, PositionalSheet};
use simulation::simulate;
use tracing_subscriber::EnvFilter;

pub mod simulation;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gridkeep=info")),
        )
        .init();

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            KEEP POLICY SIMULATIONS                         ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: small room, few edits
    let stats = simulate(|id| KeepSheet::new(id), 3, 20, 5, 40).await;
    stats.print();

    // Test 2: larger room, heavy structural churn
    let stats = simulate(|id| KeepSheet::new(id), 8, 50, 10, 200).await;
    stats.print();
    let keep_ok = stats.converged && stats.rectangular;

    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          POSITIONAL POLICY SIMULATIONS                     ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 3: same load under positional addressing
    let stats = simulate(|id| PositionalSheet::new(id), 8, 50, 10, 200).await;
    stats.print();
    if !stats.rectangular {
        println!("\n  Positional addressing left ragged rows behind.");
    }

    if keep_ok {
        println!("\n✓ All simulations completed successfully!");
    } else {
        println!("\n✗ Keep policy replicas diverged!");
        std::process::exit(1);
    }
}
