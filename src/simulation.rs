use async_stream::stream;
use futures::stream::Stream;
use futures::stream::StreamExt;
use gridkeep_sheet::{Grid, GridPolicy, PolicyKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Statistics collected during a simulation run
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub policy: PolicyKind,
    pub num_replicas: usize,
    pub edits_per_round: usize,
    pub rounds: usize,
    pub local_edits: usize,
    pub rejected_edits: usize,
    pub updates_delivered: usize,
    pub total_syncs: usize,
    pub total_time: Duration,
    pub avg_sync_time: Duration,
    pub ops_per_second: f64,
    pub final_rows: usize,
    pub final_cols: usize,
    pub converged: bool,
    pub rectangular: bool,
}

impl SimulationStats {
    pub fn print(&self) {
        let verdict = |ok: bool| if ok { "yes" } else { "NO" };
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Simulation Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Policy:                    {:>30} ║", self.policy.to_string());
        println!("║  Number of Replicas:        {:>30} ║", self.num_replicas);
        println!("║  Rounds x Edits/Replica:    {:>30} ║", format!("{} x {}", self.rounds, self.edits_per_round));
        println!("║  Local Edits Applied:       {:>30} ║", self.local_edits);
        println!("║  Local Edits Rejected:      {:>30} ║", self.rejected_edits);
        println!("║  Updates Delivered:         {:>30} ║", self.updates_delivered);
        println!("║  Total Sync Operations:     {:>30} ║", self.total_syncs);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Sync Time:         {:>28}µs ║", self.avg_sync_time.as_micros());
        println!("║  Operations/Second:         {:>30.0} ║", self.ops_per_second);
        println!("║  Final Grid:                {:>30} ║", format!("{} x {}", self.final_rows, self.final_cols));
        println!("║  Converged:                 {:>30} ║", verdict(self.converged));
        println!("║  Rectangular:               {:>30} ║", verdict(self.rectangular));
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// A simulated replica and the log of every update it has produced.
struct SimReplica<P: GridPolicy> {
    policy: P,
    log: Vec<P::Update>,
}

type Replicas<P> = Vec<Arc<Mutex<SimReplica<P>>>>;

/// Generator that yields (source, target) pairs for update delivery
fn replica_sync_generator(num_replicas: usize, num_syncs: usize) -> impl Stream<Item = (usize, usize)> {
    stream! {
        let mut rng = StdRng::from_entropy();
        for _ in 0..num_syncs {
            let source = rng.gen_range(0..num_replicas);
            let target = rng.gen_range(0..num_replicas);
            yield (source, target);
        }
    }
}

/// Apply one random local edit. Returns false when the edit was rejected or skipped.
fn random_edit<P: GridPolicy>(policy: &mut P, rng: &mut StdRng, value: &str) -> bool {
    let (rows, cols) = {
        let grid = policy.grid();
        (grid.row_count(), grid.col_count())
    };
    let result = match rng.gen_range(0..10) {
        0..=4 if rows > 0 && cols > 0 => {
            policy.edit_cell(rng.gen_range(0..rows), rng.gen_range(0..cols), value)
        }
        5 if cols > 0 => policy.edit_label(rng.gen_range(0..cols), value),
        6 => policy.insert_row(rng.gen_range(0..=rows)),
        7 => policy.insert_col(rng.gen_range(0..=cols)),
        8 if rows > 1 => policy.delete_row(rng.gen_range(0..rows)),
        9 if cols > 1 => policy.delete_col(rng.gen_range(0..cols)),
        _ => return false,
    };
    result.is_ok()
}

/// Deliver every update of `source` that `target` has not seen yet.
///
/// Returns (updates delivered, updates that changed the target's grid).
async fn deliver<P: GridPolicy>(
    replicas: &Replicas<P>,
    cursors: &mut [Vec<usize>],
    source: usize,
    target: usize,
) -> (usize, usize) {
    if source == target {
        return (0, 0);
    }

    let pending: Vec<P::Update> = {
        let from = replicas[source].lock().await;
        from.log[cursors[target][source]..].to_vec()
    };
    if pending.is_empty() {
        return (0, 0);
    }
    cursors[target][source] += pending.len();

    let mut to = replicas[target].lock().await;
    let mut changed = 0;
    for update in &pending {
        if to.policy.apply_remote(update) {
            changed += 1;
        }
    }
    // Reconciliation may have produced reversals that must travel further
    let responses = to.policy.take_updates();
    if !responses.is_empty() {
        debug!(replica = target, count = responses.len(), "Replica produced responses");
    }
    to.log.extend(responses);

    (pending.len(), changed)
}

/// Deliver everything everywhere until no replica has anything new to send.
async fn settle<P: GridPolicy>(replicas: &Replicas<P>, cursors: &mut [Vec<usize>]) -> usize {
    let mut delivered = 0;
    loop {
        let mut moved = 0;
        for target in 0..replicas.len() {
            for source in 0..replicas.len() {
                moved += deliver(replicas, cursors, source, target).await.0;
            }
        }
        if moved == 0 {
            return delivered;
        }
        delivered += moved;
    }
}

/// Randomized multi-replica run: concurrent local edits interleaved with
/// random pairwise delivery, followed by a full settle and convergence check.
pub async fn simulate<P, F>(
    make: F,
    num_replicas: usize,
    edits_per_round: usize,
    rounds: usize,
    syncs_per_round: usize,
) -> SimulationStats
where
    P: GridPolicy + 'static,
    F: Fn(&str) -> P,
{
    let num_replicas = num_replicas.max(1);
    let mut replicas: Replicas<P> = Vec::with_capacity(num_replicas);
    for idx in 0..num_replicas {
        let policy = make(&format!("replica_{idx}"));
        replicas.push(Arc::new(Mutex::new(SimReplica { policy, log: Vec::new() })));
    }
    let policy_kind = replicas[0].lock().await.policy.kind();

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        {:<10} Grid Simulation (Async)                   ║", policy_kind.to_string());
    println!("║  Replicas: {} | Edits/Round: {} | Rounds: {} ║",
             num_replicas, edits_per_round, rounds);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let mut cursors = vec![vec![0usize; num_replicas]; num_replicas];

    {
        let mut first = replicas[0].lock().await;
        first.policy.seed();
        let updates = first.policy.take_updates();
        first.log.extend(updates);
    }
    settle(&replicas, &mut cursors).await;
    info!(policy = %policy_kind, replicas = num_replicas, "Seeded simulation grid");

    let mut local_edits = 0;
    let mut rejected_edits = 0;
    let mut updates_delivered = 0;
    let mut sync_times = vec![];

    for round in 0..rounds {
        println!("\n[Round {}/{}] Concurrent edits...", round + 1, rounds);

        let mut handles = Vec::with_capacity(num_replicas);
        for (idx, replica) in replicas.iter().enumerate() {
            let replica = Arc::clone(replica);
            handles.push(tokio::spawn(async move {
                let mut rng = StdRng::from_entropy();
                let mut applied = 0;
                for i in 0..edits_per_round {
                    let value = format!("r{idx}.{round}.{i}");
                    let mut guard = replica.lock().await;
                    if random_edit(&mut guard.policy, &mut rng, &value) {
                        applied += 1;
                    }
                    let updates = guard.policy.take_updates();
                    guard.log.extend(updates);
                    drop(guard);

                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                applied
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(applied) => {
                    local_edits += applied;
                    rejected_edits += edits_per_round - applied;
                }
                Err(e) => warn!("Edit task failed: {}", e),
            }
        }

        println!("[Round {}/{}] Random delivery...", round + 1, rounds);
        let mut sync_gen = Box::pin(replica_sync_generator(num_replicas, syncs_per_round));
        while let Some((source, target)) = sync_gen.next().await {
            let sync_start = Instant::now();
            let (delivered, _) = deliver(&replicas, &mut cursors, source, target).await;
            if delivered > 0 {
                sync_times.push(sync_start.elapsed());
                updates_delivered += delivered;
            }
        }
    }

    println!("\n[Settle] Delivering remaining updates...");
    updates_delivered += settle(&replicas, &mut cursors).await;

    let total_time = start.elapsed();

    let mut grids: Vec<Grid> = Vec::with_capacity(num_replicas);
    let mut consistent = true;
    for replica in &replicas {
        let guard = replica.lock().await;
        consistent &= *guard.policy.grid() == guard.policy.materialize();
        grids.push(guard.policy.grid().clone());
    }
    let converged = consistent && grids.windows(2).all(|pair| pair[0] == pair[1]);
    let rectangular = grids.iter().all(Grid::is_rectangular);
    if !converged {
        warn!(policy = %policy_kind, "Replicas diverged");
    }

    let avg_sync_time = if !sync_times.is_empty() {
        sync_times.iter().sum::<Duration>() / sync_times.len() as u32
    } else {
        Duration::ZERO
    };
    let total_syncs = sync_times.len();
    let total_operations = local_edits + updates_delivered;
    let ops_per_second = total_operations as f64 / total_time.as_secs_f64().max(f64::EPSILON);

    println!("[Settle] ✓ Completed");

    SimulationStats {
        policy: policy_kind,
        num_replicas,
        edits_per_round,
        rounds,
        local_edits,
        rejected_edits,
        updates_delivered,
        total_syncs,
        total_time,
        avg_sync_time,
        ops_per_second,
        final_rows: grids[0].row_count(),
        final_cols: grids[0].col_count(),
        converged,
        rectangular,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridkeep_sheet::{KeepSheet, PositionalSheet};

    #[tokio::test]
    async fn test_keep_simulation_converges_rectangular() {
        let stats = simulate(|id| KeepSheet::new(id), 3, 20, 3, 30).await;
        assert!(stats.converged);
        assert!(stats.rectangular);
        assert_eq!(stats.local_edits + stats.rejected_edits, 3 * 20 * 3);
    }

    #[tokio::test]
    async fn test_positional_simulation_converges() {
        let stats = simulate(|id| PositionalSheet::new(id), 3, 20, 3, 30).await;
        assert!(stats.converged);
    }
}
