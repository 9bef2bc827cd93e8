//! # gridkeep CLI
//!
//! A standalone playground for the gridkeep structural conflict-resolution
//! policies. Every replica is a `SheetSession` joined to one in-memory relay
//! room; taking a replica offline and back online simulates a partition.
//!
//! ## Conflict model
//!
//! ```text
//! keep:        edit(col B)  ∥  delete(col B)   →  col B restored in place, edit kept
//! positional:  edit(col B)  ∥  delete(col B)   →  delete wins, edit lost or misplaced
//! ```

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use gridkeep_sdk::prelude::*;
use gridkeep_sdk::SessionConfigBuilder;
use tracing_subscriber::EnvFilter;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "gridkeep-cli")]
#[command(about = "Collaborative spreadsheet conflict-resolution playground (gridkeep SDK)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Basic demo: two replicas edit, sync, and converge
    Demo,
    /// Keep scenario: an offline column delete races with an edit and is vetoed
    Veto,
    /// Untouched delete: a delete nobody edits against propagates everywhere
    Delete,
    /// The veto scenario replayed under positional addressing
    Positional,
    /// Interactive REPL for manual experimentation
    Interactive {
        /// Conflict-resolution policy used by every replica
        #[arg(long, value_enum, default_value_t = PolicyArg::Keep)]
        policy: PolicyArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Keep,
    Positional,
}

// ─── Replica: a named session on the shared relay ──────────────────────────

type Session<P> = SheetSession<P, MemoryTransport>;

struct Replica<P: GridPolicy + 'static> {
    name: String,
    session: Session<P>,
}

impl<P: GridPolicy + 'static> Replica<P> {
    fn new(name: &str, policy: P, relay: &MemoryRelay) -> Result<Self, SdkError> {
        let transport = Arc::new(MemoryTransport::new(PeerId::new(name), relay));
        let config = SessionConfigBuilder::new().room("gridkeep-cli").build();
        Ok(Self {
            name: name.to_string(),
            session: SheetSession::new(policy, transport, config)?,
        })
    }

    /// Connect and finish the first sync.
    async fn join(&self) -> Result<(), SdkError> {
        self.session.connect().await?;
        self.session.process_incoming().await?;
        Ok(())
    }
}

/// Flush and deliver until every online replica is idle.
async fn settle<P: GridPolicy + 'static>(replicas: &[&Replica<P>]) -> Result<usize, SdkError> {
    let mut total = 0;
    loop {
        let mut handled = 0;
        for replica in replicas {
            replica.session.flush().await?;
            handled += replica.session.process_incoming().await?;
        }
        if handled == 0 {
            return Ok(total);
        }
        total += handled;
    }
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn warn_line(text: &str) {
    println!("  {} {}", "!".bright_red(), text);
}

fn sync_arrow(names: &[&str], messages: usize) {
    println!(
        "  {} {} {}",
        names.join(" ⇄ ").bright_magenta(),
        format!("──{} messages──▶", messages).bright_cyan(),
        "✓".bright_green()
    );
}

fn status_badge(status: ConnectionStatus) -> ColoredString {
    match status {
        ConnectionStatus::Reachable => "online".bright_green(),
        ConnectionStatus::Connecting => "connecting".bright_yellow(),
        ConnectionStatus::Unreachable => "offline".bright_red(),
    }
}

fn show_replica<P: GridPolicy + 'static>(replica: &Replica<P>) {
    let border = "─".repeat(44);
    let kind = replica.session.policy().read().kind();
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^42} │",
        format!("Replica: {} [{}]", replica.name, kind)
            .bright_yellow()
            .to_string()
    );
    println!(
        "  │ {:<42} │",
        format!(
            "status: {}  pending: {}",
            replica.session.status(),
            replica.session.pending()
        )
    );
    println!("  ├{}┤", border);

    let grid = replica.session.grid();
    if grid.row_count() == 0 && grid.col_count() == 0 {
        println!("  │ {:^42} │", "(empty grid)".dimmed().to_string());
    } else {
        for line in grid.to_string().lines() {
            println!("  │ {}", line);
        }
        if !grid.is_rectangular() {
            println!("  │ {}", "ragged rows: row lengths differ".bright_red());
        }
    }
    println!("  └{}┘", border);
}

fn convergence_check<P: GridPolicy + 'static>(replicas: &[&Replica<P>]) -> bool {
    let grids: Vec<Grid> = replicas.iter().map(|r| r.session.grid()).collect();
    grids.windows(2).all(|pair| pair[0] == pair[1])
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL REPLICAS CONVERGED: grids are identical!"
                .bright_green()
                .bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED: replicas differ!".bright_red().bold()
        );
    }
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo() -> Result<(), SdkError> {
    header("DEMO: Shared Grid Editing & Sync");
    let relay = MemoryRelay::new();

    section("Phase 1: alice opens an empty room and seeds the grid");
    let alice = Replica::new("alice", KeepSheet::new("alice"), &relay)?;
    alice.join().await?;
    step("alice: first sync found nothing, seeded a 3x3 grid");

    section("Phase 2: bob joins and rebuilds from the backlog");
    let bob = Replica::new("bob", KeepSheet::new("bob"), &relay)?;
    bob.join().await?;
    step(&format!(
        "bob: replayed {} updates from the relay",
        relay.backlog_len("gridkeep-cli")
    ));

    section("Phase 3: both edit concurrently");
    alice.session.edit_label(0, "Name")?;
    step("alice: label A = Name");
    alice.session.edit_cell(0, 0, "Ada")?;
    step("alice: A1 = Ada");
    bob.session.edit_label(1, "Role")?;
    step("bob:   label B = Role");
    bob.session.edit_cell(0, 1, "Engineer")?;
    step("bob:   B1 = Engineer");
    bob.session.insert_row(3)?;
    bob.session.edit_cell(3, 0, "Grace")?;
    step("bob:   appended row 4, A4 = Grace");

    let messages = settle(&[&alice, &bob]).await?;
    sync_arrow(&["alice", "bob"], messages);

    section("Phase 4: post-sync state");
    show_replica(&alice);
    show_replica(&bob);
    convergence_result(convergence_check(&[&alice, &bob]));
    Ok(())
}

// ─── Veto ──────────────────────────────────────────────────────────────────

/// Bob deletes column B while offline; alice writes into column B meanwhile.
async fn replay_conflict<P, F>(make: F) -> Result<(), SdkError>
where
    P: GridPolicy + 'static,
    F: Fn(&str) -> P,
{
    let relay = MemoryRelay::new();
    let alice = Replica::new("alice", make("alice"), &relay)?;
    let bob = Replica::new("bob", make("bob"), &relay)?;
    alice.join().await?;
    bob.join().await?;
    alice.session.edit_label(1, "Email")?;
    settle(&[&alice, &bob]).await?;

    section("Phase 1: shared starting point");
    show_replica(&alice);

    section("Phase 2: bob goes offline and deletes column B");
    bob.session.disconnect().await?;
    bob.session.delete_col(1)?;
    step(&format!(
        "bob: column B deleted locally ({} update queued)",
        bob.session.pending()
    ));

    section("Phase 3: alice writes into column B");
    alice.session.edit_cell(0, 1, "ada@example.com")?;
    step("alice: B1 = ada@example.com");

    section("Phase 4: bob reconnects, both sides sync");
    bob.session.connect().await?;
    let messages = settle(&[&alice, &bob]).await?;
    sync_arrow(&["alice", "bob"], messages);

    section("Phase 5: post-sync state");
    show_replica(&alice);
    show_replica(&bob);
    convergence_result(convergence_check(&[&alice, &bob]));

    let grid = alice.session.grid();
    let kept = (0..grid.col_count())
        .any(|col| grid.header(col) == Some("Email") && grid.cell(0, col) == Some("ada@example.com"));
    if kept {
        step("alice's edit survived the concurrent delete, under its own column");
    } else {
        warn_line("alice's edit was lost or misplaced by the concurrent delete");
    }
    Ok(())
}

async fn run_veto() -> Result<(), SdkError> {
    header("VETO: An Edit Keeps Its Column Alive");
    replay_conflict(|id| KeepSheet::new(id)).await
}

async fn run_positional() -> Result<(), SdkError> {
    header("POSITIONAL: The Same Race Without Identities");
    replay_conflict(|id| PositionalSheet::new(id)).await
}

// ─── Untouched delete ─────────────────────────────────────────────────────

async fn run_delete() -> Result<(), SdkError> {
    header("DELETE: Nobody Objects, The Row Goes");
    let relay = MemoryRelay::new();
    let alice = Replica::new("alice", KeepSheet::new("alice"), &relay)?;
    let bob = Replica::new("bob", KeepSheet::new("bob"), &relay)?;
    let carol = Replica::new("carol", KeepSheet::new("carol"), &relay)?;
    for replica in [&alice, &bob, &carol] {
        replica.join().await?;
    }

    section("Phase 1: everyone fills a different row");
    alice.session.edit_cell(0, 0, "alice was here")?;
    bob.session.edit_cell(1, 0, "bob was here")?;
    carol.session.edit_cell(2, 0, "carol was here")?;
    let messages = settle(&[&alice, &bob, &carol]).await?;
    sync_arrow(&["alice", "bob", "carol"], messages);
    show_replica(&alice);

    section("Phase 2: carol deletes row 2 after the edits have synced");
    carol.session.delete_row(1)?;
    step("carol: row 2 deleted");
    let messages = settle(&[&alice, &bob, &carol]).await?;
    sync_arrow(&["alice", "bob", "carol"], messages);

    section("Phase 3: post-sync state");
    show_replica(&alice);
    show_replica(&bob);
    show_replica(&carol);
    convergence_result(convergence_check(&[&alice, &bob, &carol]));
    step(&format!(
        "rows remaining: {} (the delete was not concurrent with any edit)",
        alice.session.grid().row_count()
    ));
    Ok(())
}

// ─── Interactive REPL ─────────────────────────────────────────────────────

fn parse_index(text: &str) -> Option<usize> {
    text.parse().ok()
}

/// Parse a 1-based row number or a column letter / 1-based number.
fn parse_col(text: &str) -> Option<usize> {
    if let Ok(n) = text.parse::<usize>() {
        return n.checked_sub(1);
    }
    let mut index = 0usize;
    for c in text.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    index.checked_sub(1)
}

fn print_repl_help() {
    println!();
    println!("  {}", "Commands:".bold().underline());
    let commands = [
        ("replica <name>", "Create a replica and join the room"),
        ("edit <r> <row> <col> <text>", "Write a cell (row 1-based, col A.. or 1..)"),
        ("label <r> <col> <text>", "Write a column label"),
        ("insrow <r> <row>", "Insert a row before position"),
        ("inscol <r> <col>", "Insert a column before position"),
        ("delrow <r> <row>", "Delete a row"),
        ("delcol <r> <col>", "Delete a column"),
        ("offline <r>", "Disconnect a replica"),
        ("online <r>", "Reconnect a replica"),
        ("sync", "Deliver everything between online replicas"),
        ("show <r>", "Show a replica's grid"),
        ("list", "Show every replica"),
        ("check", "Check convergence across replicas"),
        ("quit", "Exit"),
    ];
    for (usage, about) in commands {
        println!("    {:<30} {}", usage.bright_cyan(), about);
    }
    println!();
}

async fn run_interactive<P, F>(make: F) -> Result<(), SdkError>
where
    P: GridPolicy + 'static,
    F: Fn(&str) -> P,
{
    header("INTERACTIVE REPL: gridkeep Sessions");

    let relay = MemoryRelay::new();
    let mut replicas: BTreeMap<String, Replica<P>> = BTreeMap::new();
    print_repl_help();

    loop {
        print!("{}", "gridkeep> ".bright_cyan().bold());
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() || input.is_empty() {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        if matches!(parts[0], "quit" | "exit" | "q") {
            println!("  {}", "Goodbye!".dimmed());
            break;
        }

        match parts[0] {
            "replica" | "r" => {
                let Some(&name) = parts.get(1) else {
                    warn_line("Usage: replica <name>");
                    continue;
                };
                if replicas.contains_key(name) {
                    println!("  {} Replica '{}' already exists", "!".bright_yellow(), name);
                    continue;
                }
                let replica = Replica::new(name, make(name), &relay)?;
                replica.join().await?;
                step(&format!(
                    "Created replica '{}' ({})",
                    name,
                    status_badge(replica.session.status())
                ));
                replicas.insert(name.to_string(), replica);
            }

            "sync" => {
                let online: Vec<&Replica<P>> = replicas.values().collect();
                let messages = settle(&online).await?;
                let names: Vec<&str> = replicas.keys().map(String::as_str).collect();
                sync_arrow(&names, messages);
            }

            "list" | "ls" => {
                if replicas.is_empty() {
                    println!("  {}", "(no replicas)".dimmed());
                }
                for replica in replicas.values() {
                    show_replica(replica);
                }
            }

            "check" => {
                let all: Vec<&Replica<P>> = replicas.values().collect();
                convergence_result(convergence_check(&all));
            }

            "help" | "h" | "?" => print_repl_help(),

            command => {
                let Some(replica) = parts.get(1).and_then(|name| replicas.get(*name)) else {
                    println!(
                        "  {} Unknown command or replica; type 'help'",
                        "?".bright_yellow()
                    );
                    continue;
                };
                let session = &replica.session;
                let row = parts.get(2).and_then(|s| parse_index(s)).and_then(|n| n.checked_sub(1));
                let col = parts.get(2).and_then(|s| parse_col(s));

                let outcome = match command {
                    "edit" | "e" => {
                        let cell_col = parts.get(3).and_then(|s| parse_col(s));
                        let text = parts.get(4..).map(|rest| rest.join(" ")).unwrap_or_default();
                        match (row, cell_col) {
                            (Some(r), Some(c)) => session.edit_cell(r, c, &text),
                            _ => {
                                warn_line("Usage: edit <replica> <row> <col> <text>");
                                continue;
                            }
                        }
                    }
                    "label" => {
                        let text = parts.get(3..).map(|rest| rest.join(" ")).unwrap_or_default();
                        match col {
                            Some(c) => session.edit_label(c, &text),
                            None => {
                                warn_line("Usage: label <replica> <col> <text>");
                                continue;
                            }
                        }
                    }
                    "insrow" | "delrow" => match row {
                        Some(r) if command == "insrow" => session.insert_row(r),
                        Some(r) => session.delete_row(r),
                        None => {
                            warn_line("Usage: insrow|delrow <replica> <row>");
                            continue;
                        }
                    },
                    "inscol" | "delcol" => match col {
                        Some(c) if command == "inscol" => session.insert_col(c),
                        Some(c) => session.delete_col(c),
                        None => {
                            warn_line("Usage: inscol|delcol <replica> <col>");
                            continue;
                        }
                    },
                    "offline" => session.disconnect().await,
                    "online" => session.connect().await.map(|_| ()),
                    "show" | "s" => {
                        show_replica(replica);
                        continue;
                    }
                    other => {
                        println!(
                            "  {} Unknown command '{}'; type 'help'",
                            "?".bright_yellow(),
                            other
                        );
                        continue;
                    }
                };

                match outcome {
                    Ok(()) => step(&format!(
                        "{}: {} ({}, {} pending)",
                        replica.name,
                        command,
                        status_badge(session.status()),
                        session.pending()
                    )),
                    Err(e) => warn_line(&e.to_string()),
                }
            }
        }
    }
    Ok(())
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Demo => run_demo().await,
        Commands::Veto => run_veto().await,
        Commands::Delete => run_delete().await,
        Commands::Positional => run_positional().await,
        Commands::Interactive { policy } => match policy {
            PolicyArg::Keep => run_interactive(|id| KeepSheet::new(id)).await,
            PolicyArg::Positional => run_interactive(|id| PositionalSheet::new(id)).await,
        },
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_col_letters_and_numbers() {
        assert_eq!(parse_col("A"), Some(0));
        assert_eq!(parse_col("c"), Some(2));
        assert_eq!(parse_col("AA"), Some(26));
        assert_eq!(parse_col("2"), Some(1));
        assert_eq!(parse_col("0"), None);
        assert_eq!(parse_col("B2"), None);
    }

    #[tokio::test]
    async fn test_conflict_replay_keeps_edit() {
        let relay = MemoryRelay::new();
        let alice = Replica::new("alice", KeepSheet::new("alice"), &relay).unwrap();
        let bob = Replica::new("bob", KeepSheet::new("bob"), &relay).unwrap();
        alice.join().await.unwrap();
        bob.join().await.unwrap();

        bob.session.disconnect().await.unwrap();
        bob.session.delete_col(1).unwrap();
        alice.session.edit_cell(0, 1, "kept").unwrap();
        bob.session.connect().await.unwrap();
        settle(&[&alice, &bob]).await.unwrap();

        assert!(convergence_check(&[&alice, &bob]));
        assert_eq!(alice.session.grid().cell(0, 1), Some("kept"));
    }
}
