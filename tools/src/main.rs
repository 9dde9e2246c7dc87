//! desk-runner: headless runner for the lead distribution desk.
//!
//! Usage:
//!   desk-runner --seed 12345 --agents 3 --leads 40 --db desk.db
//!   desk-runner --seed 12345 --ipc-mode

use anyhow::Result;
use dialdesk_core::{
    config::DeskConfig,
    distribution::BatchTarget,
    engine::DeskEngine,
    error::DeskError,
    model::{Availability, NewLead, Role},
    store::DeskStore,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    Distribute,
    Transfer {
        source: String,
        destination: String,
    },
    Release {
        operator_id: String,
    },
    Refresh,
    Quit,
}

#[derive(serde::Serialize)]
struct OperatorState {
    operator_id: String,
    display_name: String,
    role: String,
    availability: String,
    queue_size: usize,
}

#[derive(serde::Serialize)]
struct UiState {
    operators: Vec<OperatorState>,
    general_queue: usize,
    called: usize,
    call_records: usize,
    missing_collections: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let agents = parse_arg(&args, "--agents", 3usize);
    let leads = parse_arg(&args, "--leads", 40usize);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let data_dir = args
        .windows(2)
        .find(|w| w[0] == "--data-dir")
        .map(|w| w[1].as_str())
        .unwrap_or("./data");

    if !ipc_mode {
        println!("dialdesk — desk-runner");
        println!("  seed:      {seed}");
        println!("  agents:    {agents}");
        println!("  leads:     {leads}");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
    }

    // For :memory: use a SQLite shared-memory URI so a second process
    // attaching for inspection shares the same in-memory database.
    let db_effective: String = if db == ":memory:" {
        format!("file:deskrun_{}?mode=memory&cache=shared", unix_now())
    } else {
        db.to_string()
    };
    let store = Arc::new(DeskStore::open(&db_effective)?);
    store.migrate()?;

    let config = DeskConfig::load(data_dir)?;
    let engine = DeskEngine::build(Arc::clone(&store), config)?;

    if engine.snapshot().operators().is_empty() {
        seed_demo_desk(&engine, seed, agents, leads)?;
    }

    if ipc_mode {
        run_ipc_loop(&engine)?;
    } else {
        match engine.distribute_general() {
            Ok(claimed) => println!("distributed {claimed} leads"),
            Err(e @ (DeskError::EmptyQueue | DeskError::NoEligibleOperators)) => {
                println!("nothing distributed: {e}")
            }
            Err(e) => return Err(e.into()),
        }
        print_summary(&engine, &store)?;
    }

    Ok(())
}

/// Deterministic demo population: `agents` online agents plus one
/// admin, and `leads` imported leads in the general pool.
fn seed_demo_desk(engine: &DeskEngine, seed: u64, agents: usize, leads: usize) -> Result<()> {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);

    engine.register_operator("admin", "Desk Admin", Role::Admin)?;
    for i in 1..=agents {
        let id = format!("agent-{i:02}");
        engine.register_operator(&id, &format!("Agent {i:02}"), Role::Agent)?;
        engine.set_availability(&id, Availability::Online)?;
    }

    const CATEGORIES: [&str; 4] = ["inbound", "referral", "campaign", "walk_in"];
    let batch: Vec<NewLead> = (0..leads)
        .map(|i| NewLead {
            name: format!("Lead {:04}", i + 1),
            phone: format!("555-{:04}", rng.gen_range(0..10_000)),
            category: CATEGORIES[rng.gen_range(0..CATEGORIES.len())].to_string(),
        })
        .collect();
    if !batch.is_empty() {
        engine.import_leads(batch, BatchTarget::GeneralPool)?;
    }
    log::info!("seeded demo desk: {agents} agents, {leads} leads (seed {seed})");
    Ok(())
}

fn run_ipc_loop(engine: &DeskEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        match cmd {
            IpcCommand::Quit => break,
            IpcCommand::GetState => {
                writeln!(stdout, "{}", serde_json::to_string(&build_ui_state(engine))?)?;
            }
            IpcCommand::Distribute => {
                reply(engine, &mut stdout, engine.distribute_general())?;
            }
            IpcCommand::Transfer {
                source,
                destination,
            } => {
                reply(engine, &mut stdout, engine.transfer_queue(&source, &destination))?;
            }
            IpcCommand::Release { operator_id } => {
                reply(engine, &mut stdout, engine.release_queue(&operator_id))?;
            }
            IpcCommand::Refresh => match engine.refresh() {
                Ok(()) => {
                    writeln!(stdout, "{}", serde_json::to_string(&build_ui_state(engine))?)?;
                }
                Err(e) => {
                    writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                }
            },
        }
        stdout.flush()?;
    }
    Ok(())
}

/// Domain rejections go back to the UI as an error line; the loop
/// keeps running. Anything else is fatal.
fn reply(
    engine: &DeskEngine,
    stdout: &mut io::Stdout,
    result: dialdesk_core::error::DeskResult<usize>,
) -> Result<()> {
    match result {
        Ok(count) => {
            let mut state = serde_json::to_value(build_ui_state(engine))?;
            state["affected"] = serde_json::json!(count);
            writeln!(stdout, "{state}")?;
        }
        Err(e @ DeskError::Database(_)) => return Err(e.into()),
        Err(e @ DeskError::SourceUnavailable { .. }) => return Err(e.into()),
        Err(e) => {
            writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
        }
    }
    Ok(())
}

fn build_ui_state(engine: &DeskEngine) -> UiState {
    let snap = engine.snapshot();
    let operators = snap
        .operators()
        .iter()
        .map(|op| OperatorState {
            operator_id: op.operator_id.clone(),
            display_name: op.display_name.clone(),
            role: op.role.as_str().to_string(),
            availability: op.availability.as_str().to_string(),
            queue_size: snap.operator_queue(&op.operator_id).len(),
        })
        .collect();
    UiState {
        operators,
        general_queue: snap.general_queue().len(),
        called: snap.called_leads().len(),
        call_records: snap.call_records().len(),
        missing_collections: snap
            .missing_collections()
            .iter()
            .map(|c| c.to_string())
            .collect(),
    }
}

fn print_summary(engine: &DeskEngine, store: &DeskStore) -> Result<()> {
    let snap = engine.snapshot();

    println!("=== DESK SUMMARY ===");
    println!("  operators:     {}", snap.operators().len());
    println!("  general queue: {}", snap.general_queue().len());
    println!("  called:        {}", snap.called_leads().len());
    println!("  call records:  {}", snap.call_records().len());
    for op in snap.operators() {
        println!(
            "  {:<12} {:<7} {:<8} queue: {}",
            op.operator_id,
            op.role.as_str(),
            op.availability.as_str(),
            snap.operator_queue(&op.operator_id).len()
        );
    }
    if !snap.missing_collections().is_empty() {
        let names: Vec<String> = snap
            .missing_collections()
            .iter()
            .map(|c| c.to_string())
            .collect();
        println!("  MISSING collections: {}", names.join(", "));
    }

    println!();
    println!("=== ACTIVITY (last 10) ===");
    let entries = store.activity_entries()?;
    for entry in entries.iter().rev().take(10).collect::<Vec<_>>().iter().rev() {
        println!("  {} {:<20} {}", entry.created_at, entry.event_type, entry.actor);
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
