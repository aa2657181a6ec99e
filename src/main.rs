//! Binary entrypoint for the itemforge CLI.
//!
//! Commands:
//! - `init` - write a starter `itemforge.toml`
//! - `decode <template> (--hex <HEX> | --file <path>)` - decode one blob
//! - `inspect --owner <id> --slot <n>` - decode a stored item and show its owner
//! - `report <template>` - ownership and quantity report for a template
//! - `compare --owner <id> --slot-a <n> --slot-b <n>` - diff two stored items
//! - `plan --owner <id> --slot <n> --player <idx>` - dry-run a duplication and print the console script
//!
//! See the library crate docs for module-level details: `itemforge::`.
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use itemforge::audit::{ItemCatalog, ItemReport};
use itemforge::blob;
use itemforge::config::Config;
use itemforge::dupe::{CommandChannel, Destination, Duplicator, ScriptChannel};
use itemforge::model::{diff, PropertyModel};
use itemforge::schema::PropertySchema;
use itemforge::snapshot::{InventoryType, OwnershipResolver, SnapshotDb};

#[derive(Parser)]
#[command(name = "itemforge")]
#[command(about = "Audit and duplicate items stored in a game server persistence snapshot")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "itemforge.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Decode a single item blob
    Decode {
        /// Template id the blob belongs to
        template: u32,
        /// Blob as hex (whitespace ignored)
        #[arg(long, conflicts_with = "file")]
        hex: Option<String>,
        /// File holding the raw blob bytes
        #[arg(long)]
        file: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Decode a stored item and resolve its owner
    Inspect {
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        slot: i64,
        /// Inventory type code (0 backpack, 1 equipment, 2 hotbar, 4 container)
        #[arg(long, default_value_t = 0)]
        inv_type: i64,
        #[arg(long)]
        json: bool,
    },
    /// Ownership and quantity report for one template
    Report {
        template: u32,
        #[arg(long)]
        json: bool,
    },
    /// Compare two stored items property by property
    Compare {
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        slot_a: i64,
        #[arg(long)]
        slot_b: i64,
        #[arg(long, default_value_t = 0)]
        inv_type: i64,
    },
    /// Dry-run a duplication and print the console commands it would send
    Plan {
        /// Owner of the source item
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        slot: i64,
        #[arg(long, default_value_t = 0)]
        inv_type: i64,
        /// Console index of the receiving player
        #[arg(long)]
        player: u32,
        /// Character id of the receiving player (defaults to the source owner)
        #[arg(long)]
        to: Option<i64>,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        Config::create_default(&cli.config).await?;
        info!("Configuration file created at {}", cli.config);
        return Ok(());
    }

    let pre_config = Config::load(&cli.config).await.ok();
    init_logging(&pre_config, cli.verbose);
    let config = match pre_config {
        Some(config) => config,
        None => {
            warn!("No usable config at {}; using defaults", cli.config);
            Config::default()
        }
    };
    let schema = config.schema()?;

    match cli.command {
        Commands::Init => {}
        Commands::Decode {
            template,
            hex,
            file,
            json,
        } => {
            let bytes = match (hex, file) {
                (Some(text), _) => {
                    let cleaned: String = text.split_whitespace().collect();
                    hex::decode(cleaned).map_err(|e| anyhow!("Invalid hex input: {}", e))?
                }
                (None, Some(path)) => tokio::fs::read(&path)
                    .await
                    .map_err(|e| anyhow!("Failed to read blob file {}: {}", path, e))?,
                (None, None) => return Err(anyhow!("Provide --hex or --file")),
            };
            let model = blob::decode(&bytes, template)?;
            print_model(&model, &schema, json)?;
        }
        Commands::Inspect {
            owner,
            slot,
            inv_type,
            json,
        } => {
            let db = open_snapshot(&config)?;
            let inventory = InventoryType::from_code(inv_type);
            let row = db
                .item(owner, slot, inventory)?
                .ok_or_else(|| anyhow!("No item at owner {} slot {} type {}", owner, slot, inv_type))?;
            let ownership = OwnershipResolver::new(&db).resolve(owner, inventory)?;
            let model = blob::decode(&row.data, row.template_id)?;
            if json {
                let payload = serde_json::json!({
                    "item": row,
                    "ownership": ownership,
                    "model": model,
                    "properties": model.resolve(&schema),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "Item {} of owner {} ({:?}): template {}, owned by {}",
                    slot,
                    owner,
                    inventory,
                    row.template_id,
                    ownership.group_label()
                );
                print_model(&model, &schema, false)?;
            }
        }
        Commands::Report { template, json } => {
            let db = open_snapshot(&config)?;
            let rows = db.items_by_template(template)?;
            let mut report = ItemReport::build(template, &rows, &db)?;
            if let Some(path) = &config.snapshot.item_table {
                match ItemCatalog::load(path) {
                    Ok(catalog) => report = report.with_catalog(&catalog),
                    Err(e) => warn!("Could not load item table {}: {}", path, e),
                }
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.is_empty() && report.skipped == 0 {
                println!("No items found for template {}", template);
            } else {
                println!("{}", report);
            }
        }
        Commands::Compare {
            owner,
            slot_a,
            slot_b,
            inv_type,
        } => {
            let db = open_snapshot(&config)?;
            let inventory = InventoryType::from_code(inv_type);
            let load = |slot: i64| -> Result<PropertyModel> {
                let row = db
                    .item(owner, slot, inventory)?
                    .ok_or_else(|| anyhow!("No item at owner {} slot {}", owner, slot))?;
                Ok(blob::decode(&row.data, row.template_id)?)
            };
            let a = load(slot_a)?;
            let b = load(slot_b)?;
            if a.template_id != b.template_id {
                warn!(
                    "Comparing different templates ({} vs {})",
                    a.template_id, b.template_id
                );
            }
            let deltas = diff(&a, &b);
            if deltas.is_empty() {
                println!("Slots {} and {} carry identical properties", slot_a, slot_b);
            }
            for delta in deltas {
                let show = |raw: Option<[u8; 4]>| match raw {
                    Some(raw) => format!("0x{:08X}", u32::from_le_bytes(raw)),
                    None => "-".to_string(),
                };
                println!(
                    "{:>6} {:<24} {:>12} {:>12}",
                    delta.id,
                    schema.label(delta.id).unwrap_or(""),
                    show(delta.left),
                    show(delta.right)
                );
            }
        }
        Commands::Plan {
            owner,
            slot,
            inv_type,
            player,
            to,
            json,
        } => {
            let db = open_snapshot(&config)?;
            let row = db
                .item(owner, slot, InventoryType::from_code(inv_type))?
                .ok_or_else(|| anyhow!("No item at owner {} slot {}", owner, slot))?;
            let model = blob::decode(&row.data, row.template_id)?;

            let receiver = to.unwrap_or(owner);
            let target_slot = db.first_free_slot(receiver, InventoryType::Backpack)?;
            let script = Arc::new(ScriptChannel::new(target_slot));
            let channel: Arc<dyn CommandChannel> = script.clone();

            let mut settings = config.duplication.settings();
            // nothing to wait for when the commands are only printed
            settings.sync_delay = std::time::Duration::ZERO;
            let duplicator = Duplicator::new(channel, Arc::new(schema), settings);
            let job = duplicator
                .duplicate(
                    model,
                    Destination {
                        player_index: player,
                        owner_id: receiver,
                    },
                )
                .await?;

            let commands = script.commands().await;
            if json {
                let lines: Vec<String> = commands.iter().map(|c| c.to_string()).collect();
                let payload = serde_json::json!({
                    "state": job.state.to_string(),
                    "target": job.target,
                    "commands": lines,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                for command in &commands {
                    println!("{}", command);
                }
                info!("Planned {} commands, job {}", commands.len(), job.state);
            }
        }
    }

    Ok(())
}

fn open_snapshot(config: &Config) -> Result<SnapshotDb> {
    SnapshotDb::open(&config.snapshot.db_path)
        .map_err(|e| anyhow!("Failed to open snapshot {}: {}", config.snapshot.db_path, e))
}

fn print_model(model: &PropertyModel, schema: &PropertySchema, json: bool) -> Result<()> {
    let properties = model.resolve(schema);
    if json {
        let payload = serde_json::json!({
            "model": model,
            "properties": properties,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    println!(
        "Template {} v{} [{}] {} / {}",
        model.template_id,
        model.header.version,
        model.category,
        model.header.class_path,
        model.header.instance_name
    );
    for p in &properties {
        println!(
            "  #{:<3} b{} {:>6} {:<24} {}",
            p.order,
            p.block,
            p.id,
            p.label.as_deref().unwrap_or(""),
            p.value
        );
    }
    if let Some(t) = model.truncation() {
        println!(
            "  ! truncated: block {} at offset {} was dropped",
            t.dropped_block, t.offset
        );
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity overrides config
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only when someone is watching
        let is_tty = atty::is(atty::Stream::Stdout);

        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());

            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }

            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
