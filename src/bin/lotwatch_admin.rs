//! lotwatch_admin - manage plate permissions and inspect the lot database

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use lotwatch::storage::{SqlitePermissionStore, DEMO_PERMISSIONS};
use lotwatch::SpotLabel;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the lot database.
    #[arg(long, env = "LOTWATCH_DB_PATH", default_value = "parking.db")]
    db_path: String,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto)]
    ui: ui::UiMode,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the schema and the parking spot rows.
    Init {
        /// Spot labels to create, one letter each.
        #[arg(long, default_value = "ABCDEFGH")]
        spots: String,
        /// Also register the demo plates.
        #[arg(long)]
        demo: bool,
    },
    /// Register a plate, or update its permission.
    Grant {
        plate: String,
        /// Register the plate as not allowed.
        #[arg(long)]
        deny: bool,
        /// Path to the cropped plate image.
        #[arg(long, default_value = "")]
        image: String,
    },
    /// Withdraw a plate's permission.
    Revoke { plate: String },
    /// Show permissions and spot occupancy.
    Status,
    /// Show the most recent events.
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(args.ui);

    let mut store = {
        let _stage = ui.stage("Open database");
        SqlitePermissionStore::open(&args.db_path)?
    };

    match args.command {
        Command::Init { spots, demo } => {
            let labels = spots
                .chars()
                .filter(|c| !c.is_whitespace() && *c != ',')
                .map(SpotLabel::new)
                .collect::<Result<Vec<_>>>()?;
            {
                let mut stage = ui.stage("Create parking spots");
                store.ensure_spots(labels.iter().copied())?;
                stage.detail(format!("{} spots", labels.len()));
            }
            if demo {
                let _stage = ui.stage("Register demo plates");
                for (plate, allowed) in DEMO_PERMISSIONS {
                    store.grant(plate, allowed, &format!("registration/{plate}.png"))?;
                }
            }
            println!("database ready at {}", args.db_path);
        }
        Command::Grant { plate, deny, image } => {
            store.grant(&plate, !deny, &image)?;
            println!(
                "{} {}",
                plate.trim(),
                if deny { "registered (not allowed)" } else { "allowed" }
            );
        }
        Command::Revoke { plate } => {
            if !store.revoke(&plate)? {
                return Err(anyhow!("plate {} is not registered", plate.trim()));
            }
            println!("{} revoked", plate.trim());
        }
        Command::Status => {
            let (permissions, spots) = {
                let _stage = ui.stage("Read lot status");
                (store.permissions()?, store.spot_statuses()?)
            };
            println!("permissions:");
            for p in &permissions {
                let state = if p.allowed { "allowed" } else { "denied" };
                println!("  {:<12} {:<8} {}", p.plate, state, p.image_path);
            }
            println!("spots:");
            for s in &spots {
                println!("  {}  {}", s.label, s.plate.as_deref().unwrap_or("-"));
            }
        }
        Command::Events { limit } => {
            for e in store.recent_events(limit)?.iter().rev() {
                println!("{}  {:<20} {}", e.timestamp, e.kind, e.description);
            }
        }
    }
    Ok(())
}
