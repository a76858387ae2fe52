use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use uuid::Uuid;

use dealer_authz::authz::{PermissionRules, Resolver, SqliteStore};
use dealer_authz::config::load_env;
use dealer_authz::db::{self, MIGRATOR};
use dealer_authz::models::permission::ModuleId;

#[derive(Parser, Debug)]
#[command(author, version, about = "dealer-authz maintenance tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Load a prerequisite rules file and report problems such as cycles
    CheckRules {
        /// Defaults to the rules built into the binary
        path: Option<PathBuf>,
    },
    /// Resolve one permission against the current database
    Resolve {
        #[arg(long)]
        dealer: i64,
        /// Role id; repeat for several roles
        #[arg(long = "role")]
        roles: Vec<Uuid>,
        #[arg(long)]
        module: ModuleId,
        #[arg(long)]
        permission: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            MIGRATOR.run(&pool).await.context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            print_status(&pool).await?;
        }
        Commands::CheckRules { path } => {
            let rules = match &path {
                Some(path) => PermissionRules::load(path)?,
                None => PermissionRules::builtin()?,
            };
            let source = path.map(|p| p.display().to_string()).unwrap_or_else(|| "built-in".to_string());
            println!("{source}: {} permissions, no prerequisite cycles", rules.len());
            for perm in rules.sort_permissions(rules.known_permissions()) {
                let requires: Vec<String> = rules.get_prerequisites(&perm).iter().map(ToString::to_string).collect();
                if requires.is_empty() {
                    println!("  {perm}");
                } else {
                    println!("  {perm} <- {}", requires.join(", "));
                }
            }
        }
        Commands::Resolve { dealer, roles, module, permission } => {
            let pool = get_pool().await?;
            let resolver = Resolver::new(Arc::new(SqliteStore::new(pool)));

            let roles: BTreeSet<Uuid> = roles.into_iter().collect();
            let decision = resolver.resolve(dealer, &roles, &module, &permission).await?;
            println!("{}", serde_json::to_string(&decision)?);
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    db::connect(&database_url).await
}

async fn print_status(pool: &SqlitePool) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let has_table = sqlx::query_scalar::<_, String>(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'",
    )
    .fetch_optional(pool)
    .await?
    .is_some();

    let applied_versions: HashSet<i64> = if has_table {
        sqlx::query_scalar::<_, i64>("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in MIGRATOR.iter() {
        let version = migration.version;
        let status = if applied_versions.contains(&version) { "applied" } else { "pending" };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, version, name);
    }

    Ok(())
}
