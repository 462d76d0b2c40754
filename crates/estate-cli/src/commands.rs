use colored::Colorize;
use estate_types::EntityState;

use crate::backend::{self, EntityBackend};
use crate::cli::*;
use crate::config::EstateConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    if let Command::HashPassword(args) = &cli.command {
        println!("{}", estate_docdb::hash_password(&args.password));
        return Ok(());
    }

    let config = EstateConfig::load(&cli.config)?;
    let store = backend::open(&config)?;
    let result = match cli.command {
        Command::Get(args) => cmd_get(&*store, args, cli.format),
        Command::List(args) => cmd_list(&*store, args, cli.format),
        Command::Remove(args) => cmd_remove(&*store, args),
        Command::Stats => cmd_stats(&*store, &config, cli.format),
        Command::Backup(args) => cmd_backup(&*store, args),
        Command::Restore(args) => cmd_restore(&*store, args),
        Command::Migrate(args) => cmd_migrate(&*store, args),
        Command::HashPassword(_) => Ok(()),
    };
    let shutdown = store.shutdown();
    result?;
    Ok(shutdown?)
}

fn cmd_get(store: &dyn EntityBackend, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let state = backend::load(store, &args.reference)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state)?),
        OutputFormat::Text => print_state(&state),
    }
    Ok(())
}

fn print_state(state: &EntityState) {
    println!("{} {}", state.identity.as_str().yellow().bold(), state.entity_type.cyan());
    println!("  Version: {}", state.version.as_str());
    println!("  Modified: {}", state.last_modified.to_rfc3339().dimmed());
    for (name, value) in &state.properties {
        println!("  {name} = {value}");
    }
    for (name, target) in &state.associations {
        match target {
            Some(target) => println!("  {name} -> {}", target.as_str().blue()),
            None => println!("  {name} -> {}", "(unset)".dimmed()),
        }
    }
    for (name, targets) in &state.many_associations {
        let targets: Vec<_> = targets.iter().map(|t| t.as_str()).collect();
        println!("  {name} -> [{}]", targets.join(", ").blue());
    }
    for (name, targets) in &state.named_associations {
        for (key, target) in targets {
            println!("  {name}[{key}] -> {}", target.as_str().blue());
        }
    }
}

fn cmd_list(store: &dyn EntityBackend, args: ListArgs, format: OutputFormat) -> anyhow::Result<()> {
    let states = backend::list(store, args.entity_type.as_deref(), args.limit)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&states)?),
        OutputFormat::Text => {
            if states.is_empty() {
                println!("No entities.");
            }
            for state in &states {
                println!(
                    "{}  {}  {}",
                    state.identity.as_str().yellow(),
                    state.entity_type.cyan(),
                    format!("v{}", state.version.as_str()).dimmed()
                );
            }
        }
    }
    Ok(())
}

fn cmd_remove(store: &dyn EntityBackend, args: RemoveArgs) -> anyhow::Result<()> {
    if backend::remove(store, &args.reference)? {
        println!("{} Removed {}", "✓".green().bold(), args.reference.yellow());
    } else {
        println!("{} was not stored", args.reference.yellow());
    }
    Ok(())
}

fn cmd_stats(store: &dyn EntityBackend, config: &EstateConfig, format: OutputFormat) -> anyhow::Result<()> {
    let stats = backend::stats(store)?;
    match format {
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "backend": config.backend.kind(),
                "total": stats.total,
                "corrupt": stats.corrupt,
                "byType": stats.by_type,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Text => {
            println!("Backend: {}", config.backend.kind().bold());
            println!("Entities: {}", stats.total.to_string().bold());
            for (entity_type, count) in &stats.by_type {
                println!("  {}: {count}", entity_type.cyan());
            }
            if stats.corrupt > 0 {
                println!("{} {} undecodable records", "!".red().bold(), stats.corrupt);
            }
        }
    }
    Ok(())
}

fn cmd_backup(store: &dyn EntityBackend, args: BackupArgs) -> anyhow::Result<()> {
    let written = backend::backup_to_file(store, &args.output)?;
    println!(
        "{} Backed up {} entities to {}",
        "✓".green().bold(),
        written.to_string().bold(),
        args.output.display()
    );
    Ok(())
}

fn cmd_restore(store: &dyn EntityBackend, args: RestoreArgs) -> anyhow::Result<()> {
    let restored = backend::restore_from_file(store, &args.input)?;
    println!(
        "{} Restored {} entities from {}",
        "✓".green().bold(),
        restored.to_string().bold(),
        args.input.display()
    );
    Ok(())
}

fn cmd_migrate(store: &dyn EntityBackend, args: MigrateArgs) -> anyhow::Result<()> {
    let target_config = EstateConfig::load(&args.to)?;
    let target = backend::open(&target_config)?;
    let result = backend::migrate_into(store, &*target);
    let shutdown = target.shutdown();
    let migrated = result?;
    shutdown?;
    println!(
        "{} Migrated {} entities into the {} backend",
        "✓".green().bold(),
        migrated.to_string().bold(),
        target_config.backend.kind().yellow()
    );
    Ok(())
}
