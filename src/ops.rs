use anyhow::{anyhow, Context, Result};
use colored::*;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use rpassword::read_password;
use std::path::Path;
use std::sync::Arc;

use crate::cli::PlanOperation;
use crate::config::{Binaries, DatabaseConfig, IsolatorConfig};
use crate::executor::{Executor, ProcessExecutor};
use crate::isolator::registry::IsolatorRegistry;
use crate::isolator::{working_database_name, DatabaseIsolator, IsolationError, IsolationId, Step};
use crate::platform;

/// Database and tool settings after merging the config file with CLI flags.
pub struct Target {
    pub database: DatabaseConfig,
    pub binaries: Binaries,
}

pub fn load_target(target: Option<&str>, config_path: Option<&Path>, ask_password: bool) -> Result<Target> {
    let file = IsolatorConfig::discover(config_path)?;
    let mut database = match target {
        Some(t) => DatabaseConfig::from_url(t)?,
        None => file
            .database()?
            .ok_or_else(|| anyhow!("no target given; pass --target, set ISOLATOR_TARGET or add \"target\" to the config file"))?,
    };
    if ask_password {
        database.password = Some(prompt_password(&format!(
            "Password for {}@{}: ",
            database.user.as_deref().unwrap_or("(default user)"),
            database.db_name
        ))?);
    }
    Ok(Target { database, binaries: file.binaries })
}

fn registry(target: &Target) -> IsolatorRegistry {
    let executor: Arc<dyn Executor> = Arc::new(ProcessExecutor);
    IsolatorRegistry::with_defaults(executor, &target.binaries)
}

fn select(target: &Target) -> Result<Arc<dyn DatabaseIsolator>> {
    Ok(registry(target).select(&target.database)?)
}

pub fn do_dump(target: &Target, id: &str) -> Result<()> {
    let isolator = select(target)?;
    let id = IsolationId::new(id);
    let working = working_database_name(&target.database.db_name, &id);

    let bar = create_progress_bar(&format!("Copying '{}' to '{}'", target.database.db_name, working));
    let result = isolator.dump(&id, &target.database);
    bar.finish_and_clear();

    if let Err(err) = result {
        report_leftover(&err, &id);
        return Err(err).context(format!("dump of '{}' failed", target.database.db_name));
    }
    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Dumped '{}' into '{}'", target.database.db_name, working).green()
    );
    Ok(())
}

pub fn do_restore(target: &Target, id: &str) -> Result<()> {
    let isolator = select(target)?;
    let id = IsolationId::new(id);
    let working = working_database_name(&target.database.db_name, &id);

    let bar = create_progress_bar(&format!("Restoring '{}' from '{}'", target.database.db_name, working));
    let result = isolator.restore(&id, &target.database);
    bar.finish_and_clear();

    if let Err(err) = result {
        if let IsolationError::CommandFailed { step: Step::VerifyWorking, .. } = &err {
            eprintln!(
                "{} {}",
                "!".yellow().bold(),
                format!("No working database '{}'; was '{}' dumped?", working, id).yellow()
            );
        }
        if let IsolationError::CommandFailed { completed, .. } = &err {
            if completed.contains(&Step::DropOriginal) {
                eprintln!(
                    "{} {}",
                    "!".yellow().bold(),
                    format!("'{}' was already dropped; '{}' still holds the copy, rerun restore once the cause is fixed", target.database.db_name, working).yellow()
                );
            }
        }
        return Err(err).context(format!("restore of '{}' failed", target.database.db_name));
    }
    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Restored '{}'", target.database.db_name).green()
    );
    Ok(())
}

pub fn do_discard(target: &Target, id: &str) -> Result<()> {
    let isolator = select(target)?;
    let id = IsolationId::new(id);
    let working = working_database_name(&target.database.db_name, &id);
    isolator
        .discard(&id, &target.database)
        .with_context(|| format!("failed to drop '{}'", working))?;
    println!("{} {}", "✔".green().bold(), format!("Dropped '{}'", working).green());
    Ok(())
}

pub fn do_plan(target: &Target, operation: PlanOperation, id: &str) -> Result<()> {
    let isolator = select(target)?;
    let id = IsolationId::new(id);
    let plan = match operation {
        PlanOperation::Dump => isolator.dump_plan(&id, &target.database),
        PlanOperation::Restore => isolator.restore_plan(&id, &target.database),
        PlanOperation::Discard => isolator.discard_plan(&id, &target.database),
    };
    for (n, planned) in plan.iter().enumerate() {
        println!("{} {}", format!("{}.", n + 1).cyan().bold(), planned.step.to_string().bold());
        println!("   {}", planned.command);
    }
    Ok(())
}

pub fn do_check(target: &Target) -> Result<()> {
    let os = platform::current_os();
    let registry = registry(target);
    match registry.select_for(&target.database, os) {
        Some(iso) => {
            println!(
                "{} {}",
                "✔".green().bold(),
                format!("'{}' ({}) on {} is handled by the {} isolator", target.database.db_name, target.database.driver, os, iso.name()).green()
            );
            Ok(())
        }
        None => Err(anyhow!(
            "no isolator supports driver '{}' on {}",
            target.database.driver,
            os
        )),
    }
}

pub fn do_name(target: &Target, id: &str) {
    println!("{}", working_database_name(&target.database.db_name, &IsolationId::new(id)));
}

pub fn do_variants() {
    let registry = IsolatorRegistry::with_defaults(Arc::new(ProcessExecutor), &Binaries::default());
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Isolator").add_attribute(Attribute::Bold),
            Cell::new("Drivers").add_attribute(Attribute::Bold),
            Cell::new("Hosts").add_attribute(Attribute::Bold),
        ]);
    for iso in registry.isolators() {
        let drivers: Vec<&str> = iso.supported_drivers().iter().map(|d| d.id()).collect();
        let hosts: Vec<&str> = iso.supported_os().iter().map(|o| o.as_str()).collect();
        table.add_row(vec![
            Cell::new(iso.name()),
            Cell::new(drivers.join(", ")),
            Cell::new(hosts.join(", ")),
        ]);
    }
    println!("{}", table);
    println!("{} {}", "i".yellow().bold(), format!("This host: {}", platform::current_os()).yellow());
}

pub fn do_version() {
    println!("{} {}", "isolator".bold(), env!("CARGO_PKG_VERSION").cyan());
}

// Failed steps are not undone; point at the cleanup command when a working
// database may have been left behind.
fn report_leftover(err: &IsolationError, id: &IsolationId) {
    if let IsolationError::CommandFailed { completed, .. } = err {
        if completed.contains(&Step::CreateWorking) {
            eprintln!(
                "{} {}",
                "!".yellow().bold(),
                format!("A partial working database may remain; run `isolator discard {}` to remove it", id).yellow()
            );
        }
    }
}

fn create_progress_bar(prefix: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style.tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "));
    }
    bar.set_message(prefix.to_string());
    bar.enable_steady_tick(std::time::Duration::from_millis(80));
    bar
}

fn prompt_password(message: &str) -> Result<String> {
    print!("{} {}", "?".cyan().bold(), message.cyan());
    std::io::Write::flush(&mut std::io::stdout())?;
    let password = read_password()?;
    Ok(password)
}
