//! Subcommands that read or clean up the data directory.
//!
//! Command output goes to stdout; logs go to stderr.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use toolshed_core::{CommitSummary, DeletionPlan, ToolName, ToolRecord};
use toolshed_engine::{DependencySummary, StorageSummary};
use toolshed_store::RegistryStore;

use crate::format::{format_runtime, format_runtime_compact, format_size};
use crate::shed::Shed;

// ============================================================================
// usage
// ============================================================================

/// Prints cumulative runtime per tool, most used first.
pub fn usage(shed: &Shed, tool: Option<&ToolName>, json: bool) -> Result<()> {
    let mut records = match tool {
        Some(name) => vec![shed.tool(name)?],
        None => shed.tools()?,
    };
    records.sort_by(|a, b| {
        b.total_runtime
            .cmp(&a.total_runtime)
            .then_with(|| a.name.cmp(&b.name))
    });

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No tools registered.");
        return Ok(());
    }

    println!("{:<20} {:>10} {:>10}  LAST USED", "TOOL", "RUNTIME", "H:MM:SS");
    for record in &records {
        println!(
            "{:<20} {:>10} {:>10}  {}",
            record.name.as_str(),
            format_runtime(record.total_runtime),
            format_runtime_compact(record.total_runtime),
            last_used(record)
        );
    }
    Ok(())
}

fn last_used(record: &ToolRecord) -> String {
    record
        .last_used
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

// ============================================================================
// deps
// ============================================================================

/// Prints one tool's environments, or the whole graph summary.
pub fn deps(shed: &Shed, tool: Option<&ToolName>, init: bool) -> Result<()> {
    if init {
        if shed.init_dependencies()? {
            println!(
                "Wrote default dependencies to {}",
                shed.dependencies.path().display()
            );
        } else {
            println!(
                "{} already exists, left unchanged",
                shed.dependencies.path().display()
            );
        }
    }

    let graph = shed.graph()?;

    if let Some(name) = tool {
        let envs = graph.dependencies_of(name);
        if envs.is_empty() {
            println!("{name} has no shared environment dependencies.");
            return Ok(());
        }
        println!("{name} depends on:");
        for key in envs {
            let env = shed.config.environment(key.clone());
            let others: Vec<String> = graph
                .users_of(&key)
                .into_iter()
                .filter(|user| user != name)
                .map(|user| user.to_string())
                .collect();
            println!(
                "  {:<16} {} (version {})",
                key.as_str(),
                env.description,
                env.version
            );
            if !others.is_empty() {
                println!("  {:<16} also used by {}", "", others.join(", "));
            }
        }
        return Ok(());
    }

    print_dependency_summary(&graph.summary());
    Ok(())
}

fn print_dependency_summary(summary: &DependencySummary) {
    println!(
        "{} tools depend on {} environments",
        summary.tool_count, summary.environment_count
    );
    for (env, count) in &summary.referrers {
        println!("  {:<16} {count} tool(s)", env.as_str());
    }
    if !summary.unreferenced.is_empty() {
        let names: Vec<&str> = summary.unreferenced.iter().map(|e| e.as_str()).collect();
        println!("Unreferenced (reclaimable): {}", names.join(", "));
    }
}

// ============================================================================
// storage
// ============================================================================

/// Prints disk usage of tools and environments.
///
/// With `require`, also checks that many bytes are free on the install
/// volume and fails if they are not.
pub fn storage(shed: &Shed, require: Option<u64>, json: bool) -> Result<()> {
    let tools = shed.tools()?;
    let graph = shed.graph()?;
    let environments = shed.environments(&graph);
    let summary = shed.storage.summary(&tools, &environments);

    if json {
        print_json(&summary)?;
    } else {
        print_storage_summary(&summary);
    }

    if let Some(warning) = shed.storage.low_space_warning(require.unwrap_or(0)) {
        eprintln!(
            "warning: only {} free on {} (threshold {})",
            format_size(warning.free_bytes),
            shed.storage.install_volume().display(),
            format_size(warning.threshold_bytes)
        );
    }

    if let Some(required) = require {
        let check = shed.storage.check_sufficient_space(required);
        if !check.sufficient {
            bail!(
                "not enough space: {} required, {} free",
                format_size(check.required_bytes),
                format_size(check.free_bytes)
            );
        }
        println!(
            "Space check passed: {} required, {} free",
            format_size(check.required_bytes),
            format_size(check.free_bytes)
        );
    }
    Ok(())
}

fn print_storage_summary(summary: &StorageSummary) {
    println!("Tools ({}):", format_size(summary.tools_bytes));
    for item in &summary.tools {
        println!(
            "  {:<20} {:>10}{}",
            item.key.as_str(),
            format_size(item.bytes),
            partial(item.skipped_entries)
        );
    }
    println!("Environments ({}):", format_size(summary.environments_bytes));
    for item in &summary.environments {
        println!(
            "  {:<20} {:>10}{}",
            item.key.as_str(),
            format_size(item.bytes),
            partial(item.skipped_entries)
        );
    }
    println!("Total: {}", format_size(summary.total_bytes()));
    if let Some(largest) = summary.largest_tool() {
        println!("Largest tool: {} ({})", largest.key, format_size(largest.bytes));
    }
    match summary.free_bytes {
        Some(free) => println!("Free space: {}", format_size(free)),
        None => println!("Free space: unknown"),
    }
}

fn partial(skipped: u64) -> String {
    if skipped == 0 {
        String::new()
    } else {
        format!("  ({skipped} unreadable entries skipped)")
    }
}

// ============================================================================
// plan / remove
// ============================================================================

/// Previews deleting `tools` without touching anything.
pub fn plan(shed: &Shed, tools: &[ToolName], json: bool) -> Result<()> {
    let plan = shed.planner().plan(tools)?;
    if json {
        print_json(&plan)
    } else {
        print_plan(&plan);
        Ok(())
    }
}

fn print_plan(plan: &DeletionPlan) {
    let savings = plan.savings();
    println!("Tools to remove:");
    for item in savings.tools() {
        println!(
            "  {:<20} {:>10}  {}",
            item.key.as_str(),
            format_size(item.bytes),
            item.path.display()
        );
    }
    if savings.environments().is_empty() {
        println!("No shared environment becomes unused.");
    } else {
        println!("Environments no longer used by any tool:");
        for item in savings.environments() {
            println!(
            "  {:<20} {:>10}  {}",
            item.key.as_str(),
            format_size(item.bytes),
            item.path.display()
        );
        }
    }
    println!(
        "Space recovered: tools {} + environments {} = {}",
        format_size(savings.tools_bytes()),
        format_size(savings.environments_bytes()),
        format_size(savings.total_bytes())
    );
}

/// Plans, confirms and commits the deletion of `tools`.
pub async fn remove(shed: &Shed, tools: &[ToolName], yes: bool) -> Result<()> {
    let planner = shed.planner();
    let plan = planner.plan(tools)?;
    print_plan(&plan);

    if !yes && !confirm("Proceed with deletion?")? {
        println!("Aborted, nothing deleted.");
        return Ok(());
    }

    let summary = planner.commit(&plan).await?;
    print_commit(&summary);

    if !summary.is_complete() {
        bail!(
            "{} item(s) could not be removed",
            summary.failed_tools.len() + summary.failed_environments.len()
        );
    }
    Ok(())
}

fn print_commit(summary: &CommitSummary) {
    for name in &summary.succeeded_tools {
        println!("removed   {name}");
    }
    for failure in &summary.failed_tools {
        println!("FAILED    {}: {}", failure.key, failure.reason);
    }
    for key in &summary.succeeded_environments {
        println!("removed   environment {key}");
    }
    for failure in &summary.failed_environments {
        println!("FAILED    environment {}: {}", failure.key, failure.reason);
    }
    println!("Space recovered: {}", format_size(summary.recovered_bytes));
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush().context("Failed to flush stdout")?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

// ============================================================================
// reset-usage
// ============================================================================

/// Clears recorded runtime for one tool, or for all with `all`.
pub fn reset_usage(shed: &Shed, tool: Option<&ToolName>, all: bool) -> Result<()> {
    let count = match (tool, all) {
        (Some(name), false) => shed.registry.reset_usage(Some(name))?,
        (None, true) => shed.registry.reset_usage(None)?,
        (Some(_), true) => bail!("give either a tool name or --all, not both"),
        (None, false) => bail!("give a tool name, or --all to reset every tool"),
    };
    println!("Reset usage of {count} tool(s).");
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode JSON")?;
    println!("{text}");
    Ok(())
}
