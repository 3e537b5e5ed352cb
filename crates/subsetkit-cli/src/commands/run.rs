//! The only thing this CLI does: copy a referentially consistent subset of
//! `source_url` into `target_url` per the flags in [`crate::args::Cli`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use comfy_table::{presets::UTF8_FULL, Table};
use indicatif::{ProgressBar, ProgressStyle};

use subsetkit_core::config::SubsetConfig;
use subsetkit_core::connect;
use subsetkit_core::coordinator::{parse_force_directive, Coordinator, CoordinatorConfig};
use subsetkit_core::error::SubsetError;
use subsetkit_core::event::{EventBus, WebhookSubscriber};
use subsetkit_core::propagator::{CopyState, Propagator};
use subsetkit_core::schema::introspect::{build_schema_model, ModelOptions};
use subsetkit_core::RunSummary;

use crate::args::{Cli, ImportDescriptor};

/// Run the copy end to end and return the process exit code (§6 Exit
/// codes): 0 on success, a distinct nonzero code per fatal error kind.
pub async fn run(cli: &Cli) -> i32 {
    match try_run(cli).await {
        Ok(summary) => {
            print_summary(&summary);
            if summary.interrupted {
                eprintln!("Interrupted: pending buffers flushed, sequences not advanced.");
                130
            } else {
                0
            }
        }
        Err(err) => {
            eprintln!("Error: {err}");
            exit_code_for(&err)
        }
    }
}

async fn try_run(cli: &Cli) -> Result<RunSummary, SubsetError> {
    if !(cli.fraction > 0.0 && cli.fraction <= 1.0) {
        return Err(SubsetError::Config {
            message: format!("fraction must be in (0, 1], got {}", cli.fraction),
        });
    }

    let config = match &cli.config {
        Some(path) => Some(SubsetConfig::read(path)?),
        None => None,
    };

    let forced = cli
        .force
        .iter()
        .map(|raw| parse_force_directive(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}").unwrap());
    pb.set_message("Connecting to source and target...");
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let source = connect::connect(&cli.source_url).await?;
    let target = connect::connect(&cli.target_url).await?;

    pb.set_message("Introspecting source schema...");
    let model_opts = ModelOptions {
        schemas: cli.schemas.clone(),
        table_patterns: cli.tables.clone(),
        exclude_patterns: cli.exclude_tables.clone(),
        full_tables: cli.full_tables.clone(),
        fraction: cli.fraction,
        logarithmic: cli.logarithmic,
        config,
    };
    let schema = build_schema_model(source.as_ref(), &model_opts).await?;
    pb.finish_with_message(format!(
        "Introspected {} table(s), {} foreign key(s).",
        schema.table_count(),
        schema.foreign_key_count()
    ));

    let mut events = EventBus::new();
    if let Some(path) = &cli.import {
        let descriptor = read_import_descriptor(path)?;
        events.subscribe(Box::new(WebhookSubscriber::new(
            descriptor.webhook_url,
            tokio::runtime::Handle::current(),
        )));
    }

    let config = CoordinatorConfig {
        children_cap: cli.children,
        depth_budget: cli.depth,
        flush_size: cli.effective_buffer_size(),
        batch_cap: cli.batch_cap,
    };
    let propagator = Propagator {
        source: source.as_ref(),
        target: target.as_ref(),
        schema: &schema,
        children_cap: config.children_cap,
        flush_size: config.flush_size,
        events: &events,
    };
    let coordinator = Coordinator::new(&schema, propagator, config);

    let interrupted = Arc::new(AtomicBool::new(false));
    let signal_flag = interrupted.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_flag.store(true, Ordering::Relaxed);
        }
    });

    let mut state = CopyState::new();
    let progress = ProgressBar::new_spinner();
    progress.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}").unwrap());
    progress.set_message("Copying rows...");
    progress.enable_steady_tick(std::time::Duration::from_millis(100));

    let summary = coordinator.run(&mut state, &forced, &cli.full_tables, &interrupted).await?;
    progress.finish_with_message("Copy complete.");
    Ok(summary)
}

fn read_import_descriptor(path: &Path) -> Result<ImportDescriptor, SubsetError> {
    let text = std::fs::read_to_string(path).map_err(|e| SubsetError::Config {
        message: format!("failed to read --import file {}: {e}", path.display()),
    })?;
    serde_json::from_str(&text).map_err(|e| SubsetError::Config {
        message: format!("failed to parse --import file {}: {e}", path.display()),
    })
}

fn print_summary(summary: &RunSummary) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Table", "Copied", "Target", "Source"]);
    for t in &summary.tables {
        table.add_row(vec![
            t.table.clone(),
            t.copied.to_string(),
            t.target.to_string(),
            t.source.to_string(),
        ]);
    }
    println!("{table}");
}

fn exit_code_for(err: &SubsetError) -> i32 {
    match err {
        SubsetError::Connection { .. } => 2,
        SubsetError::Introspection { .. } | SubsetError::SchemaMismatch { .. } => 3,
        SubsetError::Config { .. }
        | SubsetError::NoDatabaseUrl { .. }
        | SubsetError::UnsupportedDatabase { .. }
        | SubsetError::UnknownTable { .. }
        | SubsetError::CompositeForceUnsupported { .. }
        | SubsetError::PatternMatchedNothing { .. }
        | SubsetError::PrioritizedAndExcluded { .. }
        | SubsetError::ReferencedTableHasNoPrimaryKey { .. } => 4,
        SubsetError::ForcedRowNotFound { .. } => 5,
        SubsetError::InsertFailed { .. } | SubsetError::Other(_) => 1,
    }
}
