// FILE: src/cli/handlers.rs
use crate::{
    cli::{block_on, OutputFormat, VarexCli},
    CommandOutcome, Engine, EngineError, JsonFileStore, Resolution, Result, ScopeId, SheetDocument,
};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::json;
use std::path::Path;
use std::rc::Rc;
use std::sync::mpsc::channel;
use std::time::Instant;

fn scope_from(page: Option<String>) -> ScopeId {
    match page {
        Some(page) => ScopeId::page(page),
        None => ScopeId::Global,
    }
}

fn load_engine(input_path: &str, state_file: Option<&str>) -> Result<Engine> {
    let document = SheetDocument::load(input_path)?;
    let engine = Engine::from_document(&document)?;
    Ok(match state_file {
        Some(path) => engine.with_persistence(Rc::new(JsonFileStore::new(path))),
        None => engine,
    })
}

/// Values of the scope's own variables, in declaration order.
fn scope_values(engine: &Engine, scope: &ScopeId) -> Vec<(String, crate::Value)> {
    let Some(state) = engine.scope(scope) else {
        return Vec::new();
    };
    state
        .definitions
        .names()
        .map(|name| {
            let value = state.resolved.get(name).cloned().unwrap_or_default();
            (name.to_string(), value)
        })
        .collect()
}

// --- RESOLVE ---
pub fn handle_resolve_command(cli: &VarexCli, matches: &clap::ArgMatches) -> Result<()> {
    let input_path = matches.get_one::<String>("input").unwrap();
    let scope = scope_from(cli.page(matches));
    let format = cli.output_format(matches)?;
    let state_file = cli.state_file(matches);

    if matches.get_flag("watch") {
        watch_and_resolve(input_path, &scope, format, state_file.as_deref())
    } else {
        resolve_once(input_path, &scope, format, state_file.as_deref())
    }
}

fn resolve_once(input_path: &str, scope: &ScopeId, format: OutputFormat, state_file: Option<&str>) -> Result<()> {
    let start = Instant::now();
    let mut engine = load_engine(input_path, state_file)?;
    let resolution = block_on(engine.load_scope(scope))??;
    print_resolution(&engine, scope, &resolution, format, start)
}

fn print_resolution(
    engine: &Engine,
    scope: &ScopeId,
    resolution: &Resolution,
    format: OutputFormat,
    start: Instant,
) -> Result<()> {
    let values = scope_values(engine, scope);
    match format {
        OutputFormat::Json => {
            let report = json!({
                "scope": scope.storage_key(),
                "values": values
                    .iter()
                    .map(|(name, value)| (name.clone(), serde_json::to_value(value).unwrap_or_default()))
                    .collect::<serde_json::Map<String, serde_json::Value>>(),
                "order": resolution.order,
                "broken_edges": resolution
                    .broken_edges
                    .iter()
                    .map(|edge| json!({ "from": edge.from, "to": edge.to }))
                    .collect::<Vec<_>>(),
                "diagnostics": resolution
                    .diagnostics
                    .iter()
                    .map(|d| json!({ "variable": d.variable, "message": d.message }))
                    .collect::<Vec<_>>(),
            });
            let text = serde_json::to_string_pretty(&report).map_err(|e| EngineError::InvalidFormat {
                message: format!("JSON serialization error: {}", e),
            })?;
            println!("{}", text);
        }
        OutputFormat::Text => {
            println!("📋 {} ({} variables, {:.2}ms)", scope, values.len(), start.elapsed().as_secs_f64() * 1000.0);
            for (name, value) in &values {
                println!("   {} = {}", name, value.to_canonical_text());
            }
            for edge in &resolution.broken_edges {
                println!("⚠️  Cycle broken at {}", edge);
            }
            for diagnostic in &resolution.diagnostics {
                println!("❌ {}", diagnostic);
            }
        }
    }
    Ok(())
}

fn watch_and_resolve(input_path: &str, scope: &ScopeId, format: OutputFormat, state_file: Option<&str>) -> Result<()> {
    println!("👀 Watching {} for changes...", input_path);

    let (tx, rx) = channel();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                if let Err(e) = tx.send(event) {
                    eprintln!("Watch error: {}", e);
                }
            }
        },
        notify::Config::default(),
    )
    .map_err(|e| {
        EngineError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to create file watcher: {}", e),
        ))
    })?;

    watcher
        .watch(Path::new(input_path), RecursiveMode::NonRecursive)
        .map_err(|e| {
            EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to watch file: {}", e),
            ))
        })?;

    if let Err(e) = resolve_once(input_path, scope, format, state_file) {
        eprintln!("❌ Initial resolution failed: {}", e);
    }

    loop {
        match rx.recv() {
            Ok(event) => {
                if !event.kind.is_modify() && !event.kind.is_create() {
                    continue;
                }
                println!("🔄 Sheet changed, resolving again...");
                if let Err(e) = resolve_once(input_path, scope, format, state_file) {
                    eprintln!("❌ Resolution failed: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Watch error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

// --- RUN ---
pub fn handle_run_command(cli: &VarexCli, matches: &clap::ArgMatches) -> Result<()> {
    let input_path = matches.get_one::<String>("input").unwrap();
    let scope = scope_from(cli.page(matches));
    let format = cli.output_format(matches)?;
    let state_file = cli.state_file(matches);

    let mut engine = load_engine(input_path, state_file.as_deref())?;
    let outcome = block_on(run_script(&mut engine, &scope, matches))??;

    print_outcome(&engine, &scope, &outcome, format)?;
    match outcome.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn run_script(engine: &mut Engine, scope: &ScopeId, matches: &clap::ArgMatches) -> Result<CommandOutcome> {
    engine.load_scope(scope).await?;
    match (matches.get_one::<String>("command"), matches.get_one::<String>("script")) {
        (Some(name), _) => engine.run_named_command(scope, name).await,
        (None, Some(script)) => engine.run_command(scope, script).await,
        (None, None) => Err(EngineError::InvalidFormat {
            message: "Either --command or --script is required".to_string(),
        }),
    }
}

fn print_outcome(engine: &Engine, scope: &ScopeId, outcome: &CommandOutcome, format: OutputFormat) -> Result<()> {
    let current = |name: &str| engine.value(scope, name).cloned().unwrap_or_default();
    match format {
        OutputFormat::Json => {
            let report = json!({
                "scope": scope.storage_key(),
                "value": outcome.value,
                "error": outcome.error.as_ref().map(ToString::to_string),
                "modified": outcome.modified,
                "recomputed": outcome
                    .recomputed
                    .iter()
                    .map(|name| (name.clone(), serde_json::to_value(current(name)).unwrap_or_default()))
                    .collect::<serde_json::Map<String, serde_json::Value>>(),
                "refreshed": outcome
                    .refreshed
                    .iter()
                    .map(|(page, name)| {
                        let value = engine.value(page, name).cloned().unwrap_or_default();
                        json!({ "scope": page.storage_key(), "name": name, "value": value })
                    })
                    .collect::<Vec<_>>(),
                "diagnostics": outcome.diagnostics.iter().map(ToString::to_string).collect::<Vec<_>>(),
            });
            let text = serde_json::to_string_pretty(&report).map_err(|e| EngineError::InvalidFormat {
                message: format!("JSON serialization error: {}", e),
            })?;
            println!("{}", text);
        }
        OutputFormat::Text => {
            match &outcome.error {
                None => println!("✅ Command completed in {}", scope),
                Some(e) => println!("❌ Command failed in {}: {}", scope, e),
            }
            if let Some(value) = &outcome.value {
                if !value.is_null() {
                    println!("   Result: {}", value.to_canonical_text());
                }
            }
            for name in &outcome.modified {
                println!("   ✏️  {} = {}", name, current(name).to_canonical_text());
            }
            for name in outcome.recomputed.iter().filter(|n| !outcome.modified.contains(*n)) {
                println!("   🔄 {} = {}", name, current(name).to_canonical_text());
            }
            for (page, name) in &outcome.refreshed {
                let value = engine.value(page, name).cloned().unwrap_or_default();
                println!("   🔄 {} {} = {}", page, name, value.to_canonical_text());
            }
            for diagnostic in &outcome.diagnostics {
                println!("   ⚠️  {}", diagnostic);
            }
        }
    }
    Ok(())
}

// --- GRAPH ---
pub fn handle_graph_command(cli: &VarexCli, matches: &clap::ArgMatches) -> Result<()> {
    let input_path = matches.get_one::<String>("input").unwrap();
    let scope = scope_from(cli.page(matches));
    let engine = load_engine(input_path, None)?;

    let graph = engine.graph(&scope)?;
    let schedule = engine.schedule(&scope)?;

    println!("🔗 Dependency graph for {} ({} variables, {} edges)", scope, graph.nodes().len(), graph.edge_count());
    for name in graph.nodes() {
        let dependencies: Vec<&str> = graph.dependencies(name).map(String::as_str).collect();
        let namespaces: Vec<&str> = graph.namespaces_of(name).map(String::as_str).collect();
        let mut line = format!("   {}", name);
        if !dependencies.is_empty() {
            line.push_str(&format!(" <- {}", dependencies.join(", ")));
        }
        if !namespaces.is_empty() {
            line.push_str(&format!(" [uses {}]", namespaces.join(", ")));
        }
        println!("{}", line);
    }

    println!("\n📋 Evaluation order:");
    println!("   {}", schedule.order.join(" -> "));
    for edge in &schedule.broken_edges {
        println!("⚠️  Cycle broken at {}", edge);
    }
    Ok(())
}

// --- CHECK ---
pub fn handle_check_command(matches: &clap::ArgMatches) -> Result<()> {
    let input_path = matches.get_one::<String>("input").unwrap();
    let recursive = matches.get_flag("recursive");

    if Path::new(input_path).is_dir() {
        check_directory(input_path, recursive)
    } else {
        check_single_file(input_path)
    }
}

fn check_single_file(input_path: &str) -> Result<()> {
    println!("🔍 Checking {}", input_path);
    let engine = match load_engine(input_path, None) {
        Ok(engine) => engine,
        Err(e) => {
            println!("❌ {} - {}", input_path, e);
            return Err(e);
        }
    };

    let failures = engine.check();
    if failures.is_empty() {
        println!("✅ {} - No issues found", input_path);
        return Ok(());
    }
    for (location, error) in &failures {
        println!("❌ {} - {}: {}", input_path, location, error);
    }
    Err(EngineError::InvalidFormat {
        message: format!("{} expression(s) failed to parse", failures.len()),
    })
}

fn is_sheet_file(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("toml") | Some("json"))
}

fn check_directory(dir_path: &str, recursive: bool) -> Result<()> {
    let mut total_files = 0;
    let mut error_files = 0;

    let walker = walkdir::WalkDir::new(dir_path).max_depth(if recursive { usize::MAX } else { 1 });
    for entry in walker {
        let entry = entry.map_err(|e| {
            EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Directory traversal error: {}", e),
            ))
        })?;
        if entry.file_type().is_file() && is_sheet_file(entry.path()) {
            total_files += 1;
            if check_single_file(&entry.path().to_string_lossy()).is_err() {
                error_files += 1;
            }
        }
    }

    println!("\n📊 Check Summary:");
    println!("   Total files: {}", total_files);
    println!("   Files with errors: {}", error_files);
    if total_files > 0 {
        println!(
            "   Success rate: {:.1}%",
            (total_files - error_files) as f64 / total_files as f64 * 100.0
        );
    }

    if error_files > 0 {
        Err(EngineError::InvalidFormat {
            message: format!("{} files have errors", error_files),
        })
    } else {
        Ok(())
    }
}
