use crate::{
    cli::args::{DotArgs, LintArgs, OutputFormat, StatusArgs, ValidateArgs},
    core::{
        config::ConfigLoader,
        error::{DefaultErrorReporter, ErrorReporter},
        execution::{redaction::redact_value, FileTaskStore, RequestReport, TaskStore},
        graph::{
            dot::{graph_to_dot, traversal_to_dot},
            lint::{LintRegistry, LintSeverity},
            schema::load_datasets,
            DatasetGraph, Traversal,
        },
        AppError,
    },
    Result,
};
use anyhow::{anyhow, Context};
use serde_json::{json, Map, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

fn workspace_or_cwd(workspace: Option<PathBuf>) -> Result<PathBuf> {
    match workspace {
        Some(path) => Ok(path),
        None => env::current_dir().context("failed to resolve current directory"),
    }
}

/// Parse repeated `key=value` identity flags into a seed map.
fn parse_identity(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut seed = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("identity '{}' must be written as key=value", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("identity '{}' has an empty key", pair));
        }
        seed.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(seed)
}

/// Report a structured error on stderr, then hand it back for the exit code.
fn reported(err: AppError) -> anyhow::Error {
    DefaultErrorReporter::new().report_error(&err);
    anyhow::Error::new(err)
}

fn build_graph(datasets: &Path) -> Result<Arc<DatasetGraph>> {
    let loaded = load_datasets(datasets).map_err(reported)?;
    let graph = DatasetGraph::new(&loaded).map_err(reported)?;
    Ok(Arc::new(graph))
}

pub async fn validate(args: ValidateArgs) -> Result<()> {
    tracing::info!(datasets = %args.datasets.display(), "validating dataset graph");
    let workspace = workspace_or_cwd(args.workspace)?;
    ConfigLoader::load_from_workspace(&workspace).map_err(reported)?;

    let graph = build_graph(&args.datasets)?;
    let mut seed = parse_identity(&args.identity)?;
    if seed.is_empty() {
        // Seed every declared identity so the whole graph is exercised.
        for key in graph.identity_seed_keys() {
            seed.insert(key.clone(), Value::String(format!("<{}>", key)));
        }
    }
    let traversal = Traversal::new(graph.clone(), seed).map_err(reported)?;

    match args.format {
        OutputFormat::Text => {
            println!("Datasets: {}", graph.dataset_names().join(", "));
            println!("Graph hash: {}", graph.hash);
            println!("Visit order:");
            for (index, address) in traversal.visit_order().iter().enumerate() {
                println!("  {:>3}. {}", index + 1, address);
            }
            println!("Terminal collections:");
            for address in traversal.end_nodes() {
                println!("  - {}", address);
            }
        }
        OutputFormat::Json => {
            let payload = json!({
                "datasets": graph.dataset_names(),
                "hash": graph.hash,
                "visit_order": traversal.visit_order().iter().map(|a| a.to_string()).collect::<Vec<_>>(),
                "end_nodes": traversal.end_nodes().iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
    }
    Ok(())
}

pub async fn lint(args: LintArgs) -> Result<()> {
    let datasets = load_datasets(&args.datasets).map_err(reported)?;
    let results = LintRegistry::new().run(&datasets);

    match args.format {
        OutputFormat::Text => {
            if results.is_empty() {
                println!("No lint findings");
            }
            for result in &results {
                let location = result.location.as_deref().unwrap_or("-");
                println!(
                    "[{}] {} {}: {}",
                    result.severity, result.code, location, result.message
                );
                if let Some(suggestion) = &result.suggestion {
                    println!("    hint: {}", suggestion);
                }
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
    }

    let errors = results
        .iter()
        .filter(|result| result.severity == LintSeverity::Error)
        .count();
    if LintRegistry::has_errors(&results) {
        return Err(anyhow!("lint found {} error(s)", errors));
    }
    Ok(())
}

pub async fn dot(args: DotArgs) -> Result<()> {
    let graph = build_graph(&args.datasets)?;
    let rendered = if args.identity.is_empty() {
        graph_to_dot(&graph)
    } else {
        let seed = parse_identity(&args.identity)?;
        let traversal = Traversal::new(graph, seed).map_err(reported)?;
        traversal_to_dot(&traversal)
    };

    match args.output {
        Some(path) => {
            fs::write(&path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "wrote DOT graph");
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

pub async fn status(args: StatusArgs) -> Result<()> {
    let workspace = workspace_or_cwd(args.workspace)?;
    let config = ConfigLoader::load_from_workspace(&workspace).map_err(reported)?;
    let store = FileTaskStore::new(config.state_dir(&workspace));
    tracing::info!(request_id = %args.request_id, state_dir = %store.state_dir().display(), "reading request state");

    let request = store.load_request(&args.request_id).await.map_err(reported)?;
    let tasks = store.list_tasks(&args.request_id).await.map_err(reported)?;
    let report = RequestReport::new(&request, &tasks);

    match args.format {
        OutputFormat::Text => {
            println!("Request: {}", report.request_id);
            println!("Status: {}", report.status.as_str());
            println!("Policy: {}", request.policy.key);
            if let Some(finished) = request.finished_at {
                println!("Finished: {}", finished);
            }
            for task in &tasks {
                print!("  {:<22} {}", task.status.as_str(), task.id);
                if let Some(error) = &task.error {
                    print!("  [{}] {}", error.code, error.message);
                }
                if let Some(reason) = &task.awaiting_reason {
                    print!("  ({})", reason);
                }
                println!();
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if args.show_data {
        for task in tasks.iter().filter(|task| !task.access_data.is_empty()) {
            let mut rows = Value::Array(task.access_data.clone());
            redact_value(&mut rows, &config.redaction.redact_keys);
            println!("{}:", task.id);
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}
