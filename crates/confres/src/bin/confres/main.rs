mod cli;

use anyhow::Context;
use confres::comparator::ConfigComparator;
use confres::document::Documents;
use confres::evaluator::{ConfigEvaluator, EvaluationResult, StoreResolver};
use confres::hcl_documents::HclDocuments;
use confres::schema::{SchemaRegistry, SharedSchemaRegistry};
use confres::store::ConfigurationStore;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("CONFRES_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Evaluate(evaluate_cli) => evaluate(evaluate_cli),
        cli::Command::Diff(diff_cli) => diff(diff_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

pub fn evaluate(cli: cli::EvaluateCommand) -> anyhow::Result<()> {
    let documents = Documents::new(&load(&cli.input)?)?;
    let defaults = match cli.defaults.is_empty() {
        true => None,
        false => Some(Documents::new(&load_files(&cli.defaults)?).context("Invalid defaults")?),
    };

    let registry = registry(defaults.iter().chain([&documents]));
    let mut store = build_store(&documents);
    if let Some(defaults) = &defaults {
        store = store.with_defaults(build_store(defaults));
    }

    let variables = store.variable_registry(&cli.overrides);
    let resolver = StoreResolver::new(&store, Some(registry.as_ref()));
    let evaluator = ConfigEvaluator::new(&variables, &resolver)
        .with_registry(&registry)
        .with_store(&store);

    let mut rendered: IndexMap<String, EvaluationResult> = IndexMap::new();
    match &cli.kind {
        Some(kind) => {
            let entry = evaluator.entry_for(kind);
            let pid = entry.as_ref().map_or(kind.as_str(), |entry| entry.pid());
            let alias = entry.as_ref().and_then(|entry| entry.alias());
            let element = match &cli.id {
                Some(id) => store.factory_instance(pid, alias, id),
                None => store.singleton(pid, alias),
            };
            let element = element.with_context(|| match &cli.id {
                Some(id) => format!("No configuration {kind} with id {id}"),
                None => format!("No configuration {kind}"),
            })?;

            let result = evaluator.evaluate(&element, entry.as_ref())?;
            result.report_unresolved(&registry);
            rendered.insert(result.config_id().to_string(), result);
        }
        None => {
            for (id, result) in evaluator.evaluate_all() {
                let result = result.with_context(|| format!("Failed to evaluate {id}"))?;
                result.report_unresolved(&registry);
                rendered.insert(id.to_string(), result);
            }
        }
    }

    output(&cli.output, &rendered)
}

pub fn diff(cli: cli::DiffCommand) -> anyhow::Result<()> {
    let old = Documents::new(&load_files(&cli.old)?).context("Invalid old configuration")?;
    let new = Documents::new(&load_files(&cli.new)?).context("Invalid new configuration")?;

    let registry = registry([&old, &new]);
    let old_store = build_store(&old);
    let new_store = build_store(&new);
    let delta = ConfigComparator::new(&old_store, &new_store, Some(registry.as_ref())).compute_delta();

    output(&cli.output, &delta)
}

fn load(input: &cli::InputArgs) -> anyhow::Result<HclDocuments> {
    if !input.workdir && input.files.is_empty() && input.directories.is_empty() {
        let stdin = std::io::read_to_string(std::io::stdin())?;
        let body = hcl_edit::parser::parse_body(&stdin)?;
        return Ok(body.into());
    }

    let mut documents = HclDocuments::default();

    if input.workdir {
        documents.load_directory(&std::env::current_dir()?)?;
    }

    load_into(&mut documents, &input.files)?;

    for dir_path in &input.directories {
        documents.load_directory(dir_path)?;
    }

    anyhow::ensure!(documents.source_count() > 0, "No files loaded");

    Ok(documents)
}

fn load_files(files: &[PathBuf]) -> anyhow::Result<HclDocuments> {
    let mut documents = HclDocuments::default();
    load_into(&mut documents, files)?;
    Ok(documents)
}

fn load_into(documents: &mut HclDocuments, files: &[PathBuf]) -> anyhow::Result<()> {
    for file_path in files {
        documents
            .load_file(file_path)
            .with_context(|| format!("Failed to load {}", file_path.display()))?;
    }
    Ok(())
}

/// Registry snapshot with the schemas of all given documents, later sources replace earlier ones with the same id
fn registry<'a>(documents: impl IntoIterator<Item = &'a Documents>) -> Arc<SchemaRegistry> {
    let registry = SharedSchemaRegistry::default();
    for documents in documents {
        for source in &documents.schemas {
            let registered = registry.add_source(source);
            tracing::debug!(source = %source.id, ?registered, "Registered schemas");
        }
    }
    registry.snapshot()
}

fn build_store(documents: &Documents) -> ConfigurationStore {
    documents
        .documents
        .iter()
        .fold(ConfigurationStore::default(), |store, document| store.add(document))
}

fn output(output: &cli::OutputArgs, value: &impl serde::Serialize) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), value)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), value)?,
    };

    Ok(())
}

/// (confres-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    let mut hcl_documents = HclDocuments::default();
    hcl_documents.load_directory(&std::env::current_dir()?)?;

    let documents = Documents::new(&hcl_documents)?;

    match cli.command {
        cli::DevSubCommand::Documents => println!("{hcl_documents:#?}"),
        cli::DevSubCommand::Store => println!("{:#?}", build_store(&documents)),
        cli::DevSubCommand::Schemas => println!("{:#?}", registry([&documents])),
    }

    Ok(())
}
