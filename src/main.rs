use clap::Parser;
use colored::*;
use portico_configgen::cli::{CheckArgs, Cli, Commands, GenerateArgs, OutputFormat};
use portico_configgen::openid::UnavailableResolver;
use portico_configgen::xds::{Cluster, RouteConfiguration};
use portico_configgen::{translate, Diagnostics, Options, ServiceDescription};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::process;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Generate(args) => run_generate(args, cli.quiet),
        Commands::Check(args) => run_check(args, cli.quiet),
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "error".red().bold(), e);
        process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// The single document written by `generate`.
#[derive(Serialize)]
struct OutputDocument<'a> {
    route_config: &'a RouteConfiguration,
    clusters: &'a [Cluster],
}

fn run_generate(args: GenerateArgs, quiet: bool) -> Result<(), String> {
    let service = load_service(&args.service_config)?;
    let options = load_options(args.options_file.as_deref(), &args.options)?;

    let result = translate(&service, &args.config_id, options, &UnavailableResolver)
        .map_err(|e| e.to_string())?;

    if !quiet {
        print_warnings(&result.diagnostics);
    }

    let document = OutputDocument {
        route_config: &result.route_config,
        clusters: &result.clusters,
    };
    let rendered = match args.format {
        OutputFormat::Yaml => serde_yaml::to_string(&document)
            .map_err(|e| format!("failed to serialize output: {e}"))?,
        OutputFormat::Json => serde_json::to_string_pretty(&document)
            .map_err(|e| format!("failed to serialize output: {e}"))?,
    };

    match &args.output {
        Some(path) => {
            fs::write(path, &rendered).map_err(|e| format!("failed to write output: {e}"))?;
            if !quiet {
                println!(
                    "{} wrote {} routes and {} clusters to {}",
                    "Success:".green().bold(),
                    result.route_config.virtual_hosts[0].routes.len(),
                    result.clusters.len(),
                    path.display()
                );
            }
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn run_check(args: CheckArgs, quiet: bool) -> Result<(), String> {
    let service = load_service(&args.service_config)?;
    let options = load_options(args.options_file.as_deref(), &args.options)?;

    let result = translate(&service, &args.config_id, options, &UnavailableResolver)
        .map_err(|e| e.to_string())?;

    if !quiet {
        print_warnings(&result.diagnostics);
        println!(
            "{} {} operations, {} routes, {} clusters",
            "OK:".green().bold(),
            result.model.operations.len(),
            result.route_config.virtual_hosts[0].routes.len(),
            result.clusters.len()
        );
    }
    Ok(())
}

fn load_service(path: &Path) -> Result<ServiceDescription, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    parse_document(&content).map_err(|e| format!("failed to parse {}: {e}", path.display()))
}

fn load_options(
    path: Option<&Path>,
    overrides: &portico_configgen::cli::OptionsArgs,
) -> Result<Options, String> {
    let mut options = match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            parse_document(&content)
                .map_err(|e| format!("failed to parse {}: {e}", path.display()))?
        }
        None => Options::default(),
    };
    overrides.apply(&mut options);
    Ok(options)
}

/// JSON documents start with a brace; everything else is treated as YAML.
fn parse_document<T: serde::de::DeserializeOwned>(content: &str) -> Result<T, String> {
    if content.trim_start().starts_with('{') {
        serde_json::from_str(content).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }
}

fn print_warnings(diagnostics: &Diagnostics) {
    for warning in &diagnostics.warnings {
        eprintln!(
            "{} [{}] {}",
            "warning:".yellow().bold(),
            warning.context,
            warning.message
        );
    }
}
