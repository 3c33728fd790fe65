use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use gatekeep::{
    Gateway, HttpClientAdapter,
    config::{GatewayConfig, ServerConfigValidator, load_config},
    metrics,
    tracing_setup::{self, LogFormat},
    utils::graceful_shutdown::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "routes.yaml")]
    routes: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate a route file and exit
    Validate {
        #[clap(short, long, default_value = "routes.yaml")]
        routes: String,
    },
    /// Start the gateway (default)
    Serve {
        #[clap(short, long, default_value = "routes.yaml")]
        routes: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { routes }) => validate_config_command(&routes).await,
        Some(Commands::Serve { routes }) => serve(&routes).await,
        None => serve(&args.routes).await,
    }
}

async fn serve(routes_path: &str) -> Result<()> {
    let format = LogFormat::from_env_value(std::env::var("LOG_FORMAT").ok().as_deref());
    tracing_setup::init_tracing(&tracing_setup::level_from_env(), format)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {}", e))?;

    tracing::info!("Loading route table from {routes_path}");
    let config = load_config(routes_path)
        .await
        .with_context(|| format!("Failed to load config from {routes_path}"))?;

    ServerConfigValidator::validate(&config).wrap_err("Invalid gateway configuration")?;
    if config.uses_default_secret() {
        tracing::warn!(
            "JWT_SECRET is not set; using the built-in development secret. Do not run this in production"
        );
    }

    let backend_timeout = config
        .backend_timeout()
        .wrap_err("Invalid backend timeout")?;
    let http_client = Arc::new(
        HttpClientAdapter::new(backend_timeout).wrap_err("Failed to create HTTP client")?,
    );
    let gateway = Gateway::from_config(&config, http_client).wrap_err("Failed to build gateway")?;

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let listener = Gateway::bind(&config.listen_addr())
        .await
        .wrap_err("Failed to bind listener")?;

    gateway
        .serve(listener, graceful_shutdown)
        .await
        .wrap_err("Gateway terminated abnormally")?;

    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(routes_path: &str) -> Result<()> {
    println!("Validating route file: {routes_path}");

    if !Path::new(routes_path).exists() {
        eprintln!("Error: route file '{routes_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(routes_path).await {
        Ok(config) => {
            println!("Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("Configuration validation: OK");
            println!();
            print_summary(&config);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("Common fixes:");
            println!("   • Route paths start with '/' and do not end with '/'");
            println!("   • Backends are absolute http:// or https:// URLs");
            println!("   • Every route lists at least one method");
            println!("   • Durations use humantime units (e.g. 15s, 10m)");
            std::process::exit(1);
        }
    }
}

fn print_summary(config: &GatewayConfig) {
    println!("Configuration Summary:");
    println!("   • Listen Address: {}", config.listen_addr());
    println!(
        "   • Rate Limit: {} req/s, burst {}",
        config.rate_limit.requests_per_second, config.rate_limit.burst
    );
    println!("   • Auth Skip-list: {:?}", config.auth.skip_paths);
    println!("   • Routes: {}", config.routes.len());
    for route in &config.routes {
        println!(
            "       {} -> {} [{}]",
            route.path,
            route.backend,
            route.methods.join(", ")
        );
    }
    if config.uses_default_secret() {
        println!("   • Warning: JWT_SECRET not set, the development secret is in use");
    }
}
