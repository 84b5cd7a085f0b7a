//! Rewind
//!
//! Back/forward cache policy tooling: validate configurations, check which
//! URLs the cache may hold, and replay navigation scenarios against the
//! cache on a virtual clock.

mod scenario;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use rewind_cache::BackForwardCache;
use rewind_config::Config;
use rewind_filter::PolicyVerdict;
use rewind_metrics::prometheus::{init_prometheus, PrometheusConfig};
use rewind_metrics::tracing_setup::{init_tracing, parse_level, LogConfig, LogFormat};
use scenario::{Report, Scenario, Simulator};
use std::path::{Path, PathBuf};
use tracing::{debug, Level};
use url::Url;

/// Rewind - back/forward cache policy and simulation
#[derive(Parser, Debug)]
#[command(name = "rewind")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Show detailed validation output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check whether URLs may be cached under the configured policy
    CheckUrl {
        /// URLs to check
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Replay a navigation scenario
    Simulate {
        /// Scenario file (YAML)
        #[arg(value_name = "FILE")]
        scenario: PathBuf,

        /// Print the final cache contents as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show version information
    Version {
        /// Show detailed version info
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Find the configuration file in standard locations
fn find_config_file(explicit_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path);
    }

    let search_paths = [
        PathBuf::from("./rewind.yaml"),
        PathBuf::from("./rewind.yml"),
        PathBuf::from("/etc/rewind/config.yaml"),
        dirs::config_dir()
            .map(|p| p.join("rewind/config.yaml"))
            .unwrap_or_default(),
    ];

    search_paths.into_iter().find(|path| path.exists())
}

/// Loads the configuration, falling back to defaults
fn load_config(path: Option<PathBuf>, quiet: bool) -> Result<Config> {
    let config = match find_config_file(path) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            if !quiet {
                eprintln!(
                    "{}",
                    style("No configuration file found, using defaults").yellow()
                );
            }
            Config::default()
        }
    };

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Initialize logging/tracing subsystem
fn init_logging(config: &Config, cli_level: Option<&str>, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        parse_level(cli_level.unwrap_or(config.logging.level.as_str()))
    };

    init_tracing(&LogConfig {
        level,
        format: LogFormat::parse(&config.logging.format),
        ..LogConfig::default()
    });
}

/// Installs the metrics exporter when configured
fn init_metrics(config: &Config) -> Result<()> {
    if !config.metrics.enabled {
        return Ok(());
    }
    if let Some(prometheus) = config.metrics.prometheus.as_ref().filter(|p| p.enabled) {
        init_prometheus(&PrometheusConfig {
            listen: prometheus.listen,
        })
        .map_err(|e| anyhow::anyhow!("Failed to start Prometheus exporter: {}", e))?;
    }
    Ok(())
}

fn validate_config(path: Option<PathBuf>, verbose: bool) -> Result<()> {
    let config_path = find_config_file(path).context("No configuration file found")?;

    println!("Validating configuration: {}", config_path.display());

    let config = Config::from_file(&config_path).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            config_path.display()
        )
    })?;

    if verbose {
        println!("\n{}", style("Configuration loaded:").green().bold());
        println!("  Cache enabled: {}", config.cache.enabled);
        println!(
            "  Capacity: {} ({} foreground)",
            config.cache.cache_size, config.cache.foreground_cache_size
        );
        println!("  Time to live: {}s", config.cache.time_to_live_secs);
        println!("  Freeze timeout: {}ms", config.cache.freeze_timeout_ms);
        println!(
            "  Allowed websites: {}",
            config.policy.allowed_websites.items(',').len()
        );
        println!(
            "  Blocked websites: {}",
            config.policy.blocked_websites.items(',').len()
        );
        println!(
            "  Blocked parameters: {}",
            config.policy.blocked_cgi_params.items('|').len()
        );
        println!("  Metrics enabled: {}", config.metrics.enabled);
    }

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    println!("{}", style("Configuration is valid!").green().bold());
    Ok(())
}

fn check_urls(config: &Config, urls: &[String]) -> Result<()> {
    let policy = config
        .policy
        .domain_policy()
        .context("Invalid website policy")?;

    for raw in urls {
        let url = Url::parse(raw).with_context(|| format!("Invalid URL '{}'", raw))?;
        match policy.check(&url) {
            PolicyVerdict::Allowed => {
                println!("{} {}", style("allowed").green().bold(), url);
            }
            PolicyVerdict::DomainDisallowed => {
                println!(
                    "{} {} {}",
                    style("blocked").red().bold(),
                    url,
                    style("(domain)").dim()
                );
            }
            PolicyVerdict::QueryParameterBlocked(param) => {
                println!(
                    "{} {} {}",
                    style("blocked").red().bold(),
                    url,
                    style(format!("(parameter {})", param)).dim()
                );
            }
        }
    }
    Ok(())
}

fn print_report(elapsed_ms: u128, report: &Report) {
    let label = match report {
        Report::Stored(_) | Report::Restored(_) => style(report.label()).green(),
        Report::Pending(_) => style(report.label()).cyan(),
        Report::Rejected(..) | Report::NotRestored(..) => style(report.label()).yellow(),
        Report::Evicted(..) | Report::Reissued(..) => style(report.label()).red(),
    };
    println!(
        "  {} {:<12} {}",
        style(format!("{:>8}ms", elapsed_ms)).dim(),
        label,
        report
    );
}

fn simulate(config: &Config, path: &Path, json: bool, quiet: bool) -> Result<()> {
    let scenario = Scenario::from_file(path)?;
    let cache = BackForwardCache::new(config.cache_config()?)
        .context("Failed to create back/forward cache")?;
    let mut sim = Simulator::new(cache);

    if !quiet {
        println!(
            "{} {}",
            style("Scenario:").cyan().bold(),
            scenario.name.as_deref().unwrap_or("unnamed")
        );
    }

    for (index, step) in scenario.steps.iter().enumerate() {
        debug!(step = index, ?step, "applying step");
        let reports = sim
            .step(step)
            .with_context(|| format!("Step {} failed", index + 1))?;
        if !quiet {
            for report in &reports {
                print_report(sim.elapsed().as_millis(), report);
            }
        }
    }

    let stats = sim.cache().stats();
    if !quiet {
        println!();
        println!(
            "  {} {} stored, {} rejected, {} evicted, {} restored, {} not restored, {} reissued",
            style("Totals:").green(),
            stats.stores(),
            stats.rejections(),
            stats.evictions(),
            stats.restores(),
            stats.not_restored(),
            stats.reissues()
        );
        println!(
            "  {} {:.1}%",
            style("Restore rate:").green(),
            stats.restore_rate() * 100.0
        );
    }

    if json {
        let entries = sim.cache().entries(sim.now());
        println!("{}", serde_json::to_string_pretty(&entries)?);
    }

    Ok(())
}

/// Print version information
fn print_version(verbose: bool) {
    let version = env!("CARGO_PKG_VERSION");
    let name = env!("CARGO_PKG_NAME");

    if verbose {
        println!(
            "{} {}",
            style(name).cyan().bold(),
            style(format!("v{}", version)).dim()
        );
        println!();
        println!(
            "  {}: {}",
            style("Build target").dim(),
            std::env::consts::ARCH
        );
        println!("  {}: {}", style("OS").dim(), std::env::consts::OS);
        println!(
            "  {}: {}",
            style("Prometheus").dim(),
            cfg!(feature = "prometheus")
        );
    } else {
        println!("{} {}", name, version);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Version { verbose } => {
            print_version(*verbose);
            Ok(())
        }
        Commands::Validate { verbose } => validate_config(cli.config.clone(), *verbose),
        Commands::CheckUrl { urls } => {
            let config = load_config(cli.config.clone(), cli.quiet)?;
            init_logging(&config, cli.log_level.as_deref(), cli.quiet);
            check_urls(&config, urls)
        }
        Commands::Simulate { scenario, json } => {
            let config = load_config(cli.config.clone(), cli.quiet)?;
            init_logging(&config, cli.log_level.as_deref(), cli.quiet);
            init_metrics(&config)?;
            simulate(&config, scenario, *json, cli.quiet)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["rewind", "version"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.quiet);
        assert!(matches!(cli.command, Commands::Version { verbose: false }));

        let cli = Cli::try_parse_from(["rewind", "-c", "rewind.yaml", "validate", "-v"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("rewind.yaml")));
        assert!(matches!(cli.command, Commands::Validate { verbose: true }));

        let cli = Cli::try_parse_from(["rewind", "simulate", "demo.yaml", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Simulate { json: true, .. }
        ));

        assert!(Cli::try_parse_from(["rewind", "check-url"]).is_err());
        assert!(Cli::try_parse_from(["rewind"]).is_err());
    }

    #[test]
    fn test_find_config_file_prefers_explicit_path() {
        let explicit = PathBuf::from("/nonexistent/rewind.yaml");
        assert_eq!(find_config_file(Some(explicit.clone())), Some(explicit));
    }

    #[test]
    fn test_check_urls_rejects_invalid_url() {
        let config = Config::default();
        assert!(check_urls(&config, &["https://a.com/".to_string()]).is_ok());
        assert!(check_urls(&config, &["not a url".to_string()]).is_err());
    }
}
