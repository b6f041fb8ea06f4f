//! graft command-line interface

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use graft_core::{IntegrationError, IntegrationReport, Integrator, Outcome, ServiceSpec, StorePaths};
use graft_store::{OsSecretGenerator, SecretGenerator};
use tracing_subscriber::EnvFilter;

fn store_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("dir")
            .long("dir")
            .default_value(".")
            .value_parser(value_parser!(PathBuf))
            .help("Deployment directory holding .env, docker-compose.yml and Caddyfile"),
    )
    .arg(
        Arg::new("env-file")
            .long("env-file")
            .value_parser(value_parser!(PathBuf))
            .help("Env store path (default: <dir>/.env)"),
    )
    .arg(
        Arg::new("compose-file")
            .long("compose-file")
            .value_parser(value_parser!(PathBuf))
            .help("Topology document path (default: <dir>/docker-compose.yml)"),
    )
    .arg(
        Arg::new("caddyfile")
            .long("caddyfile")
            .value_parser(value_parser!(PathBuf))
            .help("Routing document path (default: <dir>/Caddyfile)"),
    )
    .arg(
        Arg::new("spec")
            .long("spec")
            .value_parser(value_parser!(PathBuf))
            .help("Service spec TOML file (default: built-in vault-n8n)"),
    )
    .arg(
        Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .help("Output as JSON"),
    )
}

fn cli() -> Command {
    Command::new("graft")
        .version(graft_core::VERSION)
        .about("Idempotently integrate a service into an existing deployment")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Increase log verbosity (-v info, -vv debug)"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .default_value("text")
                .value_parser(["text", "json"])
                .global(true)
                .help("Log output format"),
        )
        .subcommand(
            store_args(Command::new("integrate").about("Add the service to all three stores")).arg(
                Arg::new("dry-run")
                    .long("dry-run")
                    .action(ArgAction::SetTrue)
                    .help("Report changes without writing any file"),
            ),
        )
        .subcommand(store_args(
            Command::new("status").about("Show which parts of the service are already present"),
        ))
        .subcommand(
            Command::new("spec")
                .about("Print the service spec as TOML")
                .arg(
                    Arg::new("spec")
                        .long("spec")
                        .value_parser(value_parser!(PathBuf))
                        .help("Validate and print this spec instead of the built-in one"),
                ),
        )
        .subcommand(
            Command::new("secret")
                .about("Print a random hex secret")
                .arg(
                    Arg::new("bytes")
                        .long("bytes")
                        .default_value("32")
                        .value_parser(value_parser!(usize))
                        .help("Random bytes before hex encoding"),
                ),
        )
}

fn init_tracing(matches: &ArgMatches) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match matches.get_count("verbose") {
            0 => "warn",
            1 => "info",
            _ => "debug",
        })
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let json = matches.get_one::<String>("log-format").is_some_and(|f| f == "json");
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn store_paths(args: &ArgMatches) -> StorePaths {
    let dir = args
        .get_one::<PathBuf>("dir")
        .map_or_else(|| PathBuf::from("."), Clone::clone);
    let mut paths = StorePaths::in_dir(&dir);
    if let Some(env) = args.get_one::<PathBuf>("env-file") {
        paths.env = env.clone();
    }
    if let Some(compose) = args.get_one::<PathBuf>("compose-file") {
        paths.topology = compose.clone();
    }
    if let Some(caddy) = args.get_one::<PathBuf>("caddyfile") {
        paths.routes = caddy.clone();
    }
    paths
}

fn load_spec(args: &ArgMatches) -> anyhow::Result<ServiceSpec> {
    match args.get_one::<PathBuf>("spec") {
        Some(path) => Ok(ServiceSpec::from_file(path)?),
        None => Ok(ServiceSpec::vault_n8n()),
    }
}

fn print_report(report: &IntegrationReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("failed to encode report")?
        );
        return Ok(());
    }

    println!("{} -> {}", report.service, report.hostname);
    for step in &report.steps {
        let outcome = match step.outcome {
            Outcome::Created => "created",
            Outcome::AlreadyPresent => "present",
            Outcome::Missing => "missing",
        };
        println!("  [{:<8}] {outcome:<8} {}", step.phase.to_string(), step.target);
    }
    if !report.generated.is_empty() {
        println!();
        println!("Generated values:");
        for (key, value) in &report.generated {
            println!("  {key}={value}");
        }
    }
    Ok(())
}

fn run(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    match matches.subcommand() {
        Some(("integrate", args)) => {
            let json = args.get_flag("json");
            let dry_run = args.get_flag("dry-run");
            let integrator = Integrator::new(load_spec(args)?, store_paths(args)).dry_run(dry_run);
            let report = integrator.run()?;
            print_report(&report, json)?;
            if dry_run && !json {
                println!();
                println!("Dry run: no files were written.");
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(("status", args)) => {
            let json = args.get_flag("json");
            let integrator = Integrator::new(load_spec(args)?, store_paths(args));
            let report = integrator.status()?;
            print_report(&report, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(("spec", args)) => {
            let spec = load_spec(args)?;
            print!("{}", spec.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
        Some(("secret", args)) => {
            let bytes = args.get_one::<usize>("bytes").copied().unwrap_or(32);
            anyhow::ensure!(bytes > 0, "--bytes must be positive");
            println!("{}", OsSecretGenerator::new().generate(bytes)?);
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::FAILURE),
    }
}

/// Stable tag for a failure, shared with the library's error kinds
fn error_kind(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<IntegrationError>()
        .map_or("internal_error", IntegrationError::kind)
}

fn wants_json(matches: &ArgMatches) -> bool {
    matches
        .subcommand()
        .and_then(|(_, args)| args.try_get_one::<bool>("json").ok().flatten())
        .copied()
        .unwrap_or(false)
}

fn report_failure(err: &anyhow::Error, json: bool) {
    if json {
        let body = serde_json::json!({
            "error": error_kind(err),
            "message": format!("{err:#}"),
        });
        println!("{body}");
    } else {
        eprintln!("error: {err:#}");
    }
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_tracing(&matches);

    match run(&matches) {
        Ok(code) => code,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            report_failure(&err, wants_json(&matches));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> ArgMatches {
        cli().try_get_matches_from(args).unwrap()
    }

    #[test]
    fn command_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn store_paths_default_to_dir() {
        let m = parse(&["graft", "integrate", "--dir", "/srv/stack"]);
        let (_, args) = m.subcommand().unwrap();
        assert_eq!(store_paths(args), StorePaths::in_dir("/srv/stack"));
    }

    #[test]
    fn store_paths_overrides() {
        let m = parse(&[
            "graft",
            "status",
            "--dir",
            "/srv",
            "--compose-file",
            "/etc/compose.yml",
        ]);
        let (_, args) = m.subcommand().unwrap();
        let paths = store_paths(args);
        assert_eq!(paths.env, PathBuf::from("/srv/.env"));
        assert_eq!(paths.topology, PathBuf::from("/etc/compose.yml"));
        assert_eq!(paths.routes, PathBuf::from("/srv/Caddyfile"));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let m = parse(&["graft", "integrate", "--dry-run", "-vv", "--log-format", "json", "--json"]);
        assert_eq!(m.get_count("verbose"), 2);
        assert_eq!(m.get_one::<String>("log-format").map(String::as_str), Some("json"));
        let (name, args) = m.subcommand().unwrap();
        assert_eq!(name, "integrate");
        assert!(args.get_flag("dry-run"));
        assert!(wants_json(&m));
    }

    #[test]
    fn rejects_unknown_log_format() {
        assert!(cli()
            .try_get_matches_from(["graft", "status", "--log-format", "xml"])
            .is_err());
    }

    #[test]
    fn subcommand_is_required() {
        assert!(cli().try_get_matches_from(["graft"]).is_err());
    }

    #[test]
    fn integrate_and_status_against_sample_project() {
        let project = graft_test_utils::Project::sample();
        let dir = project.dir.path().to_string_lossy().into_owned();

        let status = parse(&["graft", "status", "--dir", &dir]);
        run(&status).unwrap();

        let integrate = parse(&["graft", "integrate", "--dir", &dir, "--json"]);
        run(&integrate).unwrap();
        assert!(project.env().contains("VAULT_N8N_ENCRYPTION_KEY="));
        assert!(project.caddyfile().contains("reverse_proxy vault-n8n:8000"));
    }

    #[test]
    fn failures_carry_library_kind() {
        let project = graft_test_utils::Project::with_files(Some(""), None, None);
        let dir = project.dir.path().to_string_lossy().into_owned();
        let m = parse(&["graft", "integrate", "--dir", &dir]);

        let err = run(&m).unwrap_err();
        assert_eq!(error_kind(&err), "not_found");
        assert_eq!(error_kind(&anyhow::anyhow!("other")), "internal_error");
    }

    #[test]
    fn secret_bytes_parse() {
        let m = parse(&["graft", "secret", "--bytes", "16"]);
        let (_, args) = m.subcommand().unwrap();
        assert_eq!(args.get_one::<usize>("bytes"), Some(&16));
    }
}
