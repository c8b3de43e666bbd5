//! `mend`: command line front end for the recovery orchestrator

mod commands;

use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn component_arg() -> Arg {
    Arg::new("component")
        .long("component")
        .short('c')
        .value_name("NAME=STATUS")
        .action(ArgAction::Append)
        .required(true)
        .help("Unhealthy component and its status (healthy, degraded, critical)")
}

fn cli() -> Command {
    Command::new("mend")
        .version(clap::crate_version!())
        .about("Automated incident recovery: plan, gate, execute, verify and report")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Recovery config (.yaml, .yml or .toml); built-in catalog when omitted"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("JSON logs and JSON output"),
        )
        .subcommand(
            Command::new("plan")
                .about("Show the actions a signal would plan, before cooldowns")
                .arg(component_arg()),
        )
        .subcommand(
            Command::new("run")
                .about("Run one recovery with dry-run handlers and print the report")
                .arg(component_arg())
                .arg(
                    Arg::new("trigger")
                        .long("trigger")
                        .default_value("manual")
                        .value_parser(["manual", "health-check"])
                        .help("How the signal is built"),
                )
                .arg(
                    Arg::new("state")
                        .long("state")
                        .value_name("FILE")
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON file keeping cooldowns between runs"),
                ),
        )
        .subcommand(
            Command::new("rules")
                .about("Evaluate composite alarm rules against alarm states")
                .arg(
                    Arg::new("alarm")
                        .long("alarm")
                        .short('a')
                        .value_name("NAME=STATE")
                        .action(ArgAction::Append)
                        .help("Alarm state (OK, ALARM, INSUFFICIENT_DATA)"),
                ),
        )
        .subcommand(
            Command::new("escalate")
                .about("Notify one level of an escalation policy")
                .arg(
                    Arg::new("policy")
                        .long("policy")
                        .required(true)
                        .help("Escalation policy name"),
                )
                .arg(
                    Arg::new("level")
                        .long("level")
                        .default_value("0")
                        .value_parser(value_parser!(usize))
                        .help("Zero-based level index"),
                )
                .arg(
                    Arg::new("incident")
                        .long("incident")
                        .default_value("manual-escalation")
                        .help("Incident reference"),
                )
                .arg(
                    Arg::new("title")
                        .long("title")
                        .default_value("Manual escalation")
                        .help("Incident title"),
                )
                .arg(
                    Arg::new("resolved")
                        .long("resolved")
                        .action(ArgAction::SetTrue)
                        .help("The incident no longer needs this level"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn values(args: &ArgMatches, id: &str) -> Vec<String> {
    args.get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

fn string<'a>(args: &'a ArgMatches, id: &str) -> &'a str {
    args.get_one::<String>(id).map(String::as_str).unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let json = matches.get_flag("json");
    init_tracing(json);

    let config = commands::load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;

    match matches.subcommand() {
        Some(("plan", args)) => commands::plan(&config, &values(args, "component"), json),
        Some(("run", args)) => {
            let total_failure = commands::run(
                &config,
                &values(args, "component"),
                string(args, "trigger"),
                args.get_one::<PathBuf>("state").map(PathBuf::as_path),
            )
            .await?;
            if total_failure {
                std::process::exit(2);
            }
            Ok(())
        }
        Some(("rules", args)) => commands::rules(&config, &values(args, "alarm"), json),
        Some(("escalate", args)) => {
            let escalation = commands::EscalateArgs {
                policy: string(args, "policy"),
                level: args.get_one::<usize>("level").copied().unwrap_or_default(),
                incident: string(args, "incident"),
                title: string(args, "title"),
                resolved: args.get_flag("resolved"),
            };
            commands::escalate(&config, &escalation).await
        }
        _ => Ok(()),
    }
}
