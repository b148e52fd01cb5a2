mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codelens::{LensError, OpResponse};

use crate::cli::{Cli, Commands, NotesCommands};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codelens=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    match run(cli) {
        Err(e) if json => match e.downcast_ref::<LensError>() {
            Some(lens) => {
                println!("{}", OpResponse::from_error(lens).to_json());
                std::process::exit(1);
            }
            None => Err(e),
        },
        other => other,
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let root = &cli.root;
    let json = cli.json;

    match cli.command {
        Commands::Init { force } => cli::init(root, force, json)?,
        Commands::Sync { full } => cli::sync(root, full, json)?,
        Commands::Status => cli::status(root, json)?,
        Commands::Node { id, source } => cli::show_node(root, &id, source, json)?,
        Commands::Search { query, field, limit } => cli::search(root, &query, &field, limit, json)?,
        Commands::Impact { id, depth } => cli::impact(root, &id, depth, json)?,
        Commands::DeadCode { entry } => cli::dead_code(root, entry, json)?,
        Commands::Update { id, file, reason } => cli::update(root, &id, file.as_deref(), reason, json)?,
        Commands::History { node, limit } => cli::history(root, node.as_deref(), limit, json)?,
        Commands::Notes { command } => match command {
            NotesCommands::List => cli::notes_list(root, json)?,
            NotesCommands::Get { key } => cli::notes_get(root, &key, json)?,
            NotesCommands::Set { key, value } => cli::notes_set(root, &key, &value, json)?,
            NotesCommands::Delete { key } => cli::notes_delete(root, &key, json)?,
        },
        Commands::Cycles => cli::cycles(root, json)?,
        Commands::Path { from, to } => cli::path(root, &from, &to, json)?,
        Commands::Stats => cli::stats(root, json)?,
    }

    Ok(())
}
