//! CLI entry point for notebook-exec.

use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use colored::Colorize;
use dotenvy::dotenv;
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use serde_json::json;

use notebook_exec::command_safety::{SafetyLevel, analyze_command};
use notebook_exec::config::Config;
use notebook_exec::logging;
use notebook_exec::session::Session;
use notebook_exec::tools::ToolRegistryBuilder;

#[derive(Parser, Debug)]
#[command(
    name = "notebook-exec",
    author,
    version,
    about = "Persistent notebook-style Python execution for agents",
    after_help = "Examples:\
    \n   notebook-exec exec 'x = 2; x * 21'\
    \n   notebook-exec exec --file cell.py\
    \n   notebook-exec repl\
    \n   notebook-exec check 'rm -rf build'"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Config profile name
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Working directory for shell lines and the interpreter
    #[arg(short, long, global = true)]
    workdir: Option<PathBuf>,

    /// Python interpreter to use
    #[arg(long, global = true)]
    python: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Execute one submission and print the observation
    Exec {
        /// Code to run; read from stdin when omitted
        code: Option<String>,
        /// Read the submission from a file
        #[arg(short, long, conflicts_with = "code")]
        file: Option<PathBuf>,
    },
    /// Interactive session; a blank line submits the buffered cell
    Repl,
    /// Show how a shell line would be treated without running it
    Check {
        /// Shell line, without the leading `!`
        command: String,
    },
    /// Print the agent tool definitions as JSON
    Tools,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command.clone().unwrap_or(Commands::Repl) {
        Commands::Exec { code, file } => run_exec(&cli, code, file).await,
        Commands::Repl => run_repl(&cli),
        Commands::Check { command } => run_check(&cli, &command),
        Commands::Tools => run_tools(&cli),
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    }
}

fn load_config_from_cli(cli: &Cli) -> Result<Config> {
    let profile = cli
        .profile
        .clone()
        .or_else(|| std::env::var("NOTEBOOK_EXEC_PROFILE").ok());
    let mut config = Config::load(cli.config.clone(), profile.as_deref())?;
    if let Some(dir) = &cli.workdir {
        config.working_dir = Some(dir.to_string_lossy().into_owned());
    }
    if let Some(python) = &cli.python {
        config.python = Some(python.to_string_lossy().into_owned());
    }
    config.validate()?;
    Ok(config)
}

fn build_session(cli: &Cli) -> Result<Session> {
    let config = load_config_from_cli(cli)?;
    let settings = config.session_settings()?;
    logging::info(format!(
        "python: {} | workdir: {}",
        settings.python.display(),
        settings.working_dir.display()
    ));
    Ok(Session::new(settings))
}

async fn run_exec(cli: &Cli, code: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let code = match (code, file) {
        (Some(code), _) => code,
        (None, Some(path)) => fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?,
        (None, None) => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read code from stdin")?;
            buffer
        }
    };

    let shared = build_session(cli)?.into_shared();
    let registry = ToolRegistryBuilder::new()
        .with_session_tools(shared.clone())
        .build();

    let result = registry
        .execute_full("jupyter_code_executor", json!({ "code": code }))
        .await?;
    println!("{}", result.content);

    if let Ok(mut session) = shared.lock() {
        session.shutdown();
    }
    if !result.success {
        bail!("Execution failed: the python session is unusable");
    }
    Ok(())
}

fn run_repl(cli: &Cli) -> Result<()> {
    let mut session = build_session(cli)?;
    let interactive = io::stdin().is_terminal();

    if interactive {
        println!("{}", "notebook-exec".blue().bold());
        println!(
            "Working directory: {}",
            session.working_dir().display().to_string().dimmed()
        );
        println!("Enter code, then a blank line to run it. :help for commands.\n");
    }

    let mut editor = Editor::<(), DefaultHistory>::new()?;
    let history_path = dirs::home_dir()
        .map(|h| h.join(".notebook-exec").join("repl_history"))
        .unwrap_or_default();
    let _ = editor.load_history(&history_path);

    let mut buffer: Vec<String> = Vec::new();
    loop {
        let prompt = if buffer.is_empty() { ">>> " } else { "... " };
        match editor.readline(prompt) {
            Ok(line) => {
                if buffer.is_empty() {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    if input.starts_with(':') {
                        editor.add_history_entry(input)?;
                        if !handle_repl_command(&mut session, input) {
                            break;
                        }
                        continue;
                    }
                }

                if line.trim().is_empty() {
                    submit(&mut session, &mut buffer);
                    continue;
                }
                editor.add_history_entry(line.as_str())?;
                buffer.push(line);
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
            }
            Err(ReadlineError::Eof) => {
                submit(&mut session, &mut buffer);
                break;
            }
            Err(err) => {
                println!("{}: {}", "Error".red(), err);
                break;
            }
        }
    }

    if let Some(parent) = history_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let _ = editor.save_history(&history_path);
    session.shutdown();
    Ok(())
}

fn submit(session: &mut Session, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let code = buffer.join("\n");
    buffer.clear();
    println!("{}", session.execute(&code));
}

/// Returns `false` when the REPL should exit.
fn handle_repl_command(session: &mut Session, input: &str) -> bool {
    match input {
        ":quit" | ":exit" | ":q" => return false,
        ":help" => print_repl_help(),
        ":reset" => println!("{}", session.reset()),
        ":history" => {
            for (index, entry) in session.history().iter().enumerate() {
                println!(
                    "{} {}",
                    format!("[{}] {}", index + 1, entry.submitted_at.format("%H:%M:%S")).dimmed(),
                    entry.code.lines().next().unwrap_or_default()
                );
            }
        }
        ":names" => match session.snapshot() {
            Ok(snapshot) if snapshot.is_empty() => println!("{}", "(no bindings)".dimmed()),
            Ok(snapshot) => {
                for (name, value) in snapshot.iter() {
                    println!("{} {} = {}", value.type_name().dimmed(), name.bold(), value);
                }
            }
            Err(err) => println!("{}: {}", "Error".red(), err),
        },
        other => println!("{}: unknown command {other}", "Error".red()),
    }
    true
}

fn print_repl_help() {
    println!("{}", "Commands".blue().bold());
    println!();
    println!("  :reset     Clear the namespace and history");
    println!("  :history   List submitted cells");
    println!("  :names     Show namespace bindings");
    println!("  :help      Show this help");
    println!("  :quit      Exit");
    println!();
    println!("Lines starting with `!` run in the shell.");
}

fn run_check(cli: &Cli, command: &str) -> Result<()> {
    let config = load_config_from_cli(cli)?;
    let command = command.trim().trim_start_matches('!').trim();
    let analysis = analyze_command(command, &config.denylist());

    match analysis.level {
        SafetyLevel::Allowed => println!("{} {}", "allowed".green().bold(), command),
        SafetyLevel::PackageInstall { manager, args } => println!(
            "{} {:?} install ({})",
            "install".cyan().bold(),
            manager,
            args.join(" ")
        ),
        SafetyLevel::Blocked { matched } => println!(
            "{} {} (matched: {})",
            "blocked".red().bold(),
            command,
            matched.join(", ")
        ),
    }
    Ok(())
}

fn run_tools(cli: &Cli) -> Result<()> {
    let registry = ToolRegistryBuilder::new()
        .with_session_tools(build_session(cli)?.into_shared())
        .build();
    println!("{}", serde_json::to_string_pretty(&registry.definitions())?);
    Ok(())
}

/// Generate shell completions for the given shell
fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
