//! Client command line for the coldstore HSM.

mod api_client;

use anyhow::{Context, Result, bail};
use api_client::{ApiClient, ServerFailure, server_paths};
use clap::{Args, Parser, Subcommand};
use coldstore_core::protocol::{Request, Response};
use coldstore_core::{ErrorKind, FileState, UNSET_REQUEST};
use fs2::FileExt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "coldstore")]
#[command(about = "Hierarchical storage management between disk and tape")]
#[command(version)]
struct Cli {
    /// Server state directory (database, socket, key file)
    #[arg(long, env = "COLDSTORE_STATE_DIR", default_value = "/var/lib/coldstore")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct FileArgs {
    /// File containing one path per line
    #[arg(short = 'f', long = "file-list")]
    file_list: Option<PathBuf>,

    /// Files given directly
    #[arg(value_name = "FILE", num_args = 0..)]
    files: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Start {
        /// Configuration file passed to the server
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Stop the server
    Stop {
        /// Cancel in-flight work at the next safe point
        #[arg(short = 'x', long)]
        forced: bool,
        /// Let dispatched work finish, admit nothing new
        #[arg(short = 'f', long)]
        finish: bool,
    },
    /// Migrate files to tape
    Migrate {
        /// Keep the primary copy (premigration)
        #[arg(short = 'P', long)]
        premigrate: bool,
        /// Tape pool to migrate into
        #[arg(short, long)]
        pool: Option<String>,
        #[command(flatten)]
        files: FileArgs,
    },
    /// Recall files from tape
    Recall {
        /// Drop the tape association entirely
        #[arg(short = 'r', long)]
        resident: bool,
        #[command(flatten)]
        files: FileArgs,
    },
    /// Inspect server state
    Info {
        #[command(subcommand)]
        command: InfoCommands,
    },
    /// Tape pool management
    Pool {
        #[command(subcommand)]
        command: PoolCommands,
    },
    /// Bring a filesystem under management
    Add {
        /// Filesystem root
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum InfoCommands {
    /// List requests
    Requests {
        /// Request number of interest
        #[arg(short = 'n', long)]
        reqnum: Option<i64>,
    },
    /// List jobs
    Jobs {
        /// Request number of interest
        #[arg(short = 'n', long)]
        reqnum: Option<i64>,
    },
    /// List tapes
    Tapes,
    /// Show file residency
    Files {
        #[command(flatten)]
        files: FileArgs,
    },
}

#[derive(Subcommand)]
enum PoolCommands {
    /// Create a pool
    Create { pool: String },
    /// Delete an empty pool
    Delete { pool: String },
    /// Add a tape to a pool
    Add { pool: String, tape_id: String },
    /// Remove a tape from a pool
    Remove { pool: String, tape_id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("coldstore: {e}");
            let code = e
                .downcast_ref::<ServerFailure>()
                .map(|f| f.kind.exit_code())
                .unwrap_or_else(|| ErrorKind::General.exit_code());
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Start { config } => start_server(&cli.state_dir, config).await,
        Commands::Stop { forced, finish } => stop_server(&cli.state_dir, forced, finish).await,
        Commands::Migrate {
            premigrate,
            pool,
            files,
        } => {
            let files = collect_files(&files)?;
            let target = if premigrate {
                FileState::Premigrated
            } else {
                FileState::Migrated
            };
            let mut client = ApiClient::connect(&cli.state_dir).await?;
            let reqnum = client.migrate(files, target, pool).await?;
            println!("request {reqnum} queued");
            watch_request(&mut client, reqnum).await
        }
        Commands::Recall { resident, files } => {
            let files = collect_files(&files)?;
            let target = if resident {
                FileState::Resident
            } else {
                FileState::Premigrated
            };
            let mut client = ApiClient::connect(&cli.state_dir).await?;
            let reqnum = client.recall(files, target).await?;
            println!("request {reqnum} queued");
            watch_request(&mut client, reqnum).await
        }
        Commands::Info { command } => info(&cli.state_dir, command).await,
        Commands::Pool { command } => pool(&cli.state_dir, command).await,
        Commands::Add { path } => {
            let mut client = ApiClient::connect(&cli.state_dir).await?;
            let path = path
                .canonicalize()
                .with_context(|| format!("cannot resolve {}", path.display()))?;
            let request = Request::AddFilesystem {
                key: client.key(),
                path: path.clone(),
            };
            client.expect_ok(&request).await?;
            println!("managing {}", path.display());
            Ok(())
        }
    }
}

/// Combine `-f <list>` and positional paths.
fn collect_files(args: &FileArgs) -> Result<Vec<PathBuf>> {
    let mut files = args.files.clone();
    if let Some(list) = &args.file_list {
        let content = std::fs::read_to_string(list)
            .with_context(|| format!("cannot read file list {}", list.display()))?;
        files.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from),
        );
    }
    if files.is_empty() {
        bail!("no files given; use -f <list> or positional arguments");
    }
    Ok(files)
}

/// Poll progress until the request settles; non-zero exit when it failed.
async fn watch_request(client: &mut ApiClient, reqnum: i64) -> Result<()> {
    let mut last_done = u64::MAX;
    let record = client
        .wait_request(reqnum, |record| {
            if record.done != last_done {
                println!(
                    "request {}: {}/{} done, {} failed",
                    record.reqnum, record.done, record.total, record.failed
                );
                last_done = record.done;
            }
        })
        .await?;

    if record.state != coldstore_core::RequestState::Completed || record.failed > 0 {
        bail!(ServerFailure {
            kind: ErrorKind::General,
            message: format!(
                "request {reqnum} finished {} with {} failed jobs",
                record.state, record.failed
            ),
        });
    }
    println!("request {reqnum} completed");
    Ok(())
}

/// Spawn the server and wait for its socket to appear.
async fn start_server(state_dir: &std::path::Path, config: Option<String>) -> Result<()> {
    let mut command = std::process::Command::new("coldstored");
    if let Some(config) = config {
        command.arg("--config").arg(config);
    }
    command
        .env("COLDSTORE_SERVER__STATE_DIR", state_dir)
        .stdin(std::process::Stdio::null());
    command.spawn().context("cannot spawn coldstored")?;

    let socket = server_paths(state_dir).socket_path();
    for _ in 0..100 {
        if socket.exists() {
            println!("server started");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    bail!("server did not come up within 10 s");
}

/// Stop the server, then wait until it released the server lock.
async fn stop_server(state_dir: &std::path::Path, forced: bool, finish: bool) -> Result<()> {
    let mut client = ApiClient::connect(state_dir).await?;
    client.stop(forced, finish).await?;

    let lock_path = server_paths(state_dir).lock_path();
    let lock_file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("cannot open {}", lock_path.display()))?;
    for _ in 0..300 {
        if lock_file.try_lock_exclusive().is_ok() {
            FileExt::unlock(&lock_file).ok();
            println!("server stopped");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    bail!("server still holds its lock after stop");
}

async fn info(state_dir: &std::path::Path, command: InfoCommands) -> Result<()> {
    let mut client = ApiClient::connect(state_dir).await?;
    match command {
        InfoCommands::Requests { reqnum } => {
            let request = Request::InfoRequests {
                key: client.key(),
                reqnum,
            };
            let rows = client
                .call_stream(&request, |r| {
                    matches!(r, Response::RequestInfo { record } if record.reqnum == UNSET_REQUEST)
                })
                .await?;
            println!(
                "{:<20} {:<14} {:<8} {:<12} {:<12} {:<12}",
                "operation", "state", "reqnum", "pool", "tape", "target"
            );
            for row in rows {
                if let Response::RequestInfo { record } = row {
                    println!(
                        "{:<20} {:<14} {:<8} {:<12} {:<12} {:<12}",
                        record.operation.to_string(),
                        record.state.to_string(),
                        record.reqnum,
                        record.pool.as_deref().unwrap_or("-"),
                        record.tape_id,
                        record.target.to_string()
                    );
                }
            }
            Ok(())
        }
        InfoCommands::Jobs { reqnum } => {
            let request = Request::InfoJobs {
                key: client.key(),
                reqnum,
            };
            let rows = client
                .call_stream(&request, |r| {
                    matches!(r, Response::JobInfo { record } if record.reqnum == UNSET_REQUEST)
                })
                .await?;
            println!(
                "{:<20} {:<8} {:<12} {:<10} {:<8} file",
                "operation", "reqnum", "state", "size", "tape"
            );
            for row in rows {
                if let Response::JobInfo { record } = row {
                    println!(
                        "{:<20} {:<8} {:<12} {:<10} {:<8} {}{}",
                        record.operation.to_string(),
                        record.reqnum,
                        record.state.to_string(),
                        record.size,
                        record.tape_id,
                        record.file_name.display(),
                        if record.failed { " (failed)" } else { "" }
                    );
                }
            }
            Ok(())
        }
        InfoCommands::Tapes => {
            let request = Request::InfoTapes { key: client.key() };
            let rows = client
                .call_stream(&request, |r| {
                    matches!(r, Response::TapeInfo { record } if record.tape_id.is_empty())
                })
                .await?;
            println!(
                "{:<12} {:<12} {:<12} drive",
                "tape", "pool", "state"
            );
            for row in rows {
                if let Response::TapeInfo { record } = row {
                    println!(
                        "{:<12} {:<12} {:<12} {}",
                        record.tape_id,
                        record.pool.as_deref().unwrap_or("-"),
                        record.state,
                        record.drive_id.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(())
        }
        InfoCommands::Files { files } => {
            let files = collect_files(&files)?;
            let request = Request::InfoFiles {
                key: client.key(),
                files,
            };
            let rows = client
                .call_stream(&request, |r| {
                    matches!(r, Response::FileInfo { record }
                        if record.file_name.as_os_str().is_empty())
                })
                .await?;
            println!("{:<12} {:<10} {:<8} file", "state", "size", "tape");
            for row in rows {
                if let Response::FileInfo { record } = row {
                    match record.error {
                        Some(kind) => println!(
                            "{:<12} {:<10} {:<8} {}",
                            kind.to_string(),
                            "-",
                            "-",
                            record.file_name.display()
                        ),
                        None => println!(
                            "{:<12} {:<10} {:<8} {}",
                            record.state.map(|s| s.to_string()).unwrap_or_default(),
                            record.size.unwrap_or(0),
                            record.tape_id.as_deref().unwrap_or("-"),
                            record.file_name.display()
                        ),
                    }
                }
            }
            Ok(())
        }
    }
}

async fn pool(state_dir: &std::path::Path, command: PoolCommands) -> Result<()> {
    let mut client = ApiClient::connect(state_dir).await?;
    let key = client.key();
    let (request, done_message) = match command {
        PoolCommands::Create { pool } => (
            Request::PoolCreate {
                key,
                pool: pool.clone(),
            },
            format!("pool '{pool}' created"),
        ),
        PoolCommands::Delete { pool } => (
            Request::PoolDelete {
                key,
                pool: pool.clone(),
            },
            format!("pool '{pool}' deleted"),
        ),
        PoolCommands::Add { pool, tape_id } => (
            Request::PoolAdd {
                key,
                pool: pool.clone(),
                tape_id: tape_id.clone(),
            },
            format!("tape {tape_id} added to pool '{pool}'"),
        ),
        PoolCommands::Remove { pool, tape_id } => (
            Request::PoolRemove {
                key,
                pool: pool.clone(),
                tape_id: tape_id.clone(),
            },
            format!("tape {tape_id} removed from pool '{pool}'"),
        ),
    };
    client.expect_ok(&request).await?;
    println!("{done_message}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_list_and_positionals_combine() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list");
        std::fs::write(&list, "/a/one\n\n  /a/two \n").unwrap();

        let args = FileArgs {
            file_list: Some(list),
            files: vec![PathBuf::from("/b/zero")],
        };
        let files = collect_files(&args).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("/b/zero"),
                PathBuf::from("/a/one"),
                PathBuf::from("/a/two"),
            ]
        );
    }

    #[test]
    fn empty_file_set_is_rejected() {
        let args = FileArgs {
            file_list: None,
            files: vec![],
        };
        assert!(collect_files(&args).is_err());
    }
}
