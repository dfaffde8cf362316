//! apkforge CLI
//!
//! Entry point for the `apkforge` command-line tool. The `rpc` subcommand is
//! the service surface: one JSON request per stdin line, one JSON response
//! per stdout line, with the expiry sweeper running in the background.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;

use apk_forge::service::{spawn_sweeper, ForgeService, Retrieval};
use apk_forge::ForgeConfig;
use apkforge_protocol::{ApiError, Request, Response};

#[derive(Parser)]
#[command(name = "apkforge")]
#[command(about = "APK customization lane", version)]
struct Cli {
    /// Path to the lane config file (TOML); defaults apply when omitted
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve line-delimited JSON requests over stdin/stdout
    Rpc,

    /// Submit one job from a payload file and print the artifact record
    Submit {
        /// Path to the JSON configuration payload
        payload: PathBuf,

        /// Owner id for the produced artifact
        #[arg(long)]
        owner: Option<String>,

        /// Override the configured source APK
        #[arg(long)]
        source: Option<PathBuf>,
    },

    /// Run one expiry sweep and print the report
    Sweep {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Check java, the tool jars, and the lane directories
    Doctor {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let service = match ForgeService::new(config) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            eprintln!("Error starting lane: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Rpc => run_rpc(service),
        Commands::Submit {
            payload,
            owner,
            source,
        } => run_submit(&service, &payload, owner.as_deref(), source),
        Commands::Sweep { json } => run_sweep(&service, json),
        Commands::Doctor { json } => run_doctor(&service, json),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<ForgeConfig, apk_forge::config::ConfigError> {
    match path {
        Some(path) => ForgeConfig::from_file(path),
        None => Ok(ForgeConfig::default()),
    }
}

fn run_rpc(service: Arc<ForgeService>) -> ExitCode {
    let shutdown = Arc::new(AtomicBool::new(false));

    let sweeper = match spawn_sweeper(Arc::clone(&service), Arc::clone(&shutdown)) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error spawning sweeper: {}", e);
            return ExitCode::FAILURE;
        }
    };

    {
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        }) {
            eprintln!("[rpc] could not install signal handler: {}", e);
        }
    }

    let stdin = io::stdin();
    let stdout = io::stdout();

    for line in stdin.lock().lines() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(&service, request),
            Err(e) => Response::failure(None, ApiError::invalid_request(format!("invalid JSON: {}", e))),
        };

        let mut out = stdout.lock();
        match serde_json::to_string(&response) {
            Ok(json) => {
                let _ = writeln!(out, "{}", json);
            }
            Err(e) => {
                let _ = writeln!(
                    out,
                    "{{\"ok\":false,\"error\":{{\"kind\":\"STORAGE_FAILURE\",\"detail\":\"response serialization failed: {}\"}}}}",
                    e
                );
            }
        }
        let _ = out.flush();
    }

    shutdown.store(true, Ordering::SeqCst);
    let _ = sweeper.join();
    ExitCode::SUCCESS
}

fn dispatch(service: &ForgeService, request: Request) -> Response {
    let request_id = request.request_id().map(|s| s.to_string());

    let result: Result<Value, ApiError> = match request {
        Request::Submit {
            owner_id,
            payload,
            source,
            ..
        } => service
            .submit(owner_id.as_deref(), payload, source.map(PathBuf::from))
            .and_then(|record| to_value(serde_json::to_value(&record))),
        Request::List { owner_id, .. } => service
            .list(owner_id.as_deref())
            .and_then(|records| to_value(serde_json::to_value(&records))),
        Request::Retrieve { artifact_id, .. } => {
            service.retrieve(&artifact_id).and_then(|retrieval| {
                let value = match retrieval {
                    Retrieval::Redirect { url, record } => serde_json::json!({
                        "redirect": url,
                        "record": record,
                    }),
                    Retrieval::LocalFile { path, record } => serde_json::json!({
                        "file": path,
                        "record": record,
                    }),
                };
                Ok(value)
            })
        }
        Request::Delete { artifact_id, .. } => service
            .delete(&artifact_id)
            .map(|_| serde_json::json!({ "deleted": true })),
        Request::Sweep { .. } => to_value(serde_json::to_value(service.sweep())),
    };

    match result {
        Ok(value) => Response::success(request_id, value),
        Err(error) => Response::failure(request_id, error),
    }
}

fn to_value(result: Result<Value, serde_json::Error>) -> Result<Value, ApiError> {
    result.map_err(|e| {
        ApiError::new(
            apkforge_protocol::ErrorKind::StorageFailure,
            format!("serialization failed: {}", e),
        )
    })
}

fn run_submit(
    service: &ForgeService,
    payload_path: &std::path::Path,
    owner: Option<&str>,
    source: Option<PathBuf>,
) -> ExitCode {
    let payload: Value = match std::fs::read_to_string(payload_path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
    {
        Ok(payload) => payload,
        Err(e) => {
            eprintln!("Error reading payload {}: {}", payload_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match service.submit(owner, payload, source) {
        Ok(record) => {
            match serde_json::to_string_pretty(&record) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Error rendering record: {}", e),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Submit failed: {}", e);
            ExitCode::from(exit_code_u8(e.kind.exit_code()))
        }
    }
}

fn run_sweep(service: &ForgeService, json: bool) -> ExitCode {
    let report = service.sweep();

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => {
                eprintln!("Error rendering report: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!(
            "Swept {} records: removed {}, reclaimed {} bytes",
            report.scanned, report.removed, report.bytes_reclaimed
        );
        for error in &report.errors {
            println!("  error: {}", error);
        }
    }

    ExitCode::SUCCESS
}

fn run_doctor(service: &ForgeService, json: bool) -> ExitCode {
    let report = service.doctor();

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => {
                eprintln!("Error rendering report: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        let check = |ok: bool| if ok { "ok" } else { "MISSING" };
        println!("java:        {}", check(report.java_ok));
        if let Some(ref version) = report.java_version {
            println!("             {}", version);
        }
        println!("apktool:     {}", check(report.apktool_present));
        println!("signer:      {}", check(report.signer_present));
        println!("source apk:  {}", check(report.source_apk_present));
        println!("mirror:      {}", report.mirror);
        println!(
            "store:       {} artifacts, {} bytes",
            report.store_artifacts, report.store_bytes
        );
        println!("records:     {}", report.registered_records);
    }

    if report.healthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn exit_code_u8(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
