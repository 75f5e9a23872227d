//! munisync daemon and one-shot control surface.
//!
//! `--daemon` runs both conductor loops until interrupted. The remaining
//! flags are one-shot operations against the same store: force a sync,
//! process a single packet, drain the unprocessed backlog, or print status.

use std::sync::{Arc, Mutex};

use clap::Parser;

use munisync::conductor::Conductor;
use munisync::config::Config;
use munisync::db::Database;
use munisync::processor::AgendaProcessor;
use munisync::summarizer::{PromptLibrary, Summarizer};
use munisync::topics::TopicNormalizer;

#[derive(Parser, Debug)]
#[command(name = "munisync", about = "Municipal agenda sync and enrichment pipeline")]
struct Args {
    /// Run the sync and processing loops until interrupted
    #[arg(long)]
    daemon: bool,

    /// Run one full sync pass over all active cities, then exit
    #[arg(long)]
    full_sync: bool,

    /// Force-sync a single city by banana (e.g. paloaltoCA)
    #[arg(long, value_name = "BANANA")]
    sync_city: Option<String>,

    /// Force-sync a city and immediately process its queued meetings
    #[arg(long, value_name = "BANANA")]
    sync_and_process_city: Option<String>,

    /// Process a single meeting by packet URL
    #[arg(long, value_name = "PACKET_URL")]
    process_meeting: Option<String>,

    /// Process every meeting that has a packet but no summary
    #[arg(long)]
    process_all_unprocessed: bool,

    /// Batch size for --process-all-unprocessed
    #[arg(long, default_value_t = 20)]
    batch_size: i64,

    /// Print conductor and store status as JSON
    #[arg(long)]
    status: bool,
}

fn build_processor(
    config: &Config,
    db: Arc<Mutex<Database>>,
) -> Option<Arc<AgendaProcessor>> {
    let api_key = config.llm_api_key.as_deref()?;

    let normalizer = TopicNormalizer::new();
    let prompts = PromptLibrary::load(&config.data_dir);
    let summarizer = match Summarizer::new(api_key, prompts, normalizer.prompt_examples()) {
        Ok(summarizer) => summarizer,
        Err(e) => {
            log::error!("Failed to initialize summarizer: {}", e);
            return None;
        }
    };

    match AgendaProcessor::new(db, summarizer, TopicNormalizer::new(), config.batch_enabled) {
        Ok(processor) => {
            log::info!("Processor initialized with LLM capabilities");
            Some(Arc::new(processor))
        }
        Err(e) => {
            log::error!("Failed to initialize processor: {}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = Config::from_env();

    let db = match Database::open(&config.db_path()) {
        Ok(db) => Arc::new(Mutex::new(db)),
        Err(e) => {
            eprintln!("Failed to open database at {:?}: {}", config.db_path(), e);
            return std::process::ExitCode::FAILURE;
        }
    };

    let processor = build_processor(&config, Arc::clone(&db));
    let conductor = Arc::new(Conductor::new(db, config, processor));

    if args.daemon {
        log::info!("Starting munisync daemon");
        let runner = Arc::clone(&conductor);
        let handle = tokio::spawn(async move { runner.run().await });

        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received interrupt, shutting down");
            conductor.stop();
        }
        let _ = handle.await;
        return std::process::ExitCode::SUCCESS;
    }

    if args.full_sync {
        return match conductor.run_full_sync().await {
            Ok(()) => std::process::ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Full sync failed: {}", e);
                std::process::ExitCode::FAILURE
            }
        };
    }

    if let Some(banana) = args.sync_city {
        let result = conductor.force_sync_city(&banana).await;
        println!(
            "{}: {:?} ({} meetings found, {} stored)",
            result.banana, result.status, result.meetings_found, result.meetings_stored
        );
        if let Some(error) = result.error_message {
            eprintln!("error: {}", error);
        }
        return std::process::ExitCode::SUCCESS;
    }

    if let Some(banana) = args.sync_and_process_city {
        return match conductor.sync_and_process_city(&banana).await {
            Ok((processed, failed)) => {
                println!("{}: {} processed, {} failed", banana, processed, failed);
                std::process::ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e);
                std::process::ExitCode::FAILURE
            }
        };
    }

    if let Some(packet_url) = args.process_meeting {
        let ok = conductor.force_process_meeting(&packet_url).await;
        println!(
            "{}: {}",
            packet_url,
            if ok { "processed" } else { "failed" }
        );
        return if ok {
            std::process::ExitCode::SUCCESS
        } else {
            std::process::ExitCode::FAILURE
        };
    }

    if args.process_all_unprocessed {
        let total = conductor.process_all_unprocessed(args.batch_size).await;
        println!("processed {} meetings", total);
        return std::process::ExitCode::SUCCESS;
    }

    if args.status {
        return match conductor.sync_status() {
            Ok(status) => {
                match serde_json::to_string_pretty(&status) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("status serialization failed: {}", e),
                }
                std::process::ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("status failed: {}", e);
                std::process::ExitCode::FAILURE
            }
        };
    }

    eprintln!("No operation requested. Try --daemon, --full-sync, or --status.");
    std::process::ExitCode::FAILURE
}
