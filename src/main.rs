//! DealSignal daemon.
//!
//! Usage:
//!   dealsignal                         run the nightly schedule until Ctrl-C
//!   dealsignal --run-now               run one batch immediately and exit
//!   dealsignal lookup <account-id> [--opportunity <id>] [--name <name>] [--query <text>]
//!                                      print signals for one entity as JSON
//!
//! Config is read from `$DEALSIGNAL_CONFIG` or `~/.dealsignal/config.json`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail};

use dealsignal_lib::analysis::{HttpAnalyzer, TextAnalyzer};
use dealsignal_lib::config::ConfigStore;
use dealsignal_lib::db::{SharedDb, SignalDb};
use dealsignal_lib::gong::GongClient;
use dealsignal_lib::lookup::SignalLookup;
use dealsignal_lib::orchestrator::SignalOrchestrator;
use dealsignal_lib::pipeline::CallPipeline;
use dealsignal_lib::scheduler::{parse_timezone, schedule_or_default, RecurringTimer};
use dealsignal_lib::scope::Scope;

struct Services {
    store: Arc<ConfigStore>,
    db: SharedDb,
    client: Arc<GongClient>,
    analyzer: Arc<dyn TextAnalyzer>,
    max_tokens: u32,
}

fn build_services() -> anyhow::Result<Services> {
    let store = Arc::new(
        ConfigStore::default_path()
            .and_then(|path| ConfigStore::open(path))
            .map_err(|e| anyhow!("Failed to load DealSignal config: {e}"))?,
    );
    let config = store.config();

    let db = match &config.database_path {
        Some(path) => SignalDb::open_at(PathBuf::from(path)),
        None => SignalDb::open(),
    }
    .map_err(|e| anyhow!("Failed to open database: {e}"))?
    .into_shared();

    let client = Arc::new(GongClient::new(&config.gong));
    let analyzer = HttpAnalyzer::new(
        &config.analyzer,
        config.buying_signals.provider_api_key.clone(),
    )
    .map_err(|e| anyhow!("Failed to create analyzer: {e}"))?;

    Ok(Services {
        store,
        db,
        client,
        analyzer: Arc::new(analyzer),
        max_tokens: config.analyzer.max_tokens,
    })
}

struct LookupArgs {
    scope: Scope,
    query: Option<String>,
}

fn parse_lookup_args(args: &[String]) -> anyhow::Result<LookupArgs> {
    let Some(account_id) = args.first() else {
        bail!("lookup requires an account id");
    };
    let mut scope = Scope::account(account_id);
    let mut query = None;

    let mut rest = args[1..].iter();
    while let Some(flag) = rest.next() {
        let value = rest
            .next()
            .ok_or_else(|| anyhow!("{flag} requires a value"))?;
        match flag.as_str() {
            "--opportunity" => scope.opportunity_id = Some(value.clone()),
            "--name" => scope.account_name = Some(value.clone()),
            "--query" => query = Some(value.clone()),
            other => bail!("unknown lookup option: {other}"),
        }
    }
    Ok(LookupArgs { scope, query })
}

async fn run_lookup(services: Services, args: LookupArgs) -> anyhow::Result<()> {
    let pipeline = CallPipeline::new(
        services.client,
        services.analyzer,
        services.db.clone(),
        services.store,
        services.max_tokens,
    );
    let lookup = SignalLookup::new(services.db, pipeline);
    let signals = lookup
        .try_get_signals(&args.scope, args.query.as_deref())
        .await
        .map_err(|e| anyhow!("Lookup failed: {e}"))?;
    println!("{}", serde_json::to_string_pretty(&signals)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let services = build_services()?;

    if args.first().map(String::as_str) == Some("lookup") {
        let lookup_args = parse_lookup_args(&args[1..])?;
        return run_lookup(services, lookup_args).await;
    }

    let cfg = services.store.get_buying_signal_config();
    let orchestrator = Arc::new(SignalOrchestrator::new(
        services.client,
        services.analyzer,
        services.db,
        services.store,
        services.max_tokens,
    ));

    if args.iter().any(|a| a == "--run-now") {
        let result = orchestrator.run_nightly().await;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if !cfg.enabled {
        log::info!("Scheduler: buying signals disabled, nothing scheduled");
        return Ok(());
    }

    let schedule = schedule_or_default(&cfg.schedule_expression)?;
    let tz = parse_timezone(&cfg.schedule_timezone).unwrap_or_else(|e| {
        log::warn!("Scheduler: {}; using UTC", e);
        chrono_tz::UTC
    });
    log::info!(
        "Scheduler: nightly batch scheduled '{}' ({})",
        cfg.schedule_expression,
        tz
    );

    let job_orchestrator = orchestrator.clone();
    let timer = RecurringTimer::start(schedule, tz, move || {
        let orchestrator = job_orchestrator.clone();
        async move {
            let result = orchestrator.run_nightly().await;
            log::info!(
                "Scheduler: batch {} finished: {}",
                result.run_id,
                result.status().as_str()
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    log::info!("Scheduler: shutting down");
    orchestrator.cancel();
    timer.stop().await;
    Ok(())
}
