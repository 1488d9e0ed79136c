use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use turnstream::config::{load_config, AppConfig};
use turnstream::exchange::{
    ChannelObserver, ExchangeOutcome, ExchangeUpdate, RequestLifecycle,
};
use turnstream::observability::init_tracing;
use turnstream::protocol::{build_adapter, Message, NormalizedEvent};
use turnstream::transport::{ClientCache, HttpTransport};
use turnstream::usage::SessionUsage;

#[derive(Parser)]
#[command(name = "turnstream", about = "Stream one chat exchange from an LLM backend")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Backend name from the config; defaults to the one marked is_default
    #[arg(long)]
    backend: Option<String>,

    /// System prompt
    #[arg(long)]
    system: Option<String>,

    /// Print reasoning text to stderr as it streams
    #[arg(long)]
    show_thinking: bool,

    /// The user prompt
    #[arg(required = true, trailing_var_arg = true)]
    prompt: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = load_config(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level, config.features.log_json);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: AppConfig) -> ExitCode {
    let Some(backend) = config.backend(cli.backend.as_deref()) else {
        eprintln!(
            "Unknown backend '{}'",
            cli.backend.as_deref().unwrap_or_default()
        );
        return ExitCode::FAILURE;
    };

    let adapter = build_adapter(
        backend.provider,
        &backend.base_url,
        backend.api_version.as_deref(),
    );
    let params = backend.request_params(&config.exchange);
    let messages = [Message::user(cli.prompt.join(" "))];
    let spec = match adapter.build_request(&messages, cli.system.as_deref(), &params) {
        Ok(spec) => spec,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let clients = Arc::new(ClientCache::new(
        config.exchange.proxy.clone(),
        config.exchange.http_use_env_proxy,
    ));
    let session = SessionUsage::new();
    let lifecycle = RequestLifecycle::new(
        adapter,
        HttpTransport::new(clients),
        session.clone(),
        config.exchange.lifecycle_options(),
    );
    tracing::info!(
        exchange_id = lifecycle.id(),
        backend = %backend.name,
        provider = %backend.provider,
        model = %backend.model,
        "starting exchange"
    );

    let (observer, mut updates) = ChannelObserver::channel();
    let (handle, _task) = lifecycle.spawn(spec, observer);

    let mut stdout = std::io::stdout();
    let mut outcome = None;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !handle.is_cancelled() => {
                if let Err(err) = signal {
                    tracing::warn!(error = %err, "failed to listen for Ctrl-C");
                }
                handle.cancel();
            }
            update = updates.recv() => match update {
                Some(ExchangeUpdate::Event(NormalizedEvent::ContentDelta { text })) => {
                    let _ = stdout.write_all(text.as_bytes());
                    let _ = stdout.flush();
                }
                Some(ExchangeUpdate::Event(NormalizedEvent::Thinking { text })) => {
                    if cli.show_thinking {
                        eprint!("{text}");
                    }
                }
                Some(ExchangeUpdate::Event(_) | ExchangeUpdate::Stderr(_)) => {}
                Some(ExchangeUpdate::Finished(finished)) => {
                    outcome = Some(finished);
                    break;
                }
                None => break,
            },
        }
    }
    let _ = writeln!(stdout);

    match outcome {
        Some(ExchangeOutcome::Done { usage }) => {
            let total = session.snapshot();
            eprintln!(
                "[tokens] input={} output={} thoughts={} (session total {})",
                usage.input,
                usage.output,
                usage.thoughts,
                total.total()
            );
            ExitCode::SUCCESS
        }
        Some(ExchangeOutcome::Cancelled) => {
            eprintln!("[cancelled]");
            ExitCode::from(130)
        }
        Some(ExchangeOutcome::Failed(err)) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
        None => {
            eprintln!("exchange ended without an outcome");
            ExitCode::FAILURE
        }
    }
}
