use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use classic_core::BuilderConfig;
use events::{Event, EventBus, EventEnvelope};
use orchestrator::{
    logging_enabled, resolve_run_id, Builder, InMemoryCompute, InMemoryConnector, RecordingHook,
    ServiceError, Services,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "oci-classic")]
#[command(about = "Build Oracle Classic machine images", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a builder configuration file
    Validate { config: PathBuf },
    /// Show the steps and resource names a build would use
    Plan {
        config: PathBuf,

        #[arg(long)]
        run_id: Option<String>,
    },
    /// Run a build against the in-memory cloud
    Simulate {
        config: PathBuf,

        #[arg(long)]
        run_id: Option<String>,

        /// Compute operation that should fail, e.g. `create_snapshot`
        #[arg(long = "fail-on", value_name = "OPERATION")]
        fail_on: Vec<String>,

        /// Remote commands containing this text exit with status 1
        #[arg(long = "failing-command", value_name = "PATTERN")]
        failing_command: Vec<String>,

        /// Command the provisioner runs on the instance
        #[arg(long = "provision", default_value = "echo provisioned")]
        provision: Vec<String>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Validate { config } => validate(&config),
        Commands::Plan { config, run_id } => plan(&config, run_id),
        Commands::Simulate {
            config,
            run_id,
            fail_on,
            failing_command,
            provision,
            json,
        } => {
            let options = SimulateOptions {
                run_id,
                fail_on,
                failing_command,
                provision,
                json,
            };
            simulate(&config, options).await
        }
    }
}

fn load_config(path: &Path) -> Result<BuilderConfig> {
    let mut config = BuilderConfig::load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    config
        .prepare()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

fn validate(path: &Path) -> Result<()> {
    let config = load_config(path)?;

    println!("{} is valid", path.display());
    println!("  Variant:     {}", config.variant());
    println!("  Image:       {}", config.image_name);
    println!("  Image list:  {}", config.dest_image_list);
    Ok(())
}

fn plan(path: &Path, run_id: Option<String>) -> Result<()> {
    let config = load_config(path)?;
    let run_id = run_id.unwrap_or_else(resolve_run_id);

    let services = Services::new(
        Arc::new(InMemoryCompute::new()),
        Arc::new(InMemoryConnector::new()),
        Arc::new(RecordingHook::new()),
    );
    let builder = Builder::new(config, services);
    let workflow = builder.plan(&run_id)?;

    println!();
    println!("Build plan ({}), run {}", builder.config().variant(), run_id);
    println!("════════════════════════════════════════");
    for (index, (name, kind)) in workflow
        .step_names()
        .iter()
        .zip(workflow.kinds())
        .enumerate()
    {
        println!("  {:>2}. {:<28} {:?}", index + 1, name, kind);
    }

    let resources = workflow.resource_names();
    if !resources.is_empty() {
        println!();
        println!("Resources:");
        for name in resources {
            println!("  {name}");
        }
    }
    println!();
    Ok(())
}

struct SimulateOptions {
    run_id: Option<String>,
    fail_on: Vec<String>,
    failing_command: Vec<String>,
    provision: Vec<String>,
    json: bool,
}

async fn simulate(path: &Path, options: SimulateOptions) -> Result<()> {
    let config = load_config(path)?;

    let compute = Arc::new(InMemoryCompute::new());
    for operation in &options.fail_on {
        compute.fail_on(operation, ServiceError::api(operation, "injected failure"));
    }
    let connector = Arc::new(InMemoryConnector::new());
    for pattern in &options.failing_command {
        connector.exit_code_for(pattern, 1);
    }
    let hook = options
        .provision
        .iter()
        .fold(RecordingHook::new(), |hook, command| hook.with_command(command));
    let services = Services::new(compute.clone(), connector, Arc::new(hook));

    let bus = EventBus::new();
    let rx = bus.subscribe();
    let mut builder = Builder::new(config, services).with_event_bus(bus);
    if let Some(run_id) = options.run_id {
        builder = builder.with_run_id(run_id);
    }

    let cancel = builder.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling build");
            cancel.cancel();
        }
    });

    let done = CancellationToken::new();
    let printer = {
        let done = done.clone();
        let json = options.json;
        tokio::spawn(print_events(rx, done, json))
    };

    let result = builder.run().await;
    done.cancel();
    let _ = printer.await;

    let leftovers = compute.live_resources();
    if !leftovers.is_empty() {
        println!();
        println!("Resources left behind:");
        for resource in &leftovers {
            println!("  {resource}");
        }
    }

    println!();
    match result? {
        Some(artifact) => {
            println!("Build finished: {artifact}");
            println!("  Builder: {}", artifact.builder_id());
            for file in artifact.files() {
                println!("  File:    {file}");
            }
        }
        None => println!("Build stopped before producing an artifact"),
    }
    Ok(())
}

async fn print_events(
    mut rx: tokio::sync::broadcast::Receiver<EventEnvelope>,
    done: CancellationToken,
    json: bool,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            received = rx.recv() => received,
            _ = done.cancelled() => break,
        };
        match envelope {
            Ok(envelope) => print_event(&envelope, json),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event printer fell behind");
            }
            Err(RecvError::Closed) => return,
        }
    }
    while let Ok(envelope) = rx.try_recv() {
        print_event(&envelope, json);
    }
}

fn print_event(envelope: &EventEnvelope, json: bool) {
    if json {
        match serde_json::to_string(envelope) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!("Failed to serialize event: {}", e),
        }
        return;
    }

    let line = match &envelope.event {
        Event::RunStarted { steps, .. } => format!("started ({} steps)", steps.len()),
        Event::RunCancelled { next_step, .. } => match next_step {
            Some(step) => format!("cancelled before {step}"),
            None => "cancelled".to_string(),
        },
        Event::RunFinished {
            success, executed, ..
        } => format!("finished success={success} executed={executed}"),
        Event::StepStarted { step, index, .. } => format!("[{}] {step}", index + 1),
        Event::StepCompleted { step, outcome, .. } => format!("    {step}: {outcome:?}"),
        Event::StepFailed { step, message, .. } => format!("    {step} failed: {message}"),
        Event::StepCleanedUp { step, .. } => format!("    cleaned up {step}"),
        Event::CleanupFailed { step, message, .. } => {
            format!("    cleanup of {step} failed: {message}")
        }
        Event::Message { message, .. } => format!("==> {message}"),
        Event::Error { message, .. } => format!("==> ERROR: {message}"),
    };
    println!("{:>4} {line}", envelope.sequence);
}

fn init_tracing() {
    let default_filter = if logging_enabled() {
        "oci_classic=debug,orchestrator=debug,classic_core=debug,events=debug"
    } else {
        "oci_classic=info,orchestrator=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
