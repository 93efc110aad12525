//! Screenshot Gateway - HTML to image rendering over JSON-RPC.

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use screenshot_gateway::browser::ChromiumLauncher;
use screenshot_gateway::config::{RenderOptions, ServeOptions};
use screenshot_gateway::rpc::{Outcome, METHODS};
use screenshot_gateway::server;

#[derive(Parser)]
#[command(name = "screenshot-gateway")]
#[command(about = "Render HTML to PNG/JPEG screenshots over JSON-RPC 2.0")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP JSON-RPC server
    Serve(ServeOptions),

    /// Render a local HTML file once and exit
    Render {
        /// HTML file to render
        html_file: PathBuf,

        /// Output image path (defaults to screenshot.<type>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Capture the first element matching this selector
        #[arg(long)]
        selector: Option<String>,

        /// Capture the whole scrollable page
        #[arg(long)]
        full_page: bool,

        /// Extra screenshot params as a JSON object
        #[arg(long)]
        params: Option<String>,

        /// Print the JSON-RPC response instead of writing the image
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        render: RenderOptions,
    },

    /// List the JSON-RPC methods
    Methods,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(options) => cmd_serve(options).await,
        Commands::Render {
            html_file,
            output,
            selector,
            full_page,
            params,
            json,
            render,
        } => {
            let mut extra = match params {
                Some(raw) => serde_json::from_str::<Value>(&raw).context("--params must be JSON")?,
                None => json!({}),
            };
            let Some(extra_obj) = extra.as_object_mut() else {
                bail!("--params must be a JSON object");
            };
            if let Some(selector) = selector {
                extra_obj.insert("selector".into(), Value::String(selector));
            }
            if full_page {
                extra_obj.insert("full_page".into(), Value::Bool(true));
            }
            cmd_render(html_file, output, extra, json, render).await
        }
        Commands::Methods => {
            for method in METHODS {
                println!("{:<12} {}", method.name, method.description);
            }
            Ok(())
        }
    }
}

fn init_tracing(options: &RenderOptions) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_dispatcher(options: &RenderOptions) -> Result<Arc<screenshot_gateway::rpc::Dispatcher>> {
    ChromiumLauncher::check_supported(options.browser_type)
        .context("Unsupported BROWSER_TYPE")?;
    let launcher = Arc::new(ChromiumLauncher::new(options.engine_config()));
    Ok(screenshot_gateway::dispatcher(
        launcher,
        options.max_concurrent as usize,
        options.request_defaults(),
    ))
}

async fn cmd_serve(options: ServeOptions) -> Result<()> {
    init_tracing(&options.render);

    let addr = options.listen_addr()?;
    let dispatcher = build_dispatcher(&options.render)?;

    tracing::info!(
        "Starting screenshot-gateway v{} (browser={:?}, headless={}, max_concurrent={})",
        env!("CARGO_PKG_VERSION"),
        options.render.browser_type,
        options.render.headless,
        options.render.max_concurrent
    );

    if !options.no_prewarm {
        tracing::info!("Pre-warming browser...");
        if let Err(e) = dispatcher.service().engine().prewarm().await {
            tracing::warn!("Browser pre-warm failed, will retry on first request: {}", e);
        }
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    server::serve(listener, dispatcher, server::shutdown_signal())
        .await
        .context("Server error")
}

async fn cmd_render(
    html_file: PathBuf,
    output: Option<PathBuf>,
    mut params: Value,
    json_output: bool,
    options: RenderOptions,
) -> Result<()> {
    init_tracing(&options);

    let html = tokio::fs::read_to_string(&html_file)
        .await
        .with_context(|| format!("Failed to read {}", html_file.display()))?;
    if let Some(obj) = params.as_object_mut() {
        obj.insert("html".into(), Value::String(html));
    }

    let dispatcher = build_dispatcher(&options)?;
    let request = json!({
        "jsonrpc": "2.0",
        "id": uuid::Uuid::new_v4().to_string(),
        "method": "screenshot",
        "params": params,
    });

    let response = dispatcher.handle(request.to_string().as_bytes()).await;
    dispatcher.service().shutdown().await;
    let response = response.context("No response for screenshot call")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&response.to_value())?);
        return Ok(());
    }

    match response.outcome {
        Outcome::Result(result) => {
            let encoded = result["image"].as_str().context("Response has no image")?;
            let image_type = result["image_type"].as_str().unwrap_or("png");
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .context("Invalid base64 image")?;
            let path = output.unwrap_or_else(|| PathBuf::from(format!("screenshot.{}", image_type)));
            tokio::fs::write(&path, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Saved {}x{} {} ({} bytes) to {}",
                result["width"],
                result["height"],
                image_type,
                bytes.len(),
                path.display()
            );
            Ok(())
        }
        Outcome::Error(error) => {
            bail!("{} (code {})", error.message, error.code.code())
        }
    }
}
