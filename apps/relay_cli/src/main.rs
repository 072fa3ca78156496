use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::{ElementSnapshot, EventRelay, HttpTransport, MemoryDocument};
use shared::domain::{ElementId, EventKind, DEFAULT_MARKER_CLASS};
use tracing_subscriber::EnvFilter;

/// Fires one relayed event at a running server and prints what the page
/// would have received.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: String,
    /// Id of the element the event fires on.
    #[arg(long)]
    id: String,
    #[arg(long, default_value = "input")]
    event: EventKind,
    #[arg(long, default_value = "input")]
    tag: String,
    #[arg(long = "type", default_value = "text")]
    input_type: String,
    #[arg(long)]
    value: Option<String>,
    #[arg(long)]
    checked: Option<bool>,
    /// Other element ids present on the page; updates to anything else are
    /// reported as missing.
    #[arg(long = "target")]
    targets: Vec<String>,
}

fn build_document(args: &Args) -> MemoryDocument {
    let mut source = ElementSnapshot::new(args.id.as_str(), args.tag.as_str())
        .with_type(args.input_type.as_str())
        .with_class(DEFAULT_MARKER_CLASS);
    if let Some(value) = &args.value {
        source = source.with_property("value", value.as_str());
    }
    if let Some(checked) = args.checked {
        source = source.with_property("checked", checked);
    }

    let targets = args
        .targets
        .iter()
        .map(|id| ElementSnapshot::new(id.as_str(), "div").with_class(DEFAULT_MARKER_CLASS));
    MemoryDocument::with_elements(std::iter::once(source).chain(targets))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();

    let transport = HttpTransport::new(&args.server_url)
        .with_context(|| format!("invalid server url '{}'", args.server_url))?;
    let relay = EventRelay::new(Arc::new(build_document(&args)), Arc::new(transport));

    let report = relay
        .on_event(&ElementId::new(args.id.as_str()), args.event)
        .await
        .context("relayed event failed")?;

    let summary = serde_json::json!({
        "applied": report.applied,
        "missing": report.missing,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
