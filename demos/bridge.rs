//! Dual-role MCP bridge.
//!
//! Demonstrates:
//! - Serving a tool registry to inbound WebSocket clients
//! - Auto-connecting to an external MCP server
//! - Listing the external server's tools over the correlated connection
//! - Graceful shutdown on Ctrl+C
//!
//! Usage:
//!   cargo run --example bridge
//!   cargo run --example bridge -- --debug
//!   cargo run --example bridge -- --no-wait
//!   MCP_EXTERNAL_WS_URL=ws://127.0.0.1:9000/ws cargo run --example bridge

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use mcp_ws_bridge::{Bridge, Request, Result, Tool, ToolRegistry, TransportEvent};
use serde_json::json;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const EXTERNAL_URL_ENV: &str = "MCP_EXTERNAL_WS_URL";

// ============================================================================
// Args
// ============================================================================

#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    no_wait: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            no_wait: args.iter().any(|a| a == "--no-wait"),
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== MCP WebSocket Bridge ===\n");

    // ========================================================================
    // Tools
    // ========================================================================

    let tools = Arc::new(ToolRegistry::new());
    tools.register(Tool::new("list_alarms", "List all alarms"));
    tools.register(
        Tool::new("create_alarm", "Create a new alarm").with_input_schema(json!({
            "type": "object",
            "properties": {
                "time": { "type": "string" },
                "label": { "type": "string" }
            },
            "required": ["time"]
        })),
    );
    println!("[Setup] Registered {} tools", tools.len());

    // ========================================================================
    // Bridge
    // ========================================================================

    let mut builder = Bridge::builder().handler(tools);
    if let Ok(url) = std::env::var(EXTERNAL_URL_ENV) {
        println!("[Setup] External server: {url}");
        builder = builder.external_url(url);
    }
    let bridge = builder.build()?;

    bridge.subscribe(Arc::new(|event: &TransportEvent| match event {
        TransportEvent::SessionOpened { session_id } => println!("  + session {session_id}"),
        TransportEvent::SessionClosed { session_id } => println!("  - session {session_id}"),
        TransportEvent::Unsolicited { message } => {
            println!("  ! external: {}", message.method().unwrap_or("<reply>"));
        }
        _ => {}
    }));

    bridge.start().await?;
    if let Some(url) = bridge.ws_url() {
        println!("[Serve] Clients connect to {url}\n");
    }

    // ========================================================================
    // External Tools
    // ========================================================================

    if bridge.external().is_connected() {
        match bridge.send_request(Request::new("tools/list", None)).await {
            Ok(response) => println!("[External] tools/list -> {}\n", response.result),
            Err(e) => println!("[External] tools/list failed: {e}\n"),
        }
    }

    // ========================================================================
    // Wait / Shutdown
    // ========================================================================

    if args.no_wait {
        println!("[--no-wait] Skipping wait");
    } else {
        println!("Press Ctrl+C to exit...");
        tokio::signal::ctrl_c().await.ok();
    }

    bridge.shutdown().await;
    println!("\n=== Done ===");
    Ok(())
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "mcp_ws_bridge=debug"
    } else {
        "mcp_ws_bridge=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}
