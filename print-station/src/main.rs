use anyhow::Context;
use print_station::{Config, build_service, utils::init_logger};
use std::io::{IsTerminal, Read};

/// Prints the orders piped on stdin (one JSON object or an array), or a test
/// page when stdin is a terminal.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment (.env, logging)
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    init_logger(&config.log_level, config.log_json);

    tracing::info!("Print station starting...");

    // 2. Service
    let service = build_service(&config);
    if !service.is_supported() {
        anyhow::bail!("No USB or serial support on this host");
    }
    let _subscription = service.on_state_change(|state| {
        tracing::info!(
            connected = state.connected,
            transport = ?state.connection_type,
            "Printer state changed"
        );
    });

    // 3. Connect
    service.connect().await?;
    tracing::info!(device = ?service.device_info(), "Printer ready");

    // 4. Print
    let result = if std::io::stdin().is_terminal() {
        service.print_text("Print station test page").await
    } else {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read orders from stdin")?;
        let value: serde_json::Value =
            serde_json::from_str(&input).context("Orders must be JSON")?;
        let payloads = match value {
            serde_json::Value::Array(items) => items,
            single => vec![single],
        };
        tracing::info!(count = payloads.len(), "Printing orders");
        service
            .print_payloads(payloads, &config.receipt_format())
            .await
    };

    service.disconnect().await;
    result?;

    Ok(())
}
