//! Demo entry point. Parses the layered configuration, initializes
//! logging, and runs a single tool call against an in-memory workbook so
//! the executor, DLP enforcement, and caching stack can be exercised
//! without a full MCP transport.

use clap::Parser;
use sheet_governor::{CliArgs, Executor, ExecutorConfig, InMemoryWorkbook, ServerConfig, ToolCall};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();
    let config = ServerConfig::from_args(cli)?;
    sheet_governor::init_logging(config.log_format, &config.log_level)?;

    tracing::info!(default_sheet = %config.default_sheet, "sheet-governor starting");

    let workbook = InMemoryWorkbook::new().with_sheet(&config.default_sheet);
    let mut executor = Executor::new(workbook, ExecutorConfig::from(&config));

    let call = ToolCall {
        tool: "read_range".to_string(),
        tool_call_id: "demo-1".to_string(),
        params: serde_json::json!({"range": "A1:A1"}),
    };
    let executed = executor.execute(call).await;
    println!("{}", serde_json::to_string_pretty(&executed.result)?);

    Ok(())
}
