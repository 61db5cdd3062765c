use clap::Parser;
use starindex::cli::{run_cli, CliArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // 日志写到 stderr，stdout 只输出 JSON
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run_cli(args).await {
        let output = serde_json::json!({
            "code": -1,
            "msg": format!("{:#}", e),
            "results": [],
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        std::process::exit(1);
    }
    Ok(())
}
