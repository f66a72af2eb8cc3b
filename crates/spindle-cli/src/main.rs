//! spindle - ファイル（または stdin）を CompactTransform で詰めて出力する
//!
//! ```text
//! spindle [--max-line-len N] [FILE]...
//! ```
//!
//! 結果は終わった順に 1 行 1 JSON で stdout に出ます。1 件でも失敗すれば終了コードは非 0。

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use spindle_core::{CompactTransform, Payload, PoolConfig, Runner, TaskError};
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

const STDIN_NAME: &str = "-";

#[derive(Debug, Parser)]
#[command(name = "spindle")]
#[command(about = "Compact source files on a pool of worker threads")]
#[command(version)]
struct Args {
    /// Wrap output lines once they reach this length
    #[arg(long)]
    max_line_len: Option<usize>,

    /// Files to compact (stdin when none are given)
    files: Vec<String>,
}

/// stdout に出す 1 行
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Line<'a> {
    Ok { name: &'a str, output: &'a str },
    Error { name: &'a str, error: &'a TaskError },
}

async fn read_inputs(files: &[String]) -> Result<BTreeMap<String, Payload>> {
    let mut batch = BTreeMap::new();
    if files.is_empty() {
        let mut code = String::new();
        tokio::io::stdin()
            .read_to_string(&mut code)
            .await
            .context("reading stdin")?;
        batch.insert(STDIN_NAME.to_string(), Payload::new(code));
        return Ok(batch);
    }

    for path in files {
        let code = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {path}"))?;
        batch.insert(path.clone(), Payload::new(code));
    }
    Ok(batch)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = PoolConfig::from_env()?;
    let batch = read_inputs(&args.files).await?;
    let total = batch.len();

    let runner = Runner::builder()
        .config(config)
        .transform(CompactTransform)
        .build()
        .await?;

    let options = args.max_line_len.map(|n| json!({ "max_line_len": n }));
    let mut results = runner.stream(batch, options);
    let mut failed = 0;

    while let Some((name, outcome)) = results.next().await {
        let line = match &outcome {
            Ok(output) => Line::Ok {
                name: &name,
                output,
            },
            Err(error) => {
                failed += 1;
                Line::Error { name: &name, error }
            }
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    info!(total, failed, "done");
    runner.terminate();

    if failed > 0 {
        bail!("{failed} of {total} inputs failed");
    }
    Ok(())
}
