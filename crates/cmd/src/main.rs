// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use jiff::SignedDuration;
use rangefetch_base::readable_size::ReadableSize;
use rangefetch_common_telemetry::{
    logging::{LogFormat, LoggingOptions, init_global_logging, parse_level},
    panic_hook::set_panic_hook,
};
use rangefetch_downloader::{
    BatchFetcher, DownloadCoordinator, DownloadError, DownloaderConfig, JobResult,
    WholeFileFetcher,
};
use snafu::{ResultExt, Whatever, whatever};
use tracing::info;

mod build_info;

#[derive(Debug, Parser)]
#[clap(
name = "rangefetch",
about= "Parallel ranged HTTP downloader",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Clone, Args)]
struct LoggingArgs {
    /// Log level directives, e.g. "info" or "info,rangefetch_downloader=debug"
    #[arg(long, global = true, value_parser = parse_level)]
    log_level: Option<String>,

    /// Log output format: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    /// Directory for rotating log files (stdout only when unset)
    #[arg(long, global = true)]
    log_dir: Option<String>,
}

impl LoggingArgs {
    fn options(&self) -> LoggingOptions {
        LoggingOptions::builder()
            .dir(self.log_dir.clone().unwrap_or_default())
            .maybe_level(self.log_level.clone())
            .log_format(self.log_format)
            .build()
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Get(GetArgs),
    Batch(BatchArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Download one resource with parallel range requests into a single file.
Exits with an error when any range did not complete.
Examples:

rangefetch get https://example.com/big.iso -o big.iso -w 8

")]
struct GetArgs {
    /// URL of the resource
    url: String,

    /// Output file, truncated and rewritten on every run
    #[arg(short, long)]
    output: PathBuf,

    /// Number of concurrent range workers
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// Connect timeout per connection, in seconds
    #[arg(long, default_value_t = 5)]
    connect_timeout: i64,

    /// Give up on unfinished ranges after this many seconds
    #[arg(long)]
    deadline: Option<i64>,

    /// Largest single write while streaming, e.g. "8KiB" or "1MiB"
    #[arg(long, default_value = "8KiB")]
    chunk_size: ReadableSize,

    /// Fetch the whole file in one request when the server does not report
    /// its size
    #[arg(long)]
    fallback_whole: bool,
}

impl GetArgs {
    async fn run(self) -> Result<(), Whatever> {
        let config = DownloaderConfig::builder()
            .workers(self.workers)
            .connect_timeout(SignedDuration::from_secs(self.connect_timeout))
            .chunk_size(self.chunk_size)
            .maybe_job_deadline(self.deadline.map(SignedDuration::from_secs))
            .build();
        let coordinator = DownloadCoordinator::new(config.clone())
            .whatever_context("invalid downloader configuration")?;

        let job = coordinator.job(&self.url, &self.output);
        let result = coordinator.run(&job).await;

        if self.fallback_whole
            && matches!(
                result.overall_error,
                Some(DownloadError::SizeUnavailable { .. })
            )
        {
            info!(url = %self.url, "size unknown, falling back to a whole-file fetch");
            let fetcher =
                WholeFileFetcher::new(&config).whatever_context("invalid downloader configuration")?;
            let bytes = fetcher
                .fetch_to(&self.url, &self.output)
                .await
                .with_whatever_context(|_| format!("whole-file fetch of {} failed", self.url))?;
            println!(
                "{} -> {} ({bytes} bytes, single request)",
                self.url,
                self.output.display()
            );
            return Ok(());
        }

        print_summary(&result);
        if !result.is_success() {
            whatever!("download of {} did not complete", self.url);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Fetch several whole files concurrently into a new timestamped directory.
Examples:

rangefetch batch https://example.com/a.jpg https://example.com/b.jpg --dir downloads

")]
struct BatchArgs {
    /// URLs to fetch
    #[arg(required = true)]
    urls: Vec<String>,

    /// Root directory; files land in `<DIR>/<unix-millis>/`
    #[arg(short, long)]
    dir: PathBuf,
}

impl BatchArgs {
    async fn run(self) -> Result<(), Whatever> {
        let fetcher = BatchFetcher::new(&DownloaderConfig::default())
            .whatever_context("invalid downloader configuration")?;
        let report = fetcher
            .fetch_all(self.urls, &self.dir)
            .await
            .whatever_context("failed to prepare batch directory")?;

        println!("{}", report.directory.display());
        for entry in &report.entries {
            match &entry.result {
                Ok(path) => println!("  ok     {} -> {}", entry.url, path.display()),
                Err(e) => println!("  failed {}: {e}", entry.url),
            }
        }

        let failed = report.failed();
        if failed > 0 {
            whatever!("{failed} of {} downloads failed", report.entries.len());
        }
        Ok(())
    }
}

fn print_summary(result: &JobResult) {
    println!("{} -> {}", result.url, result.output_path.display());
    for outcome in &result.outcomes {
        let state = outcome
            .error
            .as_ref()
            .map_or_else(|| "ok".to_string(), ToString::to_string);
        println!(
            "  #{:<3} {:<30} {:>12} bytes  {state}",
            outcome.index,
            outcome.range.to_string(),
            outcome.bytes_written,
        );
    }
    if let Some(ref e) = result.overall_error {
        println!("  stopped: {e}");
    }
    println!(
        "  {}: {}/{} bytes in {}",
        result.status, result.total_bytes_written, result.total_bytes_expected, result.elapsed
    );
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    let _guards = init_global_logging("rangefetch", &cli.logging.options());
    set_panic_hook();

    match cli.commands {
        Commands::Get(args) => args.run().await,
        Commands::Batch(args) => args.run().await,
    }
}
