use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Instant};

use anyhow::Context;
use clap::Parser;
use fake_user_agent::get_chrome_rua;
use kagami::{HttpClient, Mirror};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    ClientBuilder,
};
use tracing_subscriber::filter::LevelFilter;
use url::Url;

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
pub struct KagamiArgs {
    /// Url of the HLS playlist or DASH manifest to mirror
    #[clap(short, long)]
    input: Url,

    /// Output directory
    #[clap(short, long, default_value = "./hls-fetcher")]
    output: PathBuf,

    /// Max number of resources downloaded at the same time
    #[clap(short, long, default_value = "10")]
    concurrency: NonZeroUsize,

    /// Decrypt AES-128 segments instead of mirroring their keys
    #[clap(short, long)]
    decrypt: bool,

    /// HTTP Header used to download
    ///
    /// Custom header. eg. "Referer: https://example.com/".
    #[clap(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Cookies used to download, separated by `;`
    #[clap(long)]
    cookies: Option<String>,

    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,
}

impl KagamiArgs {
    fn client(&self) -> anyhow::Result<HttpClient> {
        let mut headers = HeaderMap::new();
        for header in &self.headers {
            let (key, value) = header
                .split_once(':')
                .with_context(|| format!("Invalid header: {header}"))?;
            headers.insert(
                HeaderName::from_str(key.trim())?,
                HeaderValue::from_str(value.trim())?,
            );
        }

        let client = HttpClient::new(
            ClientBuilder::new()
                .default_headers(headers)
                .user_agent(get_chrome_rua()),
        )?;
        if let Some(cookies) = &self.cookies {
            let cookies: Vec<String> = cookies
                .split(';')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
            client.add_cookies(&cookies, &self.input);
        }
        Ok(client)
    }

    fn output(&self) -> anyhow::Result<PathBuf> {
        Ok(if self.output.is_absolute() {
            self.output.clone()
        } else {
            std::env::current_dir()?.join(&self.output)
        })
    }
}

async fn run(args: KagamiArgs) -> anyhow::Result<()> {
    let output = args.output()?;
    let client = args.client()?;

    eprintln!("Input:       {}", args.input);
    eprintln!("Output:      {}", output.display());
    eprintln!("Concurrency: {}", args.concurrency);
    eprintln!("Decrypt:     {}", args.decrypt);

    let started_at = Instant::now();
    let report = Mirror::new(client, output)
        .concurrency(args.concurrency)
        .decrypt(args.decrypt)
        .run(args.input)
        .await?;

    eprintln!(
        "Mirrored {} resources in {:.2}s.",
        report.resources.len(),
        started_at.elapsed().as_secs_f64()
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = KagamiArgs::parse();

    let default_level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}
