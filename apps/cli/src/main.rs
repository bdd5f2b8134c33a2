use std::path::PathBuf;

use anyhow::Result;
use expand_service::{ExpandConfig, Service};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, StructOpt)]
#[structopt(name = "expand-cli")]
struct Options {
    /// Catalog directory
    #[structopt(parse(from_os_str), long = "data-dir")]
    data_dir: Option<PathBuf>,

    /// JSON configuration file, flags override its values
    #[structopt(parse(from_os_str), long)]
    config: Option<PathBuf>,

    /// Use this segment count instead of the one recorded in the catalog
    #[structopt(long)]
    segments: Option<u32>,

    /// Partitions redistributed at the same time
    #[structopt(long)]
    workers: Option<usize>,

    /// Retries per failed partition
    #[structopt(long)]
    retries: Option<usize>,

    /// Stop starting new partitions after this many seconds
    #[structopt(long)]
    deadline: Option<u64>,

    #[structopt(long = "release-early-locks")]
    release_early_locks: bool,

    /// Run these statements and exit
    #[structopt(short = "e", long = "execute")]
    execute: Vec<String>,
}

impl Options {
    fn into_config(self) -> Result<(ExpandConfig, Vec<String>)> {
        let mut config = match &self.config {
            Some(path) => ExpandConfig::load(path)?,
            None => ExpandConfig::default(),
        };
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if self.segments.is_some() {
            config.segment_count = self.segments;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        if let Some(deadline) = self.deadline {
            config.deadline = Some(std::time::Duration::from_secs(deadline));
        }
        config.release_early_locks |= self.release_early_locks;
        config.validate()?;
        Ok((config, self.execute))
    }
}

fn history_path() -> Option<PathBuf> {
    dirs::document_dir().map(|path| path.join(".expand-cli-history"))
}

async fn execute(service: &Service, sql: &str) -> bool {
    match service.execute(sql).await {
        Ok(output) => {
            println!("{}", output);
            true
        }
        Err(err) => {
            println!("Error: {:#}", err);
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("expand_core=info,expand_service=info,warn")
        }))
        .init();

    let options: Options = Options::from_args();
    let (config, statements) = options.into_config()?;
    let service = Service::open(config)?;

    if !statements.is_empty() {
        for sql in &statements {
            if !execute(&service, sql).await {
                anyhow::bail!("statement failed: {}", sql);
            }
        }
        return Ok(());
    }

    let mut rl = rustyline::Editor::<()>::new();

    if let Some(path) = history_path() {
        let _ = rl.history_mut().load(&path);
    }

    loop {
        let readline = rl.readline(">> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.history_mut().add(line);
                execute(&service, line).await;
            }
            Err(_) => break,
        }
    }

    if let Some(path) = history_path() {
        let _ = rl.history_mut().save(&path);
    }

    tracing::debug!("shell closed");
    Ok(())
}
