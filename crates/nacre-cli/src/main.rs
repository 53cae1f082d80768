//! Nacre CLI - test harness for the nacre sandbox
//!
//! Usage:
//!   nacre -c "finalAnswer('hi')"      Run a snippet
//!   nacre script.js                   Run a script file
//!   nacre                             Read the script from stdin
//!
//! Capabilities can be stubbed with fixed replies:
//!   nacre --stub 'webSearch=[{"title":"x"}]' -c 'finalAnswer((await webSearch("q"))[0].title)'
//!
//! The run result is printed to stdout as JSON. The exit code is 1 when the
//! run reports an error.

use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use nacre::{AgentConfig, CapabilityError, CapabilityName, CapabilitySet, Sandbox};
use serde_json::Value;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "nacre", version, about = "Run JavaScript in the nacre sandbox")]
struct Args {
    /// Snippet to run
    #[arg(short = 'c', value_name = "CODE", conflicts_with = "file")]
    code: Option<String>,

    /// Script file to run; stdin is read when neither this nor -c is given
    file: Option<PathBuf>,

    /// JSON config file (same format the agent uses)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Wall-clock timeout in milliseconds [default: the config's step_timeout_ms]
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// V8 heap ceiling in megabytes
    #[arg(long)]
    memory_mb: Option<u64>,

    /// Captured output budget in characters
    #[arg(long)]
    max_output_chars: Option<usize>,

    /// Stub a capability with a fixed JSON reply, e.g. `notify={"sent":true}`
    #[arg(long = "stub", value_name = "NAME=JSON")]
    stubs: Vec<String>,
}

impl Args {
    fn script(&self) -> anyhow::Result<String> {
        if let Some(code) = &self.code {
            return Ok(code.clone());
        }
        if let Some(path) = &self.file {
            return std::fs::read_to_string(path)
                .with_context(|| format!("{}: failed to read script", path.display()));
        }
        let mut script = String::new();
        io::stdin()
            .read_to_string(&mut script)
            .context("failed to read stdin")?;
        Ok(script)
    }

    fn config(&self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::load(path)?,
            None => AgentConfig::default(),
        };
        if let Some(ms) = self.timeout_ms {
            config.step_timeout = Duration::from_millis(ms);
        }
        if let Some(mb) = self.memory_mb {
            config.memory_limit_mb = mb;
        }
        if let Some(chars) = self.max_output_chars {
            config.max_output_chars = chars;
        }
        config.validate()?;
        Ok(config)
    }

    fn capabilities(&self) -> anyhow::Result<CapabilitySet> {
        let mut capabilities = CapabilitySet::new();
        for stub in &self.stubs {
            let (name, reply) = parse_stub(stub)?;
            capabilities.insert(name, move |_args: Value| {
                let reply = reply.clone();
                async move { Ok::<_, CapabilityError>(reply) }
            })?;
        }
        Ok(capabilities)
    }
}

fn parse_stub(stub: &str) -> anyhow::Result<(CapabilityName, Value)> {
    let Some((name, json)) = stub.split_once('=') else {
        bail!("invalid stub {stub:?}: expected NAME=JSON");
    };
    let name: CapabilityName = name.trim().parse()?;
    let reply = serde_json::from_str(json)
        .with_context(|| format!("invalid JSON reply for stub {name}"))?;
    Ok((name, reply))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let args = Args::parse();
    let script = args.script()?;
    let config = args.config()?;
    let capabilities = args.capabilities()?;

    let sandbox = Sandbox::new(config.sandbox_limits());
    let result = sandbox
        .run(&script, &capabilities, config.step_timeout)
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.error.is_some() {
        std::process::exit(1);
    }
    Ok(())
}
