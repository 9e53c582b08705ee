use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use indicatif::{ProgressBar, ProgressStyle};

use crate::Error;
use crate::concurrent::concurrent_updates;
use crate::config::{Config, Consistency};
use crate::http::HttpRemote;
use crate::observability;
use crate::performance::PerformanceRunner;
use crate::probe::Prober;
use crate::report::{self, RunArtifact};
use crate::timer::Mark;

/// Benchmarks and consistency probes for a shopping-cart service
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Health(HealthCommand),
    Perf(PerfCommand),
    Consistency(ConsistencyCommand),
    Compare(CompareCommand),
}

/// check that the service reports itself healthy
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "health")]
struct HealthCommand {}

/// run the sequential performance test and write its results
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "perf")]
struct PerfCommand {}

/// run the consistency probes and the concurrent-update test
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "consistency")]
struct ConsistencyCommand {}

/// compare the results of two runs
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "compare")]
struct CompareCommand {
    /// results of the baseline run
    #[argh(positional)]
    baseline: PathBuf,

    /// results of the candidate run
    #[argh(positional)]
    candidate: PathBuf,

    /// write the comparison as JSON to this path
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,
}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();
    let config = Config::load(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("cartbench-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Health(HealthCommand {}) => {
                preflight(&config).await?;
                tracing::info!("OK");
                Ok(())
            }
            Command::Perf(PerfCommand {}) => performance(config).await,
            Command::Consistency(ConsistencyCommand {}) => consistency(config).await,
            Command::Compare(command) => compare_runs(command),
        }
    })
}

/// Builds the remote and verifies the service is healthy before any measurement.
async fn preflight(config: &Config) -> Result<HttpRemote> {
    let remote = HttpRemote::new(&config.target, config.timeout)?;
    remote
        .health(config.health_timeout)
        .await
        .context("pre-flight health check failed")?;
    Ok(remote)
}

fn write_artifact(config: &Config, kind: &str, artifact: &RunArtifact) -> Result<()> {
    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "failed to create output directory `{}`",
            config.output_dir.display()
        )
    })?;

    let path = RunArtifact::path(&config.output_dir, &config.target.backend, kind);
    artifact
        .write(&path)
        .with_context(|| format!("failed to write `{}`", path.display()))?;

    println!();
    println!("results written to {}", path.display());
    Ok(())
}

async fn performance(config: Config) -> Result<()> {
    let remote = preflight(&config).await?;

    let bar = ProgressBar::new(0)
        .with_message("Running performance test...")
        .with_style(ProgressStyle::with_template("{msg}\n{wide_bar} {pos}/{len}")?);
    bar.enable_steady_tick(Duration::from_millis(100));

    let run = PerformanceRunner::new(&remote, &config.performance, bar)
        .run()
        .await;

    report::print_summary(&config.target.backend, &run, config.performance.time_limit);

    let artifact = RunArtifact::new(&config.target.backend, run.started_at, &run.records);
    write_artifact(&config, "test", &artifact)
}

async fn consistency(config: Config) -> Result<()> {
    let remote = preflight(&config).await?;

    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} {elapsed}")?);
    bar.enable_steady_tick(Duration::from_millis(100));

    let artifact =
        run_consistency(&remote, &config.consistency, &config.target.backend, &bar).await;
    bar.finish_and_clear();

    write_artifact(&config, "consistency", &artifact)
}

/// Runs the consistency phases in order and collects everything they observed.
///
/// A phase whose setup call fails is reported as aborted and keeps that call. The next phase
/// still runs.
async fn run_consistency(
    remote: &HttpRemote,
    settings: &Consistency,
    backend: &str,
    bar: &ProgressBar,
) -> RunArtifact {
    let mut artifact = RunArtifact::new(backend, Mark::now().at(), &[]);
    let prober = Prober::new(remote, settings.probe);

    bar.set_message("Probing read-after-create:");
    let report = prober.read_after_create(settings.read_after_create).await;
    bar.suspend(|| report::print_probe("read after create", &report));
    artifact.record_visibility("read_after_create", &report);

    bar.set_message("Probing add-item visibility:");
    match prober.add_item_visibility(settings.add_item).await {
        Ok(report) => {
            bar.suspend(|| report::print_probe("add item visibility", &report));
            artifact.record_visibility("add_item_visibility", &report);
        }
        Err(err) => aborted(bar, "add item visibility", err, &mut artifact),
    }

    bar.set_message("Running concurrent updates:");
    match concurrent_updates(Arc::new(remote.clone()), settings.concurrent).await {
        Ok(report) => {
            bar.suspend(|| report::print_concurrent(&report));
            artifact.record_concurrent(&report);
        }
        Err(err) => aborted(bar, "concurrent updates", err, &mut artifact),
    }

    artifact
}

fn aborted(bar: &ProgressBar, name: &str, err: Error, artifact: &mut RunArtifact) {
    tracing::error!(
        error = &err as &dyn std::error::Error,
        phase = name,
        "phase aborted"
    );
    bar.suspend(|| report::print_aborted(name, &err));

    if let Error::Setup { record, .. } = err {
        artifact.extend(std::slice::from_ref(&record));
    }
}

fn read_artifact(path: &Path) -> Result<RunArtifact> {
    RunArtifact::read(path).with_context(|| format!("failed to read `{}`", path.display()))
}

fn compare_runs(command: CompareCommand) -> Result<()> {
    let baseline = read_artifact(&command.baseline)?;
    let candidate = read_artifact(&command.candidate)?;

    let comparison = baseline.compare(&candidate).map_err(anyhow::Error::msg)?;
    report::print_comparison(&comparison);

    if let Some(output) = command.output {
        report::write_comparison(&comparison, &output)
            .with_context(|| format!("failed to write `{}`", output.display()))?;
        println!();
        println!("comparison written to {}", output.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use cartbench_test::server::TestServer;

    use super::*;
    use crate::config::{ConcurrentPlan, ProbePolicy, Target};
    use crate::outcome::Operation;

    fn remote(server: &TestServer) -> HttpRemote {
        let target = Target {
            base_url: server.base_url(),
            cart_path: server.prefix().to_owned(),
            backend: "test".into(),
        };
        HttpRemote::new(&target, Duration::from_secs(5)).unwrap()
    }

    fn settings() -> Consistency {
        Consistency {
            probe: ProbePolicy {
                max_attempts: 5,
                interval: Duration::from_millis(1),
            },
            read_after_create: 3,
            add_item: 2,
            concurrent: ConcurrentPlan {
                workers: 2,
                ops_per_worker: 2,
                call_delay: Duration::from_millis(1),
                settle_delay: Duration::from_millis(10),
            },
        }
    }

    #[tokio::test]
    async fn consistency_run_persists_every_phase() {
        let server = TestServer::new().await;
        let remote = remote(&server);

        let artifact = run_consistency(&remote, &settings(), "test", &ProgressBar::hidden()).await;

        assert_eq!(artifact.backend, "test");
        let visibility = artifact.visibility_stats().unwrap();
        assert_eq!(visibility["read_after_create"].count, 3);
        assert_eq!(visibility["read_after_create"].success_rate(), Some(1.0));
        assert_eq!(visibility["add_item_visibility"].count, 2);

        let concurrent = artifact.consistency.concurrent.as_ref().unwrap();
        assert_eq!(concurrent.expected, 4);
        assert_eq!(concurrent.delta, Some(0));
    }

    #[tokio::test]
    async fn aborted_phases_keep_their_setup_call() {
        let server = TestServer::builder().fail_creates().start().await;
        let remote = remote(&server);

        let artifact = run_consistency(&remote, &settings(), "test", &ProgressBar::hidden()).await;

        // Three abandoned iterations plus one failed setup call per aborted phase.
        let creates = artifact.aggregate().unwrap()[&Operation::CreateCart];
        assert_eq!(creates.count, 5);
        assert_eq!(creates.success_count, 0);
        assert!(artifact.records.iter().all(|r| r.status_code == 500));

        let visibility = artifact.visibility_stats().unwrap();
        assert_eq!(visibility["read_after_create"].success_rate(), Some(0.0));
        assert!(!visibility.contains_key("add_item_visibility"));
        assert!(artifact.consistency.concurrent.is_none());
    }
}
