//! Runs every requested transfer concurrently and reports the results.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use resumefetch_transfer::{
    FallbackFetcher, FastOpenTransport, HttpTransport, InterruptWatcher, PrimaryFetcher,
    ResumeCoordinator, TlsOptions, TransferError, TransferOutcome, TransferRequest,
};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::config::ClientConfig;
use crate::trace::TraceWriter;

/// Transport and output settings resolved from flags and the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub tls: TlsOptions,
    pub timeouts: resumefetch_transfer::Timeouts,
    pub fallback_origin: Option<String>,
    pub quiet: bool,
    pub qlog: bool,
}

impl Settings {
    pub fn resolve(cli: &Cli, config: &ClientConfig) -> Self {
        Self {
            tls: TlsOptions {
                insecure: cli.insecure || config.insecure,
                key_log: cli.keylog.clone().or_else(|| config.keylog.clone()),
            },
            timeouts: config.timeouts(),
            fallback_origin: cli
                .fallback_origin
                .clone()
                .or_else(|| config.fallback_origin.clone()),
            quiet: cli.quiet,
            qlog: cli.qlog,
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = ClientConfig::load(cli.config.as_deref())?;
    let settings = Settings::resolve(&cli, &config);

    // Configuration errors abort before any transfer starts.
    let requests = cli
        .urls
        .iter()
        .map(|url| TransferRequest::parse(url).with_context(|| format!("invalid URL {url}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let coordinator = build_coordinator(&settings)?;

    let interrupt = InterruptWatcher::from_ctrl_c();
    let mut tasks = Vec::with_capacity(requests.len());
    for request in requests {
        let url = request.url.to_string();
        info!("GET {url}");
        let coordinator = coordinator.clone();
        let interrupt = interrupt.child();
        let qlog = settings.qlog;
        let task = tokio::spawn(async move { fetch_one(coordinator, request, interrupt, qlog).await });
        tasks.push((url, task));
    }

    let mut failures = 0usize;
    let mut stdout = tokio::io::stdout();
    for (url, task) in tasks {
        match task.await {
            Ok(Ok(outcome)) => {
                info!(
                    %url,
                    bytes = outcome.bytes.len(),
                    primary = outcome.primary_len,
                    fallback = outcome.fallback_len,
                    resumed_at = outcome.resumed_at,
                    "transfer succeeded"
                );
                if !settings.quiet {
                    stdout
                        .write_all(&outcome.bytes)
                        .await
                        .context("failed to write response body")?;
                    stdout.flush().await?;
                }
            }
            Ok(Err(e)) => {
                failures += 1;
                report_failure(&url, &e);
            }
            Err(e) => {
                failures += 1;
                error!(%url, "transfer task failed: {e}");
            }
        }
    }

    if failures > 0 {
        warn!(failures, "some transfers failed");
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn build_coordinator(settings: &Settings) -> anyhow::Result<ResumeCoordinator> {
    let primary = HttpTransport::new(&settings.tls, settings.timeouts)
        .context("failed to build the primary transport")?;
    let mut fallback = FastOpenTransport::new(settings.timeouts);
    if let Some(origin) = &settings.fallback_origin {
        fallback = fallback.with_origin(origin.clone());
    }

    Ok(ResumeCoordinator::new(
        PrimaryFetcher::new(Arc::new(primary)).with_read_idle(settings.timeouts.read_idle),
        FallbackFetcher::new(Arc::new(fallback)).with_read_idle(settings.timeouts.read_idle),
    ))
}

async fn fetch_one(
    coordinator: ResumeCoordinator,
    request: TransferRequest,
    interrupt: InterruptWatcher,
    qlog: bool,
) -> Result<TransferOutcome, TransferError> {
    if !qlog {
        return coordinator.run(request, &interrupt).await;
    }

    match TraceWriter::create(Path::new(".")).await {
        Ok((writer, events)) => {
            let result = coordinator.with_events(events).run(request, &interrupt).await;
            writer.finish().await;
            result
        }
        Err(e) => {
            warn!("{e:#}");
            coordinator.run(request, &interrupt).await
        }
    }
}

fn report_failure(url: &str, err: &TransferError) {
    match err {
        TransferError::Resume {
            offset,
            retained,
            fallback_received,
            source,
        } => error!(
            %url,
            offset,
            retained = retained.len(),
            fallback_received,
            "resume failed, partial data discarded: {source}"
        ),
        other => error!(%url, "transfer failed: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "resumefetch-client",
            "--fallback-origin",
            "10.0.0.1:80",
            "https://example.com/",
        ])
        .unwrap();
        let config = ClientConfig {
            fallback_origin: Some("127.0.0.1:8080".into()),
            insecure: true,
            ..ClientConfig::default()
        };

        let settings = Settings::resolve(&cli, &config);
        assert_eq!(settings.fallback_origin.as_deref(), Some("10.0.0.1:80"));
        assert!(settings.tls.insecure);
        assert!(!settings.quiet);
    }

    #[test]
    fn config_fills_unset_flags() {
        let cli = Cli::try_parse_from(["resumefetch-client", "-q", "https://example.com/"]).unwrap();
        let config = ClientConfig {
            keylog: Some("/tmp/keys".into()),
            ..ClientConfig::default()
        };
        let settings = Settings::resolve(&cli, &config);
        assert_eq!(settings.tls.key_log, Some("/tmp/keys".into()));
        assert!(settings.quiet);
        assert_eq!(settings.fallback_origin, None);
    }

    #[tokio::test]
    async fn invalid_url_aborts_before_transfers() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("client.toml");
        std::fs::write(&config, "").unwrap();

        let cli = Cli::try_parse_from([
            "resumefetch-client",
            "--config",
            config.to_str().unwrap(),
            "ftp://example.com/file",
        ])
        .unwrap();
        let err = run(cli).await.unwrap_err();
        assert!(format!("{err:#}").contains("invalid URL"));
    }
}
