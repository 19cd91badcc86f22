use dotenvy::dotenv;
use mediarelay_core::config::{Settings, SettingsError};
use mediarelay_core::status::{ProcessStatus, StatusReporter, StatusSnapshot};
use mediarelay_runtime::{ServiceWorkerFactory, SessionSupervisor};
use mediarelay_transport_telegram::TelegramConnector;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    token_url: Regex,
    token_bare: Regex,
    api_key_query: Regex,
    api_key_header: Regex,
    password: Regex,
}

impl RedactionPatterns {
    /// Compile all patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)")?,
            token_bare: Regex::new(r"\b[0-9]{8,10}:[A-Za-z0-9_-]{35}\b")?,
            api_key_query: Regex::new(r"(?i)(api_?key=)[^\s&]+")?,
            api_key_header: Regex::new(r#"(?i)("?x-api-key"?\s*[:=]\s*"?)[^\s",}]+"#)?,
            password: Regex::new(r"(?i)(password=)[^\s&]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self.token_url.replace_all(input, "$1[TELEGRAM_TOKEN]");
        let output = self.token_bare.replace_all(&output, "[TELEGRAM_TOKEN]");
        let output = self.api_key_query.replace_all(&output, "$1[MASKED]");
        let output = self.api_key_header.replace_all(&output, "$1[MASKED]");
        let output = self.password.replace_all(&output, "$1[MASKED]");
        output.into_owned()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length; the redacted text may differ
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Before logging so nothing is written unredacted
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting mediarelay...");

    let status = StatusReporter::new();
    tokio::spawn(log_status_changes(status.subscribe()));

    let supervisor = SessionSupervisor::new(
        Arc::new(TelegramConnector::new()),
        Arc::new(ServiceWorkerFactory),
        status,
    );
    start_with(&supervisor, Settings::new()).await;

    wait_for_signals(&supervisor).await?;

    supervisor.stop().await;
    info!("Bye");
    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = if debug_mode {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(concat!(
                "mediarelay_bot=info,mediarelay_core=info,mediarelay_runtime=info,",
                "mediarelay_transport_telegram=info,hyper=warn,h2=error,reqwest=warn,teloxide=warn",
            ))
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

/// Start from the loaded settings; invalid settings leave the process
/// stopped with the reason recorded until a reload fixes them
async fn start_with(supervisor: &SessionSupervisor, loaded: Result<Settings, SettingsError>) {
    match loaded {
        Ok(settings) => {
            info!("Configuration loaded successfully.");
            supervisor.start(settings).await;
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            supervisor
                .status()
                .set(ProcessStatus::Stopped, Some(e.to_string()));
        }
    }
}

async fn log_status_changes(mut rx: watch::Receiver<StatusSnapshot>) {
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();
        match (snapshot.status, snapshot.last_error) {
            (s @ ProcessStatus::Error, Some(reason)) => {
                error!(status = %s, reason = %reason, "Status changed");
            }
            (s, Some(reason)) => warn!(status = %s, reason = %reason, "Status changed"),
            (s, None) => info!(status = %s, "Status changed"),
        }
    }
}

/// Block until Ctrl-C; `SIGHUP` re-reads settings and reloads in between
#[cfg(unix)]
async fn wait_for_signals(supervisor: &SessionSupervisor) -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Ctrl-C received, shutting down");
                return Ok(());
            }
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading configuration");
                match Settings::new() {
                    Ok(settings) => supervisor.reload(settings).await,
                    Err(e) => error!("Reload skipped, configuration is invalid: {}", e),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(_supervisor: &SessionSupervisor) -> io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> RedactionPatterns {
        let Ok(patterns) = RedactionPatterns::new() else {
            panic!("patterns must compile");
        };
        patterns
    }

    #[test]
    fn test_redacts_token_in_url() {
        let line = "POST https://api.telegram.org/bot123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw/getMe failed";
        let out = patterns().redact(line);
        assert!(!out.contains("AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw"));
        assert!(out.contains("/bot[TELEGRAM_TOKEN]/getMe"));
    }

    #[test]
    fn test_redacts_bare_token() {
        let out = patterns().redact("token=123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsawx");
        assert_eq!(out, "token=[TELEGRAM_TOKEN]");
    }

    #[test]
    fn test_redacts_service_secrets() {
        let p = patterns();
        assert_eq!(
            p.redact("GET http://tautulli:8181/api/v2?apikey=abc123&cmd=get_activity"),
            "GET http://tautulli:8181/api/v2?apikey=[MASKED]&cmd=get_activity"
        );
        assert_eq!(p.redact("X-Api-Key: deadbeef"), "X-Api-Key: [MASKED]");
        assert_eq!(
            p.redact("username=admin&password=hunter2"),
            "username=admin&password=[MASKED]"
        );
    }

    #[tokio::test]
    async fn test_invalid_settings_leave_process_stopped_with_reason() {
        let supervisor = SessionSupervisor::new(
            Arc::new(TelegramConnector::new()),
            Arc::new(ServiceWorkerFactory),
            StatusReporter::new(),
        );
        let invalid = SettingsError::OutOfRange {
            field: "general.update_seconds",
            value: 1,
            min: 10,
            max: 86_400,
        };

        start_with(&supervisor, Err(invalid)).await;

        let snapshot = supervisor.status().snapshot();
        assert_eq!(snapshot.status, ProcessStatus::Stopped);
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some("general.update_seconds must be between 10 and 86400, got 1")
        );
        supervisor.stop().await;
    }

    #[test]
    fn test_plain_lines_untouched() {
        let line = "Worker cycle finished slot=streams cycle=3";
        assert_eq!(patterns().redact(line), line);
    }
}
