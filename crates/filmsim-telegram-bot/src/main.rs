use dotenvy::dotenv;
use filmsim_core::config::FilmSimSettings;
use filmsim_transport_telegram::config::{BotSettings, TelegramSettings};
use filmsim_transport_telegram::runner::run_bot;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Masks Telegram bot tokens (`<bot id>:<secret>`) in log output.
///
/// teloxide logs tokens inside API URLs (`/bot<id>:<secret>/getMe`); the
/// bare form shows up in configuration errors.
struct TokenRedactor {
    token: Regex,
}

impl TokenRedactor {
    /// Compile the token pattern
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token: Regex::new(
                r"(?P<bot>bot)[0-9]{8,10}:[A-Za-z0-9_-]+|[0-9]{8,10}:[A-Za-z0-9_-]{35}",
            )?,
        })
    }

    fn redact(&self, input: &str) -> String {
        self.token
            .replace_all(input, "${bot}[TELEGRAM_TOKEN]")
            .into_owned()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    redactor: Arc<TokenRedactor>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, redactor: Arc<TokenRedactor>) -> Self {
        Self { inner, redactor }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.redactor.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // The caller's buffer was consumed in full even if the redacted length differs.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    redactor: Arc<TokenRedactor>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, redactor: Arc<TokenRedactor>) -> Self {
        Self {
            make_inner,
            redactor,
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
        RedactingWriter::new((self.make_inner)(), Arc::clone(&self.redactor))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Compiled before logging so nothing is emitted unredacted
    let redactor = Arc::new(TokenRedactor::new().map_err(|e| {
        eprintln!("Failed to compile token pattern: {e}");
        e
    })?);

    init_logging(redactor);

    info!("Starting FilmSim TG Bot...");

    let settings = init_settings();

    run_bot(settings).await;

    info!("Shutdown complete.");
    Ok(())
}

fn init_logging(redactor: Arc<TokenRedactor>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, redactor);

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = if debug_mode {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "filmsim_core=info,filmsim_transport_telegram=info,filmsim_telegram_bot=info,teloxide=warn,sqlx=warn,hyper=warn,reqwest=warn,tokio=warn",
            )
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<BotSettings> {
    let filmsim_settings = match FilmSimSettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load FilmSim configuration: {}", e);
            std::process::exit(1);
        }
    };
    let telegram_settings = match TelegramSettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load telegram configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration loaded successfully.");
    Arc::new(BotSettings::new(filmsim_settings, telegram_settings))
}
