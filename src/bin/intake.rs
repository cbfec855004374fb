//! CLI binary for edgequake-intake.
//!
//! A line-oriented chat front end over the library: plain lines are sent as
//! messages, slash commands attach files, toggle voice and inspect metrics.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_intake::pipeline::input::resolve_path;
use edgequake_intake::{
    ChatBackend, Collaborators, ConversationObserver, DecodingStatus, DocumentExtractor, FileBlob,
    HttpChatBackend, InputCoordinator, IntakeConfig, JsonFileStore, LlmChatBackend, Message,
    MessageContent, MessageKind, SessionState, SpeechBackend, UnsupportedSpeechBackend,
    ValidationError,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Terminal observer using indicatif ────────────────────────────────────────

/// Prints replies and decode results; shows a spinner while a reply is pending.
struct TerminalObserver {
    show_progress: bool,
    spinner: Mutex<Option<ProgressBar>>,
}

impl TerminalObserver {
    fn new(show_progress: bool) -> Arc<Self> {
        Arc::new(Self {
            show_progress,
            spinner: Mutex::new(None),
        })
    }

    fn spinner(&self) -> std::sync::MutexGuard<'_, Option<ProgressBar>> {
        self.spinner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ConversationObserver for TerminalObserver {
    fn on_busy_changed(&self, busy: bool) {
        let mut slot = self.spinner();
        if busy && self.show_progress {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {msg}  ⏱ {elapsed}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
            );
            bar.set_message("Waiting for reply…");
            bar.enable_steady_tick(Duration::from_millis(80));
            *slot = Some(bar);
        } else if let Some(bar) = slot.take() {
            bar.finish_and_clear();
        }
    }

    fn on_message_updated(&self, message: &Message) {
        if message.kind != MessageKind::UserFile || !message.decoding().is_terminal() {
            return;
        }
        let name = match &message.content {
            MessageContent::File(file) => file.name.as_str(),
            MessageContent::Text(_) => "file",
        };
        let decoded = message.decoded.as_deref().unwrap_or_default();
        let mark = if message.decoding() == DecodingStatus::Completed {
            green("✓")
        } else {
            red("✗")
        };
        eprintln!("{} {} {}", mark, bold(name), dim(decoded));
    }

    fn on_reply(&self, message: &Message) {
        // Spinner is still up; print above it.
        let text = message.as_text().unwrap_or_default();
        match self.spinner().as_ref() {
            Some(bar) => bar.println(format!("{} {}", cyan("◆"), text)),
            None => println!("{} {}", cyan("◆"), text),
        }
    }

    fn on_cleared(&self) {
        eprintln!("{}", dim("Conversation cleared."));
    }
}

const AFTER_HELP: &str = r#"COMMANDS (typed at the prompt):
  <text>                  Send a message
  /file <path>            Attach a PDF, PNG, JPEG or GIF; its text is sent automatically
  /voice                  Start or stop a voice utterance (needs --speech microphone)
  /metrics [on|off|clear] Show request timings, or toggle / reset them
  /clear                  Empty the conversation
  /quit                   Exit

EXAMPLES:
  # Talk to a local /chat proxy
  intake --endpoint http://127.0.0.1:8000

  # Call an LLM provider directly
  intake --backend llm --provider openai --model gpt-4.1-nano

  # Dictate through a local whisper server (build with --features microphone)
  intake --speech microphone --stt-endpoint http://127.0.0.1:9000/v1

ENVIRONMENT VARIABLES:
  INTAKE_ENDPOINT         Base URL of the /chat backend
  INTAKE_DATA_DIR         Directory holding the conversation log
  OPENAI_API_KEY          OpenAI API key (--backend llm, and --stt-api-key)
  INTAKE_SPEECH           Speech capture: none or microphone
  INTAKE_STT_ENDPOINT     Base URL of the /audio/transcriptions API
  EDGEQUAKE_LLM_PROVIDER  Provider for --backend llm
  EDGEQUAKE_MODEL         Model for --backend llm
  PDFIUM_LIB_PATH         Path to libpdfium, when not on the system search path
  RUST_LOG                Overrides --verbose / --quiet

SETUP:
  PDF pages need a pdfium shared library; OCR needs the `tesseract` executable
  with the language data for --ocr-lang installed. Microphone capture needs a
  build with `--features microphone` (ALSA headers on Linux).
"#;

/// Chat from the terminal with documents, images and text.
#[derive(Parser, Debug)]
#[command(
    name = "intake",
    version,
    about = "Chat from the terminal with documents, images and text",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Chat backend: the /chat HTTP proxy or an in-process LLM provider.
    #[arg(long, env = "INTAKE_BACKEND", value_enum, default_value = "http")]
    backend: BackendArg,

    /// Base URL of the /chat backend.
    #[arg(long, env = "INTAKE_ENDPOINT", default_value = "http://127.0.0.1:8000")]
    endpoint: String,

    /// LLM provider for --backend llm (openai, anthropic, gemini, ollama, …).
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID for --backend llm.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Path to a text file containing a system prompt (--backend llm).
    #[arg(long, env = "INTAKE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "INTAKE_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Chat request timeout in seconds.
    #[arg(long, env = "INTAKE_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Longest message accepted, in characters.
    #[arg(long, env = "INTAKE_MAX_CHARS", default_value_t = 4000)]
    max_chars: usize,

    /// PDF pages recognised per document.
    #[arg(long, env = "INTAKE_PAGES", default_value_t = 3)]
    pages: usize,

    /// PDF render upscale factor.
    #[arg(long, env = "INTAKE_RENDER_SCALE", default_value_t = 2.0)]
    scale: f32,

    /// Tesseract language(s), e.g. eng or eng+deu.
    #[arg(long, env = "INTAKE_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// Tesseract executable.
    #[arg(long, env = "INTAKE_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// Path to libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Speech capture: none, or record from the microphone and transcribe.
    #[arg(long, env = "INTAKE_SPEECH", value_enum, default_value = "none")]
    speech: SpeechArg,

    /// Spoken language as a BCP-47 tag.
    #[arg(long, env = "INTAKE_SPEECH_LANG", default_value = "en-US")]
    speech_lang: String,

    /// Input device name for --speech microphone; the default device if unset.
    #[arg(long, env = "INTAKE_INPUT_DEVICE")]
    input_device: Option<String>,

    /// Base URL of an OpenAI-compatible transcription API.
    #[arg(long, env = "INTAKE_STT_ENDPOINT", default_value = "https://api.openai.com/v1")]
    stt_endpoint: String,

    /// Transcription model.
    #[arg(long, env = "INTAKE_STT_MODEL", default_value = "whisper-1")]
    stt_model: String,

    /// Bearer token for the transcription API.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    stt_api_key: Option<String>,

    /// Directory holding the conversation log.
    #[arg(long, env = "INTAKE_DATA_DIR", default_value = ".intake")]
    data_dir: PathBuf,

    /// Conversation name; the log is stored as <data-dir>/<key>.json.
    #[arg(long, env = "INTAKE_STORE_KEY", default_value = "chat-messages")]
    store_key: String,

    /// Do not record request timings.
    #[arg(long, env = "INTAKE_NO_METRICS")]
    no_metrics: bool,

    /// Disable the spinner.
    #[arg(long, env = "INTAKE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INTAKE_VERBOSE")]
    verbose: bool,

    /// Suppress all logs except errors.
    #[arg(short, long, env = "INTAKE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum BackendArg {
    Http,
    Llm,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SpeechArg {
    None,
    Microphone,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli).await?;
    let backend: Arc<dyn ChatBackend> = match cli.backend {
        BackendArg::Http => Arc::new(
            HttpChatBackend::new(&config).context("Failed to build HTTP client")?,
        ),
        BackendArg::Llm => Arc::new(
            LlmChatBackend::resolve(cli.provider.as_deref(), cli.model.as_deref(), &config)
                .context("Failed to configure LLM provider")?,
        ),
    };

    let show_progress = !cli.quiet && !cli.no_progress;
    let collaborators = Collaborators::new(
        backend,
        Arc::new(JsonFileStore::at_dir(&cli.data_dir)),
        DocumentExtractor::from_config(&config),
        speech_backend(&cli, &config)?,
    )
    .with_observer(TerminalObserver::new(show_progress));

    let mut chat =
        InputCoordinator::open(config, collaborators).context("Failed to open conversation")?;
    print_history(&chat);
    eprintln!(
        "{}",
        dim("Type a message, /file <path>, /voice, /metrics, /clear or /quit.")
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };

        match command {
            "/quit" | "/exit" => break,
            "/clear" => chat.clear(),
            "/file" => attach(&mut chat, arg).await,
            "/voice" => match chat.toggle_voice().await {
                Ok(SessionState::Listening) => {
                    eprintln!("{}", cyan("● listening… /voice again to send"))
                }
                Ok(SessionState::Idle) => {}
                Err(e) => eprintln!("{} {}", red("✗"), e),
            },
            "/metrics" => metrics(&mut chat, arg),
            "/help" => eprintln!("{}", AFTER_HELP),
            _ if command.starts_with('/') => eprintln!("{} unknown command {}", red("✗"), command),
            _ => {
                let outcome = chat.submit(line, MessageKind::UserText).await;
                if let Err(ValidationError::Oversize { .. }) = outcome {
                    if let Some(notice) = chat.messages().last().and_then(Message::as_text) {
                        eprintln!("{} {}", red("✗"), notice);
                    }
                }
            }
        }
    }

    if chat.voice_state() == SessionState::Listening {
        chat.stop_voice().await;
    }
    Ok(())
}

/// Map CLI args to `IntakeConfig`.
async fn build_config(cli: &Cli) -> Result<IntakeConfig> {
    let mut builder = IntakeConfig::builder()
        .chat_endpoint(&cli.endpoint)
        .request_timeout_secs(cli.timeout)
        .max_input_chars(cli.max_chars)
        .max_pages(cli.pages)
        .render_scale(cli.scale)
        .ocr_language(&cli.ocr_lang)
        .tesseract_path(&cli.tesseract)
        .store_key(&cli.store_key)
        .metrics_enabled(!cli.no_metrics)
        .temperature(cli.temperature)
        .speech_language(&cli.speech_lang)
        .stt_endpoint(&cli.stt_endpoint)
        .stt_model(&cli.stt_model);

    if let Some(ref key) = cli.stt_api_key {
        builder = builder.stt_api_key(key);
    }
    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_library(path);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

/// Pick the speech backend for `--speech`.
fn speech_backend(cli: &Cli, config: &IntakeConfig) -> Result<Arc<dyn SpeechBackend>> {
    if cli.speech == SpeechArg::None {
        return Ok(Arc::new(UnsupportedSpeechBackend));
    }
    microphone_backend(cli, config)
}

#[cfg(feature = "microphone")]
fn microphone_backend(cli: &Cli, config: &IntakeConfig) -> Result<Arc<dyn SpeechBackend>> {
    use edgequake_intake::speech::microphone::MicrophoneSource;
    use edgequake_intake::{HttpTranscriber, RecordingSpeechBackend};

    let source = match cli.input_device.as_deref() {
        Some(name) => MicrophoneSource::named(name),
        None => MicrophoneSource::default_device(),
    };
    let transcriber =
        HttpTranscriber::new(config).context("Failed to build transcription client")?;
    tracing::info!("Speech transcribed via {}", transcriber.url());
    Ok(Arc::new(RecordingSpeechBackend::new(
        Arc::new(source),
        Arc::new(transcriber),
    )))
}

#[cfg(not(feature = "microphone"))]
fn microphone_backend(_cli: &Cli, _config: &IntakeConfig) -> Result<Arc<dyn SpeechBackend>> {
    anyhow::bail!("--speech microphone needs a build with `--features microphone`")
}

async fn attach(chat: &mut InputCoordinator, arg: &str) {
    if arg.is_empty() {
        eprintln!("{} usage: /file <path>", red("✗"));
        return;
    }
    match FileBlob::from_path(resolve_path(arg)) {
        Ok(blob) => {
            eprintln!("{} {}", dim("decoding"), bold(&blob.name));
            chat.attach_file(blob).await;
        }
        Err(e) => eprintln!("{} {}", red("✗"), e),
    }
}

fn metrics(chat: &mut InputCoordinator, arg: &str) {
    match arg {
        "on" => chat.metrics_mut().set_enabled(true),
        "off" => chat.metrics_mut().set_enabled(false),
        "clear" => chat.metrics_mut().clear(),
        _ => {
            let recorder = chat.metrics();
            eprintln!("{} {}", bold("metrics:"), recorder.summary());
            for sample in recorder.samples().take(10) {
                eprintln!(
                    "  {} {:>6} ms  {:>5} chars  {:>6.1} tok/s{}",
                    dim(&format!("#{}", sample.request_id)),
                    sample.latency.as_millis(),
                    sample.response_length,
                    sample.derived_rate,
                    sample
                        .model_info
                        .as_deref()
                        .map(|m| format!("  {}", dim(m)))
                        .unwrap_or_default()
                );
            }
            if !recorder.is_enabled() {
                eprintln!("{}", dim("  (recording is off; /metrics on to enable)"));
            }
        }
    }
}

fn print_history(chat: &InputCoordinator) {
    for message in chat.messages() {
        match (&message.kind, &message.content) {
            (MessageKind::BotReply, MessageContent::Text(t)) => println!("{} {}", cyan("◆"), t),
            (_, MessageContent::Text(t)) => println!("{} {}", dim("›"), t),
            (_, MessageContent::File(f)) => println!(
                "{} {} {}",
                dim("›"),
                bold(&f.name),
                dim(message.decoded.as_deref().unwrap_or_default())
            ),
        }
    }
}
