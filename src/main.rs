use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::path::Path;
use std::sync::Arc;
use voxline::cli::{Cli, Commands, ConfigAction};
use voxline::config::Config;
use voxline::defaults::{LLM_API_KEY_ENV, SPEECH_API_KEY_ENV};
use voxline::pipeline::{Fragment, RenderPool};
use voxline::providers::deepgram::DeepgramSpeech;
use voxline::providers::{Providers, Synthesizer, credential};
use voxline::telephony::server;

#[tokio::main]
async fn main() -> Result<()> {
    // Before logging: .env may set RUST_LOG
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    voxline::logging::init(cli.verbose, cli.quiet);
    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "ignoring unreadable .env file"),
    }

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            run_server(config).await?;
        }
        Some(Commands::Serve {
            bind,
            public_host,
            stall_timeout,
        }) => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(host) = public_host {
                config.server.public_host = Some(host);
            }
            if let Some(timeout) = stall_timeout {
                config.playback.stall_timeout_ms = u64::try_from(timeout.as_millis())
                    .context("stall timeout is too large")?;
            }
            run_server(config).await?;
        }
        Some(Commands::Check) => {
            handle_check(cli.config.as_deref())?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Speak { text, output }) => {
            let config = load_config(cli.config.as_deref())?;
            handle_speak(&config, &text, &output).await?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "voxline", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/voxline/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path())?,
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

async fn run_server(config: Config) -> Result<()> {
    config.validate()?;
    let providers = Providers::from_config(&config)?;
    tracing::info!(
        version = %voxline::version_string(),
        model = %config.llm.model,
        voice = %config.tts.voice_model,
        "starting voxline"
    );
    server::serve(config, providers).await?;
    Ok(())
}

/// Report configuration validity and missing credentials.
fn handle_check(custom_path: Option<&Path>) -> Result<()> {
    let mut ok = true;

    match load_config(custom_path).and_then(|c| c.validate().map_err(Into::into)) {
        Ok(()) => println!("  config      ok"),
        Err(e) => {
            println!("  config      FAILED: {:#}", e);
            ok = false;
        }
    }

    for name in [LLM_API_KEY_ENV, SPEECH_API_KEY_ENV] {
        match credential(name) {
            Ok(_) => println!("  {:<16} set", name),
            Err(_) => {
                println!("  {:<16} missing", name);
                ok = false;
            }
        }
    }

    if !ok {
        std::process::exit(1);
    }
    println!("All checks passed");
    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Dump => {
            print!("{}", Config::dump_template()?);
        }
    }
    Ok(())
}

/// Render one piece of text with the configured voice.
async fn handle_speak(config: &Config, text: &str, output: &Path) -> Result<()> {
    let synthesizer = DeepgramSpeech::from_config(&config.tts)?;
    tracing::info!(voice = %synthesizer.voice(), "synthesizing {} chars", text.len());

    let (pool, _outcomes) = RenderPool::new(Arc::new(synthesizer), 1);
    let rendered = pool.render(&Fragment::new(0, 0, text)).await?;
    std::fs::write(output, &rendered.audio)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Wrote {} bytes to {}", rendered.audio.len(), output.display());
    Ok(())
}
