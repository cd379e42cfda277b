use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use diffpad::config::{strings, Settings};
use diffpad::languages::{LanguageId, LANGUAGE_OPTIONS};
use diffpad::provider::{HttpGateway, ModelId, Provider};
use diffpad::review::request_review;
use diffpad::session::{Session, Theme};
use diffpad::store::FileStore;
use diffpad::terminal::{print_notice, TerminalRenderer};
use diffpad::ReviewError;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "diffpad",
    about = "Edit code, snapshot it, and get AI reviews of what changed",
    version
)]
struct Cli {
    /// Directory holding session state (overrides the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show language, model and document state
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Switch language (lists languages when no id is given)
    Lang {
        id: Option<String>,
        /// Save unsaved changes before switching
        #[arg(long)]
        save: bool,
    },
    /// Replace the editor text from a file or stdin
    Edit {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print one version of the active document
    Show {
        #[arg(long, value_enum, default_value_t = Version::Current)]
        version: Version,
    },
    /// Snapshot the editor text
    Save,
    /// Reset the editor text to the language template
    Revert,
    /// List available models
    Models,
    /// Select a model, e.g. `gemini.gemini-1.5-flash`
    Model { id: String },
    /// Set (or clear, with an empty value) a provider API key
    Key {
        provider: String,
        /// Key value; read from stdin when omitted
        #[arg(long)]
        value: Option<String>,
    },
    /// Show or change the prompt text
    Prompt {
        #[arg(long)]
        global: Option<String>,
        /// Prompt for the active language
        #[arg(long)]
        language: Option<String>,
        /// Restore the default prompts for the active language
        #[arg(long)]
        reset: bool,
    },
    /// Save and request a review of the changes (Ctrl-C cancels)
    Review,
    /// Print the conversation of the active language
    Chat,
    /// Set the theme, or toggle it when omitted
    Theme {
        #[arg(value_enum)]
        theme: Option<ThemeArg>,
    },
    /// Set the editor pane width in percent
    Pane { percent: f64 },
    /// Show the settings in effect
    Config {
        /// Write them to the config file
        #[arg(long)]
        write: bool,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Version {
    Current,
    Saved,
    Default,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ThemeArg {
    Dark,
    Light,
}

impl From<ThemeArg> for Theme {
    fn from(value: ThemeArg) -> Self {
        match value {
            ThemeArg::Dark => Theme::Dark,
            ThemeArg::Light => Theme::Light,
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("DIFFPAD_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn open_session(data_dir: Option<PathBuf>) -> Result<Session> {
    let mut settings = Settings::load();
    if data_dir.is_some() {
        settings.data_dir = data_dir;
    }
    let dir = settings
        .data_dir()
        .ok_or_else(|| anyhow!("Could not determine data directory; pass --data-dir"))?;
    tracing::debug!(dir = %dir.display(), config = %Settings::config_location(), "opening session");
    Ok(Session::open(Arc::new(FileStore::new(dir)), settings))
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read stdin")?;
    Ok(buf)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut session = open_session(cli.data_dir)?;

    match cli.command {
        Commands::Status { json } => status(&mut session, json)?,
        Commands::Lang { id, save } => match id {
            Some(id) => switch_language(&mut session, LanguageId::new(id), save),
            None => list_languages(&session),
        },
        Commands::Edit { file } => {
            let text = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => read_stdin()?,
            };
            session.edit(text)?;
            if session.document().matches_default() {
                print_notice(strings::UNCHANGED_FROM_DEFAULT);
            }
        }
        Commands::Show { version } => {
            let doc = session.document();
            let text = match version {
                Version::Current => doc.current_text(),
                Version::Saved => doc.saved_text(),
                Version::Default => doc.default_text(),
            };
            println!("{}", text);
        }
        Commands::Save => {
            if session.save() {
                print_notice("Saved.");
            } else {
                print_notice(strings::NO_CHANGES_TO_SAVE);
            }
        }
        Commands::Revert => {
            if session.document().matches_default() {
                print_notice(strings::UNCHANGED_FROM_DEFAULT);
            }
            session.revert_to_default();
        }
        Commands::Models => list_models(&session),
        Commands::Model { id } => {
            session.set_model(ModelId::parse(&id)?)?;
            print_notice(&format!("Model set to {}", session.model()));
        }
        Commands::Key { provider, value } => {
            let provider: Provider = provider.parse()?;
            let value = match value {
                Some(v) => v,
                None => read_stdin()?,
            };
            session.set_credential(provider, &value);
            let state = if session.credentials().has(provider) { "saved" } else { "cleared" };
            print_notice(&format!("{} key {}; model is {}", provider, state, session.model()));
        }
        Commands::Prompt {
            global,
            language,
            reset,
        } => {
            if reset {
                session.reset_prompts();
            }
            if let Some(text) = global {
                session.set_global_prompt(text)?;
            }
            if let Some(text) = language {
                session.set_language_prompt(text)?;
            }
            println!("Global prompt:\n  {}", session.effective_global_prompt());
            println!(
                "{} prompt:\n  {}",
                session.language().label(),
                session.effective_language_prompt()
            );
        }
        Commands::Review => review(&mut session).await?,
        Commands::Chat => {
            let log = session.conversation();
            if log.is_empty() {
                print_notice("No conversation yet for this language.");
            } else {
                TerminalRenderer::stdout(session.theme()).print_log(&log)?;
            }
        }
        Commands::Theme { theme } => {
            let theme = theme.map(Theme::from).unwrap_or_else(|| session.theme().toggled());
            session.set_theme(theme);
            print_notice(&format!("Theme: {}", theme));
        }
        Commands::Pane { percent } => {
            let applied = session.set_left_percent(percent);
            print_notice(&format!("Editor pane: {:.0}%", applied));
        }
        Commands::Config { write } => {
            println!("{}", serde_json::to_string_pretty(session.settings())?);
            if write {
                session.settings().save()?;
                print_notice(&format!("Wrote {}", Settings::config_location()));
            }
        }
    }

    Ok(())
}

fn status(session: &mut Session, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&session.summary())?);
        return Ok(());
    }
    let language = session.language().clone();
    let model = session.model().clone();
    let has_key = session.credentials().has(model.provider());
    let unchanged = session.is_unchanged();
    let doc = session.document();

    println!("Language:  {} ({})", language.label(), language);
    println!(
        "Model:     {}{}",
        model,
        if has_key { "" } else { "  [no API key]" }
    );
    println!(
        "Document:  {}",
        match (doc.matches_default(), doc.has_unsaved_changes()) {
            (true, _) => "default template",
            (false, true) => "unsaved changes",
            (false, false) => "saved",
        }
    );
    println!(
        "Review:    {}",
        if unchanged {
            strings::NO_CHANGES_SINCE_LAST_PROMPT
        } else {
            "ready"
        }
    );
    Ok(())
}

fn switch_language(session: &mut Session, lang: LanguageId, save: bool) {
    if !save && session.document().has_unsaved_changes() {
        print_notice(strings::UNSAVED_SWITCH);
        print_notice("Keeping them unsaved; pass --save to save first.");
    }
    if session.switch_language(lang, save) {
        print_notice("Saved.");
    }
    let label = session.language().label().to_string();
    if !session.language().is_known() {
        print_notice(&format!("'{}' has no template; starting blank.", label));
    }
    print_notice(&format!("Language: {}", label));
}

fn list_languages(session: &Session) {
    for option in LANGUAGE_OPTIONS {
        let marker = if option.id == session.language().as_str() { "*" } else { " " };
        println!("{} {:<12} {}", marker, option.id, option.label);
    }
}

fn list_models(session: &Session) {
    for model in ModelId::catalog() {
        let provider = model.provider();
        let marker = if &model == session.model() { "*" } else { " " };
        let tier = if model.model() == provider.light_model() { "light" } else { "heavy" };
        let key = if session.credentials().has(provider) { "" } else { "  (no key)" };
        println!("{} {:<36} {}{}", marker, model, tier, key);
    }
}

async fn review(session: &mut Session) -> Result<()> {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    if io::stderr().is_terminal() {
        print_notice(strings::PROMPTING);
    }

    let gateway = HttpGateway::new();
    let mut renderer = TerminalRenderer::stdout(session.theme());
    let result = request_review(session, &gateway, cancel, &mut renderer).await;
    ctrl_c.abort();
    renderer.finish()?;

    match result {
        Ok(_) => Ok(()),
        Err(err) if err.is_refusal() => {
            print_notice(&err.to_string());
            Ok(())
        }
        // Already shown as part of the conversation
        Err(ReviewError::UserCancelled) | Err(ReviewError::StreamTimeout) => Ok(()),
        Err(err) => Err(err.into()),
    }
}
