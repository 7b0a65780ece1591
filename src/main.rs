//! Main module for the guichet CLI.
//!
//! Parses the command line, loads configuration, builds the
//! [`ChatEngine`], and dispatches the subcommand.
//!
//! # Examples
//!
//! ```sh
//! guichet init
//! guichet ask "When will my entry door be delivered?"
//! guichet interactive -c 12
//! guichet reindex
//! ```

use clap::Parser;
use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, SetAttribute, SetForegroundColor},
};
use once_cell::sync::OnceCell;
use std::{
    env,
    error::Error,
    fs,
    io::{Write, stdout},
    path::PathBuf,
};
use tracing::debug;

use guichet::{
    chat::ChatEngine,
    commands::{Cli, Commands},
    config::{GuichetConfig, load_config},
    template::{ChatTemplate, default_template, load_template},
};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Init) {
        return init();
    }

    let config_path = match env::var("GUICHET_CONFIG") {
        Ok(path) => PathBuf::from(path),
        Err(_) => guichet::config_dir()?.join("config.yaml"),
    };
    debug!("Loading config from: {}", config_path.display());
    let config = load_config(config_path.to_str().ok_or("config path is not valid UTF-8")?)?;

    match cli.command {
        Commands::Ask {
            question,
            conversation,
            template,
            client,
        } => {
            let template = resolve_template(template.as_deref()).await;
            let engine = ChatEngine::new(config, template)?;
            let conversation = engine
                .start_or_continue(None, conversation, client.as_deref().unwrap_or("Client"))
                .await?;
            let id = conversation.id().ok_or("conversation has no id")?;
            let reply = engine.handle_turn(id, &question, None).await?;
            println!("[conversation {id}]");
            print_reply(&reply)?;
        }
        Commands::Interactive {
            conversation,
            template,
            client,
        } => {
            let template = resolve_template(template.as_deref()).await;
            let engine = ChatEngine::new(config, template)?;
            let conversation = engine
                .start_or_continue(None, conversation, client.as_deref().unwrap_or("Client"))
                .await?;
            let id = conversation.id().ok_or("conversation has no id")?;
            println!("Conversation {id} with {}", conversation.client_name);
            engine.prewarm().await?;
            interactive_loop(&engine, id).await?;
        }
        Commands::Reindex => {
            let engine = ChatEngine::new(config, default_template())?;
            let index = engine.reindex().await?;
            println!("catalog index rebuilt: {} chunks", index.len());
        }
        Commands::Close {
            conversation,
            summary,
        } => {
            let engine = ChatEngine::new(config, default_template())?;
            match engine.close(conversation, summary.as_deref()).await? {
                Some(summary) => println!("{summary}"),
                None => println!("conversation was empty and has been removed"),
            }
        }
        Commands::Rename { conversation, name } => {
            let engine = ChatEngine::new(config, default_template())?;
            engine.rename_client(conversation, &name).await?;
            println!("conversation {conversation} renamed to {name}");
        }
        Commands::Init => unreachable!("handled above"),
    }

    Ok(())
}

/// Load the named template, or fall back to the installed default, or the
/// built-in one.
async fn resolve_template(name: Option<&str>) -> ChatTemplate {
    match name {
        Some(name) => match load_template(name).await {
            Ok(template) => template,
            Err(err) => {
                eprintln!("could not load template {name}: {err}; using default");
                default_template()
            }
        },
        None => match load_template("support_chat").await {
            Ok(template) => template,
            Err(_) => default_template(),
        },
    }
}

fn print_reply(reply: &str) -> Result<(), Box<dyn Error>> {
    let mut stdout = stdout();
    stdout.execute(SetForegroundColor(Color::Blue))?;
    stdout.execute(SetAttribute(Attribute::Bold))?;
    writeln!(stdout, "{reply}")?;
    stdout.execute(SetAttribute(Attribute::Reset))?;
    stdout.execute(SetForegroundColor(Color::Reset))?;
    Ok(())
}

async fn interactive_loop(engine: &ChatEngine, conversation_id: i32) -> Result<(), Box<dyn Error>> {
    let mut out = stdout();
    loop {
        out.execute(SetForegroundColor(Color::Green))?;
        write!(out, "\nYou: ")?;
        out.flush()?;
        out.execute(SetForegroundColor(Color::Reset))?;

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") {
            break;
        }

        match engine.handle_turn(conversation_id, input, None).await {
            Ok(reply) => print_reply(&reply)?,
            Err(err) => eprintln!("error: {err}"),
        }
    }
    Ok(())
}

/// Initializes the application's configuration and templates.
///
/// Creates the configuration directory, a starter `config.yaml`, and the
/// default support template, all in YAML.
fn init() -> Result<(), Box<dyn Error>> {
    let config_dir = guichet::config_dir()?;
    let templates_dir = config_dir.join("templates");
    fs::create_dir_all(&templates_dir)?;

    let template_path = templates_dir.join("support_chat.yaml");
    fs::write(&template_path, serde_yaml::to_string(&default_template())?)?;
    println!("wrote {}", template_path.display());

    let config_path = config_dir.join("config.yaml");
    let config = GuichetConfig {
        api_key: "CHANGEME".to_string(),
        api_base: "https://api.openai.com/v1".to_string(),
        model: "gpt-4o-mini".to_string(),
        embedding_model: "text-embedding-3-small".to_string(),
        embedding_dimensions: 1536,
        catalog_dir: config_dir.join("catalog").display().to_string(),
        index_dir: config_dir.join("index").display().to_string(),
        session_db_url: config_dir.join("guichet.db").display().to_string(),
        context_max_tokens: 8192,
        assistant_minimum_context_tokens: 2048,
        response_max_tokens: 500,
        retrieval_top_k: 4,
        chunk_size: 1500,
        chunk_overlap: 200,
        provider_max_attempts: 3,
        provider_timeout_secs: 30,
    };
    fs::write(&config_path, serde_yaml::to_string(&config)?)?;
    fs::create_dir_all(config_dir.join("catalog"))?;
    fs::create_dir_all(config_dir.join("index"))?;
    println!("wrote {}", config_path.display());

    Ok(())
}
