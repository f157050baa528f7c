use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use design_api::{
    build_services,
    config::{load_settings_from, DEFAULT_CONFIG_FILE},
    Dashboard, SessionCell,
};
use shared::{domain::describe_age, protocol::StyleSummary, style::StyleKey};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "tattoo-cli", about = "Generate tattoo designs from the terminal")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Supabase access token for the signed-in user.
    #[arg(long)]
    access_token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the available styles as JSON.
    Styles,
    Generate {
        #[arg(long, default_value_t = StyleKey::default())]
        style: StyleKey,
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    /// Show the ten most recent designs.
    History,
    /// List every stored object, including ones without a record.
    Blobs,
    /// Revoke the access token upstream.
    SignOut,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("warn").init();
    let cli = Cli::parse();

    if let Command::Styles = cli.command {
        let styles: Vec<StyleSummary> = StyleKey::ALL.into_iter().map(StyleSummary::from).collect();
        println!("{}", serde_json::to_string_pretty(&styles)?);
        return Ok(());
    }

    let settings = load_settings_from(&cli.config)?;
    let services = build_services(&settings).await?;

    let session = SessionCell::init(None);
    if let Some(token) = cli.access_token.as_deref() {
        match services.auth.resolve(token).await {
            Ok(user) => session.set(user),
            Err(error) => warn!(%error, "continuing signed out"),
        }
    }

    if let Command::SignOut = cli.command {
        match (session.sign_out(), cli.access_token.as_deref()) {
            (Some(user), Some(token)) => {
                services.auth.sign_out(token).await;
                println!("Signed out {}", user.email.unwrap_or_else(|| user.id.to_string()));
            }
            _ => println!("Not signed in."),
        }
        return Ok(());
    }

    let dashboard = Dashboard::new(services.pipeline.clone());
    let identity = session.current().map(|user| user.id);
    // The follower applies the current identity, then stops once the cell
    // is gone.
    let following = dashboard.follow(&session);
    drop(session);
    following.await?;

    match cli.command {
        Command::Styles | Command::SignOut => {}
        Command::Generate { style, prompt } => {
            let prompt = prompt.join(" ");
            match dashboard.submit(&prompt, style).await {
                Ok(design) => {
                    println!("{}", design.url);
                    println!("saved as {} ({})", design.id, design.download_filename());
                }
                Err(err) => bail!(err),
            }
        }
        Command::History => {
            let state = dashboard.snapshot().await;
            if state.identity.is_none() {
                println!("Sign in to see your designs.");
            } else if state.history.is_empty() {
                println!("No designs yet.");
            }
            let now = Utc::now();
            for design in state.history {
                println!(
                    "{:<16} {}\n                 {}",
                    describe_age(design.created_at, now),
                    design.user_prompt(),
                    design.url
                );
            }
        }
        Command::Blobs => {
            let Some(user_id) = identity else {
                bail!("Sign in to list stored objects");
            };
            for url in services.pipeline.stored_objects(&user_id).await {
                println!("{url}");
            }
        }
    }

    Ok(())
}
