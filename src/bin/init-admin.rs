//! Seeds the first admin account from the command line.
//!
//! Values missing from flags or the environment are prompted for on stdin.
//! Exits non-zero once any user exists.

use std::{
    io::{self, BufRead, Write},
    sync::Arc,
};

use anyhow::Context;
use axum::extract::FromRef;
use clap::Parser;

use sitegate::{
    auth::{dto::RegisterRequest, reconcile::Reconciler},
    config::AppConfig,
    db,
    error::AppError,
    state::AppState,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Create the first admin user", long_about = None)]
struct Args {
    #[arg(long, env = "ADMIN_EMAIL")]
    email: Option<String>,

    #[arg(long, env = "ADMIN_NAME")]
    name: Option<String>,

    /// Prefer the prompt or ADMIN_PASSWORD over passing this on the command line.
    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

fn prompt(label: &str) -> anyhow::Result<String> {
    let mut out = io::stdout();
    write!(out, "{label}: ")?;
    out.flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .with_context(|| format!("read {label}"))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn value_or_prompt(value: Option<String>, label: &str) -> anyhow::Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => prompt(label),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    sitegate::init_tracing("sitegate=info,init_admin=info");
    let args = Args::parse();

    let config = Arc::new(AppConfig::from_env()?);
    let pool = db::connect(&config).await?;
    db::migrate(&pool).await;
    let state = AppState::init(config, pool)?;

    if !state.users.is_empty().await? {
        anyhow::bail!("users already exist; refusing to create another admin");
    }

    let request = RegisterRequest {
        name: value_or_prompt(args.name, "Name")?,
        email: value_or_prompt(args.email, "Email")?,
        password: value_or_prompt(args.password, "Password")?,
    };

    match Reconciler::from_ref(&state).bootstrap_admin(request).await {
        Ok((user, _)) => {
            println!(
                "Admin user created: id={} email={}",
                user.id,
                user.email.as_deref().unwrap_or_default()
            );
            Ok(())
        }
        Err(AppError::BadRequest { details, .. }) => {
            for d in &details {
                eprintln!("{}: {}", d.field, d.message);
            }
            anyhow::bail!("invalid admin details")
        }
        Err(e) => Err(anyhow::anyhow!("could not create admin: {e}")),
    }
}
