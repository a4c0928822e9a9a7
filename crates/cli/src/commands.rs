//! CLI commands

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use serde_json::Value;
use tally_core::{FileStorage, SessionStore, Settings};
use tally_http::types::{Credentials, SignupRequest};
use tally_http::{ApiClient, ApiClientBuilder, ApiRequest};
use tracing::info;

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and persist the session
    Login {
        #[arg(short, long)]
        username: String,

        #[arg(short, long, env = "TALLY_PASSWORD", hide_env_values = true)]
        password: String,

        /// TOTP verification code
        #[arg(long)]
        code: Option<String>,
    },

    /// Create an account and persist its session
    Signup {
        #[arg(short, long)]
        username: String,

        #[arg(short, long)]
        email: String,

        #[arg(short, long, env = "TALLY_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// End the persisted session
    Logout,

    /// Show the logged-in identity
    Whoami,

    /// Send an authenticated request and print the response body
    Request {
        /// HTTP method
        method: String,

        /// Path relative to the API base URL
        path: String,

        /// JSON request body
        #[arg(long)]
        data: Option<String>,

        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "query", value_parser = parse_query_pair)]
        query: Vec<(String, String)>,
    },

    /// Print the effective configuration
    Config,
}

impl Commands {
    pub async fn execute(self, settings: Settings) -> Result<()> {
        let client = || connect(&settings);

        match self {
            Self::Login {
                username,
                password,
                code,
            } => {
                let mut credentials = Credentials::new(username, password);
                if let Some(code) = code {
                    credentials = credentials.with_verification_code(code);
                }
                let identity = client()?.login(&credentials).await?;
                print_json(&serde_json::to_value(identity)?)
            }
            Self::Signup {
                username,
                email,
                password,
            } => {
                let identity = client()?
                    .signup(&SignupRequest {
                        username,
                        email,
                        password,
                    })
                    .await?;
                print_json(&serde_json::to_value(identity)?)
            }
            Self::Logout => {
                if client()?.logout().await {
                    info!("Logged out");
                } else {
                    info!("No session to end");
                }
                Ok(())
            }
            Self::Whoami => match client()?.current_identity() {
                Some(identity) => print_json(&serde_json::to_value(identity)?),
                None => bail!("not logged in"),
            },
            Self::Request {
                method,
                path,
                data,
                query,
            } => {
                let method = method
                    .to_uppercase()
                    .parse()
                    .with_context(|| format!("invalid HTTP method '{method}'"))?;
                let mut request = ApiRequest::new(method, path);
                if let Some(data) = data {
                    let body: Value =
                        serde_json::from_str(&data).context("--data must be valid JSON")?;
                    request = request.json(&body)?;
                }
                request.query = query;

                let response = client()?.send(request).await?;
                match response.json::<Value>() {
                    Ok(body) => print_json(&body),
                    Err(_) => {
                        println!("{}", response.text());
                        Ok(())
                    }
                }
            }
            Self::Config => print_json(&serde_json::to_value(&settings)?),
        }
    }
}

fn connect(settings: &Settings) -> Result<ApiClient> {
    let storage = FileStorage::new(&settings.session.storage_dir);
    let session = Arc::new(SessionStore::open(
        Arc::new(storage),
        settings.session.options(),
    ));

    let client = ApiClientBuilder::from_settings(&settings.api)
        .session(session)
        .build()?;
    Ok(client)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_query_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}
