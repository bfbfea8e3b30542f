use anyhow::Context;
use clap::Args;

use crate::cli::client::IdentityClient;
use crate::cli::format::{render, IdentityView};
use crate::cli::{CliError, OutputFormat};

pub const NO_USER_SPECIFIED: &str = "no user specified, please specify either username or email";

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(short = 'u', long, conflicts_with = "email", help = "Username of the identity")]
    pub username: Option<String>,

    #[arg(short = 'e', long, help = "Email address of the identity")]
    pub email: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml, help = "Output format")]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Username(String),
    Email(String),
}

impl ShowArgs {
    pub fn lookup(&self) -> Result<Lookup, CliError> {
        match (&self.username, &self.email) {
            (Some(u), _) if !u.is_empty() => Ok(Lookup::Username(u.clone())),
            (_, Some(e)) if !e.is_empty() => Ok(Lookup::Email(e.clone())),
            _ => Err(CliError::Usage(NO_USER_SPECIFIED.to_string())),
        }
    }
}

pub async fn handle(
    client: &IdentityClient,
    lookup: Lookup,
    format: OutputFormat,
) -> anyhow::Result<String> {
    let identity = match &lookup {
        Lookup::Username(username) => client.user(username).await?,
        Lookup::Email(email) => client.user_by_email(email).await?,
    };

    let owner_name = match &identity.owner {
        Some(owner) => match client.identity(owner).await {
            Ok(found) => Some(found.username),
            Err(e) => {
                tracing::debug!("Cannot resolve owner {}: {}", owner, e);
                None
            }
        },
        None => None,
    };

    render(&IdentityView::new(&identity, owner_name), format)
        .with_context(|| format!("cannot render {}", identity.username))
}
