use clap::Args;
use serde_json::json;

use crate::auth::{generate_jwt, Claims};
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::tenant::TenantId;

#[derive(Args, Debug)]
pub struct TokenArgs {
    #[arg(long, help = "Tenant the token is scoped to")]
    pub tenant: Option<String>,

    #[arg(long, default_value = "dev-user", help = "Subject (user id)")]
    pub sub: String,

    #[arg(long = "group", help = "Group membership, repeatable")]
    pub groups: Vec<String>,

    #[arg(long, help = "Lifetime in hours (defaults to SECURITY_JWT_EXPIRY_HOURS)")]
    pub hours: Option<u64>,
}

pub fn handle(args: TokenArgs, config: &AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    if config.security.jwt_secret.is_empty() {
        anyhow::bail!("SECURITY_JWT_SECRET is not configured");
    }

    // Same validation the server applies, so a bad tenant fails here
    let tenant = args.tenant.map(TenantId::parse).transpose()?;
    let hours = args.hours.unwrap_or(config.security.jwt_expiry_hours);

    let claims = Claims::new(args.sub, tenant.map(String::from), args.groups, hours);
    let token = generate_jwt(&claims, &config.security.jwt_secret)?;

    match output_format {
        OutputFormat::Text => println!("{}", token),
        OutputFormat::Json => output_success(
            &output_format,
            "Token generated",
            Some(json!({ "token": token, "claims": claims })),
        )?,
    }
    Ok(())
}
