use crate::cli::utils::output_object;
use crate::cli::OutputFormat;
use crate::config::AppConfig;

/// The JWT secret is never serialized, so this is safe to paste into logs
pub fn handle(config: &AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    output_object(&output_format, &serde_json::to_value(config)?)
}
