//! CLI argument definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::options::Options;

/// Translate API service descriptions to data-plane route and cluster
/// configuration
#[derive(Parser)]
#[command(name = "portico-configgen")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate route and cluster configuration
    Generate(GenerateArgs),

    /// Validate a service description without writing output
    Check(CheckArgs),
}

#[derive(clap::Args)]
pub struct GenerateArgs {
    /// Service description file (JSON or YAML)
    pub service_config: PathBuf,

    /// Service configuration version identifier
    #[arg(long, default_value = "")]
    pub config_id: String,

    /// Generator options file (JSON or YAML); flags override it
    #[arg(long)]
    pub options_file: Option<PathBuf>,

    #[command(flatten)]
    pub options: OptionsArgs,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "yaml")]
    pub format: OutputFormat,
}

#[derive(clap::Args)]
pub struct CheckArgs {
    /// Service description file (JSON or YAML)
    pub service_config: PathBuf,

    /// Service configuration version identifier
    #[arg(long, default_value = "")]
    pub config_id: String,

    /// Generator options file (JSON or YAML); flags override it
    #[arg(long)]
    pub options_file: Option<PathBuf>,

    #[command(flatten)]
    pub options: OptionsArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}

/// Generator option overrides, mirroring the `Options` fields.
#[derive(clap::Args)]
pub struct OptionsArgs {
    /// Local backend address URI
    #[arg(long)]
    pub backend_address: Option<String>,

    /// CORS preset: "basic" or "cors_with_regex"
    #[arg(long)]
    pub cors_preset: Option<String>,

    #[arg(long)]
    pub cors_allow_origin: Option<String>,

    #[arg(long)]
    pub cors_allow_origin_regex: Option<String>,

    #[arg(long)]
    pub cors_allow_methods: Option<String>,

    #[arg(long)]
    pub cors_allow_headers: Option<String>,

    #[arg(long)]
    pub cors_expose_headers: Option<String>,

    #[arg(long)]
    pub cors_allow_credentials: bool,

    /// Health check path
    #[arg(long)]
    pub healthz: Option<String>,

    #[arg(long)]
    pub backend_retry_ons: Option<String>,

    #[arg(long)]
    pub backend_retry_num: Option<u32>,

    #[arg(long)]
    pub http_request_timeout_secs: Option<u64>,

    #[arg(long)]
    pub service_account_key: Option<String>,

    #[arg(long)]
    pub token_agent_port: Option<u16>,

    #[arg(long)]
    pub metadata_url: Option<String>,

    #[arg(long)]
    pub disable_oidc_discovery: bool,

    /// Running outside GCP
    #[arg(long)]
    pub non_gcp: bool,

    #[arg(long)]
    pub enable_hsts: bool,

    /// Extra comma-separated query parameters the transcoder must ignore
    #[arg(long)]
    pub transcoding_ignore_query_parameters: Option<String>,

    #[arg(long)]
    pub cluster_connect_timeout_secs: Option<u64>,
}

impl OptionsArgs {
    /// Apply set flags on top of loaded options. Boolean flags only turn
    /// features on; an options file is the way to pin them off.
    pub fn apply(&self, options: &mut Options) {
        macro_rules! override_string {
            ($field:ident) => {
                if let Some(value) = &self.$field {
                    options.$field = value.clone();
                }
            };
        }
        override_string!(backend_address);
        override_string!(cors_preset);
        override_string!(cors_allow_origin);
        override_string!(cors_allow_origin_regex);
        override_string!(cors_allow_methods);
        override_string!(cors_allow_headers);
        override_string!(cors_expose_headers);
        override_string!(healthz);
        override_string!(backend_retry_ons);
        override_string!(service_account_key);
        override_string!(metadata_url);
        override_string!(transcoding_ignore_query_parameters);

        if let Some(value) = self.backend_retry_num {
            options.backend_retry_num = value;
        }
        if let Some(value) = self.http_request_timeout_secs {
            options.http_request_timeout_secs = value;
        }
        if let Some(value) = self.token_agent_port {
            options.token_agent_port = value;
        }
        if let Some(value) = self.cluster_connect_timeout_secs {
            options.cluster_connect_timeout_secs = value;
        }
        if self.cors_allow_credentials {
            options.cors_allow_credentials = true;
        }
        if self.disable_oidc_discovery {
            options.disable_oidc_discovery = true;
        }
        if self.non_gcp {
            options.non_gcp = true;
        }
        if self.enable_hsts {
            options.enable_hsts = true;
        }
    }
}
