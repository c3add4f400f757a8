use clap::{Args, Parser, Subcommand};
use thv_core::{OutputFormat, ProxyMode, TransportType};
use thv_registry::VerifyMode;

#[derive(Parser)]
#[command(name = "thv", version)]
#[command(about = "ToolHive: lifecycle manager for MCP servers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (text, json or mcpservers)
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an MCP server workload
    Run(Box<RunArgs>),

    /// List workloads
    List {
        /// Include stopped workloads
        #[arg(long, short = 'a')]
        all: bool,

        /// Filter by label key=value (repeatable, ANDed)
        #[arg(long = "label", value_name = "KEY=VALUE")]
        labels: Vec<String>,
    },

    /// Stop a workload (state is kept)
    Stop { name: String },

    /// Remove a workload and its configuration
    Rm { name: String },

    /// Restart a workload from its persisted configuration
    Restart { name: String },

    /// Show container logs, or prune proxy logs
    Logs {
        #[command(subcommand)]
        command: Option<LogsCommands>,

        /// Workload name
        name: Option<String>,

        /// Keep streaming new output
        #[arg(long, short = 'f')]
        follow: bool,

        /// Show the proxy's log instead of the container's
        #[arg(long)]
        proxy: bool,

        /// Limit to the last N lines
        #[arg(long)]
        tail: Option<u64>,
    },

    /// Run a standalone authenticating proxy without a container
    Proxy(Box<ProxyArgs>),

    /// Group operations
    Group {
        #[command(subcommand)]
        command: GroupCommands,
    },

    /// Read or write operator settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Secret store operations
    Secret {
        #[command(subcommand)]
        command: SecretCommands,
    },

    /// MCP client registration
    Client {
        #[command(subcommand)]
        command: ClientCommands,
    },

    /// Export a workload's RunConfig as JSON
    Export { name: String, path: String },

    /// Internal: supervise a detached workload's proxy
    #[command(hide = true)]
    Supervise { name: String },
}

#[derive(Args)]
pub struct RunArgs {
    /// Server name from the registry, an OCI image, or scheme://pkg
    pub identifier: String,

    /// Arguments passed to the MCP server after `--`
    #[arg(last = true)]
    pub cmd_args: Vec<String>,

    /// Workload name (derived from the identifier when omitted)
    #[arg(long)]
    pub name: Option<String>,

    /// Wire transport between container and proxy
    #[arg(long)]
    pub transport: Option<TransportType>,

    /// Outward HTTP flavor when transport is stdio
    #[arg(long)]
    pub proxy_mode: Option<ProxyMode>,

    /// Host the proxy binds (hostname resolved to IPv4)
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Proxy port (free ephemeral port when 0)
    #[arg(long, default_value_t = 0)]
    pub proxy_port: u16,

    /// Container-side port the MCP server listens on
    #[arg(long, default_value_t = 0)]
    pub target_port: u16,

    /// Group this workload belongs to
    #[arg(long)]
    pub group: Option<String>,

    /// Environment variable KEY=VALUE (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Volume mount HOST:CONTAINER[:ro] (repeatable)
    #[arg(long = "volume", value_name = "HOST:CTR[:ro]")]
    pub volumes: Vec<String>,

    /// Secret reference NAME,target=ENV (repeatable)
    #[arg(long = "secret", value_name = "NAME,target=ENV")]
    pub secrets: Vec<String>,

    /// Permission profile: none, network, or a JSON file path
    #[arg(long)]
    pub permission_profile: Option<String>,

    /// Authorization policy file forwarded to the proxy
    #[arg(long)]
    pub authz_config: Option<String>,

    /// Audit config file
    #[arg(long)]
    pub audit_config: Option<String>,

    /// Enable audit logging with default settings
    #[arg(long)]
    pub enable_audit: bool,

    /// Provenance verification: disabled, warn or enabled
    #[arg(long, default_value = "warn")]
    pub image_verification: VerifyMode,

    /// Label key=value applied to the workload (repeatable)
    #[arg(long = "label", value_name = "KEY=VALUE")]
    pub labels: Vec<String>,

    /// Expose only these tools through the proxy (repeatable)
    #[arg(long = "tools")]
    pub tools_filter: Vec<String>,

    // Inbound OIDC validation
    #[arg(long)]
    pub oidc_issuer: Option<String>,
    #[arg(long)]
    pub oidc_audience: Option<String>,
    #[arg(long)]
    pub oidc_jwks_url: Option<String>,
    #[arg(long)]
    pub oidc_introspection_url: Option<String>,
    #[arg(long)]
    pub oidc_client_id: Option<String>,
    #[arg(long)]
    pub oidc_client_secret: Option<String>,
    #[arg(long)]
    pub oidc_resource_url: Option<String>,
    #[arg(long)]
    pub oidc_allow_opaque_tokens: bool,

    // Outbound OAuth for remote/authenticated backends
    #[arg(long)]
    pub remote_auth_issuer: Option<String>,
    #[arg(long)]
    pub remote_auth_authorize_url: Option<String>,
    #[arg(long)]
    pub remote_auth_token_url: Option<String>,
    #[arg(long)]
    pub remote_auth_client_id: Option<String>,
    /// Falls back to TOOLHIVE_REMOTE_OAUTH_CLIENT_SECRET
    #[arg(long)]
    pub remote_auth_client_secret: Option<String>,
    #[arg(long = "remote-auth-scope")]
    pub remote_auth_scopes: Vec<String>,
    #[arg(long)]
    pub remote_auth_callback_port: Option<u16>,
    #[arg(long)]
    pub remote_auth_skip_browser: bool,
    #[arg(long)]
    pub remote_auth_timeout: Option<u64>,

    // RFC 8693 token exchange
    #[arg(long)]
    pub token_exchange_url: Option<String>,
    #[arg(long)]
    pub token_exchange_client_id: Option<String>,
    #[arg(long)]
    pub token_exchange_client_secret: Option<String>,
    #[arg(long)]
    pub token_exchange_audience: Option<String>,
    #[arg(long = "token-exchange-scope")]
    pub token_exchange_scopes: Vec<String>,
    /// Header to carry the exchanged token (replace strategy when unset)
    #[arg(long)]
    pub token_exchange_header: Option<String>,

    // OpenTelemetry
    #[arg(long)]
    pub otel_endpoint: Option<String>,
    #[arg(long)]
    pub otel_service_name: Option<String>,
    #[arg(long)]
    pub otel_sampling_ratio: Option<f64>,

    /// Isolate the container network
    #[arg(long)]
    pub isolate_network: bool,

    /// Strategic-merge patch applied to the pod on Kubernetes
    #[arg(long)]
    pub k8s_pod_patch: Option<String>,

    /// Stay in the foreground instead of detaching a supervisor
    #[arg(long)]
    pub foreground: bool,

    /// Start from an exported RunConfig instead of flags
    #[arg(long)]
    pub from_config: Option<String>,
}

#[derive(Args)]
pub struct ProxyArgs {
    pub name: String,

    /// Backend to forward to (scheme://host:port)
    #[arg(long)]
    pub target_uri: String,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 0)]
    pub proxy_port: u16,

    #[arg(long)]
    pub oidc_issuer: Option<String>,
    #[arg(long)]
    pub oidc_audience: Option<String>,
    #[arg(long)]
    pub oidc_jwks_url: Option<String>,
    #[arg(long)]
    pub oidc_introspection_url: Option<String>,
    #[arg(long)]
    pub oidc_client_id: Option<String>,
    #[arg(long)]
    pub oidc_client_secret: Option<String>,
    #[arg(long)]
    pub oidc_resource_url: Option<String>,
    #[arg(long)]
    pub oidc_allow_opaque_tokens: bool,
}

impl ProxyArgs {
    /// OIDC config from flags; `None` when no OIDC flag was given.
    pub fn oidc(&self) -> Option<thv_auth::OidcConfig> {
        if self.oidc_issuer.is_none()
            && self.oidc_jwks_url.is_none()
            && self.oidc_introspection_url.is_none()
        {
            return None;
        }
        Some(thv_auth::OidcConfig {
            issuer: self.oidc_issuer.clone(),
            audience: self.oidc_audience.clone(),
            jwks_url: self.oidc_jwks_url.clone(),
            introspection_url: self.oidc_introspection_url.clone(),
            client_id: self.oidc_client_id.clone(),
            client_secret: self.oidc_client_secret.clone(),
            resource_url: self.oidc_resource_url.clone(),
            allow_opaque_tokens: self.oidc_allow_opaque_tokens,
        })
    }
}

#[derive(Subcommand)]
pub enum LogsCommands {
    /// Remove proxy logs for workloads that no longer exist
    Prune,
}

#[derive(Subcommand)]
pub enum GroupCommands {
    /// Create a group
    Create { name: String },
    /// List groups
    List,
    /// Delete a group; members move to 'default' unless --with-workloads
    Rm {
        name: String,
        /// Cascade-delete the group's workloads
        #[arg(long)]
        with_workloads: bool,
    },
    /// List the workloads currently in a group
    Run { name: String },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print one setting
    Get { key: String },
    /// Set one setting
    Set { key: String, value: String },
    /// Remove one setting
    Unset { key: String },
    /// Print all settings
    List,
}

#[derive(Subcommand)]
pub enum SecretCommands {
    /// Initialize the secret store
    Setup,
    /// Store a secret (value read from stdin when omitted)
    Set { name: String, value: Option<String> },
    /// Print a secret value
    Get { name: String },
    /// Delete a secret
    Delete { name: String },
    /// List secret names
    List,
    /// Show the active provider and its capabilities
    Provider,
    /// Recreate an empty secret store
    ResetKeyring,
}

#[derive(Subcommand)]
pub enum ClientCommands {
    /// Show known clients and whether their config files exist
    Status,
    /// Register the detected clients on the default group
    Setup,
    /// Register clients on groups
    Register {
        #[arg(long = "client", required = true)]
        clients: Vec<String>,
        #[arg(long = "group", default_values_t = [String::from("default")])]
        groups: Vec<String>,
    },
    /// Remove a workload entry from a client's config
    Remove {
        #[arg(long)]
        client: String,
        #[arg(long)]
        workload: String,
    },
    /// List clients registered per group
    ListRegistered,
}
