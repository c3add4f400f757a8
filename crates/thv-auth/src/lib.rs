//! Authentication: inbound token validation, OIDC discovery, outbound OAuth
//! flows with PKCE, and RFC 8693 token exchange.

pub mod authinfo;
pub mod config;
pub mod discovery;
pub mod flow;
pub mod jwks;
pub mod token_exchange;
pub mod validator;

pub use authinfo::ProtectedResourceMetadata;
pub use config::{HeaderStrategy, OidcConfig, RemoteAuthConfig, TokenExchangeConfig};
pub use discovery::{AuthChallenge, ChallengeScheme, DiscoveryDocument};
pub use flow::{OAuthFlowConfig, TokenSource, run_flow};
pub use token_exchange::TokenExchanger;
pub use validator::{AuthError, Claims, TokenValidator};
