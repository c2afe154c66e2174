//! Directory-provider integration: OAuth token refresh, the REST client for
//! account/license management and the provisioning workflow that ties them
//! to local storage.

mod error;
mod graph;
mod oauth;
mod provisioning;

pub use error::ProviderError;
pub use graph::{DirectoryApi, HttpDirectoryApi, NewDirectoryAccount, PrepaidUnits, SkuSummary};
pub use oauth::{authorize_url, HttpTokenEndpoint, TokenEndpoint, TokenResponse, GRAPH_SCOPE};
pub use provisioning::{ProvisionedAccount, ProvisioningService};
