// Remote side of a migration: XRPC calls against the source and target
// servers plus identity lookups against the PLC directory.
//
// Everything above this module talks to `PdsTransport`; `PdsClient` is the
// production implementation.

pub mod api;
pub mod auth;
pub mod errors;
pub mod pds_client;
pub mod session;
pub mod transport;
pub mod types;

pub use errors::{ClientError, ClientResult};
pub use pds_client::PdsClient;
pub use session::JwtUtils;
pub use transport::PdsTransport;
pub use types::{
    BlobPayload, ClientSessionCredentials, CreateAccountRequest, DidDocument,
    IdentityCredentials, MissingBlobsPage, RepoStatus, RepoStatusInfo, ServerDescription,
    ServiceEndpoint,
};
