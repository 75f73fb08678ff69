//! rimline-core: harvesting infrastructure shared by every source
//!
//! The bounded concurrency executor, the generic harvester run loop, the HTTP
//! transport seam, error classification and retry, OAuth tokens, identifier
//! normalization, and the logging/progress/shutdown plumbing.

pub mod auth;
pub mod backfill;
pub mod error;
pub mod harvest;
pub mod ids;
pub mod logging;
pub mod progress;
pub mod record;
pub mod retry;
pub mod shutdown;
pub mod throttle;
pub mod transport;

pub use auth::{OAuthSettings, TokenCache};
pub use backfill::{GraphBackfill, NoBackfill};
pub use error::{ErrorClass, FetchError};
pub use harvest::{
    FailurePolicy, Harvest, HarvestContext, HarvestSettings, HarvestState, HarvestSummary,
    Harvester,
};
pub use ids::{IdError, normalize_doi, normalize_orcid, normalize_ror, orcid_url, short_id};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use record::{Payload, SourceRecord};
pub use retry::{RetryPolicy, retry_transient};
pub use shutdown::Shutdown;
pub use throttle::Throttle;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
