//! Shared constants used across the mirror tools.

/// User agent string used for requests to legislature sites.
///
/// Several of the sites reject obvious non-browser clients, so requests carry a
/// realistic desktop browser user agent.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Licence attached to every uploaded item.
pub const PUBLIC_DOMAIN_LICENSE_URL: &str = "http://creativecommons.org/licenses/publicdomain/";

/// Archive collection shared by most of the legislature mirrors.
pub const PARLIAMENT_COLLECTION: &str = "parliamentofindia";

/// Downloads smaller than this are treated as error pages rather than PDFs.
pub const MIN_PDF_BYTES: u64 = 5000;

/// Number of items between processed-set checkpoints for most sites.
pub const CHECKPOINT_INTERVAL: usize = 5;
