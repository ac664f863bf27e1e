//! Citation integrity: trusted references, the bibliography filter and
//! guarded lookups against external reference sources.

mod filter;
mod guard;
mod reference;

pub use filter::{CitationFilterReport, CitationIntegrityFilter};
pub use guard::{GuardSettings, GuardedReferenceSource, ReferenceSource, WindowRateLimiter};
pub use reference::{Reference, normalize_doi, normalize_title};

#[cfg(test)]
pub(crate) use guard::testing::StaticSource;
