use crate::cache::AnswerCache;
use crate::outbound::OutboundProbe;
use crate::redirect::RedirectListProvider;
use crate::roots::RootHintsProvider;

/// The process-wide state the original implementation kept as package-level
/// globals (answer caches, root-hints snapshot, redirect-list snapshot,
/// outbound-IP memo), now owned by one long-lived handle constructed once at
/// startup and shared via `Arc` with every worker. See SPEC_FULL.md §4.J/§9.
pub struct ResolverHandle {
    pub cache: AnswerCache,
    pub roots: RootHintsProvider,
    pub redirect: RedirectListProvider,
    pub outbound: OutboundProbe,
}

impl ResolverHandle {
    pub fn new() -> Self {
        ResolverHandle {
            cache: AnswerCache::new(),
            roots: RootHintsProvider::new(),
            redirect: RedirectListProvider::new(),
            outbound: OutboundProbe::new(),
        }
    }
}

impl Default for ResolverHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResolverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverHandle").finish_non_exhaustive()
    }
}
