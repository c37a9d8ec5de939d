use super::traits::Legislature;

/// Registry of mirrorable legislatures.
pub struct LegislatureRegistry {
    sites: Vec<Box<dyn Legislature>>,
}

impl LegislatureRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { sites: Vec::new() }
    }

    /// Register a site.
    pub fn register(&mut self, site: Box<dyn Legislature>) {
        self.sites.push(site);
    }

    /// Find a site by id or alias, case-insensitively.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&dyn Legislature> {
        self.sites
            .iter()
            .find(|s| s.matches(name))
            .map(AsRef::as_ref)
    }

    /// Get all registered sites.
    #[must_use]
    pub fn all(&self) -> &[Box<dyn Legislature>] {
        &self.sites
    }
}

impl Default for LegislatureRegistry {
    fn default() -> Self {
        Self::new()
    }
}
