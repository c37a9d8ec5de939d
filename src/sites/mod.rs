//! Per-legislature scrapers.

mod registry;
mod traits;

pub mod assam;
pub mod karnataka;
pub mod kerala;
pub mod rajasthan;
pub mod rajya_sabha;
pub mod tamil_nadu;
pub mod telangana;
pub mod uttar_pradesh;
pub mod west_bengal;

pub use registry::LegislatureRegistry;
pub use traits::{Legislature, SiteProfile};

/// Global site registry.
pub static LEGISLATURES: std::sync::LazyLock<LegislatureRegistry> =
    std::sync::LazyLock::new(|| {
        let mut registry = LegislatureRegistry::new();
        registry.register(Box::new(assam::Assam::new()));
        registry.register(Box::new(karnataka::Karnataka::new()));
        registry.register(Box::new(kerala::Kerala::new()));
        registry.register(Box::new(rajasthan::Rajasthan::new()));
        registry.register(Box::new(rajya_sabha::RajyaSabha::new()));
        registry.register(Box::new(tamil_nadu::TamilNadu::new()));
        registry.register(Box::new(telangana::Telangana::new()));
        registry.register(Box::new(uttar_pradesh::UttarPradesh::new()));
        registry.register(Box::new(west_bengal::WestBengal::new()));
        registry
    });

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        assert_eq!(LEGISLATURES.all().len(), 9);
        assert_eq!(LEGISLATURES.find("assam").unwrap().site_id(), "assam");
        assert_eq!(LEGISLATURES.find("RS").unwrap().site_id(), "rajya-sabha");
        assert_eq!(LEGISLATURES.find("tn").unwrap().site_id(), "tamil-nadu");
        assert!(LEGISLATURES.find("goa").is_none());
    }

    #[test]
    fn test_site_ids_are_unique() {
        let mut ids: Vec<&str> = LEGISLATURES.all().iter().map(|s| s.site_id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 9);
    }
}
