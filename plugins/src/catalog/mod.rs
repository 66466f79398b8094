mod rules;
mod static_catalog;

pub use rules::{is_web_service, AdjustmentRule, FollowUpRule, Trigger};
pub use static_catalog::{host_of, CatalogFile, StaticToolCatalog};
