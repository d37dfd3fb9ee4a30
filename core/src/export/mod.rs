pub mod documents;
pub mod geojson;

pub use documents::{
    backup_collection, backup_events, damage_collection, route_collection, surface_color,
    write_document, BackupCollection, DamageCollection, RouteCollection,
};
pub use geojson::{Feature, FeatureCollection, Geometry};
