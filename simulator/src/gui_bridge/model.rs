use serde::Serialize;
use surfacecore::export::{DamageCollection, RouteCollection};
use surfacecore::{RideSession, SessionSnapshot};

/// Latest view of the ride served to map clients.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VisualizationModel {
    pub snapshot: Option<SessionSnapshot>,
    pub route: Option<RouteCollection>,
    pub damages: Option<DamageCollection>,
}

impl VisualizationModel {
    pub fn from_session(session: &RideSession) -> Self {
        Self {
            snapshot: Some(session.snapshot()),
            route: Some(session.route_geojson()),
            damages: Some(session.damage_geojson()),
        }
    }
}
