use crate::gui_bridge::model::VisualizationModel;
use std::{
    net::SocketAddr,
    sync::{Arc, PoisonError, RwLock},
    thread,
};
use tokio::runtime::Builder;
use warp::Filter;

pub fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

type SharedModel = Arc<RwLock<VisualizationModel>>;

/// Read-only HTTP view of the running ride: `/snapshot`, `/route` and
/// `/damages`.
pub struct TelemetryBridge {
    state: SharedModel,
}

impl TelemetryBridge {
    pub fn new(addr: SocketAddr) -> Self {
        let state: SharedModel = Arc::new(RwLock::new(VisualizationModel::default()));
        let state_for_filter = state.clone();
        let state_filter = warp::any().map(move || state_for_filter.clone());

        let snapshot_route = warp::path("snapshot")
            .and(warp::get())
            .and(state_filter.clone())
            .map(|state: SharedModel| {
                let guard = state.read().unwrap_or_else(PoisonError::into_inner);
                warp::reply::json(&guard.snapshot)
            });

        let route_route = warp::path("route")
            .and(warp::get())
            .and(state_filter.clone())
            .map(|state: SharedModel| {
                let guard = state.read().unwrap_or_else(PoisonError::into_inner);
                warp::reply::json(&guard.route)
            });

        let damages_route = warp::path("damages")
            .and(warp::get())
            .and(state_filter)
            .map(|state: SharedModel| {
                let guard = state.read().unwrap_or_else(PoisonError::into_inner);
                warp::reply::json(&guard.damages)
            });

        thread::spawn(move || {
            let routes = snapshot_route.or(route_route).or(damages_route);
            let runtime = match Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(err) => {
                    log::error!("telemetry bridge runtime failed: {err}");
                    return;
                }
            };
            runtime.block_on(async move {
                warp::serve(routes).run(addr).await;
            });
        });

        Self { state }
    }

    pub fn publish(&self, model: VisualizationModel) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(snapshot) = &model.snapshot {
            log::debug!(
                "[bridge] frames {}, segments {}, clusters {}",
                snapshot.frames,
                snapshot.segments,
                snapshot.clusters
            );
        }
        *guard = model;
    }

    pub fn publish_status(&self, message: &str) {
        log::info!("[bridge] {message}");
    }

    #[cfg(test)]
    pub fn current(&self) -> VisualizationModel {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
