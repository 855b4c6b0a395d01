use std::sync::Arc;

use serde_json::{json, Value};

use mir_fw::Forwarder;

/// Renders periodic forwarder reports as JSON.
///
/// The route list is only rebuilt when the FIB version moved since the
/// previous report.
pub struct StatsReporter {
    forwarder: Arc<Forwarder>,
    routes_version: Option<u64>,
    routes: Value,
    route_renders: u64,
}

impl StatsReporter {
    pub fn new(forwarder: Arc<Forwarder>) -> Self {
        Self {
            forwarder,
            routes_version: None,
            routes: Value::Null,
            route_renders: 0,
        }
    }

    pub fn routes(&mut self) -> Result<&Value, serde_json::Error> {
        let version = self.forwarder.fib().version();
        if self.routes_version != Some(version) {
            self.routes = serde_json::to_value(self.forwarder.fib().routes())?;
            self.routes_version = Some(version);
            self.route_renders += 1;
        }
        Ok(&self.routes)
    }

    /// How many times the route list had to be rebuilt
    pub fn route_renders(&self) -> u64 {
        self.route_renders
    }

    pub fn report(&mut self) -> Result<Value, serde_json::Error> {
        let stats = serde_json::to_value(self.forwarder.stats())?;
        let strategies = serde_json::to_value(self.forwarder.strategy_table().list())?;
        let routes = self.routes()?.clone();
        Ok(json!({
            "forwarder": stats,
            "strategies": strategies,
            "routes": routes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mir_core::{FaceId, Name};
    use mir_fw::ForwarderConfig;

    #[test]
    fn test_routes_rebuilt_only_on_fib_change() {
        let forwarder = Forwarder::new(ForwarderConfig::default()).unwrap();
        let mut reporter = StatsReporter::new(Arc::clone(&forwarder));

        reporter.report().unwrap();
        reporter.report().unwrap();
        assert_eq!(reporter.route_renders(), 1);

        forwarder
            .fib()
            .add_or_update(&Name::from_str("/a"), FaceId(3), 10);
        let report = reporter.report().unwrap();
        assert_eq!(reporter.route_renders(), 2);

        assert_eq!(report["routes"][0]["prefix"], "/a");
        assert_eq!(report["routes"][0]["face"], 3);
        assert_eq!(report["routes"][0]["cost"], 10);
        assert_eq!(report["strategies"][0]["strategy"], "best-route");
        assert_eq!(report["forwarder"]["fib_entries"], 1);
    }
}
