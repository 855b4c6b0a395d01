use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, info};

use mir_core::{Data, FaceId, Interest, Nack, PushPacket};

/// Hook invoked at fixed points of the forwarding pipelines.
///
/// Every anchor returns a code: zero lets the pipeline continue, anything
/// else stops the current stage for that packet.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn on_incoming_interest(&self, _ingress: FaceId, _interest: &Interest) -> i32 {
        0
    }

    fn on_outgoing_interest(&self, _egress: FaceId, _interest: &Interest) -> i32 {
        0
    }

    fn on_incoming_data(&self, _ingress: FaceId, _data: &Data) -> i32 {
        0
    }

    fn on_outgoing_data(&self, _egress: FaceId, _data: &Data) -> i32 {
        0
    }

    fn on_incoming_nack(&self, _ingress: FaceId, _nack: &Nack) -> i32 {
        0
    }

    fn on_outgoing_nack(&self, _egress: FaceId, _nack: &Nack) -> i32 {
        0
    }

    fn on_incoming_push_packet(&self, _ingress: FaceId, _packet: &PushPacket) -> i32 {
        0
    }

    fn on_outgoing_push_packet(&self, _egress: FaceId, _packet: &PushPacket) -> i32 {
        0
    }
}

/// Plugins in registration order
#[derive(Default)]
pub struct PluginChain {
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
}

impl PluginChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) {
        info!("Registered plugin {}", plugin.name());
        self.plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(plugin);
    }

    /// Call `anchor` on each plugin in order, stopping at the first non-zero code.
    pub fn run<F>(&self, anchor: F) -> i32
    where
        F: Fn(&dyn Plugin) -> i32,
    {
        let plugins = self.plugins.read().unwrap_or_else(PoisonError::into_inner);
        for plugin in plugins.iter() {
            let code = anchor(plugin.as_ref());
            if code != 0 {
                debug!("Plugin {} stopped the pipeline (code {})", plugin.name(), code);
                return code;
            }
        }
        0
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|plugin| plugin.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mir_core::Name;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        code: i32,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(name: &'static str, code: i32) -> Arc<Self> {
            Arc::new(Self {
                name,
                code,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Plugin for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn on_incoming_interest(&self, _ingress: FaceId, _interest: &Interest) -> i32 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.code
        }
    }

    #[test]
    fn test_first_non_zero_code_short_circuits() {
        let chain = PluginChain::new();
        let pass = Fixed::new("pass", 0);
        let block = Fixed::new("block", 3);
        let never = Fixed::new("never", 7);
        chain.register(pass.clone());
        chain.register(block.clone());
        chain.register(never.clone());

        let interest = Interest::new(Name::from_str("/n"));
        let code = chain.run(|plugin| plugin.on_incoming_interest(FaceId(1), &interest));

        assert_eq!(code, 3);
        assert_eq!(pass.calls.load(Ordering::SeqCst), 1);
        assert_eq!(block.calls.load(Ordering::SeqCst), 1);
        assert_eq!(never.calls.load(Ordering::SeqCst), 0);
        assert_eq!(chain.names(), vec!["pass", "block", "never"]);
    }

    #[test]
    fn test_default_anchors_pass() {
        let chain = PluginChain::new();
        chain.register(Fixed::new("quiet", 0));
        let data = Data::new(Name::from_str("/n"), vec![]);

        assert_eq!(chain.run(|plugin| plugin.on_outgoing_data(FaceId(1), &data)), 0);
        assert_eq!(chain.len(), 1);
    }
}
