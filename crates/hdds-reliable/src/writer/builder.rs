// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Builder for `ReliableWriter`.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use super::heartbeat::HeartbeatTx;
use super::listener::WriterListener;
use super::stateful_writer::{ReliableWriter, WriterShared, WriterState};
use super::timers::{self, TimerKey, TimerThread};
use crate::config::{FlowControllerConfig, WriterConfig};
use crate::error::{Error, Result};
use crate::flow::{FlowController, FlowControllerClient, FlowControllerRegistry, FlowWriterProperties};
use crate::reliability::{HistoryCache, ReliableMetrics, WriterHistory};
use crate::transport::Transport;
use crate::types::Guid;

/// Builder for [`ReliableWriter`].
///
/// A transport is required. The flow controller is, in order of precedence:
/// the one given with [`flow_controller`](Self::flow_controller), the one
/// named by `WriterConfig::flow_controller` in the
/// [`flow_registry`](Self::flow_registry), or a private default
/// (`SyncWithFallback`, unlimited bandwidth).
pub struct ReliableWriterBuilder {
    guid: Guid,
    config: WriterConfig,
    transport: Option<Arc<dyn Transport>>,
    flow: Option<Arc<FlowController>>,
    registry: Option<Arc<FlowControllerRegistry>>,
    history: Option<Box<dyn WriterHistory>>,
    listener: Option<Arc<dyn WriterListener>>,
}

impl ReliableWriterBuilder {
    pub(super) fn new(guid: Guid) -> Self {
        Self {
            guid,
            config: WriterConfig::default(),
            transport: None,
            flow: None,
            registry: None,
            history: None,
            listener: None,
        }
    }

    pub fn config(mut self, config: WriterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Attach to an explicit flow controller.
    pub fn flow_controller(mut self, flow: Arc<FlowController>) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Resolve `WriterConfig::flow_controller` in `registry`.
    pub fn flow_registry(mut self, registry: Arc<FlowControllerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the default in-memory history.
    ///
    /// The history must be empty.
    pub fn history(mut self, history: Box<dyn WriterHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn WriterListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> Result<ReliableWriter> {
        self.config.validate()?;
        if self.guid.is_unknown() {
            return Err(Error::InvalidConfig(
                "writer GUID must not be GUID_UNKNOWN".to_string(),
            ));
        }
        let transport = self
            .transport
            .ok_or_else(|| Error::InvalidConfig("a transport is required".to_string()))?;

        let flow = match (self.flow, self.registry) {
            (Some(flow), _) => flow,
            (None, Some(registry)) => registry.resolve(self.config.flow_controller.as_deref())?,
            (None, None) => match &self.config.flow_controller {
                Some(name) => return Err(Error::UnknownFlowController(name.clone())),
                None => Arc::new(FlowController::new(FlowControllerConfig::default())?),
            },
        };

        let history = match self.history {
            Some(history) if !history.is_empty() => {
                return Err(Error::InvalidConfig(
                    "writer history must start empty".to_string(),
                ))
            }
            Some(history) => history,
            None => Box::new(HistoryCache::new(
                self.config.history,
                self.config.history_capacity(),
            )),
        };

        let (timer_handle, timer_rx) = timers::channel();
        let props = FlowWriterProperties {
            priority: self.config.priority,
            bandwidth_reservation: self.config.bandwidth_reservation,
        };
        let heartbeat_period = self.config.heartbeat_period;
        let guid = self.guid;

        let shared = Arc::new(WriterShared {
            guid,
            config: self.config,
            transport,
            flow: Arc::clone(&flow),
            state: Mutex::new(WriterState {
                history,
                proxies: BTreeMap::new(),
                last_seq: 0,
                failed: false,
                acked_by_all: 0,
                heartbeat: HeartbeatTx::new(),
            }),
            acked: Condvar::new(),
            metrics: ReliableMetrics::new(),
            listener: self.listener,
            timers: timer_handle.clone(),
        });

        let weak: Weak<WriterShared> = Arc::downgrade(&shared);
        let client: Weak<dyn FlowControllerClient> = weak.clone();
        flow.register_writer(guid, props, client)?;

        let timers = match TimerThread::spawn("hdds-wtimers".to_string(), timer_handle, timer_rx, weak)
        {
            Ok(timers) => timers,
            Err(err) => {
                flow.unregister_writer(&guid);
                return Err(err);
            }
        };
        if !heartbeat_period.is_zero() {
            shared
                .timers
                .arm(TimerKey::Heartbeat, Instant::now() + heartbeat_period);
        }

        log::debug!(
            "[writer] {} created (flow controller '{}', heartbeat {:?})",
            guid,
            flow.name(),
            heartbeat_period
        );
        Ok(ReliableWriter { shared, timers })
    }
}

impl std::fmt::Debug for ReliableWriterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableWriterBuilder")
            .field("guid", &self.guid)
            .field("config", &self.config)
            .field("has_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistoryKind;
    use crate::transport::ChannelTransport;
    use crate::types::{CacheChange, ChangeKind};

    fn guid() -> Guid {
        Guid::new([1; 12], [0, 0, 1, 0x02])
    }

    fn transport() -> Arc<dyn Transport> {
        let (transport, _rx) = ChannelTransport::unbounded();
        Arc::new(transport)
    }

    #[test]
    fn test_transport_required() {
        let err = ReliableWriter::builder(guid()).build().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_guid_rejected() {
        let err = ReliableWriter::builder(Guid::unknown())
            .transport(transport())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_named_controller_needs_registry() {
        let config = WriterConfig {
            flow_controller: Some("bulk".into()),
            ..WriterConfig::default()
        };
        let err = ReliableWriter::builder(guid())
            .config(config.clone())
            .transport(transport())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::UnknownFlowController(name) if name == "bulk"));

        let registry = Arc::new(
            FlowControllerRegistry::with_controllers(vec![FlowControllerConfig::asynchronous(
                "bulk",
                crate::config::SchedulingDiscipline::RoundRobin,
            )])
            .expect("registry"),
        );
        let writer = ReliableWriter::builder(guid())
            .config(config)
            .transport(transport())
            .flow_registry(Arc::clone(&registry))
            .build()
            .expect("writer");
        assert_eq!(writer.flow_controller().name(), "bulk");
    }

    #[test]
    fn test_writer_registration_is_exclusive() {
        let flow = Arc::new(FlowController::new(FlowControllerConfig::default()).expect("flow"));
        let first = ReliableWriter::builder(guid())
            .transport(transport())
            .flow_controller(Arc::clone(&flow))
            .build()
            .expect("writer");
        assert!(ReliableWriter::builder(guid())
            .transport(transport())
            .flow_controller(Arc::clone(&flow))
            .build()
            .is_err());

        // Dropping the writer detaches it
        drop(first);
        assert!(ReliableWriter::builder(guid())
            .transport(transport())
            .flow_controller(flow)
            .build()
            .is_ok());
    }

    #[test]
    fn test_prefilled_history_rejected() {
        let mut history = HistoryCache::new(HistoryKind::KeepLast(4), 4);
        history
            .insert(Arc::new(CacheChange::new(guid(), 1, ChangeKind::Alive, vec![0u8; 4])))
            .expect("insert");
        let err = ReliableWriter::builder(guid())
            .transport(transport())
            .history(Box::new(history))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = WriterConfig {
            fragment_size: 0,
            ..WriterConfig::default()
        };
        assert!(ReliableWriter::builder(guid())
            .config(config)
            .transport(transport())
            .build()
            .is_err());
    }
}
