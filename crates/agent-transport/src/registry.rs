// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::TransportError;
use crate::tcp::{self, TcpTransport};
use crate::transport::Transport;
use crate::udp::{self, UdpTransport};

pub type TransportFactory = Arc<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// Maps configured transport names to constructors.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("TransportRegistry")
            .field("names", &names)
            .finish()
    }
}

impl TransportRegistry {
    /// A registry with the bundled `tcp` and `udp` transports.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(tcp::NAME, new_tcp);
        registry.register(udp::NAME, new_udp);
        registry
    }

    /// Registers or replaces a constructor.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Transport> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Constructs the named transport and runs `init` on it. The result is not started.
    pub fn create(
        &self,
        name: &str,
        config: &HashMap<String, String>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| TransportError::UnknownTransport(name.to_string()))?;
        let mut transport = factory();
        transport.init(config)?;
        Ok(transport)
    }
}

fn new_tcp() -> Box<dyn Transport> {
    Box::new(TcpTransport::new())
}

fn new_udp() -> Box<dyn Transport> {
    Box::new(UdpTransport::new())
}
