//! Queue topology: exchange, routing key and queue names per purpose.
//!
//! An exchange maps to a JetStream stream, a routing key to the subject the
//! stream captures, and a queue to the durable pull consumer reading it.

#[cfg(feature = "config")]
use clap::Args;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One exchange, routing key and queue triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{exchange}/{routing_key}/{queue}")]
pub struct Route {
    /// Exchange name, used as the JetStream stream name.
    pub exchange: String,
    /// Routing key, used as the stream subject.
    pub routing_key: String,
    /// Queue name, used as the durable consumer name.
    pub queue: String,
}

impl Route {
    /// Creates a route from explicit names.
    pub fn new(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            queue: queue.into(),
        }
    }

    /// Derives the `{base}_exchange`, `{base}_routing`, `{base}_queue` triple.
    pub fn named(base: &str) -> Self {
        Self::new(
            format!("{base}_exchange"),
            format!("{base}_routing"),
            format!("{base}_queue"),
        )
    }

    /// JetStream stream name.
    #[inline]
    pub fn stream_name(&self) -> &str {
        &self.exchange
    }

    /// Subject messages are published to.
    #[inline]
    pub fn subject(&self) -> &str {
        &self.routing_key
    }

    /// Durable consumer name.
    #[inline]
    pub fn consumer_name(&self) -> &str {
        &self.queue
    }

    fn prefixed(&self, namespace: &str) -> Self {
        Self::new(
            format!("{namespace}_{}", self.exchange),
            format!("{namespace}_{}", self.routing_key),
            format!("{namespace}_{}", self.queue),
        )
    }

    fn validate(&self) -> Result<()> {
        for name in [&self.exchange, &self.routing_key, &self.queue] {
            if name.is_empty() {
                return Err(Error::invalid_config(format!("empty name in route {self}")));
            }
            if name
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>' | '/' | '\\'))
            {
                return Err(Error::invalid_config(format!(
                    "route name '{name}' contains a reserved character"
                )));
            }
        }
        Ok(())
    }
}

/// Every route the engine uses, loaded once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Pending step executions.
    pub execution: Route,
    /// Rejected step executions held before requeue.
    pub dead_letter: Route,
    /// Run invocations.
    pub invoker: Route,
    /// Terminal run results.
    pub completion: Route,
    /// Step executions that exhausted their retries.
    pub parked: Route,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            execution: Route::named("workflow_execution"),
            dead_letter: Route::named("workflow_execution_dlx"),
            invoker: Route::named("workflow_invoker"),
            completion: Route::named("workflow_completion"),
            parked: Route::named("workflow_execution_parked"),
        }
    }
}

impl Topology {
    /// Prefixes every name with `{namespace}_`, for sharing one server
    /// between environments.
    #[must_use]
    pub fn with_namespace(self, namespace: &str) -> Self {
        Self {
            execution: self.execution.prefixed(namespace),
            dead_letter: self.dead_letter.prefixed(namespace),
            invoker: self.invoker.prefixed(namespace),
            completion: self.completion.prefixed(namespace),
            parked: self.parked.prefixed(namespace),
        }
    }

    /// Returns all routes.
    pub fn routes(&self) -> [&Route; 5] {
        [
            &self.execution,
            &self.dead_letter,
            &self.invoker,
            &self.completion,
            &self.parked,
        ]
    }

    /// Checks names are usable as stream, subject and consumer names and
    /// that no two routes share a name.
    pub fn validate(&self) -> Result<()> {
        let routes = self.routes();
        for route in routes {
            route.validate()?;
        }
        for (i, a) in routes.iter().enumerate() {
            for b in &routes[i + 1..] {
                if a.exchange == b.exchange || a.routing_key == b.routing_key || a.queue == b.queue
                {
                    return Err(Error::invalid_config(format!(
                        "routes {a} and {b} share a name"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Topology selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct TopologyConfig {
    /// Prefix applied to every exchange, routing key and queue name
    #[cfg_attr(
        feature = "config",
        arg(long = "topology-namespace", env = "CONVEYOR_TOPOLOGY_NAMESPACE")
    )]
    pub topology_namespace: Option<String>,
}

impl TopologyConfig {
    /// Builds and validates the topology.
    pub fn topology(&self) -> Result<Topology> {
        let topology = match self.topology_namespace.as_deref() {
            Some(namespace) if !namespace.is_empty() => Topology::default().with_namespace(namespace),
            _ => Topology::default(),
        };
        topology.validate()?;
        Ok(topology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        let topology = Topology::default();
        assert_eq!(topology.execution.exchange, "workflow_execution_exchange");
        assert_eq!(topology.execution.routing_key, "workflow_execution_routing");
        assert_eq!(topology.execution.queue, "workflow_execution_queue");
        assert_eq!(topology.dead_letter.queue, "workflow_execution_dlx_queue");
        assert_eq!(topology.invoker.exchange, "workflow_invoker_exchange");
        assert!(topology.validate().is_ok());
    }

    #[test]
    fn test_namespace_prefixes_every_name() {
        let topology = TopologyConfig {
            topology_namespace: Some("staging".into()),
        }
        .topology()
        .unwrap();
        for route in topology.routes() {
            assert!(route.exchange.starts_with("staging_"));
            assert!(route.routing_key.starts_with("staging_"));
            assert!(route.queue.starts_with("staging_"));
        }
    }

    #[test]
    fn test_reserved_characters_are_rejected() {
        let mut topology = Topology::default();
        topology.execution.routing_key = "workflow.execution".into();
        assert!(topology.validate().is_err());

        let config = TopologyConfig {
            topology_namespace: Some("a b".into()),
        };
        assert!(config.topology().is_err());
    }

    #[test]
    fn test_shared_names_are_rejected() {
        let mut topology = Topology::default();
        topology.parked.exchange = topology.dead_letter.exchange.clone();
        assert!(topology.validate().is_err());
    }
}
