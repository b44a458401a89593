// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Exchanges are the routing entities that receive published messages and
//! forward them to bound queues. Application traffic goes through a durable
//! topic exchange; rejected messages go through a durable fanout dead-letter
//! exchange.

/// The exchange types this middleware declares.
///
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Fanout,
    Topic,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

/// Definition of a RabbitMQ exchange. Exchanges are always durable; a
/// passive definition only checks that the exchange exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) passive: bool,
}

impl ExchangeDefinition {
    /// Creates a new durable topic exchange definition.
    ///
    /// # Parameters
    /// * `name` - The name of the exchange
    ///
    /// # Returns
    /// A new exchange definition with default settings
    pub fn topic(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Topic,
            passive: false,
        }
    }

    /// Creates a new durable fanout exchange definition, the shape used for
    /// dead-letter exchanges.
    pub fn fanout(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            kind: ExchangeKind::Fanout,
            ..ExchangeDefinition::topic(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    /// Makes the exchange passive, checking for existence without creating it.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_exchanges_are_declared_actively() {
        let def = ExchangeDefinition::topic("orders");
        assert_eq!(def.name(), "orders");
        assert_eq!(def.kind(), ExchangeKind::Topic);
        assert!(!def.passive);
    }

    #[test]
    fn passive_fanout_only_checks_existence() {
        let def = ExchangeDefinition::fanout("peril_dlx").passive();
        assert_eq!(def.kind(), ExchangeKind::Fanout);
        assert!(def.passive);
    }

    #[test]
    fn kinds_map_to_lapin_kinds() {
        assert_eq!(
            lapin::ExchangeKind::from(ExchangeKind::Topic),
            lapin::ExchangeKind::Topic
        );
        assert_eq!(
            lapin::ExchangeKind::from(ExchangeKind::Fanout),
            lapin::ExchangeKind::Fanout
        );
    }
}
