//! First-match route resolution.

use conduit_core::{RoutingError, SessionLabel};
use tracing::debug;

use crate::model::{Route, RouteRule, RouteTarget};

/// Resolves session requests against an ordered rule list.
///
/// Resolution depends only on the service name, the label and the rule
/// list, so resolving the same request twice against the same rules
/// yields the same route.
#[derive(Debug, Clone, Default)]
pub struct Router {
    /// The rules, in declaration order.
    rules: Vec<RouteRule>,
}

impl Router {
    /// Create a router.
    ///
    /// # Arguments
    ///
    /// * `rules` - The rules, in the order they are tried.
    ///
    /// # Returns
    ///
    /// A new router.
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// The rules, in declaration order.
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// Replace the rule list.
    pub fn replace(&mut self, rules: Vec<RouteRule>) {
        self.rules = rules;
    }

    /// Resolve a session request.
    ///
    /// # Arguments
    ///
    /// * `service` - The requested service name.
    /// * `label` - The requester's label.
    ///
    /// # Returns
    ///
    /// * `Ok(Route)` - The first rule that matches, with the service name
    ///   and label to present to the provider.
    /// * `Err(RoutingError::NoMatchingRoute)` - If no rule matches.
    pub fn resolve(&self, service: &str, label: &SessionLabel) -> Result<Route, RoutingError> {
        let (index, rule) = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(service, label))
            .ok_or_else(|| RoutingError::NoMatchingRoute {
                service: service.to_string(),
                label: label.to_string(),
            })?;

        let forwarded_service = match &rule.target {
            RouteTarget::Parent {
                rename: Some(name),
            } => name.clone(),
            _ => service.to_string(),
        };

        let forwarded_label = rule
            .label_override
            .as_ref()
            .map(|l| SessionLabel::from(l.as_str()))
            .unwrap_or_else(|| label.clone());

        debug!(service, %label, rule = index, target = %rule.target, "resolved route");

        Ok(Route {
            rule: index,
            target: rule.target.clone(),
            service: forwarded_service,
            label: forwarded_label,
        })
    }
}
