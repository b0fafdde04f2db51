use std::fmt;
use std::sync::Arc;

use scatter_core::{DynRoute, Event};

/// Binds one route to the event instance it must process.
///
/// Both halves are required by construction. Equality is structural over
/// identities: the same route (pointer identity) paired with the same event
/// (event id).
#[derive(Clone)]
pub struct RoutingPair {
    event: Event,
    route: DynRoute,
}

impl RoutingPair {
    #[must_use]
    pub fn of(event: Event, route: DynRoute) -> Self {
        Self { event, route }
    }

    #[must_use]
    pub fn event(&self) -> &Event {
        &self.event
    }

    #[must_use]
    pub fn route(&self) -> &DynRoute {
        &self.route
    }

    #[must_use]
    pub fn into_parts(self) -> (Event, DynRoute) {
        (self.event, self.route)
    }
}

impl PartialEq for RoutingPair {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.route, &other.route) && self.event.id() == other.event.id()
    }
}

impl Eq for RoutingPair {}

impl fmt::Debug for RoutingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingPair")
            .field("route", &self.route.name())
            .field("event", &self.event.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use scatter_core::route_fn;

    use super::*;

    fn identity() -> DynRoute {
        route_fn("identity", |event: Event, _cancel| async move { Ok(event) })
    }

    #[test]
    fn equality_uses_route_and_event_identity() {
        let route = identity();
        let event = Event::new(1);

        let a = RoutingPair::of(event.clone(), Arc::clone(&route));
        let b = RoutingPair::of(event.clone(), Arc::clone(&route));
        assert_eq!(a, b);

        let other_route = RoutingPair::of(event.clone(), identity());
        assert_ne!(a, other_route);

        let other_event = RoutingPair::of(event.fork(), route);
        assert_ne!(a, other_event);
    }

    #[test]
    fn equal_payloads_are_not_equal_events() {
        let route = identity();
        let a = RoutingPair::of(Event::new("same"), Arc::clone(&route));
        let b = RoutingPair::of(Event::new("same"), route);
        assert_ne!(a, b);
    }

    #[test]
    fn debug_shows_route_name() {
        let pair = RoutingPair::of(Event::new(1), identity());
        assert!(format!("{pair:?}").contains("identity"));
    }
}
