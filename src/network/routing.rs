//! Distance-vector routing table.
//!
//! One entry per 8-bit address, indexed directly. Each entry names the
//! neighbor to forward through, the hop count, and a time-to-live counted in
//! advertisement epochs:
//!
//! - hearing a neighbor's advertisement makes it a 1-hop route,
//! - a route advertised by a neighbor with `h` hops is adopted with `h + 1`
//!   hops if there is no entry yet, if it is no longer than the current one
//!   (so ties go to the newest), or if it comes from the neighbor the
//!   current entry already goes through,
//! - every epoch each entry's TTL drops by one and it is evicted at zero, so
//!   an entry not refreshed for [`ROUTE_TTL`] epochs disappears.
//!
//! There is no loop suppression beyond TTL aging and the [`MAX_HOPS`] cap.

use log::debug;

/// Broadcast address; carries route advertisements only.
pub const BROADCAST: u8 = 0;

/// Reserved address, never assigned to a node.
pub const RESERVED: u8 = 255;

/// Epochs an entry survives without a refresh.
pub const ROUTE_TTL: u8 = 3;

/// Longest route kept.
pub const MAX_HOPS: u8 = 15;

/// Whether `address` can be assigned to a node.
pub fn is_unicast(address: u8) -> bool {
    address != BROADCAST && address != RESERVED
}

/// A route to one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Neighbor to forward through.
    pub next_hop: u8,
    /// Hops to the destination (1 for a neighbor).
    pub hops: u8,
    /// Epochs left before eviction.
    pub ttl: u8,
}

/// Routing table of one node.
pub struct RoutingTable {
    own: u8,
    routes: [Option<Route>; 256],
}

impl RoutingTable {
    /// Empty table for the node at `own`.
    pub fn new(own: u8) -> Self {
        Self {
            own,
            routes: [None; 256],
        }
    }

    /// Address of the node owning this table.
    pub fn own_address(&self) -> u8 {
        self.own
    }

    /// Route to `destination`, if known.
    pub fn route(&self, destination: u8) -> Option<Route> {
        self.routes[destination as usize]
    }

    /// Neighbor to forward to for `destination`, if known.
    pub fn next_hop(&self, destination: u8) -> Option<u8> {
        self.route(destination).map(|route| route.next_hop)
    }

    /// Record that `neighbor` was heard directly.
    pub fn learn_neighbor(&mut self, neighbor: u8) {
        if !is_unicast(neighbor) || neighbor == self.own {
            return;
        }
        let route = Route {
            next_hop: neighbor,
            hops: 1,
            ttl: ROUTE_TTL,
        };
        if self.routes[neighbor as usize].map(|r| r.next_hop) != Some(neighbor) {
            debug!("routing: {} is a neighbor", neighbor);
        }
        self.routes[neighbor as usize] = Some(route);
    }

    /// Apply one `(destination, hops)` pair advertised by `neighbor`.
    ///
    /// Returns `true` if the table changed.
    pub fn learn_advert(&mut self, neighbor: u8, destination: u8, hops: u8) -> bool {
        if !is_unicast(destination) || destination == self.own || destination == neighbor {
            return false;
        }
        let slot = &mut self.routes[destination as usize];
        let hops = hops.saturating_add(1);

        if hops > MAX_HOPS {
            // Our route through this neighbor is gone
            if slot.is_some_and(|r| r.next_hop == neighbor) {
                debug!("routing: {} unreachable via {}", destination, neighbor);
                *slot = None;
                return true;
            }
            return false;
        }

        let adopt = match *slot {
            None => true,
            Some(current) => hops <= current.hops || current.next_hop == neighbor,
        };
        if adopt {
            if slot.map(|r| (r.next_hop, r.hops)) != Some((neighbor, hops)) {
                debug!(
                    "routing: {} via {} ({} hops)",
                    destination, neighbor, hops
                );
            }
            *slot = Some(Route {
                next_hop: neighbor,
                hops,
                ttl: ROUTE_TTL,
            });
        }
        adopt
    }

    /// Start a new epoch: age every entry and evict expired ones.
    ///
    /// Returns the number of evicted entries.
    pub fn age(&mut self) -> usize {
        let mut evicted = 0;
        for (address, slot) in self.routes.iter_mut().enumerate() {
            if let Some(route) = slot {
                route.ttl = route.ttl.saturating_sub(1);
                if route.ttl == 0 {
                    debug!("routing: route to {} expired", address);
                    *slot = None;
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Known routes as `(destination, route)`.
    pub fn iter(&self) -> impl Iterator<Item = (u8, Route)> + '_ {
        self.routes
            .iter()
            .enumerate()
            .filter_map(|(address, slot)| slot.map(|route| (address as u8, route)))
    }

    /// Number of known routes.
    pub fn len(&self) -> usize {
        self.routes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether no route is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
