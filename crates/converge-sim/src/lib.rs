//! Emulated-network side of the convergence check.
//!
//! Provides Linux network namespace handles, a parser for the routing
//! daemon's `show ipv6 ospf6 neighbor` table, and a [`NeighborSource`]
//! that queries each node through `vtysh` inside its namespace.
//!
//! [`NeighborSource`]: converge_core::NeighborSource

pub mod neighbors;
pub mod source;
pub mod topology;

#[cfg(test)]
pub(crate) mod test_util;
