//! Parser for `show ipv6 ospf6 neighbor`.
//!
//! ```text
//! Neighbor ID     Pri    DeadTime  State/IfState         Duration I/F[State]
//! 0.0.0.2           1    00:00:38   Full/DR              00:02:11 eth0[BDR]
//! ```
//!
//! The first line is a header. Each following row has six whitespace
//! separated columns; times are `hh:mm:ss`.

use std::collections::HashSet;
use std::time::Duration;

use converge_core::{InterfaceState, NeighborState, PeerRecord};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NeighborParseError {
    #[error("line {line}: expected 6 columns, got {row:?}")]
    MalformedRow { line: usize, row: String },
    #[error("line {line}: bad {column} {value:?}")]
    BadField {
        line: usize,
        column: &'static str,
        value: String,
    },
    #[error("neighbor {0} reported on more than one interface")]
    DuplicateNeighbor(String),
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Parses a full neighbor table, header line included.
pub fn parse_neighbor_table(output: &str) -> Result<Vec<PeerRecord>, NeighborParseError> {
    let mut seen = HashSet::new();
    let mut peers = Vec::new();
    for (idx, row) in output.lines().enumerate().skip(1) {
        if row.trim().is_empty() {
            continue;
        }
        let peer = parse_row(idx + 1, row)?;
        if !seen.insert(peer.router_id.clone()) {
            return Err(NeighborParseError::DuplicateNeighbor(peer.router_id));
        }
        peers.push(peer);
    }
    Ok(peers)
}

fn parse_row(line: usize, row: &str) -> Result<PeerRecord, NeighborParseError> {
    let cols: Vec<&str> = row.split_whitespace().collect();
    let [router_id, prio, dead_time, state, duration, iface] = cols[..] else {
        return Err(NeighborParseError::MalformedRow {
            line,
            row: row.to_string(),
        });
    };
    let bad = |column: &'static str, value: &str| NeighborParseError::BadField {
        line,
        column,
        value: value.to_string(),
    };

    let priority = prio.parse::<u8>().map_err(|_| bad("priority", prio))?;
    let dead_time = parse_hms(dead_time).ok_or_else(|| bad("dead time", dead_time))?;
    let duration = parse_hms(duration).ok_or_else(|| bad("duration", duration))?;
    let (state, role) = state.split_once('/').ok_or_else(|| bad("state", state))?;
    let (interface, interface_state) = iface
        .split_once('[')
        .and_then(|(name, rest)| Some((name, rest.strip_suffix(']')?)))
        .ok_or_else(|| bad("interface", iface))?;

    Ok(PeerRecord {
        router_id: router_id.to_string(),
        priority,
        dead_time,
        state: NeighborState::from(state),
        role: InterfaceState::from(role),
        duration,
        interface: interface.to_string(),
        interface_state: InterfaceState::from(interface_state),
    })
}

/// `hh:mm:ss` to a duration. Hours may exceed 24.
pub fn parse_hms(s: &str) -> Option<Duration> {
    let mut parts = s.split(':');
    let (h, m, sec) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let h: u64 = h.parse().ok()?;
    let m: u64 = m.parse().ok()?;
    let sec: u64 = sec.parse().ok()?;
    if m >= 60 || sec >= 60 {
        return None;
    }
    let secs = h.checked_mul(3600)?.checked_add(m * 60 + sec)?;
    Some(Duration::from_secs(secs))
}
