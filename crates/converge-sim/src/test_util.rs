use std::sync::atomic::{AtomicU32, Ordering};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Unique namespace name for parallel tests, at most 15 characters.
pub fn unique_ns_name(prefix: &str) -> String {
    let seq = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = format!("{}_{:x}_{}", prefix, std::process::id() % 0xFFFF, seq);
    name.truncate(15);
    name
}

#[test]
fn unique_names_fit_and_differ() {
    let a = unique_ns_name("converge_long_prefix");
    let b = unique_ns_name("cv");
    let c = unique_ns_name("cv");
    assert!(a.len() <= 15);
    assert_ne!(b, c);
}
