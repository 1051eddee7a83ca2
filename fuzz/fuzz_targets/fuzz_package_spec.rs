//! Fuzz target for package specifier parsing.
//!
//! Anything accepted must be a plain registry name with a safe range, never
//! a path, URL or flag.

#![no_main]

use gg_sandbox::sandbox::installer::{parse_package, PackagePolicy};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Some(spec) = parse_package(data) {
        assert!(!spec.name.is_empty() && spec.name.len() <= 214);
        assert!(!spec.name.starts_with('-') && !spec.name.starts_with('.'));
        assert!(!spec.range.contains(':'), "range looks like a protocol: {}", spec.range);
        assert!(!spec.range.contains('/'), "range looks like a path: {}", spec.range);
    }

    let plan = PackagePolicy::default()
        .plan(&[data.to_string()])
        .expect("non-strict policy never fails");
    assert_eq!(plan.accepted.len() + plan.filtered.len(), 1);
});
