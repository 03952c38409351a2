// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use filewarden::ai::{parse_response, AiOutcome};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    if let AiOutcome::Classified(verdict) = parse_response(raw) {
        assert!(!verdict.category.trim().is_empty());
        assert!((0.0..=1.0).contains(&verdict.confidence));
        assert!(verdict.keywords.len() <= 10);
    }
});
