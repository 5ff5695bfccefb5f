// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use chrono::NaiveDate;
use libfuzzer_sys::fuzz_target;
use std::path::Path;

use automata::rules::RuleSet;
use automata::template;

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    rules_document: &'a str,
    template: &'a str,
    file_name: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    // Loading must reject bad documents with an error, never a panic
    if let Ok(rules) = RuleSet::from_json(input.rules_document) {
        let exported = rules.to_json().unwrap();
        let reloaded = RuleSet::from_json(&exported).unwrap();
        assert_eq!(rules.to_rules(), reloaded.to_rules());
    }

    let now = NaiveDate::from_ymd_opt(2024, 1, 15)
        .and_then(|d| d.and_hms_opt(9, 30, 0))
        .unwrap();
    let source = Path::new("/inbox").join(input.file_name);
    let home = Path::new("/home/fuzz");
    let once = template::expand_with_home(input.template, &source, now, home);
    let twice = template::expand_with_home(input.template, &source, now, home);
    assert_eq!(once, twice);
});
