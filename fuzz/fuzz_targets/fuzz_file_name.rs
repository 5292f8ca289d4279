// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;
use tidyup::config::AppConfig;
use tidyup::rules::{extension_of, Classifier, IgnoreMatcher, Tagger};

struct Rules {
    classifier: Classifier,
    tagger: Tagger,
    ignore: IgnoreMatcher,
}

fn rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| {
        let config = AppConfig::default();
        Rules {
            classifier: Classifier::new(&config.categories),
            tagger: Tagger::new(&config.tag_rules),
            ignore: IgnoreMatcher::new(&config.ignore_patterns),
        }
    })
}

#[derive(Arbitrary, Debug)]
struct Input {
    stem: String,
    extension: String,
    ignore_pattern: String,
}

fuzz_target!(|input: Input| {
    let rules = rules();
    let name = format!("{}.{}", input.stem, input.extension);

    let category = rules.classifier.classify(&name);
    assert!(rules.classifier.categories().iter().any(|c| c == category));

    let tags = rules.tagger.tags_for(&name);
    assert!(tags.windows(2).all(|pair| pair[0] < pair[1]));
    if let Some(ext) = extension_of(&name) {
        assert!(tags.contains(&format!("type_{}", ext)), "{:?} missing from {:?}", ext, tags);
    }

    let _ = rules.ignore.is_ignored(&name);
    let custom = IgnoreMatcher::new(&[input.ignore_pattern]);
    let _ = custom.matching_pattern(&name);
});
