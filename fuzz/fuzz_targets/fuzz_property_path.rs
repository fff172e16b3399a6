//! Fuzz harness for `PropertyPath::parse`.
//!
//! Arbitrary bytes are decoded lossily to UTF-8 and parsed. A successful
//! parse must round-trip through `Display`, and every segment must be a
//! non-empty identifier.

#![no_main]
use ftui_bind::PropertyPath;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let Ok(path) = PropertyPath::parse(&text) else {
        return;
    };
    assert!(!path.is_empty());
    assert!(path.segments().all(|s| !s.is_empty() && !s.contains('.')));

    let rendered = path.to_string();
    let reparsed = PropertyPath::parse(&rendered).expect("rendered path must parse");
    assert_eq!(reparsed.to_string(), rendered);
});
