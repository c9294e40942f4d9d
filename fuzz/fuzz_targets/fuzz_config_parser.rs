#![no_main]

use std::path::Path;

use coilmq::config::ConfigLoader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(yaml) = std::str::from_utf8(data) {
        let _ = ConfigLoader::with_defaults().load_str(yaml, Path::new("fuzz.yaml"));
    }
});
