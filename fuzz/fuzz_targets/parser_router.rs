#![no_main]

use libfuzzer_sys::fuzz_target;
use trapwire_core::types::SourceSystem;
use trapwire_ingest::enrich::Enricher;
use trapwire_ingest::parser::ParserRouter;

// 첫 바이트로 소스를 고르고 나머지를 라인으로 사용
fuzz_target!(|data: &[u8]| {
    let Some((selector, rest)) = data.split_first() else {
        return;
    };
    let source = SourceSystem::ALL[usize::from(*selector) % SourceSystem::ALL.len()];
    let line = String::from_utf8_lossy(rest);

    let router = ParserRouter::new().with_max_input_size(64 * 1024);
    if let Some(event) = router.route(source, &line) {
        let enriched = Enricher::new().enrich(event);
        assert!(enriched.geo.is_some());
        assert!(enriched.risk_score.value() <= 10);
    }
});
