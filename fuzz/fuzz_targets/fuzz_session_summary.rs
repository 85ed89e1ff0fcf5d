#![no_main]

use libfuzzer_sys::fuzz_target;
use reversi_client::protocol::{GameProgress, MatchStatusPayload, MatchUpdate, SessionSummary};
use reversi_client::SessionSnapshot;

fuzz_target!(|data: &[u8]| {
    // Snapshot validation must reject, never panic, on any decoded summary.
    if let Ok(summary) = serde_json::from_slice::<SessionSummary>(data) {
        let _ = SessionSnapshot::try_from(summary);
    }

    if let Ok(progress) = serde_json::from_slice::<GameProgress>(data) {
        if let Some(summary) = progress.session_summary {
            let _ = SessionSnapshot::try_from(summary);
        }
    }

    if let Ok(payload) = serde_json::from_slice::<MatchStatusPayload>(data) {
        let _ = MatchUpdate::try_from(payload);
    }
});
