//! Fuzz target for ISAKMP message parsing.
//!
//! This fuzzer tests the ISAKMP decoders against random input to find:
//! - Panics on truncated or oversized lengths
//! - Unbounded allocation from declared counts
//! - Incorrect error handling
//!
//! Run with:
//! ```bash
//! cd crates/proto
//! cargo +nightly fuzz run isakmp_message -- -max_total_time=300
//! ```

#![no_main]
use libfuzzer_sys::fuzz_target;
use oakley_proto::ipsec::ikev1::constants::PayloadType;
use oakley_proto::ipsec::ikev1::message::Message;
use oakley_proto::ipsec::ikev1::payload::{IdPayload, SaPayload};

fuzz_target!(|data: &[u8]| {
    let Ok(message) = Message::from_bytes(data) else {
        return;
    };

    // Payload bodies come from an attacker as well
    if let Some(body) = message.payload_body(PayloadType::SA) {
        let _ = SaPayload::from_payload_data(body);
    }
    if let Some(body) = message.payload_body(PayloadType::ID) {
        let _ = IdPayload::from_payload_data(body);
    }
});
