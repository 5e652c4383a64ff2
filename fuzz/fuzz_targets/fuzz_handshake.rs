#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use packet_channel::protocol::handshake::Hello;

fuzz_target!(|data: &[u8]| {
    // Any hello that decodes must survive a re-encode unchanged
    if let Ok(hello) = Hello::decode(Bytes::copy_from_slice(data)) {
        let encoded = hello.encode().unwrap();
        assert_eq!(Hello::decode(encoded).unwrap(), hello);
    }
});
