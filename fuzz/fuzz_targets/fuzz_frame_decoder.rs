#![no_main]

use bytes::BytesMut;
use coilmq_core::StompCodec;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Small limit so the size checks get exercised too.
    let mut codec = StompCodec::new(4096);
    let mut buf = BytesMut::from(data);

    // Decode until the buffer is exhausted or the codec errors.
    // We don't care about the result, just that it doesn't panic.
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        let _ = frame.to_bytes();
    }
});
