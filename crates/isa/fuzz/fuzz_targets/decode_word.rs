#![no_main]

use armlet_isa::syntax::{parse_immediate, render_plain, tokenize};
use armlet_isa::InstructionCodec;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let word = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let codec = InstructionCodec::default();

    if let Ok(raw) = codec.decode(word) {
        let reencoded = codec.encode(&raw).expect("decoded fields always fit");
        assert_eq!(codec.decode(reencoded).ok(), Some(raw));
    }

    if let Ok(instruction) = codec.decode_instruction(word) {
        if let Ok(descriptor) = codec.descriptor(instruction.opcode) {
            let _ = render_plain(&instruction, descriptor);
        }
    }

    if let Ok(text) = std::str::from_utf8(&data[4..]) {
        for token in tokenize(text) {
            let _ = parse_immediate(token);
        }
    }
});
