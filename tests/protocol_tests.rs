use aocs_scoe::protocol::*;

fn factory() -> PacketFactory {
    PacketFactory::new(100, 1, MissionClock::started_now())
}

#[test]
fn test_tm_round_trip_reconstruction() {
    let mut factory = factory();
    let tm = factory.tm(3, subtype::TM_HK_REPORT, &[0xDE, 0xAD, 0xBE, 0xEF]);
    let bytes = tm.encode();

    let decoded = PusPacket::decode(&bytes).unwrap();
    assert_eq!(decoded.packet_type(), PacketType::Tm);
    assert_eq!(decoded.service(), 3);
    assert_eq!(decoded.service_subtype(), subtype::TM_HK_REPORT);
    assert_eq!(decoded.pus.pus_version, PUS_VERSION);
    assert_eq!(decoded.pus.source_id, 1);
    assert_eq!(decoded.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);

    // Byte-for-byte reconstruction.
    assert_eq!(decoded.encode(), bytes);
}

#[test]
fn test_tc_round_trip_reconstruction() {
    let mut factory = factory();
    let tc = factory.tc(8, subtype::TC_PERFORM_FUNCTION, &[0x01], ACK_ALL);
    let bytes = tc.encode();

    let decoded = PusPacket::decode(&bytes).unwrap();
    assert_eq!(decoded.packet_type(), PacketType::Tc);
    assert_eq!(decoded.pus.ack_flags, ACK_ALL);
    assert_eq!(decoded.data, vec![0x01]);
    assert_eq!(decoded.encode(), bytes);
}

#[test]
fn test_tc_secondary_header_is_five_bytes() {
    let mut factory = factory();
    let tc = factory.tc(17, subtype::TC_CONNECTION_TEST, &[], 0);
    let bytes = tc.encode();
    // Primary header + TC secondary header + CRC, no data.
    assert_eq!(bytes.len(), CCSDS_HEADER_LEN + PUS_TC_HEADER_LEN + CRC_LEN);

    let tm = factory.connection_report();
    let tm_bytes = tm.encode();
    assert_eq!(tm_bytes.len(), CCSDS_HEADER_LEN + PUS_TM_HEADER_LEN + CRC_LEN);
}

#[test]
fn test_data_length_invariant() {
    let mut factory = factory();
    let tm = factory.tm(3, subtype::TM_HK_REPORT, &[0; 10]);
    let bytes = tm.encode();
    let header = CcsdsHeader::unpack(&bytes).unwrap();

    // data_length = bytes after the primary header, including CRC, minus 1.
    assert_eq!(
        usize::from(header.data_length),
        bytes.len() - CCSDS_HEADER_LEN - 1
    );
}

#[test]
fn test_every_single_bit_flip_is_rejected() {
    let mut factory = factory();
    let bytes = factory
        .tm(3, subtype::TM_HK_REPORT, &[1, 2, 3, 4, 5, 6, 7, 8])
        .encode();

    for byte_index in 0..bytes.len() {
        for bit in 0..8 {
            let mut corrupted = bytes.clone();
            corrupted[byte_index] ^= 1 << bit;
            assert!(
                PusPacket::decode(&corrupted).is_err(),
                "flip at byte {byte_index} bit {bit} was accepted"
            );
        }
    }
}

#[test]
fn test_verification_payload_layout() {
    let mut factory = factory();
    let tc = factory.tc(8, subtype::TC_PERFORM_FUNCTION, &[0x01], ACK_ALL);
    let seq = tc.ccsds.sequence_count;

    let success = factory.execution_success(&tc);
    assert_eq!(success.data, seq.to_be_bytes().to_vec());

    let failure = factory.execution_failure(&tc, 4);
    assert_eq!(failure.data.len(), 6);
    assert_eq!(u16::from_be_bytes([failure.data[0], failure.data[1]]), seq);
    assert_eq!(
        u32::from_be_bytes([failure.data[2], failure.data[3], failure.data[4], failure.data[5]]),
        4
    );
}

#[test]
fn test_hk_report_payload_layout() {
    let mut factory = factory();
    let tm = factory.hk_report(3, &[1.5, -2.25]);
    assert_eq!(tm.data.len(), 2 + 2 * 4);
    assert_eq!(u16::from_be_bytes([tm.data[0], tm.data[1]]), 3);
    assert_eq!(
        f32::from_be_bytes([tm.data[2], tm.data[3], tm.data[4], tm.data[5]]),
        1.5
    );
    assert_eq!(
        f32::from_be_bytes([tm.data[6], tm.data[7], tm.data[8], tm.data[9]]),
        -2.25
    );
}

#[test]
fn test_sequence_counts_are_gap_free_mod_16384() {
    let mut factory = factory();
    let mut previous = None;
    for _ in 0..20_000 {
        let tm = factory.connection_report();
        let seq = tm.ccsds.sequence_count;
        if let Some(prev) = previous {
            assert_eq!(seq, (prev + 1) % SEQUENCE_MODULUS);
        }
        previous = Some(seq);
    }
}

fn frame_stream(packets: &[Vec<u8>]) -> Vec<u8> {
    let mut stream = Vec::new();
    for packet in packets {
        stream.extend_from_slice(&eden::wrap(packet));
    }
    stream
}

fn collect_all(framer: &mut eden::EdenFramer) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(packet) = framer.next_packet() {
        out.push(packet);
    }
    out
}

#[test]
fn test_framer_one_shot_equals_split_feed() {
    let mut factory = factory();
    let packets: Vec<Vec<u8>> = (0..5)
        .map(|i| factory.tm(3, subtype::TM_HK_REPORT, &[i as u8; 7]).encode())
        .collect();
    let stream = frame_stream(&packets);

    // One-shot.
    let mut one_shot = eden::EdenFramer::new();
    one_shot.push(&stream);
    let got_one_shot = collect_all(&mut one_shot);

    // Every possible two-way split.
    for split in 0..stream.len() {
        let mut framer = eden::EdenFramer::new();
        framer.push(&stream[..split]);
        let mut got = collect_all(&mut framer);
        framer.push(&stream[split..]);
        got.extend(collect_all(&mut framer));
        assert_eq!(got, got_one_shot, "split at {split} changed packet boundaries");
    }

    // Byte-by-byte.
    let mut framer = eden::EdenFramer::new();
    let mut got = Vec::new();
    for &byte in &stream {
        framer.push(&[byte]);
        got.extend(collect_all(&mut framer));
    }
    assert_eq!(got, got_one_shot);
    assert_eq!(got, packets);
}

#[test]
fn test_framer_skips_leading_garbage() {
    let mut factory = factory();
    let packet = factory.connection_report().encode();

    let mut framer = eden::EdenFramer::new();
    framer.push(&[0x00, 0xEB, 0x42, 0x90, 0xFF]);
    framer.push(&eden::wrap(&packet));

    let got = collect_all(&mut framer);
    assert_eq!(got, vec![packet]);
    assert_eq!(framer.buffered(), 0);
}

#[test]
fn test_framer_holds_partial_frame() {
    let mut factory = factory();
    let framed = eden::wrap(&factory.connection_report().encode());

    let mut framer = eden::EdenFramer::new();
    framer.push(&framed[..framed.len() - 1]);
    assert!(framer.next_packet().is_none());

    framer.push(&framed[framed.len() - 1..]);
    let got = collect_all(&mut framer);
    assert_eq!(got.len(), 1);
}

#[test]
fn test_decode_rejects_wrong_declared_length() {
    let mut factory = factory();
    let mut bytes = factory.connection_report().encode();
    // Inflate the declared data length beyond the buffer.
    bytes[4] = 0xFF;
    bytes[5] = 0xFF;
    assert!(matches!(
        PusPacket::decode(&bytes),
        Err(CodecError::LengthMismatch { .. })
    ));
}

#[test]
fn test_time_stamps_are_monotonic() {
    let mut factory = factory();
    let first = factory.connection_report().pus.time_stamp;
    let second = factory.connection_report().pus.time_stamp;
    assert!(second >= first);
}
