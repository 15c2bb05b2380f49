mod common;

use common::*;
use obex::*;
use std::time::Duration;
use tracing_test::traced_test;

fn connected(client: SessionConfig, server: SessionConfig, get_body: Vec<u8>) -> Pair {
    let mut pair = pipe_pair(client, server, None, get_body);
    assert_eq!(pair.run(Object::connect()), Some(ResponseCode::SUCCESS));
    pair.client_records();
    pair.server_records();
    pair
}

#[test]
#[traced_test]
fn connect_negotiates_mtu_both_ways() {
    let mut pair = pipe_pair(
        SessionConfig::default().with_mtu(0x1000, 0xFFFF),
        SessionConfig::default().with_mtu(0x800, 0xFFFF),
        None,
        Vec::new(),
    );
    assert_eq!(pair.client.mtu_tx(), OBEX_MINIMUM_MTU);
    assert_eq!(pair.run(Object::connect()), Some(ResponseCode::SUCCESS));

    assert_eq!(pair.client.mtu_tx(), 0x800);
    assert_eq!(pair.server.mtu_tx(), 0x1000);

    let client = pair.client_records();
    let done = last_of(&client, EventKind::RequestDone).unwrap();
    assert_eq!(done.cmd, Some(Opcode::CONNECT));
    assert_eq!(done.rsp, Some(ResponseCode::SUCCESS));

    let kinds: Vec<_> = pair.server_records().into_iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::RequestHint, EventKind::Request, EventKind::RequestDone]
    );
}

#[test]
#[traced_test]
fn large_put_is_split_at_the_negotiated_mtu() {
    let config = SessionConfig::default().with_mtu(4096, 4096);
    let mut pair = connected(config, config, Vec::new());
    assert_eq!(pair.client.mtu_tx(), 4096);

    let body = sample_body(300_000);
    assert_eq!(
        pair.run(Object::put("big.bin", body.clone())),
        Some(ResponseCode::SUCCESS)
    );

    let server = pair.server_records();
    assert_eq!(server.iter().filter(|r| matches!(r.kind, EventKind::ParseError(_))).count(), 0);
    let request = last_of(&server, EventKind::Request).unwrap();
    assert_eq!(request.body.len(), 300_000);
    assert_eq!(request.body, body);
    assert_eq!(request.name.as_deref(), Some("big.bin"));
    // 300000 bytes of body in chunks of at most 4093 bytes, then the End-of-Body.
    assert!(request.packets >= 74);
    assert_eq!(count(&server, EventKind::Progress), request.packets - 1);
}

#[test]
#[traced_test]
fn byte_at_a_time_delivery_decodes_the_same_object() {
    let body = sample_body(5_000);
    let mut requests = Vec::new();
    for chunk in [None, Some(1)] {
        let mut pair = pipe_pair(SessionConfig::default(), SessionConfig::default(), chunk, Vec::new());
        assert_eq!(pair.run(Object::connect()), Some(ResponseCode::SUCCESS));
        assert_eq!(
            pair.run(Object::put("chunked.txt", body.clone())),
            Some(ResponseCode::SUCCESS)
        );
        let server = pair.server_records();
        let request = last_of(&server, EventKind::Request).cloned().unwrap();
        requests.push((request.name, request.body, request.packets));
    }
    assert_eq!(requests[0], requests[1]);
    assert_eq!(requests[0].1, body);
}

#[test]
#[traced_test]
fn second_request_while_outstanding_is_refused() {
    let mut pair = connected(SessionConfig::default(), SessionConfig::default(), Vec::new());
    pair.client.request(Object::put("a", vec![1; 10])).unwrap();
    let state = pair.client.state();
    let err = pair.client.request(Object::get("b")).unwrap_err();
    assert_eq!(err.usage(), Some(UsageError::RequestOutstanding));
    assert_eq!(pair.client.state(), state);

    pair.settle();
    assert_eq!(pair.client.last_response(), Some(ResponseCode::SUCCESS));
    let server = pair.server_records();
    assert_eq!(last_of(&server, EventKind::Request).unwrap().cmd, Some(Opcode::PUT));
}

#[test]
#[traced_test]
fn nice_cancel_waits_for_the_abort_response() {
    let mut pair = connected(SessionConfig::default(), SessionConfig::default(), Vec::new());
    pair.client.request(Object::put("big.bin", sample_body(100_000))).unwrap();
    for _ in 0..4 {
        pair.step();
    }

    pair.client.cancel_request(true).unwrap();
    assert_ne!(pair.client.state(), State::Idle);
    assert!(pair.client.object().is_some());

    pair.settle();
    let client = pair.client_records();
    let abort = last_of(&client, EventKind::Abort).unwrap();
    assert_eq!(abort.cmd, Some(Opcode::PUT));
    assert_eq!(abort.rsp, Some(ResponseCode::SUCCESS));
    assert_eq!(count(&client, EventKind::RequestDone), 0);
    assert_eq!(pair.client.last_response(), Some(ResponseCode::SUCCESS));

    let server = pair.server_records();
    assert_eq!(count(&server, EventKind::Abort), 1);
    assert_eq!(count(&server, EventKind::Request), 0);

    // The session is usable again.
    assert_eq!(pair.run(Object::get("after")), Some(ResponseCode::SUCCESS));
}

#[test]
#[traced_test]
fn hard_cancel_drops_locally_and_reports_the_late_response() {
    let mut pair = connected(SessionConfig::default(), SessionConfig::default(), Vec::new());
    pair.client.request(Object::put("big.bin", sample_body(10_000))).unwrap();
    pair.client.handle_input(Some(std::time::Duration::ZERO)).unwrap();
    assert_eq!(pair.client.state(), State::AwaitingResponse);

    pair.client.cancel_request(false).unwrap();
    assert_eq!(pair.client.state(), State::Idle);
    assert!(pair.client.object().is_none());
    assert_eq!(pair.client_records().last().map(|r| r.kind.clone()), Some(EventKind::Abort));

    // The server still answers the packet it got.
    pair.step();
    pair.step();
    assert_eq!(count(&pair.client_records(), EventKind::Unexpected), 1);
    assert_eq!(pair.server.state(), State::AwaitingRequest);
}

#[test]
#[traced_test]
fn get_collects_a_multi_packet_body() {
    let body = sample_body(3_000);
    let mut pair = connected(SessionConfig::default(), SessionConfig::default(), body.clone());
    assert_eq!(pair.run(Object::get("notes.txt")), Some(ResponseCode::SUCCESS));

    let client = pair.client_records();
    let done = last_of(&client, EventKind::RequestDone).unwrap();
    assert_eq!(done.body, body);
    assert!(count(&client, EventKind::Progress) >= 2);

    let server = pair.server_records();
    let request = last_of(&server, EventKind::Request).unwrap();
    assert_eq!(request.name.as_deref(), Some("notes.txt"));
    // One continuation request for every CONTINUE response.
    let served = last_of(&server, EventKind::RequestDone).unwrap();
    assert_eq!(served.packets, 1 + count(&client, EventKind::Progress));
}

#[test]
#[traced_test]
fn srm_put_streams_after_one_continue() {
    let config = SessionConfig::default().with_response_mode(ResponseMode::Single);
    let mut pair = connected(config, config, Vec::new());
    let body = sample_body(20_000);
    assert_eq!(pair.run(Object::put("stream.bin", body.clone())), Some(ResponseCode::SUCCESS));

    let client = pair.client_records();
    let continues = client
        .iter()
        .filter(|r| r.kind == EventKind::Progress && r.rsp == Some(ResponseCode::CONTINUE))
        .count();
    assert_eq!(continues, 1);
    assert!(count(&client, EventKind::Progress) > 1);

    let server = pair.server_records();
    assert_eq!(last_of(&server, EventKind::Request).unwrap().body, body);
}

#[test]
#[traced_test]
fn srm_get_needs_no_continuation_requests() {
    let config = SessionConfig::default().with_response_mode(ResponseMode::Single);
    let body = sample_body(5_000);
    let mut pair = connected(config, config, body.clone());
    assert_eq!(pair.run(Object::get("stream.bin")), Some(ResponseCode::SUCCESS));

    let client = pair.client_records();
    assert_eq!(last_of(&client, EventKind::RequestDone).unwrap().body, body);

    let server = pair.server_records();
    assert_eq!(last_of(&server, EventKind::RequestDone).unwrap().packets, 1);
}

#[test]
#[traced_test]
fn srm_disabled_falls_back_to_normal_mode() {
    let config = SessionConfig::default().with_response_mode(ResponseMode::Single);
    let server = config.with_flags(InitFlags::SRM_DISABLED);
    let body = sample_body(5_000);
    let mut pair = connected(config, server, body.clone());
    assert_eq!(pair.run(Object::get("plain.bin")), Some(ResponseCode::SUCCESS));

    let client = pair.client_records();
    assert_eq!(last_of(&client, EventKind::RequestDone).unwrap().body, body);
    let server = pair.server_records();
    assert!(last_of(&server, EventKind::RequestDone).unwrap().packets > 1);
}

#[test]
#[traced_test]
fn setpath_carries_flags() {
    let mut pair = connected(SessionConfig::default(), SessionConfig::default(), Vec::new());
    assert_eq!(
        pair.run(Object::setpath("docs", setpath::DONT_CREATE)),
        Some(ResponseCode::SUCCESS)
    );
    let server = pair.server_records();
    let request = last_of(&server, EventKind::Request).unwrap();
    assert_eq!(request.cmd, Some(Opcode::SETPATH));
    assert_eq!(request.name.as_deref(), Some("docs"));
}

#[test]
#[traced_test]
fn closing_the_client_is_a_link_error_on_the_server() {
    let mut pair = connected(SessionConfig::default(), SessionConfig::default(), Vec::new());
    assert_eq!(pair.run(Object::disconnect()), Some(ResponseCode::SUCCESS));
    pair.client.transport_disconnect().unwrap();
    pair.client.transport_disconnect().unwrap();

    assert!(pair.server.handle_input(Some(std::time::Duration::ZERO)).is_err());
    assert_eq!(pair.server.state(), State::Disconnected);
    let server = pair.server_records();
    assert_eq!(
        last_of(&server, EventKind::LinkError(std::io::ErrorKind::UnexpectedEof)).map(|r| r.cmd),
        Some(None)
    );
}

#[test]
#[traced_test]
fn hard_cancel_leaves_no_trace_in_the_next_put() {
    let mut pair = connected(SessionConfig::default(), SessionConfig::default(), Vec::new());
    pair.client.request(Object::put("old.bin", sample_body(10_000))).unwrap();
    pair.client.handle_input(Some(Duration::ZERO)).unwrap();
    pair.client.cancel_request(false).unwrap();
    pair.step();
    pair.step();

    let fresh = vec![0xBB; 10];
    assert_eq!(pair.run(Object::put("new.bin", fresh.clone())), Some(ResponseCode::SUCCESS));

    let server = pair.server_records();
    assert_eq!(count(&server, EventKind::Abort), 1);
    assert_eq!(count(&server, EventKind::RequestHint), 2);
    let request = last_of(&server, EventKind::Request).unwrap();
    assert_eq!(request.name.as_deref(), Some("new.bin"));
    assert_eq!(request.body, fresh);

    let client = pair.client_records();
    assert_eq!(count(&client, EventKind::Unexpected), 1);
    let done = last_of(&client, EventKind::RequestDone).unwrap();
    assert_eq!(done.cmd, Some(Opcode::PUT));
    assert_eq!(done.rsp, Some(ResponseCode::SUCCESS));
}

#[test]
#[traced_test]
fn foreign_opcode_mid_request_is_refused() {
    let (mut server, events, mut peer) = raw_server(SessionConfig::default(), Vec::new());

    // PUT with more packets to come, then a GET in the middle of it.
    peer.write(&[0x02, 0x00, 0x03]).unwrap();
    server.handle_input(Some(Duration::ZERO)).unwrap();
    assert_eq!(drain(&mut peer), vec![0x90, 0x00, 0x03]);
    peer.write(&[0x83, 0x00, 0x03]).unwrap();
    server.handle_input(Some(Duration::ZERO)).unwrap();
    assert_eq!(drain(&mut peer), vec![0xC0, 0x00, 0x03]);
    assert_eq!(server.state(), State::Idle);
    assert!(server.object().is_none());

    let records: Vec<Record> = events.try_iter().collect();
    let error = records
        .iter()
        .find(|r| matches!(r.kind, EventKind::ParseError(_)))
        .unwrap();
    assert_eq!(error.cmd, Some(Opcode::PUT));
    assert_eq!(error.rsp, Some(ResponseCode::BAD_REQUEST));
    assert_eq!(count(&records, EventKind::Request), 0);

    // A fresh request is served normally.
    peer.write(&[0x82, 0x00, 0x03]).unwrap();
    server.handle_input(Some(Duration::ZERO)).unwrap();
    server.handle_input(Some(Duration::ZERO)).unwrap();
    assert_eq!(drain(&mut peer), vec![0xA0, 0x00, 0x03]);
}

#[test]
#[traced_test]
fn malformed_header_drops_the_request_only() {
    let (mut server, events, mut peer) = raw_server(SessionConfig::default(), Vec::new());

    // Name header claiming 16 bytes inside a 6 byte packet.
    peer.write(&[0x82, 0x00, 0x06, 0x01, 0x00, 0x10]).unwrap();
    assert_eq!(server.handle_input(Some(Duration::ZERO)).unwrap(), 2);
    assert_eq!(server.state(), State::Idle);
    assert!(server.object().is_none());
    let kinds: Vec<_> = events.try_iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::RequestHint,
            EventKind::ParseError(CodecError::MalformedPacket("header exceeds packet length")),
        ]
    );

    peer.write(&[0x82, 0x00, 0x03]).unwrap();
    server.handle_input(Some(Duration::ZERO)).unwrap();
    server.handle_input(Some(Duration::ZERO)).unwrap();
    assert_eq!(drain(&mut peer), vec![0xA0, 0x00, 0x03]);
    let records: Vec<Record> = events.try_iter().collect();
    assert_eq!(count(&records, EventKind::Request), 1);
    assert_eq!(count(&records, EventKind::RequestDone), 1);
}

#[test]
#[traced_test]
fn server_nice_cancel_refuses_the_request() {
    let mut pair = connected(SessionConfig::default(), SessionConfig::default(), Vec::new());
    pair.client.request(Object::put("big.bin", sample_body(100_000))).unwrap();
    for _ in 0..4 {
        pair.step();
    }
    assert_eq!(pair.server.state(), State::AwaitingRequest);

    pair.server.cancel_request(true).unwrap();
    pair.settle();

    let server = pair.server_records();
    let abort = last_of(&server, EventKind::Abort).unwrap();
    assert_eq!(abort.cmd, Some(Opcode::PUT));
    assert_eq!(abort.rsp, Some(ResponseCode::INTERNAL_SERVER_ERROR));
    assert_eq!(count(&server, EventKind::Request), 0);

    let client = pair.client_records();
    let done = last_of(&client, EventKind::RequestDone).unwrap();
    assert_eq!(done.rsp, Some(ResponseCode::INTERNAL_SERVER_ERROR));
    assert_eq!(pair.client.last_response(), Some(ResponseCode::INTERNAL_SERVER_ERROR));
}

#[test]
#[traced_test]
fn srm_wait_from_the_client_costs_one_continuation() {
    let config = SessionConfig::default().with_response_mode(ResponseMode::Single);
    let body = sample_body(5_000);
    let mut pair = connected(config, config, body.clone());

    let mut get = Object::get("waited.bin");
    get.add_header(Header::srm_parameters(srm::PARAM_WAIT));
    assert_eq!(pair.run(get), Some(ResponseCode::SUCCESS));

    let client = pair.client_records();
    assert_eq!(last_of(&client, EventKind::RequestDone).unwrap().body, body);
    let server = pair.server_records();
    assert_eq!(last_of(&server, EventKind::RequestDone).unwrap().packets, 2);
}
