//! End-to-end client/listener exchanges over in-memory, scripted and UDP transports

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{bank_handler, duplex_pair, ScriptedTransport, TestBank};
use voltage_fieldbus::bytes::ByteWriter;
use voltage_fieldbus::checksum::crc16;
use voltage_fieldbus::{
    Client, CommResponse, Command, CommandHandler, DatagramListener, FieldbusError, Framing, Protocol,
    QueryPolicy, StreamListener, UdpTransport,
};

fn quick_policy(retries: u32) -> QueryPolicy {
    QueryPolicy {
        retries,
        timeout: Duration::from_millis(100),
        latency: Duration::from_millis(20),
    }
}

fn with_crc(mut frame: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

#[tokio::test]
async fn addressed_read_discretes_from_scripted_device() {
    let reply = with_crc(vec![0x01, 0x02, 0x01, 0x0D]);
    let transport = ScriptedTransport::replying(vec![reply[..3].to_vec(), reply[3..].to_vec()]);
    let writes = transport.writes();
    let client = Client::new(transport, Protocol::addressed(1), quick_policy(3));

    let mut cmd = Command::read_discrete_inputs(0, 4);
    assert_eq!(client.query(&mut cmd).await.unwrap(), CommResponse::Ack);
    assert_eq!(cmd.data, vec![1, 0, 1, 1]);
    assert_eq!(cmd.bits(), vec![true, false, true, true]);

    let writes = writes.lock().unwrap();
    assert_eq!(writes.len(), 1);
    assert_eq!(
        writes[0].data,
        with_crc(vec![0x01, 0x02, 0x00, 0x00, 0x00, 0x04])
    );
}

#[tokio::test]
async fn addressed_read_discretes_through_serial_listener() {
    let (client_side, server_side) = duplex_pair();
    let bank = Arc::new(Mutex::new(TestBank::with_size(16)));
    bank.lock().unwrap().discretes[..4].copy_from_slice(&[1, 0, 1, 1]);
    let handle =
        StreamListener::serial(server_side, Protocol::addressed(1), bank_handler(Arc::clone(&bank)))
            .spawn();

    let client = Client::new(client_side, Protocol::addressed(1), quick_policy(3));
    let bits = client.read_discrete_inputs(0, 4).await.unwrap();
    assert_eq!(bits, vec![true, false, true, true]);

    let stats = handle.abort().await.unwrap();
    assert_eq!(stats.frames_served, 1);
    assert_eq!(bank.lock().unwrap().calls, 1);
}

#[tokio::test]
async fn foreign_unit_is_ignored_without_callback() {
    let (client_side, server_side) = duplex_pair();
    let bank = Arc::new(Mutex::new(TestBank::with_size(16)));
    let handle =
        StreamListener::new(server_side, Protocol::stream(1), bank_handler(Arc::clone(&bank)))
            .spawn();

    let client = Client::new(client_side, Protocol::stream(9), quick_policy(1));
    let mut cmd = Command::read_holding_registers(0, 2);
    assert_eq!(client.query(&mut cmd).await.unwrap(), CommResponse::Critical);
    assert_eq!(cmd.exception_code, 0);

    let stats = handle.abort().await.unwrap();
    assert_eq!(stats.frames_served, 0);
    assert_eq!(stats.frames_ignored, 1);
    assert_eq!(bank.lock().unwrap().calls, 0);
}

#[test]
fn foreign_unit_decodes_as_ignore() {
    let mut frame = ByteWriter::new();
    assert!(Protocol::stream(9).client_encode(&Command::read_coils(0, 8), &mut frame));

    let mut cmd = Command::default();
    assert_eq!(
        Protocol::stream(1).server_decode(&mut cmd, frame.as_slice()),
        CommResponse::Ignore
    );
}

#[tokio::test(start_paused = true)]
async fn corrupted_crc_is_critical_and_retried() {
    let mut reply = with_crc(vec![0x01, 0x03, 0x02, 0x12, 0x34]);
    let last = reply.len() - 1;
    reply[last] ^= 0xFF;
    let transport = ScriptedTransport::replying(vec![reply]);
    let writes = transport.writes();
    let client = Client::new(transport, Protocol::addressed(1), quick_policy(2));

    let mut cmd = Command::read_holding_registers(0, 1);
    assert_eq!(client.query(&mut cmd).await.unwrap(), CommResponse::Critical);
    assert_eq!(cmd.exception_code, 0);
    assert!(cmd.data.is_empty());
    assert_eq!(writes.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn short_register_reply_is_retried_without_waiting() {
    // Complete frame, byte count 2 for a two-register read
    let transport = ScriptedTransport::new(|request| {
        let tid = [request[0], request[1]];
        vec![vec![tid[0], tid[1], 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x0A]]
    });
    let writes = transport.writes();
    let policy = quick_policy(3);
    let client = Client::new(transport, Protocol::stream(1), policy);

    let started = tokio::time::Instant::now();
    let err = client.read_holding_registers(0, 2).await.unwrap_err();
    assert_eq!(err, FieldbusError::NoResponse { attempts: 3 });
    assert!(started.elapsed() < policy.attempt_window());

    let writes = writes.lock().unwrap();
    assert_eq!(writes.len(), 3);
    assert!(writes.iter().all(|w| w.at - writes[0].at < policy.attempt_window()));
}

#[tokio::test(start_paused = true)]
async fn addressed_short_reply_with_valid_crc_is_retried() {
    let reply = with_crc(vec![0x01, 0x03, 0x02, 0x00, 0x0A]);
    let transport = ScriptedTransport::replying(vec![reply]);
    let writes = transport.writes();
    let policy = quick_policy(2);
    let client = Client::new(transport, Protocol::addressed(1), policy);

    let started = tokio::time::Instant::now();
    let mut cmd = Command::read_holding_registers(0, 2);
    assert_eq!(client.query(&mut cmd).await.unwrap(), CommResponse::Critical);
    assert!(cmd.data.is_empty());
    assert!(started.elapsed() < policy.attempt_window());
    assert_eq!(writes.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn silent_device_exhausts_retries_on_schedule() {
    let transport = ScriptedTransport::silent();
    let writes = transport.writes();
    let policy = quick_policy(3);
    let client = Client::new(transport, Protocol::addressed(7), policy);

    let err = client.write_single_register(1, 0xBEEF).await.unwrap_err();
    assert_eq!(err, FieldbusError::NoResponse { attempts: 3 });

    let writes = writes.lock().unwrap();
    assert_eq!(writes.len(), 3);
    assert!(writes.iter().all(|w| w.data == writes[0].data));
    for pair in writes.windows(2) {
        let spacing = pair[1].at - pair[0].at;
        assert!(spacing >= policy.attempt_window());
        assert!(spacing < policy.attempt_window() + Duration::from_millis(10));
    }
}

#[tokio::test]
async fn exception_reply_stops_retrying() {
    let transport = ScriptedTransport::replying(vec![with_crc(vec![0x01, 0x83, 0x02])]);
    let writes = transport.writes();
    let client = Client::new(transport, Protocol::addressed(1), quick_policy(3));

    let err = client.read_holding_registers(500, 1).await.unwrap_err();
    assert_eq!(
        err,
        FieldbusError::Exception {
            function: 0x03,
            code: 0x02
        }
    );
    assert_eq!(writes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn register_write_round_trip_in_both_framings() {
    for framing in [Framing::Stream, Framing::Addressed] {
        let (client_side, server_side) = duplex_pair();
        let bank = Arc::new(Mutex::new(TestBank::with_size(32)));
        let handle = StreamListener::new(
            server_side,
            Protocol::new(framing, 5),
            bank_handler(Arc::clone(&bank)),
        )
        .spawn();

        let client = Client::new(client_side, Protocol::new(framing, 5), quick_policy(2));
        client
            .write_multiple_registers(10, &[0x1111, 0x2222, 0x3333])
            .await
            .unwrap();
        client.write_single_register(13, 0x4444).await.unwrap();
        let values = client.read_holding_registers(10, 4).await.unwrap();
        assert_eq!(values, vec![0x1111, 0x2222, 0x3333, 0x4444], "{framing}");

        client.write_multiple_coils(0, &[true, false, true]).await.unwrap();
        client.write_single_coil(3, true).await.unwrap();
        let coils = client.read_coils(0, 4).await.unwrap();
        assert_eq!(coils, vec![true, false, true, true], "{framing}");

        let err = client.read_holding_registers(30, 5).await.unwrap_err();
        assert_eq!(
            err,
            FieldbusError::Exception {
                function: 0x03,
                code: 0x02
            }
        );

        let stats = handle.abort().await.unwrap();
        assert_eq!(stats.frames_served, 7);
        assert_eq!(stats.exceptions_sent, 1);
    }
}

#[test]
fn declared_length_beyond_buffer_is_unknown() {
    // Length field says 6 bytes follow, only 3 arrived
    let partial = [0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00];
    let protocol = Protocol::stream(1);

    let mut cmd = Command::read_holding_registers(0, 1);
    cmd.transaction_id = 5;
    assert_eq!(protocol.client_decode(&mut cmd, &partial), CommResponse::Unknown);

    let mut request = Command::default();
    assert_eq!(protocol.server_decode(&mut request, &partial), CommResponse::Unknown);
}

#[tokio::test]
async fn clients_share_one_line_with_several_units() {
    // Multi-drop line: every unit answers only frames carrying its address
    let units: Vec<Arc<Mutex<TestBank>>> = (0..2)
        .map(|unit| {
            let mut bank = TestBank::with_size(8);
            bank.input[0] = 100 + unit;
            Arc::new(Mutex::new(bank))
        })
        .collect();
    let handlers: Vec<_> = units.iter().map(|b| bank_handler(Arc::clone(b))).collect();

    let transport = ScriptedTransport::new(move |request| {
        let address = request[0];
        let index = match address {
            1 => 0,
            2 => 1,
            _ => return Vec::new(),
        };
        let protocol = Protocol::addressed(address);
        let mut cmd = Command::default();
        if protocol.server_decode(&mut cmd, request) != CommResponse::Ack {
            return Vec::new();
        }
        handlers[index].handle(&mut cmd);
        let mut reply = ByteWriter::new();
        assert!(protocol.server_encode(&cmd, &mut reply));
        vec![reply.as_slice().to_vec()]
    });

    let first = Client::new(transport, Protocol::addressed(1), quick_policy(2));
    let second = Client::with_shared(
        first.shared_transport(),
        Protocol::addressed(2),
        quick_policy(2),
    );

    let (a, b) = tokio::join!(
        first.read_input_registers(0, 1),
        second.read_input_registers(0, 1)
    );
    assert_eq!(a.unwrap(), vec![100]);
    assert_eq!(b.unwrap(), vec![101]);
}

#[tokio::test]
async fn udp_client_against_datagram_listener() {
    let server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();
    let bank = Arc::new(Mutex::new(TestBank::with_size(8)));
    let handle =
        DatagramListener::new(server, Protocol::stream(1), bank_handler(Arc::clone(&bank))).spawn();

    let transport = UdpTransport::connect("127.0.0.1", port).await.unwrap();
    let client = Client::new(
        transport,
        Protocol::stream(1),
        QueryPolicy {
            retries: 3,
            timeout: Duration::from_secs(1),
            latency: Duration::ZERO,
        },
    );
    client.write_single_register(2, 77).await.unwrap();
    assert_eq!(client.read_holding_registers(2, 1).await.unwrap(), vec![77]);

    let stats = handle.abort().await.unwrap();
    assert_eq!(stats.frames_served, 2);
}
