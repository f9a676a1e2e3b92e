//! Codec tests over in-memory async streams.

use futures::{SinkExt, StreamExt};
use lockhub_core::{CommandId, KioskId, NodeStatus};
use lockhub_protocol::{
    CoordinatorCodec, CoordinatorMessage, ExceptionCode, HeartbeatRequest, NodeCodec,
    NodeMessage, RequestFrame, ResponseFrame, RtuCodec,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
use tokio_util::codec::Framed;

#[tokio::test]
async fn test_rtu_request_response_over_stream() {
    let (client, mut slave) = duplex(64);
    let mut framed = Framed::new(client, RtuCodec::new());

    let request = RequestFrame::write_register(3, 0, 1);
    framed.send(request).await.unwrap();

    let mut raw = [0u8; 8];
    slave.read_exact(&mut raw).await.unwrap();
    let received = RequestFrame::decode(&raw).unwrap();
    assert_eq!(received, request);

    // Answer in two chunks to exercise partial frames.
    let echo = ResponseFrame::echo(&received).encode();
    slave.write_all(&echo[..3]).await.unwrap();
    slave.flush().await.unwrap();
    slave.write_all(&echo[3..]).await.unwrap();

    let response = framed.next().await.unwrap().unwrap();
    assert!(response.verify_against(&request).is_ok());
}

#[tokio::test]
async fn test_rtu_exception_response() {
    let (client, mut slave) = duplex(64);
    let mut framed = Framed::new(client, RtuCodec::new());

    framed
        .send(RequestFrame::read_registers(9, 0x4000, 1))
        .await
        .unwrap();

    let mut raw = [0u8; 8];
    slave.read_exact(&mut raw).await.unwrap();
    let exception = ResponseFrame::Exception {
        slave_id: 9,
        function: 0x03,
        code: ExceptionCode::IllegalDataAddress,
    };
    slave.write_all(&exception.encode()).await.unwrap();

    assert_eq!(framed.next().await.unwrap().unwrap(), exception);
}

#[tokio::test]
async fn test_fleet_exchange_over_stream() {
    let (node_io, coordinator_io) = duplex(4096);
    let mut node = Framed::new(node_io, NodeCodec::new());
    let mut coordinator = Framed::new(coordinator_io, CoordinatorCodec::new());

    let heartbeat = NodeMessage::Heartbeat(HeartbeatRequest {
        kiosk_id: KioskId::new("kiosk-1").unwrap(),
        zone: Some("A".to_string()),
        version: "0.1.0".to_string(),
        status: NodeStatus::Online,
        config_hash: "abc".to_string(),
    });
    node.send(heartbeat.clone()).await.unwrap();
    assert_eq!(coordinator.next().await.unwrap().unwrap(), heartbeat);

    let reply = CoordinatorMessage::Ack {
        command_id: CommandId::generate(),
    };
    coordinator.send(reply.clone()).await.unwrap();
    assert_eq!(node.next().await.unwrap().unwrap(), reply);

    drop(coordinator);
    assert!(node.next().await.is_none());
}
