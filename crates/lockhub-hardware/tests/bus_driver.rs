//! Driver and bus behaviour against the simulated relay chain.

use std::time::Duration;

use lockhub_core::HardwareAddress;
use lockhub_hardware::mock::{MockFault, MockRelayBoard, MockRelayHandle};
use lockhub_hardware::{
    AnyRelayTransport, BusConfig, BusHandle, DriverConfig, HardwareError, RelayBus, RelayDriver,
    WriteMode,
};
use lockhub_protocol::{ExceptionCode, FunctionCode, RequestFrame};
use tokio::time::Instant;

fn setup(slaves: &[u8], config: DriverConfig) -> (RelayDriver, BusHandle, MockRelayHandle) {
    let (board, handle) = MockRelayBoard::new(slaves);
    let (bus, worker) = RelayBus::spawn(AnyRelayTransport::Mock(board), BusConfig::default());
    (RelayDriver::new(bus, config), worker, handle)
}

fn addr(slave_id: u8, coil: u16) -> HardwareAddress {
    HardwareAddress::new(slave_id, coil).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_open_pulses_register_and_releases() {
    let (driver, worker, board) = setup(&[1], DriverConfig::default());

    driver.open(addr(1, 3)).await.unwrap();

    assert_eq!(
        board.frames(),
        vec![
            RequestFrame::write_register(1, 2, 1),
            RequestFrame::write_register(1, 2, 0),
        ]
    );
    assert_eq!(board.pulses(1, 2), 1);
    assert!(!board.is_energized(1, 2));
    worker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_open_in_coil_mode_with_readback() {
    let config = DriverConfig {
        write_mode: WriteMode::Coil,
        verify_readback: true,
        ..DriverConfig::default()
    };
    let (driver, worker, board) = setup(&[2], config);

    let report = driver.open(addr(2, 16)).await.unwrap();

    assert_eq!(report.readback, Some(0));
    let frames = board.frames();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0], RequestFrame::write_coil(2, 15, true));
    assert_eq!(frames[1], RequestFrame::write_coil(2, 15, false));
    assert_eq!(frames[2].function, FunctionCode::ReadHoldingRegisters);
    worker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_pulse_holds_relay_for_configured_duration() {
    let (driver, worker, board) = setup(&[1], DriverConfig::default());

    let started = Instant::now();
    driver.open(addr(1, 1)).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(400));
    assert!(!board.is_energized(1, 0));
    worker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_frames_are_paced() {
    let (driver, worker, _board) = setup(&[1], DriverConfig::default());

    driver.set_relay(addr(1, 1), true).await.unwrap();
    let first_done = Instant::now();
    driver.set_relay(addr(1, 1), false).await.unwrap();

    assert!(first_done.elapsed() >= Duration::from_millis(300));
    worker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_opens_do_not_interleave() {
    let (driver, worker, board) = setup(&[1], DriverConfig::default());

    let mut tasks = Vec::new();
    for coil in 1..=3 {
        let driver = driver.clone();
        tasks.push(tokio::spawn(async move { driver.open(addr(1, coil)).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let frames = board.frames();
    assert_eq!(frames.len(), 6);
    for pair in frames.chunks(2) {
        assert_eq!(pair[0].address, pair[1].address);
        assert_eq!(pair[0].value, 1);
        assert_eq!(pair[1].value, 0);
    }
    worker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_are_retried_then_succeed() {
    let (driver, worker, board) = setup(&[1], DriverConfig::default());
    board.inject_fault(MockFault::Timeout);
    board.inject_fault(MockFault::Timeout);

    driver.set_relay(addr(1, 4), true).await.unwrap();

    assert_eq!(board.frames().len(), 3);
    assert!(board.is_energized(1, 3));
    worker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_missing_card_exhausts_retries() {
    let (driver, worker, board) = setup(&[1], DriverConfig::default());

    let err = driver.open(addr(5, 1)).await.unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(
        err,
        HardwareError::RetriesExhausted { slave_id: 5, .. }
    ));
    // Energize and release were both attempted four times.
    assert_eq!(board.frames().len(), 8);
    worker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_illegal_address_fails_fast() {
    let (driver, worker, board) = setup(&[1], DriverConfig::default());
    board.inject_fault(MockFault::Exception(ExceptionCode::IllegalDataAddress));

    let err = driver.set_relay(addr(1, 1), true).await.unwrap_err();

    assert!(matches!(
        err,
        HardwareError::Exception {
            code: ExceptionCode::IllegalDataAddress,
            ..
        }
    ));
    assert_eq!(board.frames().len(), 1);
    worker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_set_slave_address_unicast() {
    let (driver, worker, board) = setup(&[1], DriverConfig::default());

    driver.set_slave_address(1, 5).await.unwrap();

    assert_eq!(board.slaves(), vec![5]);
    assert_eq!(driver.read_slave_address(5).await.unwrap(), 5);
    worker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_set_slave_address_broadcast() {
    let (driver, worker, board) = setup(&[1], DriverConfig::default());

    driver.set_slave_address(0, 9).await.unwrap();

    assert_eq!(board.slaves(), vec![9]);
    let frames = board.frames();
    assert_eq!(frames[0].slave_id, 0);
    assert_eq!(frames[1], RequestFrame::read_registers(9, 0x4000, 1));
    worker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_set_slave_address_rejects_out_of_range() {
    let (driver, worker, board) = setup(&[1], DriverConfig::default());

    for new in [0, 248] {
        let err = driver.set_slave_address(1, new).await.unwrap_err();
        assert!(matches!(err, HardwareError::Configuration { .. }));
    }
    assert!(board.frames().is_empty());
    worker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scan_lists_responders() {
    let (driver, worker, _board) = setup(&[1, 3, 7], DriverConfig::default());

    let found = driver
        .scan(1..=8, Duration::from_millis(100))
        .await
        .unwrap();

    assert_eq!(found, vec![1, 3, 7]);
    worker.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_inflight_pulse() {
    let (driver, worker, board) = setup(&[1], DriverConfig::default());

    let open = tokio::spawn({
        let driver = driver.clone();
        async move { driver.open(addr(1, 1)).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(board.is_energized(1, 0));

    worker.shutdown().await.unwrap();

    open.await.unwrap().unwrap();
    assert!(!board.is_energized(1, 0));
    assert!(matches!(
        driver.set_relay(addr(1, 1), true).await,
        Err(HardwareError::BusClosed)
    ));
}
