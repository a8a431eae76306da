//! Real transports against local endpoints

use std::time::Duration;

use receipt_print::{
    CutMode, DeviceConfig, DryRunTransport, ErrorKind, PrintJob, PrintWorker, RasterImage,
    TransportConfig, TransportFactory,
};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::runtime::Handle;

fn sample_image() -> RasterImage {
    RasterImage::from_fn(64, 24, |x, y| if (x / 4 + y / 4) % 2 == 0 { 20 } else { 230 }).unwrap()
}

#[tokio::test]
async fn network_receives_same_bytes_as_dry_run() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        socket.read_to_end(&mut received).await.unwrap();
        received
    });

    let config = DeviceConfig::new(TransportConfig::network("127.0.0.1", port))
        .with_cut_mode(CutMode::Full)
        .with_timeout(Duration::from_secs(5));

    let live = PrintWorker::new(Handle::current(), TransportFactory::live());
    let report = live
        .submit(PrintJob::print(sample_image(), config.clone()))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.backend, "network");

    let received = server.await.unwrap();

    let dry = DryRunTransport::new();
    let dry_worker = PrintWorker::new(Handle::current(), TransportFactory::dry_run(&dry));
    dry_worker
        .submit(PrintJob::print(sample_image(), config))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(received, dry.bytes());
    assert_eq!(report.bytes_sent, received.len() as u64);
}

#[tokio::test]
async fn refused_port_is_connection_error() {
    // Bind then drop to get a port nothing listens on
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let config = DeviceConfig::new(TransportConfig::network("127.0.0.1", port))
        .with_timeout(Duration::from_secs(2));
    let worker = PrintWorker::new(Handle::current(), TransportFactory::live());

    let err = worker
        .submit(PrintJob::feed(config))
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.is_retriable());
    assert!(!worker.is_busy());
}

#[cfg(feature = "serial")]
#[tokio::test]
async fn missing_serial_device_is_connection_error() {
    let config = DeviceConfig::new(TransportConfig::serial(
        "/dev/receipt-print-test-missing",
        19200,
    ));
    let worker = PrintWorker::new(Handle::current(), TransportFactory::live());

    let err = worker
        .submit(PrintJob::feed(config))
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
}
