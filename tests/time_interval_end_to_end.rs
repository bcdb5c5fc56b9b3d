//! End-to-end time-interval acquisition through the public API.

use counter_daq::acquisition::TimeIntervalRun;
use counter_daq::data::{MeasurementBuffer, MeasurementRecord};
use counter_daq::instrument::{
    ConnectionDescriptor, CounterModel, CounterRegistry, DriverOptions, Fca3103,
    FrequencyCounter, Interface, MockTransport, SampleSink,
};
use counter_daq::session::InstrumentSession;
use counter_daq::shutdown::StopSignal;
use counter_daq::CounterError;
use std::time::Duration;

const TI_CONFIG: &str = "ref:A sampl:3 tstamp:Y coup:dc imp:1000000";

fn scripted_fca() -> MockTransport {
    MockTransport::new()
        .with_reply("*IDN?", "TEKTRONIX,FCA3103,B010101,V1.2")
        .with_reply("READ?", "1.000e-09,10")
        .with_reply("READ?", "2.000e-09,11")
        .with_reply("READ?", "3.000e-09,12")
}

/// Registry whose FCA3103 constructor hands out a scripted transport.
fn mock_registry(mock: MockTransport) -> CounterRegistry {
    let mut registry = CounterRegistry::new();
    registry.register(CounterModel::Fca3103, move |_descriptor, options| {
        let transport = mock.clone();
        Box::pin(async move {
            Ok::<Box<dyn FrequencyCounter>, CounterError>(Box::new(Fca3103::with_transport(
                Box::new(transport),
                options,
            )))
        })
    });
    registry
}

#[tokio::test]
async fn three_timestamped_replies_become_three_records() {
    let mock = scripted_fca();
    let registry = mock_registry(mock.clone());
    let mut session = InstrumentSession::open(
        &registry,
        CounterModel::Fca3103,
        ConnectionDescriptor::new(Interface::Usb, "0"),
        DriverOptions::default(),
    )
    .await
    .expect("session opens");
    assert_eq!(session.info(), "TEKTRONIX FCA3103 (s/n: B010101)");

    let buffer = MeasurementBuffer::new(0);
    let stop = StopSignal::never();
    let taken = session
        .time_interval(TI_CONFIG, &SampleSink::new(&buffer, &stop))
        .await
        .expect("acquisition succeeds");

    assert_eq!(taken, 3);
    assert_eq!(
        buffer.take(3).expect("three records"),
        vec![
            MeasurementRecord::with_timestamp(1e-9, 10.0),
            MeasurementRecord::with_timestamp(2e-9, 11.0),
            MeasurementRecord::with_timestamp(3e-9, 12.0),
        ]
    );
    assert!(buffer.is_empty());

    let commands = mock.commands();
    assert_eq!(commands.iter().filter(|c| *c == "READ?").count(), 3);
    assert_eq!(commands.last().map(String::as_str), Some("READ?"));

    session.close().await.expect("close");
    assert!(mock.is_closed());
}

#[tokio::test]
async fn trigger_cache_is_reapplied_after_configure() {
    let mock = scripted_fca();
    let registry = mock_registry(mock.clone());
    let mut session = InstrumentSession::open(
        &registry,
        CounterModel::Fca3103,
        ConnectionDescriptor::new(Interface::Usb, "0"),
        DriverOptions::default(),
    )
    .await
    .expect("session opens");

    session.trig_level("trig1:1.5 trig2:1.5").await.expect("trig_level");
    mock.clear_commands();

    let buffer = MeasurementBuffer::new(0);
    let stop = StopSignal::never();
    session
        .time_interval(TI_CONFIG, &SampleSink::new(&buffer, &stop))
        .await
        .expect("acquisition succeeds");

    let commands = mock.commands();
    let configure = commands
        .iter()
        .position(|c| c == "CONFIGURE:TINTERVAL (@1),(@2)")
        .expect("configure issued");
    assert_eq!(
        &commands[configure + 1..configure + 5],
        &[
            "INPUT1:LEVEL:AUTO OFF",
            "INPUT1:LEVEL 1.500",
            "INPUT2:LEVEL:AUTO OFF",
            "INPUT2:LEVEL 1.500",
        ]
    );
}

#[tokio::test]
async fn run_writes_records_to_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ti.dat");
    let mock = scripted_fca();
    let mut session = InstrumentSession::open(
        &mock_registry(mock),
        CounterModel::Fca3103,
        ConnectionDescriptor::new(Interface::Usb, "0"),
        DriverOptions::default(),
    )
    .await
    .expect("session opens");

    let summary = TimeIntervalRun::new(TI_CONFIG, &path)
        .with_buffer(2, Duration::from_secs(1))
        .with_flush_interval(Duration::from_millis(10))
        .execute(&mut session, StopSignal::never())
        .await
        .expect("run succeeds");

    assert_eq!(summary.samples, 3);
    assert_eq!(summary.lines_written, 3);
    assert_eq!(
        std::fs::read_to_string(&path).expect("output file"),
        "1e-9, 10.0\n2e-9, 11.0\n3e-9, 12.0\n"
    );
}

#[tokio::test]
async fn missing_required_key_sends_nothing() {
    let mock = scripted_fca();
    let mut session = InstrumentSession::open(
        &mock_registry(mock.clone()),
        CounterModel::Fca3103,
        ConnectionDescriptor::new(Interface::Usb, "0"),
        DriverOptions::default(),
    )
    .await
    .expect("session opens");
    mock.clear_commands();

    let buffer = MeasurementBuffer::new(0);
    let stop = StopSignal::never();
    let err = session
        .time_interval("ref:A sampl:3 tstamp:Y coup:dc", &SampleSink::new(&buffer, &stop))
        .await
        .expect_err("imp is required");

    assert!(matches!(err, CounterError::Configuration(_)));
    assert!(mock.commands().is_empty());
    assert!(buffer.is_empty());
}

#[tokio::test]
async fn builtin_drivers_reject_foreign_interfaces() {
    let registry = CounterRegistry::with_builtin();

    let fca = InstrumentSession::open(
        &registry,
        CounterModel::Fca3103,
        ConnectionDescriptor::new(Interface::Vxi11, "127.0.0.1"),
        DriverOptions::default(),
    )
    .await;
    assert!(matches!(
        fca.err(),
        Some(CounterError::UnsupportedInterface { driver: "FCA3103", .. })
    ));

    let ks = InstrumentSession::open(
        &registry,
        CounterModel::Ks53230,
        ConnectionDescriptor::new(Interface::Usb, "0"),
        DriverOptions::default(),
    )
    .await;
    assert!(matches!(
        ks.err(),
        Some(CounterError::UnsupportedInterface { driver: "53230A", .. })
    ));
}
