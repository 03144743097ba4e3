use std::time::Duration;
use tokio::{
    io::{ AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream },
    task::JoinHandle,
};
use arcs_reform::{
    devices::{ ConnectOptions, Multimeter, PowerSupply },
    Ampere, Error, Meter, PowerSource, Volt,
};

/// Plays an instrument on the far end of an in-memory stream
///
/// Each script entry is the command the instrument expects next and the line it answers with, if
/// any. The task hangs up after the last entry and returns every line it received.
fn fake_instrument(script: Vec<(&'static str, Option<&'static str>)>) -> (DuplexStream, JoinHandle<Vec<String>>)
{
    let (host, device) = tokio::io::duplex(256);

    let handle = tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(device);
        let mut lines = BufReader::new(read).lines();
        let mut received = Vec::new();

        for (expected, response) in script {
            let line = match lines.next_line().await.unwrap() {
                Some(line) => line,
                None => break,
            };
            assert_eq!(line, expected);
            received.push(line);

            if let Some(response) = response {
                write.write_all(format!("{}\n", response).as_bytes()).await.unwrap();
            }
        }

        received
    });

    (host, handle)
}

fn no_reset() -> ConnectOptions
{
    ConnectOptions { reset: false, timeout: Some(Duration::from_secs(1)), ..Default::default() }
}

#[tokio::test]
async fn power_supply_session_traffic()
{
    let (stream, instrument) = fake_instrument(vec![
        ("*IDN?", Some("KORAD KD3005P V2.0 SN:12345")),
        ("*RST", None),
        ("SYST:REM", None),
        ("VOLT 0.5", None),
        ("CURR 0.3", None),
        ("OUTPUT:STATE ON", None),
        ("MEAS:VOLT?", Some("0.4990")),
        ("MEAS:CURR?", Some("+2.00000E-03")),
        ("OUTPUT:STATE?", Some("1")),
        ("OUTPUT:STATE OFF", None),
    ]);

    let mut supply = PowerSupply::with(stream);
    supply.connect("ASRL/dev/ttyUSB0::INSTR", &ConnectOptions::default()).await.unwrap();
    assert_eq!(supply.instrument().id(), Some("KORAD KD3005P V2.0 SN:12345"));

    supply.set_remote(true).await.unwrap();
    supply.set_voltage_limit(Volt::new(0.5)).await.unwrap();
    supply.set_current_limit(Ampere::new(0.15 / 0.5)).await.unwrap();
    supply.set_output_enable(true).await.unwrap();

    assert_eq!(supply.measure_voltage().await.unwrap(), Volt::new(0.499));
    assert_eq!(supply.measure_current().await.unwrap(), Ampere::new(0.002));
    assert!(supply.output_enable().await.unwrap());

    supply.set_output_enable(false).await.unwrap();

    assert_eq!(instrument.await.unwrap().len(), 10);
}

#[tokio::test]
async fn rejected_setting_is_a_fault()
{
    let (stream, _instrument) = fake_instrument(vec![
        ("*IDN?", Some("KORAD KD3005P V2.0")),
        ("VOLT 40", None),
        ("SYST:ERR?", Some("-222,\"Data out of range\"")),
    ]);

    let mut supply = PowerSupply::with(stream).check_errors(true);
    supply.connect("ASRL/dev/ttyUSB0", &no_reset()).await.unwrap();

    match supply.set_voltage_limit(Volt::new(40.0)).await {
        Err(Error::InstrumentFault { code, message }) => {
            assert_eq!(code, -222);
            assert_eq!(message, "Data out of range");
        },
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn accepted_setting_passes_error_check()
{
    let (stream, instrument) = fake_instrument(vec![
        ("*IDN?", Some("KORAD KD3005P V2.0")),
        ("CURR 0.1", None),
        ("SYST:ERR?", Some("+0,\"No error\"")),
    ]);

    let mut supply = PowerSupply::with(stream).check_errors(true);
    supply.connect("ASRL/dev/ttyUSB0", &no_reset()).await.unwrap();
    supply.set_current_limit(Ampere::new(0.1)).await.unwrap();

    assert_eq!(instrument.await.unwrap().len(), 3);
}

#[tokio::test]
async fn silent_port_is_unavailable()
{
    let (stream, _instrument) = fake_instrument(vec![]);

    let mut supply = PowerSupply::with(stream);

    match supply.connect("ASRL/dev/ttyUSB3", &no_reset()).await {
        Err(Error::InstrumentUnavailable { name, resource, .. }) => {
            assert_eq!(name, "PS");
            assert_eq!(resource, "ASRL/dev/ttyUSB3");
        },
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn multimeter_readings()
{
    let (stream, instrument) = fake_instrument(vec![
        ("*IDN?", Some("Keysight Technologies,34461A,MY12345678,A.02.14")),
        ("MEASURE:VOLTAGE:DC?", Some("+1.49900000E+00")),
        ("MEASURE:CURRENT:DC?", Some("+2.10000000E-03")),
        ("MEASURE:CURRENT:DC? 0.01,0.000001", Some("+2.50000000E-06")),
    ]);

    let mut meter = Multimeter::with(stream);
    meter.connect("ASRL/dev/ttyUSB1", &no_reset()).await.unwrap();

    assert_eq!(meter.measure_voltage().await.unwrap(), Volt::new(1.499));
    assert_eq!(meter.measure_current().await.unwrap(), Ampere::new(0.0021));

    let leakage = meter
        .dc_current_ranged(Ampere::new(0.01), Some(Ampere::new(1e-6)))
        .await
        .unwrap();
    assert_eq!(leakage, Ampere::new(2.5e-6));

    assert_eq!(instrument.await.unwrap().len(), 4);
}
