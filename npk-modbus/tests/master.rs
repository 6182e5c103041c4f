//! Integration tests for the Modbus master against a simulated slave.

use std::time::Duration;

use npk_modbus::codec::{self, ExceptionCode, ReadHoldingRequest};
use npk_modbus::{AdapterError, ModbusMaster, RegisterConfig, RetryPolicy, SerialLinkConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// What the simulated slave does with the n-th request it receives.
enum Reply {
    Frame(Vec<u8>),
    Late(Vec<u8>, Duration),
    Silence,
}

/// Serve requests from `script` until the master hangs up; returns every request seen.
async fn fake_slave(mut io: DuplexStream, script: Vec<Reply>) -> Vec<Vec<u8>> {
    let mut requests = Vec::new();

    loop {
        let mut request = [0u8; codec::REQUEST_FRAME_LEN];
        if io.read_exact(&mut request).await.is_err() {
            break;
        }
        let index = requests.len();
        requests.push(request.to_vec());

        let reply = match script.get(index) {
            Some(Reply::Frame(frame)) => Some(frame),
            Some(Reply::Late(frame, delay)) => {
                tokio::time::sleep(*delay).await;
                Some(frame)
            }
            Some(Reply::Silence) | None => None,
        };
        if let Some(frame) = reply {
            if io.write_all(frame).await.is_err() {
                break;
            }
        }
    }

    requests
}

fn sensor_config() -> SerialLinkConfig {
    let mut config = SerialLinkConfig::new("/dev/ttyUSB0");
    config.baud_rate = 9600;
    config
}

async fn run(
    config: &SerialLinkConfig,
    script: Vec<Reply>,
) -> (Result<npk_common::Reading, AdapterError>, Vec<Vec<u8>>) {
    let (master_io, slave_io) = tokio::io::duplex(512);
    let slave = tokio::spawn(fake_slave(slave_io, script));

    let master = ModbusMaster::new(master_io, config).expect("valid config");
    let result = master.poll().await;
    drop(master);

    let requests = slave.await.expect("slave task panicked");
    (result, requests)
}

fn npk_response() -> Vec<u8> {
    vec![
        0x01, 0x03, 0x06, 0x00, 0x5F, 0x00, 0x41, 0x00, 0x52, 0x64, 0x91,
    ]
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_npk_reading() {
    let (result, requests) = run(&sensor_config(), vec![Reply::Frame(npk_response())]).await;

    let reading = result.expect("poll should succeed");
    assert_eq!(
        requests,
        vec![vec![0x01, 0x03, 0x00, 0x1E, 0x00, 0x03, 0x65, 0xCD]]
    );
    assert_eq!(
        (reading.nitrogen, reading.phosphorus, reading.potassium),
        (95, 65, 82)
    );
    assert_eq!(
        reading.to_payload(false),
        serde_json::json!({ "nitrogen": 95, "phosphorus": 65, "potassium": 82 })
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_exhaust_retries() {
    let config = sensor_config();
    let script = vec![Reply::Silence, Reply::Silence, Reply::Silence, Reply::Silence];

    let (result, requests) = run(&config, script).await;

    match result {
        Err(AdapterError::Unreachable { attempts, .. }) => assert_eq!(attempts, 4),
        other => panic!("expected Unreachable, got {:?}", other),
    }
    assert_eq!(requests.len(), config.retries as usize + 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_within_retry_bound() {
    let script = vec![
        Reply::Silence,
        Reply::Silence,
        Reply::Frame(npk_response()),
    ];

    let (result, requests) = run(&sensor_config(), script).await;

    assert_eq!(result.unwrap().nitrogen, 95);
    assert_eq!(requests.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_no_retries_means_single_attempt() {
    let mut config = sensor_config();
    config.retries = 0;

    let (result, requests) = run(&config, vec![Reply::Silence]).await;

    assert!(matches!(
        result,
        Err(AdapterError::Unreachable { attempts: 1, .. })
    ));
    assert_eq!(requests.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_crc_error_is_retried() {
    let mut corrupted = npk_response();
    corrupted[4] ^= 0x01;

    let script = vec![Reply::Frame(corrupted), Reply::Frame(npk_response())];
    let (result, requests) = run(&sensor_config(), script).await;

    assert_eq!(result.unwrap().potassium, 82);
    assert_eq!(requests.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_device_exception_is_not_retried() {
    let script = vec![
        Reply::Frame(codec::encode_exception(1, ExceptionCode::IllegalDataAddress)),
        Reply::Frame(npk_response()),
    ];

    let (result, requests) = run(&sensor_config(), script).await;

    assert!(matches!(
        result,
        Err(AdapterError::DeviceException(
            ExceptionCode::IllegalDataAddress
        ))
    ));
    assert_eq!(requests.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sentinel_value_is_sensor_fault() {
    let sentinel = codec::encode_response(1, &[0xFFFF, 65, 82]).unwrap();
    let script = vec![Reply::Frame(sentinel)];

    let (result, requests) = run(&sensor_config(), script).await;

    match result {
        Err(AdapterError::SensorFault { register, raw }) => {
            assert_eq!(register, "nitrogen");
            assert_eq!(raw, 0xFFFF);
        }
        other => panic!("expected SensorFault, got {:?}", other),
    }
    assert_eq!(requests.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_response_is_discarded() {
    // The first answer arrives after the master gave up; it must not be
    // mistaken for the answer to the retry.
    let script = vec![
        Reply::Late(
            codec::encode_response(1, &[1, 2, 3]).unwrap(),
            Duration::from_millis(1100),
        ),
        Reply::Frame(npk_response()),
    ];

    let (result, requests) = run(&sensor_config(), script).await;

    let reading = result.unwrap();
    assert_eq!(reading.nitrogen, 95);
    assert_eq!(requests.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_one_request_per_register_group() {
    let mut config = sensor_config();
    config
        .registers
        .push(RegisterConfig::new("temperature", 0x12).with_scale(0.1));

    let script = vec![
        Reply::Frame(codec::encode_response(1, &[215]).unwrap()),
        Reply::Frame(npk_response()),
    ];
    let (result, requests) = run(&config, script).await;

    assert_eq!(
        requests,
        vec![
            codec::encode(&ReadHoldingRequest::new(1, 0x12, 1)),
            codec::encode(&ReadHoldingRequest::new(1, 0x1E, 3)),
        ]
    );

    let reading = result.unwrap();
    assert_eq!(reading.raw_registers, vec![215, 95, 65, 82]);
    assert!((reading.extras["temperature"] - 21.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_exact_wire_exchange() {
    let line = tokio_test::io::Builder::new()
        .write(&[0x01, 0x03, 0x00, 0x1E, 0x00, 0x03, 0x65, 0xCD])
        .read(&npk_response())
        .build();

    let master = ModbusMaster::new(line, &sensor_config())
        .unwrap()
        .with_policy(RetryPolicy {
            timeout: Duration::from_millis(500),
            retries: 0,
            retry_delay: Duration::ZERO,
        });

    let reading = master.poll().await.unwrap();
    assert_eq!(reading.raw_registers, vec![95, 65, 82]);
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = sensor_config();
    config.slave_id = 0;

    let (line, _other) = tokio::io::duplex(64);
    assert!(ModbusMaster::new(line, &config).is_err());
}
