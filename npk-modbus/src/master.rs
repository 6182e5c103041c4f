//! Modbus-RTU master: drives the half-duplex line and turns register reads
//! into validated [`Reading`]s.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use npk_common::{FailureClass, Reading, current_timestamp_millis};

use crate::codec::{
    self, CodecError, ExceptionCode, ReadHoldingRequest, ReadHoldingResponse, response_len_hint,
};
use crate::config::{ConfigError, SerialLinkConfig};
use crate::mapping::RegisterMap;
use crate::serial::frame_gap;

/// Upper bound on stale bytes discarded before a request.
const MAX_DRAIN_BYTES: usize = 1024;

/// Error type for a poll.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Sensor unreachable after {attempts} attempt(s): {last_error}")]
    Unreachable { attempts: u32, last_error: String },

    #[error("Sensor fault: register '{register}' reported {raw:#06x}")]
    SensorFault { register: String, raw: u16 },

    #[error("Device exception: {0}")]
    DeviceException(ExceptionCode),

    #[error("Register count mismatch: expected {expected}, got {actual}")]
    RegisterCount { expected: usize, actual: usize },
}

impl AdapterError {
    /// Classification for the observability layer.
    pub fn class(&self) -> FailureClass {
        match self {
            AdapterError::Unreachable { .. } => FailureClass::Transient,
            AdapterError::SensorFault { .. }
            | AdapterError::DeviceException(_)
            | AdapterError::RegisterCount { .. } => FailureClass::Fault,
        }
    }
}

/// Failure of a single request/response exchange.
#[derive(Debug, thiserror::Error)]
enum LineError {
    #[error("response timeout")]
    Timeout,
    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Codec(#[from] CodecError),
}

/// Timeout and retry parameters for each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Bound on writing a request and on receiving its full response.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub retries: u32,
    /// Pause between attempts to let line noise settle.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SerialLinkConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retries: config.retries,
            retry_delay: config.retry_delay(),
        }
    }

    /// Total attempts per request.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// Modbus master for a single slave on a half-duplex line.
///
/// The line is owned exclusively by the master and locked for the duration
/// of each request/response exchange only. The guard is released when the
/// exchange completes, fails, times out or is cancelled.
pub struct ModbusMaster<T> {
    line: Mutex<T>,
    slave: u8,
    map: RegisterMap,
    policy: RetryPolicy,
    frame_gap: Duration,
}

impl<T> ModbusMaster<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a master over an already opened line.
    pub fn new(line: T, config: &SerialLinkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let map = RegisterMap::new(&config.registers)?;

        Ok(Self {
            line: Mutex::new(line),
            slave: config.slave_id,
            map,
            policy: RetryPolicy::from_config(config),
            frame_gap: frame_gap(config.baud_rate),
        })
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn slave(&self) -> u8 {
        self.slave
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn register_map(&self) -> &RegisterMap {
        &self.map
    }

    /// Read every configured register group and map the result.
    ///
    /// Blocks for at most `groups × attempts × (timeout + retry_delay)`.
    pub async fn poll(&self) -> Result<Reading, AdapterError> {
        let mut raw = Vec::with_capacity(self.map.register_count());

        for group in self.map.groups() {
            let request = ReadHoldingRequest::new(self.slave, group.start, group.count);
            let response = self.request(&request).await?;
            raw.extend(response.registers);
        }

        let reading = self.map.to_reading(&raw, current_timestamp_millis())?;
        debug!(
            slave = self.slave,
            nitrogen = reading.nitrogen,
            phosphorus = reading.phosphorus,
            potassium = reading.potassium,
            "Sensor poll complete"
        );
        Ok(reading)
    }

    /// Issue one request, retrying transient failures.
    async fn request(
        &self,
        request: &ReadHoldingRequest,
    ) -> Result<ReadHoldingResponse, AdapterError> {
        let attempts = self.policy.attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.transact(request).await {
                Ok(response) => return Ok(response),
                Err(LineError::Codec(CodecError::DeviceException(code))) => {
                    warn!(
                        slave = self.slave,
                        start = request.start,
                        exception = %code,
                        "Slave reported exception"
                    );
                    return Err(AdapterError::DeviceException(code));
                }
                Err(e) => {
                    warn!(
                        slave = self.slave,
                        start = request.start,
                        attempt,
                        attempts,
                        error = %e,
                        "Modbus request failed"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        Err(AdapterError::Unreachable {
            attempts,
            last_error,
        })
    }

    /// One request/response exchange under exclusive line access.
    async fn transact(
        &self,
        request: &ReadHoldingRequest,
    ) -> Result<ReadHoldingResponse, LineError> {
        let mut line = self.line.lock().await;

        let stale = drain_input(&mut *line).await?;
        if stale > 0 {
            debug!(bytes = stale, "Discarded stale bytes before request");
        }
        tokio::time::sleep(self.frame_gap).await;

        let frame = codec::encode(request);
        trace!(frame = ?frame, "TX");
        timeout(self.policy.timeout, async {
            line.write_all(&frame).await?;
            line.flush().await
        })
        .await
        .map_err(|_| LineError::Timeout)??;

        let response = timeout(self.policy.timeout, read_response(&mut *line, request))
            .await
            .map_err(|_| LineError::Timeout)??;
        trace!(frame = ?response, "RX");

        Ok(codec::decode(&response, request)?)
    }
}

/// Read until the frame implied by the header is complete.
async fn read_response<R>(
    line: &mut R,
    request: &ReadHoldingRequest,
) -> Result<Vec<u8>, LineError>
where
    R: AsyncRead + Unpin,
{
    let mut expected = request.expected_response_len();
    let mut frame = Vec::with_capacity(expected);
    let mut buf = [0u8; 256];

    while frame.len() < expected {
        let wanted = (expected - frame.len()).min(buf.len());
        let n = line.read(&mut buf[..wanted]).await?;
        if n == 0 {
            return Err(LineError::Io(io::ErrorKind::UnexpectedEof.into()));
        }
        frame.extend_from_slice(&buf[..n]);

        if let Some(len) = response_len_hint(&frame, request) {
            expected = len;
        }
    }

    Ok(frame)
}

/// Discard whatever is already waiting on the line without blocking.
async fn drain_input<R>(line: &mut R) -> Result<usize, LineError>
where
    R: AsyncRead + Unpin,
{
    let mut scratch = [0u8; 64];
    let mut drained = 0;

    while drained < MAX_DRAIN_BYTES {
        match timeout(Duration::ZERO, line.read(&mut scratch)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => drained += n,
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    Ok(drained)
}
