//! Script-side client for the command bridge.
//!
//! Sends one request per line and waits for the matching reply. Used by the
//! `tidemark call` subcommand and by integration tests.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tidemark_config::settings::DEFAULT_MAX_MESSAGE_BYTES;
use tidemark_protocol::{ErrorBody, Request, Response};

use crate::session_server::framing::{self, LineRead};

/// Errors that can occur when talking to a running workbench.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed by workbench")]
    ConnectionClosed,

    #[error("timed out waiting for a reply")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExceeded { attempts: u32, last: Box<ClientError> },

    #[error("[{code}] {message}")]
    Server {
        code: String,
        message: String,
        data: Option<Value>,
    },
}

impl From<ErrorBody> for ClientError {
    fn from(body: ErrorBody) -> Self {
        ClientError::Server {
            code: body.code,
            message: body.message,
            data: body.data,
        }
    }
}

/// A connection to the command bridge.
pub struct BridgeClient {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    buf: Vec<u8>,
    next_id: u64,
}

impl BridgeClient {
    /// Connect to a bridge on localhost.
    pub fn connect_port(port: u16) -> Result<Self, ClientError> {
        Self::connect(("127.0.0.1", port))
    }

    /// Connect to a bridge on localhost, trying `retries` more times after a
    /// refused connection. Useful right after launching `tidemark serve`.
    pub fn connect_with_retry(port: u16, retries: u32, delay: Duration) -> Result<Self, ClientError> {
        retry(retries, delay, || Self::connect_port(port))
    }

    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
            buf: Vec::new(),
            next_id: 1,
        })
    }

    /// Give up on a reply after `timeout`. `None` waits forever.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    /// Send a raw request and return the raw response. A request without an
    /// id gets one assigned.
    pub fn call(&mut self, mut request: Request) -> Result<Response, ClientError> {
        if request.id.is_none() {
            request.id = Some(Value::from(self.next_id));
            self.next_id += 1;
        }
        let json = serde_json::to_string(&request).map_err(|e| ClientError::Protocol(e.to_string()))?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;

        let response = receive_response(&mut self.reader, &mut self.buf)?;
        if response.id.is_some() && response.id != request.id {
            return Err(ClientError::Protocol(format!(
                "reply id {:?} does not match request id {:?}",
                response.id, request.id
            )));
        }
        Ok(response)
    }

    /// Run `command` and return its result, turning error replies into
    /// [`ClientError::Server`].
    pub fn request(&mut self, command: &str, params: Value, filename: Option<&str>) -> Result<Value, ClientError> {
        let mut request = Request::new(command).with_params(params);
        if let Some(name) = filename {
            request = request.with_filename(name);
        }
        Ok(self.call(request)?.into_result()?)
    }
}

/// Run `attempt` until it succeeds or has failed `retries + 1` times. Only
/// connection failures are retried.
fn retry<T>(
    retries: u32,
    delay: Duration,
    mut attempt: impl FnMut() -> Result<T, ClientError>,
) -> Result<T, ClientError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt() {
            Err(ClientError::ConnectionFailed(msg)) if retries > 0 => {
                if attempts > retries {
                    return Err(ClientError::RetriesExceeded {
                        attempts,
                        last: Box::new(ClientError::ConnectionFailed(msg)),
                    });
                }
                log::debug!("Connect attempt {} failed: {}", attempts, msg);
                thread::sleep(delay);
            }
            other => return other,
        }
    }
}

/// Read one reply line and decode it.
fn receive_response<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Response, ClientError> {
    match framing::read_line(reader, buf, DEFAULT_MAX_MESSAGE_BYTES)? {
        LineRead::Line(line) => {
            serde_json::from_slice(&line).map_err(|e| ClientError::Protocol(format!("invalid JSON: {}", e)))
        }
        LineRead::Pending => {
            buf.clear();
            Err(ClientError::Timeout)
        }
        LineRead::Closed => Err(ClientError::ConnectionClosed),
        LineRead::TooLarge => Err(ClientError::Protocol(format!(
            "message exceeds {}MB limit",
            DEFAULT_MAX_MESSAGE_BYTES / (1024 * 1024)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_receive_success() {
        let mut reader = Cursor::new(b"{\"id\":1,\"result\":{\"applied\":true}}\n".to_vec());
        let resp = receive_response(&mut reader, &mut Vec::new()).unwrap();
        assert_eq!(resp.id, Some(json!(1)));
        assert_eq!(resp.into_result().unwrap(), json!({"applied": true}));
    }

    #[test]
    fn test_receive_error_reply() {
        let line = br#"{"id":2,"error":{"code":"multiple_plots","message":"2 plots","data":{"available_plots":["a.plot","b.plot"]}}}"#;
        let mut data = line.to_vec();
        data.push(b'\n');
        let resp = receive_response(&mut Cursor::new(data), &mut Vec::new()).unwrap();
        let err: ClientError = resp.into_result().unwrap_err().into();
        match err {
            ClientError::Server { code, data, .. } => {
                assert_eq!(code, "multiple_plots");
                assert_eq!(data.unwrap()["available_plots"][1], "b.plot");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_receive_closed() {
        let err = receive_response(&mut Cursor::new(Vec::new()), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    #[test]
    fn test_retry_gives_up_with_count() {
        let mut calls = 0;
        let result: Result<(), ClientError> = retry(2, Duration::ZERO, || {
            calls += 1;
            Err(ClientError::ConnectionFailed("refused".to_string()))
        });
        assert_eq!(calls, 3);
        match result.unwrap_err() {
            ClientError::RetriesExceeded { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ClientError::ConnectionFailed(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_retry_stops_on_success_or_other_errors() {
        let mut calls = 0;
        let ok = retry(5, Duration::ZERO, || {
            calls += 1;
            if calls < 3 {
                Err(ClientError::ConnectionFailed("refused".to_string()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(ok.unwrap(), 3);

        let mut calls = 0;
        let err: Result<(), ClientError> = retry(5, Duration::ZERO, || {
            calls += 1;
            Err(ClientError::Timeout)
        });
        assert!(matches!(err.unwrap_err(), ClientError::Timeout));
        assert_eq!(calls, 1);

        // No budget means the plain error comes back
        let err: Result<(), ClientError> =
            retry(0, Duration::ZERO, || Err(ClientError::ConnectionFailed("refused".to_string())));
        assert!(matches!(err.unwrap_err(), ClientError::ConnectionFailed(_)));
    }

    #[test]
    fn test_receive_garbage() {
        let err = receive_response(&mut Cursor::new(b"<html>\n".to_vec()), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
