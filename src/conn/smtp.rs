// SMTP probes - EHLO, HELP and banner reads with response boundary detection

use super::Connection;
use super::operations::{ExchangeRecord, Failure, OperationRecord, ReadRecord};
use crate::constants::{
    EHLO_RESPONSE_BUFFER, RESPONSE_BUFFER_GROWTH, SMTP_HELP_COMMAND, SMTP_RESPONSE_BUFFER,
    ehlo_command,
};
use crate::error::ConnError;
use lazy_static::lazy_static;
use regex::bytes::Regex;
use std::io;

lazy_static! {
    /// Final line of an SMTP reply (`250 text\r\n`), or an empty final line
    static ref SMTP_END: Regex =
        Regex::new(r"(?-u)(?:\A|\r\n)(?:[0-9]{3} [^\r\n]*)?\r\n\z").expect("valid SMTP end pattern");
}

/// Accumulated bytes end with an SMTP terminal line
pub(crate) fn smtp_response_complete(data: &[u8]) -> bool {
    SMTP_END.is_match(data)
}

/// Accumulated bytes end with at least one complete CRLF line
pub(crate) fn line_complete(data: &[u8]) -> bool {
    data.ends_with(b"\r\n")
}

fn closed_early() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "Connection closed before end of response",
    )
}

impl Connection {
    /// Read on the active stream until `complete` matches or a read fails
    ///
    /// The buffer starts at `initial` bytes and triples whenever it fills.
    /// There is no iteration cap: deadlines must bound the loop.
    pub(crate) async fn read_until(
        &mut self,
        initial: usize,
        complete: fn(&[u8]) -> bool,
    ) -> (Vec<u8>, io::Result<()>) {
        let mut buf = vec![0u8; initial.max(1)];
        let mut length = 0;

        loop {
            match self.layer.read(&mut buf[length..]).await {
                Ok(0) => {
                    buf.truncate(length);
                    return (buf, Err(closed_early()));
                }
                Ok(n) => {
                    length += n;
                    if complete(&buf[..length]) {
                        tracing::debug!("Matched response terminator after {} bytes", length);
                        buf.truncate(length);
                        return (buf, Ok(()));
                    }
                    if length == buf.len() {
                        buf.resize(length * RESPONSE_BUFFER_GROWTH, 0);
                    }
                }
                Err(e) => {
                    buf.truncate(length);
                    return (buf, Err(e));
                }
            }
        }
    }

    /// Send `EHLO <domain>` and record the single bounded read that follows
    pub async fn ehlo(&mut self, domain: &str) -> Result<(), ConnError> {
        let command = ehlo_command(domain).into_bytes();
        let (response, result) = match self.layer.write(&command).await {
            Ok(_) => {
                let mut buf = vec![0u8; EHLO_RESPONSE_BUFFER];
                match self.layer.read(&mut buf).await {
                    Ok(0) => (Some(Vec::new()), Err(closed_early())),
                    Ok(n) => {
                        buf.truncate(n);
                        (Some(buf), Ok(()))
                    }
                    Err(e) => (Some(Vec::new()), Err(e)),
                }
            }
            Err(e) => (None, Err(e)),
        };

        self.recorder
            .push(OperationRecord::GreetingExchange(ExchangeRecord {
                command,
                response,
                error: Failure::from_io_result(&result),
            }));
        Ok(result?)
    }

    /// Send `HELP` and read until the reply's final line
    pub async fn smtp_help(&mut self) -> Result<(), ConnError> {
        let command = SMTP_HELP_COMMAND.as_bytes().to_vec();
        let (response, result) = match self.layer.write(&command).await {
            Ok(_) => {
                let (response, result) = self
                    .read_until(SMTP_RESPONSE_BUFFER, smtp_response_complete)
                    .await;
                (Some(response), result)
            }
            Err(e) => (None, Err(e)),
        };

        self.recorder
            .push(OperationRecord::CapabilityQuery(ExchangeRecord {
                command,
                response,
                error: Failure::from_io_result(&result),
            }));
        Ok(result?)
    }

    /// Read an unsolicited greeting banner into `buf`
    ///
    /// `buf`'s current length is the initial read size (a default is used
    /// when empty). On return it holds exactly the bytes received, even on
    /// error, and the count is returned on success.
    pub async fn smtp_banner(&mut self, buf: &mut Vec<u8>) -> Result<usize, ConnError> {
        let initial = if buf.is_empty() {
            SMTP_RESPONSE_BUFFER
        } else {
            buf.len()
        };
        let (received, result) = self.read_until(initial, smtp_response_complete).await;

        buf.clear();
        buf.extend_from_slice(&received);
        self.recorder.push(OperationRecord::BannerRead(ReadRecord {
            received,
            error: Failure::from_io_result(&result),
        }));
        result?;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_reply_is_complete() {
        assert!(smtp_response_complete(b"220 mail.example.com ESMTP\r\n"));
        assert!(smtp_response_complete(b"250 \r\n"));
    }

    #[test]
    fn test_multiline_reply_waits_for_final_line() {
        assert!(!smtp_response_complete(b"220-hi\r\n"));
        assert!(!smtp_response_complete(b"250-PIPELINING\r\n250-SIZE\r\n"));
        assert!(smtp_response_complete(b"220-hi\r\n250 OK\r\n"));
        assert!(smtp_response_complete(
            b"214-Commands:\r\n214-  HELO EHLO\r\n214 End of HELP\r\n"
        ));
    }

    #[test]
    fn test_partial_final_line_is_incomplete() {
        assert!(!smtp_response_complete(b"220 mail.exam"));
        assert!(!smtp_response_complete(b"220-hi\r\n250 OK"));
        assert!(!smtp_response_complete(b""));
    }

    #[test]
    fn test_empty_final_line_terminates_early() {
        assert!(smtp_response_complete(b"\r\n"));
        assert!(smtp_response_complete(b"garbage banner\r\n\r\n"));
        assert!(!smtp_response_complete(b"garbage banner\r\n"));
    }

    #[test]
    fn test_line_complete() {
        assert!(line_complete(b"220 Ready to start TLS\r\n"));
        assert!(line_complete(b"a001 OK Begin TLS\r\n"));
        assert!(!line_complete(b"220 Ready"));
    }
}
