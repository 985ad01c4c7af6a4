//! Scripted bus for tests.
//!
//! Every command frame written to a [`MockTransport`] is handed to a
//! responder closure; whatever bytes it returns are queued for reading.
//! Returning `None` leaves the bus silent, which the master sees as a
//! timeout. Responses are also run through a [`ResponseDecoder`] so tests
//! can check what the bus actually answered.

use super::Transport;
use crate::error::Result;
use parking_lot::Mutex;
use sensorbus_protocol::{
    CommandFrame, ProtocolConstants, ResponseDecoder, ResponseFrame, COMMAND_FRAME_SIZE,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Produces the raw response bytes for one command frame.
pub type Responder = Box<dyn FnMut(CommandFrame) -> Option<Vec<u8>> + Send>;

/// In-memory transport driven by a responder closure.
///
/// Clones share state, so a test can keep one handle for inspection while
/// the master owns another.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    sof: u8,
    responder: Responder,
    read_buffer: VecDeque<u8>,
    pending_write: Vec<u8>,
    frames: Vec<CommandFrame>,
    answers: ResponseDecoder,
    responses: Vec<ResponseFrame>,
    rejected_responses: usize,
    baud_rate: u32,
    timeout: Duration,
    clear_count: usize,
}

impl MockTransport {
    /// Create a mock bus that parses frames starting with `sof`.
    pub fn new(
        sof: u8,
        responder: impl FnMut(CommandFrame) -> Option<Vec<u8>> + Send + 'static,
    ) -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                sof,
                responder: Box::new(responder),
                read_buffer: VecDeque::new(),
                pending_write: Vec::new(),
                frames: Vec::new(),
                answers: ResponseDecoder::new(ProtocolConstants {
                    sof_marker: sof,
                    ..ProtocolConstants::default()
                }),
                responses: Vec::new(),
                rejected_responses: 0,
                baud_rate: 0,
                timeout: Duration::from_millis(1),
                clear_count: 0,
            })),
        }
    }

    /// A bus on which nothing ever answers.
    pub fn silent(sof: u8) -> Self {
        Self::new(sof, |_| None)
    }

    /// Replace the responder.
    pub fn set_responder(
        &self,
        responder: impl FnMut(CommandFrame) -> Option<Vec<u8>> + Send + 'static,
    ) {
        self.inner.lock().responder = Box::new(responder);
    }

    /// Queue bytes for reading as if they had arrived unprompted.
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Every command frame written so far.
    pub fn frames(&self) -> Vec<CommandFrame> {
        self.inner.lock().frames.clone()
    }

    /// Number of command frames written so far.
    pub fn frame_count(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Forget the written frames.
    pub fn clear_frames(&self) {
        self.inner.lock().frames.clear();
    }

    /// Every well-formed response the bus has sent, in order.
    pub fn responses(&self) -> Vec<ResponseFrame> {
        self.inner.lock().responses.clone()
    }

    /// Complete responses that failed verification, such as a bad checksum.
    pub fn rejected_responses(&self) -> usize {
        self.inner.lock().rejected_responses
    }

    /// Last baud rate applied in place.
    pub fn baud_rate(&self) -> u32 {
        self.inner.lock().baud_rate
    }

    /// Last read timeout applied in place.
    pub fn timeout(&self) -> Duration {
        self.inner.lock().timeout
    }

    /// How many times the input buffer was cleared.
    pub fn clear_count(&self) -> usize {
        self.inner.lock().clear_count
    }
}

impl MockTransportInner {
    fn record_answer(&mut self, bytes: &[u8]) {
        self.answers.push(bytes);
        while let Some(decoded) = self.answers.decode() {
            match decoded {
                Ok(response) => self.responses.push(response),
                Err(e) => {
                    tracing::debug!("mock bus sent a response that fails to verify: {}", e);
                    self.rejected_responses += 1;
                }
            }
        }
    }

    fn take_frames(&mut self) {
        loop {
            let start = match self.pending_write.iter().position(|&b| b == self.sof) {
                Some(start) => start,
                None => {
                    self.pending_write.clear();
                    return;
                }
            };
            self.pending_write.drain(..start);
            if self.pending_write.len() < COMMAND_FRAME_SIZE {
                return;
            }

            let bytes: Vec<u8> = self.pending_write.drain(..COMMAND_FRAME_SIZE).collect();
            match CommandFrame::decode(&bytes, self.sof) {
                Ok(frame) => {
                    self.frames.push(frame);
                    if let Some(response) = (self.responder)(frame) {
                        self.record_answer(&response);
                        self.read_buffer.extend(response);
                    }
                }
                Err(e) => tracing::debug!("mock bus dropped malformed frame: {}", e),
            }
        }
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let (n, timeout) = {
            let mut inner = self.inner.lock();
            let n = inner.read_buffer.len().min(buffer.len());
            for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..n)) {
                *slot = byte;
            }
            (n, inner.timeout)
        };

        if n == 0 {
            // Nothing on the wire: block briefly like a real port would.
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.pending_write.extend_from_slice(data);
        inner.take_frames();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_input(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.read_buffer.clear();
        inner.clear_count += 1;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.inner.lock().baud_rate = baud_rate;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.inner.lock().timeout = timeout;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorbus_protocol::{encode_command, StatusCode};

    #[test]
    fn test_responder_sees_frames() {
        let mut mock = MockTransport::new(0xAA, |frame| Some(vec![frame.board_id, frame.command]));
        mock.write_all(&encode_command(0xAA, 4, 0, 3, 0)).unwrap();

        let mut buf = [0u8; 8];
        let n = mock.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[4, 3]);
        assert_eq!(mock.frames(), vec![CommandFrame::new(4, 0, 3, 0)]);
    }

    #[test]
    fn test_answers_are_decoded() {
        let mut mock = MockTransport::new(0xAA, |frame| {
            let response =
                ResponseFrame::new(frame.board_id, frame.addr, frame.command, StatusCode(0), vec![7])
                    .ok()?;
            let mut bytes = response.encode(&ProtocolConstants::default());
            if frame.board_id == 2 {
                let last = bytes.len() - 1;
                bytes[last] ^= 0xFF;
            }
            Some(bytes)
        });
        mock.write_all(&encode_command(0xAA, 1, 0x40, 3, 0)).unwrap();
        mock.write_all(&encode_command(0xAA, 2, 0x40, 3, 0)).unwrap();

        let responses = mock.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].header.board_id, 1);
        assert_eq!(responses[0].payload, vec![7]);
        assert_eq!(mock.rejected_responses(), 1);
    }

    #[test]
    fn test_split_writes_reassembled() {
        let mut mock = MockTransport::silent(0xAA);
        let bytes = encode_command(0xAA, 1, 2, 3, 4);
        mock.write_all(&bytes[..2]).unwrap();
        assert_eq!(mock.frame_count(), 0);
        mock.write_all(&bytes[2..]).unwrap();
        assert_eq!(mock.frame_count(), 1);
    }

    #[test]
    fn test_clear_input_drops_injected_bytes() {
        let mut mock = MockTransport::silent(0xAA);
        mock.inject_read(&[1, 2, 3]);
        mock.clear_input().unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(mock.read(&mut buf).unwrap(), 0);
        assert_eq!(mock.clear_count(), 1);
    }
}
