//! App-protocol frame codec and the decode worker.
//!
//! Writes from the app arrive as arbitrary chunks (BLE fragments). They are
//! queued to a worker thread which accumulates them in a small ring buffer
//! and walks it frame by frame: sync to the next preamble, wait for the
//! whole message, check the CRC, dispatch by message id. Garbage and CRC
//! failures advance one byte and rescan; a length field larger than the
//! buffer drops the message outright.

use std::sync::mpsc;
use std::thread;

use log::{debug, error, trace, warn};

use crate::controller::constants::{frame, MessageId};
use crate::controller::messages::ManualStart;
use crate::ring_buffer::RingBuffer;
use crate::util::crc16;

const RECEIVE_BUFFER_CAPACITY: usize = 4096;
const QUEUE_DEPTH: usize = 32;

/// Build one on-the-wire frame.
pub fn build_frame(model_id: u8, message_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + frame::OVERHEAD);
    buf.push(frame::PREAMBLE_BYTE);
    buf.push(model_id);
    buf.push(message_id);
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = crc16(&buf, frame::CRC_SEED);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Incremental parser over the receive ring buffer.
pub(crate) struct FrameParser {
    buf: RingBuffer,
}

impl FrameParser {
    pub(crate) fn new() -> Self {
        Self {
            buf: RingBuffer::new(RECEIVE_BUFFER_CAPACITY),
        }
    }

    fn advance_to_next_preamble(&mut self) {
        while let Some(bb) = self.buf.peek() {
            if bb == frame::PREAMBLE_BYTE {
                break;
            }
            self.buf.advance(1);
        }
    }

    /// Feed a chunk and return every complete, verified message in it.
    pub(crate) fn push(&mut self, data: &[u8]) -> Vec<(u8, Vec<u8>)> {
        if !self.buf.append(data) {
            error!("receive buffer is full, dropping {} bytes", data.len());
            return Vec::new();
        }
        let mut messages = Vec::new();
        self.advance_to_next_preamble();

        while self.buf.size() >= frame::OVERHEAD {
            let start = self.buf.read_index();
            let payload_len = u16::from_le_bytes([
                self.buf.get(start + frame::PAYLOAD_LEN_OFFSET).unwrap_or(0),
                self.buf.get(start + frame::PAYLOAD_LEN_OFFSET + 1).unwrap_or(0),
            ]) as usize;
            let message_size = payload_len + frame::OVERHEAD;
            trace!("message_size: {message_size}");

            if message_size > self.buf.capacity() {
                warn!("message larger than receive buffer, dropping");
                self.buf.advance(1);
            } else if message_size <= self.buf.size() {
                let crc_start = start + frame::PAYLOAD_OFFSET + payload_len;
                let crc = u16::from_le_bytes([
                    self.buf.get(crc_start).unwrap_or(0),
                    self.buf.get(crc_start + 1).unwrap_or(0),
                ]);
                let framed = self
                    .buf
                    .copy(start, crc_start)
                    .expect("framed bytes are buffered");
                let calc_crc = crc16(&framed, frame::CRC_SEED);
                if crc == calc_crc {
                    let message_id = framed[frame::MESSAGE_ID_OFFSET];
                    let payload = framed[frame::PAYLOAD_OFFSET..].to_vec();
                    self.buf.advance(message_size);
                    messages.push((message_id, payload));
                } else {
                    debug!("bad frame crc: {crc:#06x} != {calc_crc:#06x}");
                    self.buf.advance(1);
                }
            } else {
                // Header seen, body still in flight.
                break;
            }
            self.advance_to_next_preamble();
        }
        messages
    }
}

/// The session-engine surface the decode worker dispatches into.
pub trait InboundHandler: Send {
    fn selected_operation(&self, port: u8, operation: u8);
    fn operation_start(&self, port: u8);
    fn operation_stop(&self, port: u8);
    fn monitor(&self, port: u8);
    fn clear_error(&self, port: u8);
    fn connect_request(&self);
    fn cycle_graph_get(&self);
    fn get_device_info(&self);
    fn dismiss(&self, port: u8, keep_setup: bool);
    fn manual_operation(&self, request: ManualStart);
    fn set_battery_group_count(&self, port: u8, group_index: u8, count: u8);
}

fn dispatch<H: InboundHandler>(handler: &H, message_id: u8, payload: &[u8]) {
    debug!(
        "dispatch - message_id: {message_id:#04x} payload_len: {}",
        payload.len()
    );
    let need = |nn: usize| {
        if payload.len() < nn {
            warn!("message {message_id:#04x} payload too short: {}", payload.len());
            false
        } else {
            true
        }
    };
    match message_id {
        id if id == MessageId::SelectedOperationNot as u8 => {
            if need(2) {
                handler.selected_operation(payload[0], payload[1]);
            }
        }
        id if id == MessageId::OperationStartCmd as u8 => {
            if need(1) {
                handler.operation_start(payload[0]);
            }
        }
        id if id == MessageId::OperationStopCmd as u8 => {
            if need(1) {
                handler.operation_stop(payload[0]);
            }
        }
        id if id == MessageId::MonitorCmd as u8 => {
            if need(1) {
                handler.monitor(payload[0]);
            }
        }
        id if id == MessageId::OperationClearErrorCmd as u8 => {
            if need(1) {
                handler.clear_error(payload[0]);
            }
        }
        id if id == MessageId::ConnectRequest as u8 => handler.connect_request(),
        id if id == MessageId::CycleGraphGet as u8 => handler.cycle_graph_get(),
        id if id == MessageId::GetDeviceInfoCmd as u8 => handler.get_device_info(),
        id if id == MessageId::DismissCmd as u8 => {
            if need(2) {
                handler.dismiss(payload[0], payload[1] != 0);
            }
        }
        id if id == MessageId::ManualOperationCmd as u8 => match ManualStart::deserialize(payload) {
            Ok(request) => handler.manual_operation(request),
            Err(err) => warn!("bad manual operation request: {err}"),
        },
        id if id == MessageId::SetBatteryGroupCountCmd as u8 => {
            if need(3) {
                handler.set_battery_group_count(payload[0], payload[1], payload[2]);
            }
        }
        other => debug!("unhandled message id: {other:#04x}"),
    }
}

/// Owns the decode worker. `append` is what the BLE write characteristic
/// calls with each chunk it receives.
pub struct MessageHandler {
    tx: Option<mpsc::SyncSender<Vec<u8>>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MessageHandler {
    pub fn new<H: InboundHandler + 'static>(handler: H) -> Self {
        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(QUEUE_DEPTH);
        let thread = thread::Builder::new()
            .name("message-decode".into())
            .spawn(move || {
                let mut parser = FrameParser::new();
                while let Ok(chunk) = rx.recv() {
                    trace!("app r: {}", hex::encode(&chunk));
                    for (message_id, payload) in parser.push(&chunk) {
                        dispatch(&handler, message_id, &payload);
                    }
                }
            })
            .expect("failed to spawn decode thread");
        Self {
            tx: Some(tx),
            thread: Some(thread),
        }
    }

    /// Queue raw bytes from the transport; blocks only if the decode worker
    /// has fallen far behind.
    pub fn append(&self, buf: Vec<u8>) {
        if let Some(tx) = &self.tx {
            if tx.send(buf).is_err() {
                error!("decode worker is gone");
            }
        }
    }
}

impl Drop for MessageHandler {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_is_identity() {
        let payload = [1u8, 2, 3, 4];
        let frame_bytes = build_frame(0x64, 0x09, &payload);
        assert_eq!(frame_bytes.len(), payload.len() + frame::OVERHEAD);
        let mut parser = FrameParser::new();
        let messages = parser.push(&frame_bytes);
        assert_eq!(messages, vec![(0x09, payload.to_vec())]);
    }

    #[test]
    fn parser_skips_leading_garbage() {
        let mut data = vec![0x00, 0xff, 0x42];
        data.extend_from_slice(&build_frame(0x64, 0x0e, &[]));
        let mut parser = FrameParser::new();
        let messages = parser.push(&data);
        assert_eq!(messages, vec![(0x0e, vec![])]);
    }

    #[test]
    fn parser_reassembles_fragments() {
        let frame_bytes = build_frame(0x64, 0x21, &[0, 0, 3]);
        let mut parser = FrameParser::new();
        assert!(parser.push(&frame_bytes[..4]).is_empty());
        assert!(parser.push(&frame_bytes[4..6]).is_empty());
        let messages = parser.push(&frame_bytes[6..]);
        assert_eq!(messages, vec![(0x21, vec![0, 0, 3])]);
    }

    #[test]
    fn bad_crc_resyncs_to_next_frame() {
        // A frame whose CRC field is zeroed out; no tail byte aliases the
        // preamble, so the parser slides cleanly onto the next frame.
        let bad = [frame::PREAMBLE_BYTE, 0x64, 0x09, 0x01, 0x00, 0x07, 0x00, 0x00];
        assert_ne!(crc16(&bad[..6], frame::CRC_SEED), 0);
        let mut data = bad.to_vec();
        data.extend_from_slice(&build_frame(0x64, 0x0a, &[8]));
        let mut parser = FrameParser::new();
        let messages = parser.push(&data);
        assert_eq!(messages, vec![(0x0a, vec![8])]);
    }

    #[test]
    fn oversized_length_drops_message() {
        let mut data = vec![frame::PREAMBLE_BYTE, 0x64, 0x09];
        data.extend_from_slice(&0xffffu16.to_le_bytes());
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&build_frame(0x64, 0x0b, &[1]));
        let mut parser = FrameParser::new();
        let messages = parser.push(&data);
        assert_eq!(messages, vec![(0x0b, vec![1])]);
    }

    #[test]
    fn back_to_back_frames_all_dispatch() {
        let mut data = build_frame(0x64, 0x09, &[0]);
        data.extend_from_slice(&build_frame(0x64, 0x0a, &[0]));
        data.extend_from_slice(&build_frame(0x64, 0x1e, &[0, 1]));
        let mut parser = FrameParser::new();
        let messages = parser.push(&data);
        assert_eq!(
            messages,
            vec![(0x09, vec![0]), (0x0a, vec![0]), (0x1e, vec![0, 1])]
        );
    }

    #[derive(Default)]
    struct Recorder {
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl InboundHandler for std::sync::Arc<Recorder> {
        fn selected_operation(&self, port: u8, operation: u8) {
            self.calls.lock().unwrap().push(format!("selected_operation {port} {operation}"));
        }
        fn operation_start(&self, port: u8) {
            self.calls.lock().unwrap().push(format!("operation_start {port}"));
        }
        fn operation_stop(&self, port: u8) {
            self.calls.lock().unwrap().push(format!("operation_stop {port}"));
        }
        fn monitor(&self, port: u8) {
            self.calls.lock().unwrap().push(format!("monitor {port}"));
        }
        fn clear_error(&self, port: u8) {
            self.calls.lock().unwrap().push(format!("clear_error {port}"));
        }
        fn connect_request(&self) {
            self.calls.lock().unwrap().push("connect_request".into());
        }
        fn cycle_graph_get(&self) {
            self.calls.lock().unwrap().push("cycle_graph_get".into());
        }
        fn get_device_info(&self) {
            self.calls.lock().unwrap().push("get_device_info".into());
        }
        fn dismiss(&self, port: u8, keep_setup: bool) {
            self.calls.lock().unwrap().push(format!("dismiss {port} {keep_setup}"));
        }
        fn manual_operation(&self, request: ManualStart) {
            self.calls.lock().unwrap().push(format!("manual_operation {}", request.cells));
        }
        fn set_battery_group_count(&self, port: u8, group_index: u8, count: u8) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("set_battery_group_count {port} {group_index} {count}"));
        }
    }

    #[test]
    fn worker_dispatches_by_message_id() {
        let recorder = std::sync::Arc::new(Recorder::default());
        let handler = MessageHandler::new(recorder.clone());
        handler.append(build_frame(0x64, 0x0e, &[]));
        handler.append(build_frame(0x64, 0x09, &[0]));
        handler.append(build_frame(0x64, 0x21, &[0, 0, 3]));
        drop(handler); // joins the worker
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                "connect_request".to_string(),
                "operation_start 0".to_string(),
                "set_battery_group_count 0 0 3".to_string(),
            ]
        );
    }

    #[test]
    fn dispatch_guards_short_payloads() {
        let recorder = std::sync::Arc::new(Recorder::default());
        dispatch(&recorder, MessageId::SetBatteryGroupCountCmd as u8, &[0]);
        dispatch(&recorder, MessageId::DismissCmd as u8, &[0]);
        assert!(recorder.calls.lock().unwrap().is_empty());
    }
}
