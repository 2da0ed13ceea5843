//! Serial link to the Powerlab charger.
//!
//! The charger talks 19 200 baud 8-N-1 with DTR asserted and no flow
//! control. Because nothing backpressures the device, a dedicated reader
//! thread drains the OS buffer into a large ring buffer continuously; the
//! 7686-byte preset response would overflow the kernel buffer otherwise.
//!
//! Every command is a short ASCII prefix. Responses echo the command and
//! carry a big-endian CRC-16 under a per-command seed; preset payloads are
//! additionally checksummed per 510-byte block. Write commands are paired
//! with an erase command and fixed settle delays.

use std::io::Read;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace};
use serialport::{ClearBuffer, SerialPort};

use crate::charger::options::Options;
use crate::charger::preset::{Preset, NUM_PRESETS, PRESET_LEN};
use crate::charger::status::Status;
use crate::error::{Error, Result, VerifyError};
use crate::util::{checksum, crc16, swap_bytes};

const BAUD_RATE: u32 = 19_200;
const PORT_DESCRIPTION: &str = "FT232R USB UART";
const READ_TIMEOUT: Duration = Duration::from_secs(1);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const PRESETS_TIMEOUT: Duration = Duration::from_secs(7);
const ERASE_SETTLE: Duration = Duration::from_millis(50);
const PRESETS_WRITE_SETTLE: Duration = Duration::from_millis(5250);
const CONNECT_PROBES: u32 = 3;
const READER_CHUNK: usize = 240;
const BUFFER_CAPACITY: usize = 48 * 1024;

pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);

const PRESETS_RESPONSE_LEN: usize = 7686;
const PRESETS_BODY_LEN: usize = 7684;
const OPTIONS_RESPONSE_LEN: usize = 262;
const OPTIONS_BODY_LEN: usize = 68;
const STATUS_RESPONSE_LEN: usize = 153;

/// Re-invoke `func` until it succeeds, up to `num` extra attempts with a
/// fixed delay between tries.
pub fn retry<T, F>(mut func: F, mut num: u32, interval: Duration) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    loop {
        match func() {
            Ok(val) => return Ok(val),
            Err(err) => {
                if num == 0 {
                    return Err(err);
                }
                num -= 1;
                debug!("retrying after: {err}");
                if !interval.is_zero() {
                    thread::sleep(interval);
                }
            }
        }
    }
}

/// What the session engine needs from a charger. `Powerlab` is the real
/// implementation; tests script their own.
pub trait ChargerLink: Send {
    fn connect(&mut self) -> Result<Options>;
    fn close(&mut self);
    fn read_status(&mut self) -> Result<Status>;
    fn read_presets(&mut self, retries: u32) -> Result<Vec<Preset>>;
    fn write_presets(&mut self, presets: &mut [Preset], retries: u32) -> Result<()>;
    fn read_options(&mut self, retries: u32) -> Result<Options>;
    fn write_options(&mut self, options: &mut Options, retries: u32) -> Result<()>;
    fn set_active_preset(&mut self, which: u8, retries: u32) -> Result<()>;
    fn command_enter(&mut self, retries: u32) -> Result<()>;
    fn command_monitor(&mut self, num_parallel: u8, use_bananas: bool, retries: u32) -> Result<()>;
    fn command_charge(&mut self, num_parallel: u8, use_bananas: bool, retries: u32) -> Result<()>;
    fn command_discharge(&mut self, num_parallel: u8, use_bananas: bool, retries: u32) -> Result<()>;
    fn command_cycle(&mut self, num_parallel: u8, use_bananas: bool, retries: u32) -> Result<()>;
}

struct BufferInner {
    buf: crate::ring_buffer::RingBuffer,
    stopped: bool,
}

struct BufferShared {
    inner: Mutex<BufferInner>,
    cv: Condvar,
}

/// The reader thread and its ring buffer. One producer (the thread), one
/// consumer (whoever runs the transaction).
struct SerialBuffer {
    shared: Arc<BufferShared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SerialBuffer {
    fn new(mut port: Box<dyn SerialPort>) -> Self {
        let shared = Arc::new(BufferShared {
            inner: Mutex::new(BufferInner {
                buf: crate::ring_buffer::RingBuffer::new(BUFFER_CAPACITY),
                stopped: false,
            }),
            cv: Condvar::new(),
        });
        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("powerlab-reader".into())
            .spawn(move || {
                let _ = port.set_timeout(Duration::from_millis(100));
                let mut chunk = [0u8; READER_CHUNK];
                loop {
                    {
                        let inner = thread_shared.inner.lock().unwrap();
                        if inner.stopped {
                            break;
                        }
                    }
                    match port.read(&mut chunk) {
                        Ok(nn) if nn > 0 => {
                            let mut inner = thread_shared.inner.lock().unwrap();
                            loop {
                                if inner.stopped {
                                    return;
                                }
                                if inner.buf.append(&chunk[..nn]) {
                                    thread_shared.cv.notify_all();
                                    break;
                                }
                                inner = thread_shared.cv.wait(inner).unwrap();
                            }
                        }
                        // Timeouts and transient errors just mean no data yet.
                        _ => {}
                    }
                }
            })
            .expect("failed to spawn reader thread");
        Self {
            shared,
            thread: Some(thread),
        }
    }

    fn clear(&self) {
        self.shared.inner.lock().unwrap().buf.clear();
    }

    /// Block until `nbytes` are buffered or the timeout elapses.
    fn read(&self, nbytes: usize, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock().unwrap();
        loop {
            if inner.stopped {
                return None;
            }
            if let Some(data) = inner.buf.consume(nbytes) {
                self.shared.cv.notify_all();
                return Some(data);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.shared.cv.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
        }
    }

    fn stop(&mut self) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.stopped = true;
        }
        self.shared.cv.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SerialBuffer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn num_parallel_to_char(num: u8) -> Result<u8> {
    if num == 0 || num > 8 {
        return Err(Error::invalid(format!("invalid num_parallel: {num}")));
    }
    Ok(b'l' + num - 1)
}

fn verify_cmd(cmd: &[u8], buf: &[u8], context: &'static str) -> Result<()> {
    if buf.len() < cmd.len() {
        return Err(VerifyError::Short {
            context,
            expected: cmd.len(),
            actual: buf.len(),
        }
        .into());
    }
    if &buf[..cmd.len()] != cmd {
        return Err(VerifyError::EchoMismatch { context }.into());
    }
    Ok(())
}

fn verify_cmd_with_values(cmd: &[u8], buf: &[u8], values: &[u8], context: &'static str) -> Result<()> {
    verify_cmd(cmd, buf, context)?;
    if &buf[cmd.len()..] != values {
        return Err(VerifyError::EchoMismatch { context }.into());
    }
    Ok(())
}

fn verify_crc(buf: &[u8], crc_index: usize, crc_init: u16, context: &'static str) -> Result<()> {
    if buf.len() < crc_index + 2 {
        return Err(VerifyError::Short {
            context,
            expected: crc_index + 2,
            actual: buf.len(),
        }
        .into());
    }
    let crc = u16::from_be_bytes([buf[crc_index], buf[crc_index + 1]]);
    let calc_crc = crc16(&buf[..crc_index], crc_init);
    trace!("{context} crc: {crc:#06x} calc_crc: {calc_crc:#06x}");
    if crc != calc_crc {
        return Err(VerifyError::Crc {
            context,
            expected: calc_crc,
            actual: crc,
        }
        .into());
    }
    Ok(())
}

/// Every 510 bytes of preset data carries a 2-byte rotating checksum.
fn verify_preset_checksums(data: &[u8]) -> Result<()> {
    for block in 0..15 {
        let start = block * 512;
        let end = start + 510;
        let calc_cksum = checksum(&data[start..end], 0xc8);
        let check16 = u16::from_be_bytes([data[end], data[end + 1]]);
        if calc_cksum != check16 {
            return Err(VerifyError::Checksum {
                block,
                expected: calc_cksum,
                actual: check16,
            }
            .into());
        }
    }
    Ok(())
}

/// Byte offset of preset `num` inside the presets payload, skipping the
/// interleaved block checksums.
fn preset_offset(num: usize) -> usize {
    num * PRESET_LEN + (num / 5) * 2
}

/// Assemble the `WrtP` body: 75 preset images with block checksums woven in
/// every fifth preset, byte-swapped from offset 4. Returns the body and the
/// CRC the charger is expected to echo back.
fn build_presets_body(presets: &mut [Preset]) -> (Vec<u8>, u16) {
    let mut body = b"WrtP".to_vec();
    for (ii, preset) in presets.iter_mut().enumerate() {
        let empty = preset.is_empty();
        preset.set_validated(!empty);
        body.extend_from_slice(preset.raw_bytes());

        if (ii + 1) % 5 == 0 {
            let block = (ii + 1) / 5 - 1;
            let start = 4 + block * 512;
            let end = start + 510;
            debug_assert_eq!(body.len(), end);
            let cksum = checksum(&body[start..end], 0xc8);
            body.push((cksum >> 8) as u8);
            body.push((cksum & 0xff) as u8);
        }
    }
    debug_assert_eq!(body.len(), PRESETS_BODY_LEN);
    swap_bytes(&mut body, 4);
    let crc = crc16(&body[4..], 0x4d1);
    (body, crc)
}

/// Assemble the `WrtC` body: the persisted half of the options image,
/// byte-swapped from offset 4.
fn build_options_body(options: &mut Options) -> (Vec<u8>, u16) {
    let mut body = b"WrtC".to_vec();
    body.extend_from_slice(&options.raw_bytes()[128..192]);
    debug_assert_eq!(body.len(), OPTIONS_BODY_LEN);
    swap_bytes(&mut body, 4);
    let crc = crc16(&body[4..], 0xf5);
    (body, crc)
}

/// The real serial link.
pub struct Powerlab {
    configured_port: Option<String>,
    using_port: Option<String>,
    ser: Option<Box<dyn SerialPort>>,
    buffer: Option<SerialBuffer>,
}

impl Powerlab {
    pub fn new(port: Option<String>) -> Self {
        Self {
            configured_port: port,
            using_port: None,
            ser: None,
            buffer: None,
        }
    }

    pub fn port(&self) -> Option<&str> {
        self.using_port.as_deref()
    }

    /// Find a port whose USB product description matches the charger's
    /// FTDI bridge.
    pub fn discover_port() -> Result<String> {
        let ports = serialport::available_ports()
            .map_err(|err| Error::ConnectFailed(err.to_string()))?;
        for port in ports {
            if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
                if usb.product.as_deref() == Some(PORT_DESCRIPTION) {
                    return Ok(port.port_name);
                }
            }
        }
        Err(Error::ConnectFailed("no port found".into()))
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        let ser = self
            .ser
            .as_mut()
            .ok_or_else(|| Error::ConnectFailed("not connected".into()))?;
        let _ = ser.clear(ClearBuffer::All);
        if let Some(buffer) = &self.buffer {
            buffer.clear();
        }
        ser.set_timeout(timeout).map_err(to_io)?;
        std::io::Write::write_all(ser, data)?;
        trace!("serial w: {}", hex::encode(data));
        Ok(())
    }

    /// Read exactly `nbytes`, waiting up to `timeout`. Returns whatever
    /// arrived; callers turn a short read into a verify error.
    fn read(&mut self, nbytes: usize, timeout: Duration) -> Vec<u8> {
        let resp = if let Some(buffer) = &self.buffer {
            buffer.read(nbytes, timeout).unwrap_or_default()
        } else {
            self.read_direct(nbytes, timeout)
        };
        if !resp.is_empty() {
            trace!("serial r: {}", hex::encode(&resp));
        }
        resp
    }

    /// Before the reader thread exists (the connect probe) the port is read
    /// directly in small slices until the deadline.
    fn read_direct(&mut self, nbytes: usize, timeout: Duration) -> Vec<u8> {
        let mut out = Vec::with_capacity(nbytes);
        let Some(ser) = self.ser.as_mut() else {
            return out;
        };
        let deadline = Instant::now() + timeout;
        let _ = ser.set_timeout(Duration::from_millis(100));
        let mut chunk = [0u8; 256];
        while out.len() < nbytes {
            let want = (nbytes - out.len()).min(chunk.len());
            match ser.read(&mut chunk[..want]) {
                Ok(nn) if nn > 0 => out.extend_from_slice(&chunk[..nn]),
                _ => {}
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        out
    }

    fn read_expect(&mut self, nbytes: usize, timeout: Duration, context: &'static str) -> Result<Vec<u8>> {
        let resp = self.read(nbytes, timeout);
        if resp.len() < nbytes {
            return Err(VerifyError::Short {
                context,
                expected: nbytes,
                actual: resp.len(),
            }
            .into());
        }
        Ok(resp)
    }

    fn send_cmd(&mut self, num_parallel: u8, command_char: u8) -> Result<()> {
        let mut cmd = b"Se".to_vec();
        cmd.push(num_parallel_to_char(num_parallel)?);
        cmd.push(command_char);
        self.write(&cmd, WRITE_TIMEOUT)?;
        let resp = self.read_expect(6, READ_TIMEOUT, "command")?;
        verify_cmd_with_values(&cmd, &resp, &[0x05, 0xdc], "command")
    }

    fn read_options_once(&mut self) -> Result<Options> {
        let cmd = b"PrsI";
        self.write(cmd, WRITE_TIMEOUT)?;
        let resp = self.read_expect(OPTIONS_RESPONSE_LEN, READ_TIMEOUT, "read options")?;
        verify_cmd(cmd, &resp, "read options")?;
        verify_crc(&resp[cmd.len()..], 260 - cmd.len(), 0x342, "read options")?;
        Options::new(resp[cmd.len()..260].to_vec())
    }
}

fn to_io(err: serialport::Error) -> Error {
    Error::Transport(std::io::Error::other(err))
}

impl ChargerLink for Powerlab {
    /// Open the port (discovering it if none was configured) and probe the
    /// charger by reading its options. The reader thread starts only after
    /// the probe succeeds.
    fn connect(&mut self) -> Result<Options> {
        let port_name = match &self.configured_port {
            Some(port) => port.clone(),
            None => Self::discover_port()?,
        };
        self.using_port = Some(port_name.clone());
        debug!("connecting port:{port_name}");

        let mut ser = serialport::new(port_name.as_str(), BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|err| Error::ConnectFailed(err.to_string()))?;
        ser.write_data_terminal_ready(true).map_err(to_io)?;
        self.ser = Some(ser);

        let mut probes = CONNECT_PROBES;
        while probes > 0 {
            match self.read_options_once() {
                Ok(options) => {
                    info!("connected to {port_name}");
                    let reader_port = self
                        .ser
                        .as_ref()
                        .expect("port was just opened")
                        .try_clone()
                        .map_err(|err| Error::ConnectFailed(err.to_string()))?;
                    self.buffer = Some(SerialBuffer::new(reader_port));
                    return Ok(options);
                }
                Err(err) => {
                    probes -= 1;
                    debug!("connect probe failed: {err}");
                }
            }
        }
        self.ser = None;
        Err(Error::ConnectFailed("charger did not answer".into()))
    }

    fn close(&mut self) {
        if let Some(mut buffer) = self.buffer.take() {
            buffer.stop();
        }
        if let Some(ser) = self.ser.take() {
            let _ = ser.clear(ClearBuffer::All);
            if let Some(port) = &self.using_port {
                info!("closed {port}");
            }
        }
    }

    fn read_status(&mut self) -> Result<Status> {
        debug!("read_status");
        let cmd = b"Ram\0";
        self.write(cmd, WRITE_TIMEOUT)?;
        let resp = self.read_expect(STATUS_RESPONSE_LEN, READ_TIMEOUT, "read status")?;
        verify_cmd(cmd, &resp, "read status")?;
        verify_crc(&resp[cmd.len()..], 151 - cmd.len(), 0x926, "read status")?;
        Status::new(resp[cmd.len()..151].to_vec())
    }

    fn read_presets(&mut self, retries: u32) -> Result<Vec<Preset>> {
        debug!("reading presets");
        retry(
            || {
                let cmd = b"Prst";
                self.write(cmd, WRITE_TIMEOUT)?;
                let resp = self.read_expect(PRESETS_RESPONSE_LEN, PRESETS_TIMEOUT, "read presets")?;
                verify_cmd(cmd, &resp, "read presets")?;
                verify_crc(&resp[4..], 7680, 0x18e4, "read presets")?;
                verify_preset_checksums(&resp[4..])?;
                let mut presets = Vec::with_capacity(NUM_PRESETS);
                for num in 0..NUM_PRESETS {
                    let offset = 4 + preset_offset(num);
                    presets.push(Preset::new(&resp[offset..offset + PRESET_LEN], num as u8)?);
                }
                Ok(presets)
            },
            retries,
            RETRY_INTERVAL,
        )
    }

    fn write_presets(&mut self, presets: &mut [Preset], retries: u32) -> Result<()> {
        debug!("writing presets");
        if presets.len() != NUM_PRESETS {
            return Err(Error::invalid(format!("expected {NUM_PRESETS} presets")));
        }
        retry(
            || {
                let (body, calc_crc) = build_presets_body(presets);

                debug!("erase presets");
                let cmd = b"ErsP";
                self.write(cmd, WRITE_TIMEOUT)?;
                let resp = self.read_expect(6, READ_TIMEOUT, "erase presets")?;
                verify_cmd_with_values(cmd, &resp, &[0x22, 0x1b], "erase presets")?;

                thread::sleep(ERASE_SETTLE);
                debug!("write presets");
                self.write(&body, PRESETS_TIMEOUT)?;
                thread::sleep(PRESETS_WRITE_SETTLE);
                let resp = self.read_expect(PRESETS_RESPONSE_LEN, PRESETS_TIMEOUT, "write presets")?;
                let crc = u16::from_be_bytes([resp[7684], resp[7685]]);
                if crc != calc_crc {
                    return Err(VerifyError::Crc {
                        context: "write presets",
                        expected: calc_crc,
                        actual: crc,
                    }
                    .into());
                }
                debug!("presets write success");
                Ok(())
            },
            retries,
            RETRY_INTERVAL,
        )
    }

    fn read_options(&mut self, retries: u32) -> Result<Options> {
        debug!("loading options");
        retry(|| self.read_options_once(), retries, RETRY_INTERVAL)
    }

    fn write_options(&mut self, options: &mut Options, retries: u32) -> Result<()> {
        debug!("writing options");
        retry(
            || {
                let (body, calc_crc) = build_options_body(options);

                debug!("erase options");
                let cmd = b"ErsC";
                self.write(cmd, WRITE_TIMEOUT)?;
                let resp = self.read_expect(6, READ_TIMEOUT, "erase options")?;
                verify_cmd_with_values(cmd, &resp, &[0x0d, 0x04], "erase options")?;

                debug!("write options");
                self.write(&body, WRITE_TIMEOUT)?;
                let resp = self.read_expect(70, READ_TIMEOUT, "write options")?;
                let crc = u16::from_be_bytes([resp[68], resp[69]]);
                if crc != calc_crc {
                    return Err(VerifyError::Crc {
                        context: "write options",
                        expected: calc_crc,
                        actual: crc,
                    }
                    .into());
                }
                debug!("options write success");
                Ok(())
            },
            retries,
            RETRY_INTERVAL,
        )
    }

    fn set_active_preset(&mut self, which: u8, retries: u32) -> Result<()> {
        debug!("set_active_preset {which}");
        if which as usize >= NUM_PRESETS {
            return Err(Error::invalid(format!("invalid preset: {which}")));
        }
        retry(
            || {
                let mut cmd = b"SelP".to_vec();
                cmd.push(which);
                let calc_crc = crc16(&[which], 0x1114);
                self.write(&cmd, WRITE_TIMEOUT)?;
                let resp = self.read_expect(cmd.len() + 2, READ_TIMEOUT, "set preset")?;
                let crc = u16::from_be_bytes([resp[cmd.len()], resp[cmd.len() + 1]]);
                if crc != calc_crc {
                    return Err(VerifyError::Crc {
                        context: "set preset",
                        expected: calc_crc,
                        actual: crc,
                    }
                    .into());
                }
                Ok(())
            },
            retries,
            RETRY_INTERVAL,
        )
    }

    fn command_enter(&mut self, retries: u32) -> Result<()> {
        debug!("command_enter");
        retry(|| self.send_cmd(1, b'E'), retries, RETRY_INTERVAL)
    }

    fn command_monitor(&mut self, num_parallel: u8, use_bananas: bool, retries: u32) -> Result<()> {
        debug!("command_monitor");
        let ch = if use_bananas { b'M' } else { b'm' };
        retry(|| self.send_cmd(num_parallel, ch), retries, RETRY_INTERVAL)
    }

    fn command_charge(&mut self, num_parallel: u8, use_bananas: bool, retries: u32) -> Result<()> {
        debug!("command_charge");
        let ch = if use_bananas { b'C' } else { b'c' };
        retry(|| self.send_cmd(num_parallel, ch), retries, RETRY_INTERVAL)
    }

    fn command_discharge(&mut self, num_parallel: u8, use_bananas: bool, retries: u32) -> Result<()> {
        debug!("command_discharge");
        let ch = if use_bananas { b'D' } else { b'd' };
        retry(|| self.send_cmd(num_parallel, ch), retries, RETRY_INTERVAL)
    }

    fn command_cycle(&mut self, num_parallel: u8, use_bananas: bool, retries: u32) -> Result<()> {
        debug!("command_cycle");
        let ch = if use_bananas { b'Y' } else { b'y' };
        retry(|| self.send_cmd(num_parallel, ch), retries, RETRY_INTERVAL)
    }
}

impl Drop for Powerlab {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn preset_offsets_skip_block_checksums() {
        assert_eq!(preset_offset(0), 0);
        assert_eq!(preset_offset(4), 408);
        assert_eq!(preset_offset(5), 512);
        assert_eq!(preset_offset(74), 74 * 102 + 14 * 2);
        // The last preset ends two bytes short of the final checksum.
        assert_eq!(preset_offset(74) + PRESET_LEN, 15 * 512 - 2);
    }

    #[test]
    fn parallel_pack_command_characters() {
        assert_eq!(num_parallel_to_char(1).unwrap(), b'l');
        assert_eq!(num_parallel_to_char(2).unwrap(), b'm');
        assert_eq!(num_parallel_to_char(3).unwrap(), b'n');
        assert_eq!(num_parallel_to_char(8).unwrap(), b's');
        assert!(num_parallel_to_char(0).is_err());
        assert!(num_parallel_to_char(9).is_err());
    }

    #[test]
    fn echo_verification_kinds() {
        assert!(verify_cmd(b"Prst", b"Prst....", "t").is_ok());
        match verify_cmd(b"Prst", b"Pr", "t") {
            Err(Error::Verify(VerifyError::Short { .. })) => {}
            other => panic!("expected short, got {other:?}"),
        }
        match verify_cmd(b"Prst", b"Xrst....", "t") {
            Err(Error::Verify(VerifyError::EchoMismatch { .. })) => {}
            other => panic!("expected echo mismatch, got {other:?}"),
        }
        assert!(verify_cmd_with_values(b"ErsP", b"ErsP\x22\x1b", &[0x22, 0x1b], "t").is_ok());
        assert!(verify_cmd_with_values(b"ErsP", b"ErsP\x22\x1c", &[0x22, 0x1b], "t").is_err());
    }

    #[test]
    fn crc_verification_round_trips() {
        let mut buf = vec![1u8, 2, 3, 4, 5];
        let crc = crc16(&buf, 0x926);
        buf.push((crc >> 8) as u8);
        buf.push((crc & 0xff) as u8);
        assert!(verify_crc(&buf, 5, 0x926, "t").is_ok());
        buf[0] ^= 1;
        match verify_crc(&buf, 5, 0x926, "t") {
            Err(Error::Verify(VerifyError::Crc { .. })) => {}
            other => panic!("expected crc error, got {other:?}"),
        }
        match verify_crc(&buf[..4], 5, 0x926, "t") {
            Err(Error::Verify(VerifyError::Short { .. })) => {}
            other => panic!("expected short, got {other:?}"),
        }
    }

    fn blank_presets() -> Vec<Preset> {
        (0..NUM_PRESETS)
            .map(|num| Preset::new(&[0u8; PRESET_LEN], num as u8).unwrap())
            .collect()
    }

    #[test]
    fn presets_body_layout_and_checksums() {
        let mut presets = blank_presets();
        presets[3].set_charge_mamps(5000);
        let (body, crc) = build_presets_body(&mut presets);
        assert_eq!(body.len(), PRESETS_BODY_LEN);
        assert_eq!(&body[..4], b"WrtP");
        assert_eq!(crc, crc16(&body[4..], 0x4d1));

        // Undo the word swap and the payload must verify like a read.
        let mut unswapped = body.clone();
        swap_bytes(&mut unswapped, 4);
        verify_preset_checksums(&unswapped[4..]).unwrap();
    }

    #[test]
    fn presets_body_marks_non_empty_validated() {
        let mut presets = blank_presets();
        presets[0].set_charge_mamps(5000);
        let _ = build_presets_body(&mut presets);
        assert!(presets[0].is_validated());
        assert!(!presets[1].is_validated());
    }

    #[test]
    fn options_body_carries_persisted_half() {
        let mut options = Options::new(vec![0; 192]).unwrap();
        options.set_battery_amps_limit(15.0);
        let (body, crc) = build_options_body(&mut options);
        assert_eq!(body.len(), OPTIONS_BODY_LEN);
        assert_eq!(&body[..4], b"WrtC");
        assert_eq!(crc, crc16(&body[4..], 0xf5));
    }

    #[test]
    fn retry_counts_extra_attempts() {
        let calls = Cell::new(0u32);
        let result: Result<()> = retry(
            || {
                calls.set(calls.get() + 1);
                Err(Error::invalid("nope"))
            },
            2,
            Duration::ZERO,
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 3);

        let calls = Cell::new(0u32);
        let result = retry(
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 2 {
                    Err(Error::invalid("nope"))
                } else {
                    Ok(42)
                }
            },
            2,
            Duration::ZERO,
        );
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 2);
    }
}
