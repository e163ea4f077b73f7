//! YRM100 UHF tag reader on a serial port
//!
//! Frame layout: `BB | type | cmd | len_hi len_lo | params.. | checksum | 7E`.
//! The checksum is the low byte of the sum from `type` through the last
//! parameter. A tag notification (`type 02, cmd 22`) carries
//! `rssi | pc(2) | epc(len - 5) | crc(2)`. Commands go out as type `00`
//! and are answered with type `01`, or with cmd `FF` and an error code.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::CredentialGate;
use crate::config::ReaderConfig;
use crate::shutdown::Shutdown;
use crate::{Error, Result};

const HEADER: u8 = 0xBB;
const END: u8 = 0x7E;
const TYPE_COMMAND: u8 = 0x00;
const TYPE_RESPONSE: u8 = 0x01;
const TYPE_NOTIFICATION: u8 = 0x02;
const CMD_INVENTORY: u8 = 0x22;
const CMD_GET_REGION: u8 = 0x06;
const CMD_SET_REGION: u8 = 0x07;
const CMD_RESET: u8 = 0x0C;
const CMD_SET_POWER: u8 = 0xB6;
const CMD_GET_POWER: u8 = 0xB7;
const CMD_ERROR: u8 = 0xFF;

/// Bytes before the parameters (header, type, cmd, length)
const PREAMBLE_LEN: usize = 5;

/// Smallest parameter block of an inventory notification (rssi, pc, crc)
const NOTIFICATION_OVERHEAD: usize = 5;

/// Single inventory poll command
pub const SINGLE_POLL: [u8; 7] = [0xBB, 0x00, 0x22, 0x00, 0x00, 0x22, 0x7E];

/// Delay before reopening a failed device
const REOPEN_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on buffered bytes without a complete frame
const MAX_BUFFERED: usize = 1024;

/// How long to wait for a command response
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Reboot time after a soft reset
const RESET_SETTLE: Duration = Duration::from_secs(3);

/// Highest TX power the module accepts, in dBm
pub const MAX_TX_POWER_DBM: f32 = 26.0;

/// One tag seen by the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRead {
    pub epc: Vec<u8>,
    pub rssi: i8,
}

impl TagRead {
    /// EPC as uppercase hex, the form credentials are compared in
    #[must_use]
    pub fn credential(&self) -> String {
        hex::encode_upper(&self.epc)
    }
}

/// Checksum over `type..=last param`
#[must_use]
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Build a command frame
#[must_use]
pub fn command(cmd: u8, params: &[u8]) -> Vec<u8> {
    let len = u16::try_from(params.len()).unwrap_or(u16::MAX).to_be_bytes();
    let mut frame = Vec::with_capacity(PREAMBLE_LEN + params.len() + 2);
    frame.extend_from_slice(&[HEADER, TYPE_COMMAND, cmd, len[0], len[1]]);
    frame.extend_from_slice(params);
    frame.push(checksum(&frame[1..]));
    frame.push(END);
    frame
}

/// Split a checked frame into `(type, cmd, params)`
///
/// Returns `None` for frames with a bad length, checksum or terminator.
fn unpack(frame: &[u8]) -> Option<(u8, u8, &[u8])> {
    if frame.len() < PREAMBLE_LEN + 2 || frame[0] != HEADER || frame[frame.len() - 1] != END {
        return None;
    }

    let len = usize::from(u16::from_be_bytes([frame[3], frame[4]]));
    if frame.len() != PREAMBLE_LEN + len + 2 {
        return None;
    }

    let checksum_at = PREAMBLE_LEN + len;
    if checksum(&frame[1..checksum_at]) != frame[checksum_at] {
        tracing::trace!(frame = %hex::encode(frame), "reader frame checksum mismatch");
        return None;
    }

    Some((frame[1], frame[2], &frame[PREAMBLE_LEN..checksum_at]))
}

/// Parse one complete frame as an inventory notification
///
/// Returns `None` for other frame types (e.g. "no tag" errors) and for
/// frames with a bad length, checksum or terminator.
#[must_use]
pub fn parse_notification(frame: &[u8]) -> Option<TagRead> {
    let (kind, cmd, params) = unpack(frame)?;
    if kind != TYPE_NOTIFICATION || cmd != CMD_INVENTORY || params.len() <= NOTIFICATION_OVERHEAD {
        return None;
    }

    let epc_len = params.len() - NOTIFICATION_OVERHEAD;
    Some(TagRead {
        rssi: i8::from_be_bytes([params[0]]),
        epc: params[3..3 + epc_len].to_vec(),
    })
}

/// Parse one complete frame as the response to `cmd`
///
/// `Ok(None)` means the frame answers something else and should be skipped.
///
/// # Errors
///
/// Returns `Error::Reader` if the reader answered with an error frame
pub fn parse_response(frame: &[u8], cmd: u8) -> Result<Option<Vec<u8>>> {
    let Some((kind, answered, params)) = unpack(frame) else {
        return Ok(None);
    };
    if kind != TYPE_RESPONSE {
        return Ok(None);
    }

    if answered == CMD_ERROR {
        let code = params.first().copied().unwrap_or_default();
        return Err(Error::Reader(format!(
            "reader rejected command {cmd:02X} (error {code:02X})"
        )));
    }

    Ok((answered == cmd).then(|| params.to_vec()))
}

/// Frequency region of the reader's RF front end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    China1,
    China2,
    Europe,
    Usa,
    Korea,
}

impl Region {
    /// Wire code of the region
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::China1 => 0x01,
            Self::China2 => 0x02,
            Self::Europe => 0x03,
            Self::Usa => 0x04,
            Self::Korea => 0x06,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::China1),
            0x02 => Some(Self::China2),
            0x03 => Some(Self::Europe),
            0x04 => Some(Self::Usa),
            0x06 => Some(Self::Korea),
            _ => None,
        }
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "china1" => Ok(Self::China1),
            "china2" => Ok(Self::China2),
            "europe" | "eu" => Ok(Self::Europe),
            "usa" | "us" => Ok(Self::Usa),
            "korea" | "kr" => Ok(Self::Korea),
            other => Err(Error::Reader(format!(
                "unknown region: {other} (china1, china2, europe, usa, korea)"
            ))),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::China1 => "china1 (920-925 MHz)",
            Self::China2 => "china2 (840-845 MHz)",
            Self::Europe => "europe (865-868 MHz)",
            Self::Usa => "usa (902-928 MHz)",
            Self::Korea => "korea (917-923 MHz)",
        };
        f.write_str(name)
    }
}

/// Splits a serial byte stream into frames
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_BUFFERED {
            let excess = self.buf.len() - MAX_BUFFERED;
            self.buf.drain(..excess);
        }
    }

    /// Next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(start) = self.buf.iter().position(|b| *b == HEADER) else {
                self.buf.clear();
                return None;
            };
            self.buf.drain(..start);

            if self.buf.len() < PREAMBLE_LEN {
                return None;
            }

            let len = usize::from(u16::from_be_bytes([self.buf[3], self.buf[4]]));
            let total = PREAMBLE_LEN + len + 2;
            if total > MAX_BUFFERED {
                // Not a real header; resync on the next one
                self.buf.drain(..1);
                continue;
            }
            if self.buf.len() < total {
                return None;
            }

            if self.buf[total - 1] == END {
                return Some(self.buf.drain(..total).collect());
            }

            self.buf.drain(..1);
        }
    }
}

/// Put the serial line into raw mode at `baud` with short read timeouts
///
/// Reads return after at most 100 ms without data so the reader loop can
/// observe shutdown.
///
/// # Errors
///
/// Returns error if `stty` cannot be run or rejects the settings
pub async fn configure_port(device: &Path, baud: u32) -> Result<()> {
    let output = tokio::process::Command::new("stty")
        .arg("-F")
        .arg(device)
        .args([&baud.to_string(), "raw", "-echo", "min", "0", "time", "1"])
        .output()
        .await
        .map_err(|e| Error::Reader(format!("failed to run stty: {e}")))?;

    if !output.status.success() {
        return Err(Error::Reader(format!(
            "stty failed for {}: {}",
            device.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Serial reader settings
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub device: PathBuf,
    pub baud: u32,
    pub poll: Duration,
}

impl From<&ReaderConfig> for ReaderSettings {
    fn from(config: &ReaderConfig) -> Self {
        Self {
            device: config.device.clone(),
            baud: config.baud,
            poll: config.poll,
        }
    }
}

/// Poll the reader and feed tags to the gate until shutdown
pub async fn run(settings: ReaderSettings, gate: CredentialGate, mut shutdown: Shutdown) {
    let mut logged_open_failure = false;

    while !shutdown.is_shutdown() {
        if let Err(e) = configure_port(&settings.device, settings.baud).await {
            tracing::debug!(error = %e, "serial port not configured, using current settings");
        }

        match open(&settings.device).await {
            Ok((reader, writer)) => {
                logged_open_failure = false;
                tracing::info!(device = %settings.device.display(), "tag reader opened");
                if let Err(e) = poll_loop(&settings, reader, writer, &gate, &mut shutdown).await {
                    tracing::warn!(error = %e, "tag reader failed, reopening");
                }
            }
            Err(e) => {
                if !logged_open_failure {
                    tracing::warn!(
                        device = %settings.device.display(),
                        error = %e,
                        "tag reader unavailable, retrying"
                    );
                    logged_open_failure = true;
                }
            }
        }

        tokio::select! {
            () = shutdown.recv() => break,
            () = tokio::time::sleep(REOPEN_DELAY) => {}
        }
    }

    tracing::debug!("tag reader stopped");
}

/// Poll the reader for `duration` and return the distinct tags seen
///
/// # Errors
///
/// Returns error if the device cannot be opened or read
pub async fn scan(settings: &ReaderSettings, duration: Duration) -> Result<Vec<TagRead>> {
    if let Err(e) = configure_port(&settings.device, settings.baud).await {
        tracing::debug!(error = %e, "serial port not configured, using current settings");
    }
    let (mut reader, mut writer) = open(&settings.device).await?;

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 256];
    let mut seen: Vec<TagRead> = Vec::new();
    let deadline = tokio::time::Instant::now() + duration;

    while tokio::time::Instant::now() < deadline {
        writer.write_all(&SINGLE_POLL).await?;
        writer.flush().await?;

        if let Ok(n) = tokio::time::timeout(settings.poll, reader.read(&mut buf)).await {
            decoder.push(&buf[..n?]);
        }

        while let Some(frame) = decoder.next_frame() {
            if let Some(tag) = parse_notification(&frame) {
                if !seen.iter().any(|t| t.epc == tag.epc) {
                    seen.push(tag);
                }
            }
        }

        tokio::time::sleep(settings.poll).await;
    }

    Ok(seen)
}

/// Request/response exchange with the reader for maintenance commands
///
/// Not for use while the daemon's reader loop owns the port.
pub struct ReaderLink<R, W> {
    reader: R,
    writer: W,
    decoder: FrameDecoder,
    timeout: Duration,
}

impl ReaderLink<File, File> {
    /// Configure and open the serial device
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    pub async fn open(settings: &ReaderSettings) -> Result<Self> {
        if let Err(e) = configure_port(&settings.device, settings.baud).await {
            tracing::debug!(error = %e, "serial port not configured, using current settings");
        }
        let (reader, writer) = open(&settings.device).await?;
        Ok(Self::new(reader, writer))
    }
}

impl<R, W> ReaderLink<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    #[must_use]
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            decoder: FrameDecoder::new(),
            timeout: RESPONSE_TIMEOUT,
        }
    }

    /// Current TX power in dBm
    ///
    /// # Errors
    ///
    /// Returns error if the reader does not answer or answers short
    pub async fn tx_power(&mut self) -> Result<f32> {
        let params = self.transact(CMD_GET_POWER, &[]).await?;
        let [hi, lo, ..] = params.as_slice() else {
            return Err(Error::Reader("short TX power response".to_string()));
        };
        Ok(f32::from(u16::from_be_bytes([*hi, *lo])) / 100.0)
    }

    /// Set TX power in dBm (0.01 dBm resolution)
    ///
    /// # Errors
    ///
    /// Returns error if `dbm` is out of range or the reader refuses it
    pub async fn set_tx_power(&mut self, dbm: f32) -> Result<()> {
        if !(0.0..=MAX_TX_POWER_DBM).contains(&dbm) {
            return Err(Error::Reader(format!(
                "TX power must be within 0..={MAX_TX_POWER_DBM} dBm, got {dbm}"
            )));
        }

        // In range, so the scaled value fits
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let centi = (dbm * 100.0).round() as u16;
        let params = self.transact(CMD_SET_POWER, &centi.to_be_bytes()).await?;
        expect_success(CMD_SET_POWER, &params)
    }

    /// Current frequency region
    ///
    /// # Errors
    ///
    /// Returns error if the reader does not answer or reports an unknown code
    pub async fn region(&mut self) -> Result<Region> {
        let params = self.transact(CMD_GET_REGION, &[]).await?;
        let code = params
            .first()
            .copied()
            .ok_or_else(|| Error::Reader("empty region response".to_string()))?;
        Region::from_code(code)
            .ok_or_else(|| Error::Reader(format!("unknown region code {code:02X}")))
    }

    /// Switch the frequency region
    ///
    /// # Errors
    ///
    /// Returns error if the reader refuses the region
    pub async fn set_region(&mut self, region: Region) -> Result<()> {
        let params = self.transact(CMD_SET_REGION, &[region.code()]).await?;
        expect_success(CMD_SET_REGION, &params)
    }

    /// Soft-reset the module and wait for it to boot
    ///
    /// The module does not answer a reset; probe it afterwards with
    /// [`Self::tx_power`].
    ///
    /// # Errors
    ///
    /// Returns error if the command cannot be written
    pub async fn reset(&mut self) -> Result<()> {
        self.send(CMD_RESET, &[]).await?;
        tokio::time::sleep(RESET_SETTLE).await;

        // Drop whatever the module printed while booting
        let mut buf = [0u8; 256];
        while let Ok(Ok(n)) =
            tokio::time::timeout(Duration::from_millis(50), self.reader.read(&mut buf)).await
        {
            if n == 0 {
                break;
            }
        }
        self.decoder = FrameDecoder::new();
        Ok(())
    }

    async fn send(&mut self, cmd: u8, params: &[u8]) -> Result<()> {
        let frame = command(cmd, params);
        tracing::debug!(frame = %hex::encode_upper(&frame), "reader command");
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn transact(&mut self, cmd: u8, params: &[u8]) -> Result<Vec<u8>> {
        self.send(cmd, params).await?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut buf = [0u8; 256];
        loop {
            while let Some(frame) = self.decoder.next_frame() {
                if let Some(params) = parse_response(&frame, cmd)? {
                    return Ok(params);
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Ok(read) = tokio::time::timeout(remaining, self.reader.read(&mut buf)).await else {
                return Err(Error::Reader(format!("no response to command {cmd:02X}")));
            };
            match read? {
                // Serial reads return empty after the line timeout
                0 => tokio::time::sleep(Duration::from_millis(10)).await,
                n => self.decoder.push(&buf[..n]),
            }
        }
    }
}

fn expect_success(cmd: u8, params: &[u8]) -> Result<()> {
    match params.first() {
        Some(0x00) => Ok(()),
        other => Err(Error::Reader(format!(
            "command {cmd:02X} failed with status {:02X}",
            other.copied().unwrap_or_default()
        ))),
    }
}

impl<R, W> fmt::Debug for ReaderLink<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderLink")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Separate read and write handles, so a pending read never holds up a poll
async fn open(device: &Path) -> Result<(File, File)> {
    let reader = File::open(device)
        .await
        .map_err(|e| Error::Reader(format!("failed to open {}: {e}", device.display())))?;
    let writer = OpenOptions::new()
        .write(true)
        .open(device)
        .await
        .map_err(|e| {
            Error::Reader(format!("failed to open {} for writing: {e}", device.display()))
        })?;
    Ok((reader, writer))
}

async fn poll_loop(
    settings: &ReaderSettings,
    mut reader: File,
    mut writer: File,
    gate: &CredentialGate,
    shutdown: &mut Shutdown,
) -> Result<()> {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 256];

    loop {
        writer.write_all(&SINGLE_POLL).await?;
        writer.flush().await?;

        let read = tokio::select! {
            () = shutdown.recv() => return Ok(()),
            read = tokio::time::timeout(settings.poll, reader.read(&mut buf)) => read,
        };

        // A timeout leaves the read pending; its bytes arrive on the next read
        if let Ok(n) = read {
            decoder.push(&buf[..n?]);
        }

        while let Some(frame) = decoder.next_frame() {
            let Some(tag) = parse_notification(&frame) else {
                continue;
            };
            let credential = tag.credential();
            tracing::debug!(credential = %credential, rssi = tag.rssi, "tag read");
            if gate.observe(&credential).await {
                tracing::info!(credential = %credential, "tag accepted");
            }
        }

        tokio::select! {
            () = shutdown.recv() => return Ok(()),
            () = tokio::time::sleep(settings.poll) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPC: [u8; 12] = [0xE2, 0x00, 0x00, 0x17, 0x57, 0x0D, 0x01, 0x73, 0x27, 0x70, 0x06, 0xCB];

    fn notification(epc: &[u8], rssi: u8) -> Vec<u8> {
        let len = u16::try_from(epc.len() + NOTIFICATION_OVERHEAD).unwrap();
        let mut frame = vec![HEADER, TYPE_NOTIFICATION, CMD_INVENTORY];
        frame.extend_from_slice(&len.to_be_bytes());
        frame.push(rssi);
        frame.extend_from_slice(&[0x30, 0x00]);
        frame.extend_from_slice(epc);
        frame.extend_from_slice(&[0x12, 0x34]);
        frame.push(checksum(&frame[1..]));
        frame.push(END);
        frame
    }

    #[test]
    fn poll_command_checksum_is_consistent() {
        assert_eq!(checksum(&SINGLE_POLL[1..5]), SINGLE_POLL[5]);
    }

    #[test]
    fn parses_inventory_notification() {
        let tag = parse_notification(&notification(&EPC, 0xC9)).unwrap();
        assert_eq!(tag.credential(), "E2000017570D0173277006CB");
        assert_eq!(tag.rssi, -55);
    }

    #[test]
    fn rejects_corrupt_frames() {
        let mut bad_sum = notification(&EPC, 0xC9);
        let at = bad_sum.len() - 2;
        bad_sum[at] ^= 0xFF;
        assert!(parse_notification(&bad_sum).is_none());

        // "No tag" error response
        assert!(parse_notification(&[0xBB, 0x01, 0xFF, 0x00, 0x01, 0x15, 0x16, 0x7E]).is_none());

        let truncated = notification(&EPC, 0xC9);
        assert!(parse_notification(&truncated[..truncated.len() - 3]).is_none());
    }

    #[test]
    fn decoder_reassembles_split_frames() {
        let frame = notification(&EPC, 0xC9);
        let mut decoder = FrameDecoder::new();

        decoder.push(&[0x00, 0x13]);
        decoder.push(&frame[..6]);
        assert!(decoder.next_frame().is_none());

        decoder.push(&frame[6..]);
        decoder.push(&[0xBB, 0x01, 0xFF, 0x00, 0x01, 0x15, 0x16, 0x7E]);

        assert_eq!(decoder.next_frame().unwrap(), frame);
        assert_eq!(decoder.next_frame().unwrap()[1], 0x01);
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn decoder_resyncs_after_garbage_header() {
        let frame = notification(&EPC, 0xC9);
        let mut decoder = FrameDecoder::new();

        // Stray header whose "frame" does not end in 7E
        decoder.push(&[0xBB, 0x00, 0x22, 0x00, 0x00, 0x00, 0x00]);
        decoder.push(&frame);

        assert_eq!(decoder.next_frame().unwrap(), frame);
    }

    #[test]
    fn decoder_bounds_buffer() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&vec![0x00; MAX_BUFFERED * 2]);
        assert!(decoder.next_frame().is_none());
        assert!(decoder.buf.is_empty());
    }

    fn response(cmd: u8, params: &[u8]) -> Vec<u8> {
        let mut frame = command(cmd, params);
        frame[1] = TYPE_RESPONSE;
        let at = frame.len() - 2;
        frame[at] = checksum(&frame[1..at]);
        frame
    }

    #[test]
    fn command_frames_match_reader_protocol() {
        assert_eq!(command(CMD_INVENTORY, &[]), SINGLE_POLL);
        assert_eq!(hex::encode_upper(command(CMD_RESET, &[])), "BB000C00000C7E");
        assert_eq!(hex::encode_upper(command(CMD_GET_POWER, &[])), "BB00B70000B77E");
        assert_eq!(
            hex::encode_upper(command(CMD_SET_REGION, &[Region::China2.code()])),
            "BB00070001020A7E"
        );
        assert_eq!(
            hex::encode_upper(command(CMD_SET_REGION, &[Region::Korea.code()])),
            "BB00070001060E7E"
        );
        // 26.00 dBm
        assert_eq!(hex::encode_upper(command(CMD_SET_POWER, &[0x0A, 0x28])), "BB00B600020A28EA7E");
    }

    #[test]
    fn responses_match_their_command() {
        let power = response(CMD_GET_POWER, &[0x0A, 0x28]);
        assert_eq!(parse_response(&power, CMD_GET_POWER).unwrap(), Some(vec![0x0A, 0x28]));
        assert_eq!(parse_response(&power, CMD_GET_REGION).unwrap(), None);

        // Tag notifications are not responses
        assert_eq!(parse_response(&notification(&EPC, 0xC9), CMD_GET_POWER).unwrap(), None);

        let refused = response(CMD_ERROR, &[0x17]);
        let err = parse_response(&refused, CMD_SET_REGION).unwrap_err();
        assert!(matches!(err, Error::Reader(msg) if msg.contains("error 17")));
    }

    #[test]
    fn region_names_and_codes() {
        assert_eq!("Korea".parse::<Region>().unwrap(), Region::Korea);
        assert_eq!("us".parse::<Region>().unwrap(), Region::Usa);
        assert!("mars".parse::<Region>().is_err());

        for region in [Region::China1, Region::China2, Region::Europe, Region::Usa, Region::Korea] {
            assert_eq!(Region::from_code(region.code()), Some(region));
        }
        assert_eq!(Region::from_code(0x05), None);
    }

    #[tokio::test]
    async fn link_reads_and_sets_power() {
        let (host, mut device) = tokio::io::duplex(256);
        let (reader, writer) = tokio::io::split(host);
        let mut link = ReaderLink::new(reader, writer);

        let module = tokio::spawn(async move {
            let mut buf = [0u8; 64];

            let n = device.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], command(CMD_GET_POWER, &[]).as_slice());
            // A tag seen meanwhile is skipped
            device.write_all(&notification(&EPC, 0xC9)).await.unwrap();
            device.write_all(&response(CMD_GET_POWER, &[0x0A, 0x28])).await.unwrap();

            // 19.00 dBm
            let n = device.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], command(CMD_SET_POWER, &[0x07, 0x6C]).as_slice());
            device.write_all(&response(CMD_SET_POWER, &[0x00])).await.unwrap();
            device
        });

        assert!((link.tx_power().await.unwrap() - 26.0).abs() < f32::EPSILON);
        link.set_tx_power(19.0).await.unwrap();
        module.await.unwrap();

        assert!(link.set_tx_power(MAX_TX_POWER_DBM + 1.0).await.is_err());
    }

    #[tokio::test]
    async fn link_reports_region_and_refusals() {
        let (host, mut device) = tokio::io::duplex(256);
        let (reader, writer) = tokio::io::split(host);
        let mut link = ReaderLink::new(reader, writer);

        let module = tokio::spawn(async move {
            let mut buf = [0u8; 64];

            device.read(&mut buf).await.unwrap();
            device.write_all(&response(CMD_GET_REGION, &[0x06])).await.unwrap();

            let n = device.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], command(CMD_SET_REGION, &[0x04]).as_slice());
            device.write_all(&response(CMD_ERROR, &[0x17])).await.unwrap();
            device
        });

        assert_eq!(link.region().await.unwrap(), Region::Korea);
        assert!(link.set_region(Region::Usa).await.is_err());
        module.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn link_times_out_on_silent_reader() {
        let (host, _device) = tokio::io::duplex(256);
        let (reader, writer) = tokio::io::split(host);
        let mut link = ReaderLink::new(reader, writer);

        let err = link.tx_power().await.unwrap_err();
        assert!(matches!(err, Error::Reader(msg) if msg.contains("no response")));
    }
}
