//! Ogg container layer: page capture and per-stream packet reassembly.
//!
//! Bytes from a [`DataSource`](crate::source::DataSource) are pumped into a
//! [`SyncState`] scratch buffer, which captures whole pages. Pages are routed
//! by serial number to [`StreamState`] reassemblers, which rebuild codec
//! packets from the lacing segments, including packets continued across
//! pages. Hole detection reports skipped pages so callers can apply the
//! bounded retry discipline.

use std::collections::VecDeque;

use bytes::Buf;
use once_cell::sync::Lazy;

use crate::source::DataSource;

/// Page capture pattern. Every page starts with these four bytes.
pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";

/// Fixed page header size before the segment table.
const HEADER_BYTES: usize = 27;

/// Maximum retries for packet extraction after an out-of-sync report.
pub const HOLE_RETRY_LIMIT: u32 = 100;

const FLAG_CONTINUED: u8 = 0x01;
const FLAG_BOS: u8 = 0x02;
const FLAG_EOS: u8 = 0x04;

// ============================================================================
// CRC
// ============================================================================

// Ogg page checksum: CRC-32 with polynomial 0x04c11db7, zero initial value,
// no reflection, no final xor.
static CRC_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut r = (i as u32) << 24;
        for _ in 0..8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04c1_1db7
            } else {
                r << 1
            };
        }
        *entry = r;
    }
    table
});

pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc = (crc << 8) ^ CRC_TABLE[(((crc >> 24) as u8) ^ byte) as usize];
    }
    crc
}

// ============================================================================
// Pages
// ============================================================================

/// A complete, checksum-verified page.
#[derive(Debug, Clone)]
pub struct OggPage {
    version: u8,
    header_type: u8,
    granule: i64,
    serial: u32,
    sequence: u32,
    segment_table: Vec<u8>,
    body: Vec<u8>,
}

impl OggPage {
    pub fn version(&self) -> u8 {
        self.version
    }

    /// True when the first segment continues a packet from the prior page.
    pub fn continued(&self) -> bool {
        self.header_type & FLAG_CONTINUED != 0
    }

    /// True for the first page of a logical stream.
    pub fn bos(&self) -> bool {
        self.header_type & FLAG_BOS != 0
    }

    /// True for the final page of a logical stream.
    pub fn eos(&self) -> bool {
        self.header_type & FLAG_EOS != 0
    }

    /// Granule position of the last packet completed on this page, or -1
    /// when no packet completes here.
    pub fn granule(&self) -> i64 {
        self.granule
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

/// Result of draining one page from the sync buffer.
#[derive(Debug)]
pub enum PageOut {
    /// A verified page.
    Page(OggPage),
    /// Not enough buffered bytes for a full page.
    NeedData,
    /// Garbage or a corrupt page was skipped. Call again to resume.
    Desync,
}

// ============================================================================
// Sync layer
// ============================================================================

/// Byte-level synchronization scratch.
///
/// Owns the unconsumed tail of the input and captures pages from it. The
/// buffer survives across pumps, so partial pages accumulate until complete.
#[derive(Default)]
pub struct SyncState {
    buffer: Vec<u8>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards all buffered bytes. Required after the data source is
    /// repositioned, since buffered bytes no longer match the read cursor.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Requests up to `len` bytes from the source into the scratch buffer.
    /// Returns the number of bytes actually read; 0 means exhaustion.
    pub fn pump(&mut self, source: &mut dyn DataSource, len: usize) -> std::io::Result<usize> {
        let start = self.buffer.len();
        self.buffer.resize(start + len, 0);
        let mut filled = 0;
        while filled < len {
            let n = source.read(&mut self.buffer[start + filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.buffer.truncate(start + filled);
        Ok(filled)
    }

    /// Skips buffered bytes up to the next capture pattern, discarding any
    /// partial page left over from a raw byte-offset seek.
    pub fn page_seek(&mut self) {
        if let Some(pos) = find_capture(&self.buffer) {
            self.buffer.drain(..pos);
        } else {
            // Keep a potential partial capture pattern at the tail.
            let keep = self.buffer.len().min(CAPTURE_PATTERN.len() - 1);
            self.buffer.drain(..self.buffer.len() - keep);
        }
    }

    /// Drains at most one complete page from the scratch buffer.
    pub fn page_out(&mut self) -> PageOut {
        if self.buffer.len() < CAPTURE_PATTERN.len() {
            return PageOut::NeedData;
        }
        if !self.buffer.starts_with(CAPTURE_PATTERN) {
            self.page_seek();
            return PageOut::Desync;
        }
        if self.buffer.len() < HEADER_BYTES {
            return PageOut::NeedData;
        }

        let segment_count = self.buffer[26] as usize;
        let header_len = HEADER_BYTES + segment_count;
        if self.buffer.len() < header_len {
            return PageOut::NeedData;
        }
        let body_len: usize = self.buffer[HEADER_BYTES..header_len]
            .iter()
            .map(|&l| l as usize)
            .sum();
        let page_len = header_len + body_len;
        if self.buffer.len() < page_len {
            return PageOut::NeedData;
        }

        // Verify the checksum with the crc field zeroed.
        let mut scratch = self.buffer[..page_len].to_vec();
        let stored = u32::from_le_bytes([scratch[22], scratch[23], scratch[24], scratch[25]]);
        scratch[22..26].fill(0);
        if crc32(&scratch) != stored {
            // Corrupt page: drop the capture byte and rescan.
            self.buffer.drain(..1);
            self.page_seek();
            return PageOut::Desync;
        }

        let mut header = &self.buffer[4..HEADER_BYTES];
        let version = header.get_u8();
        let header_type = header.get_u8();
        let granule = header.get_i64_le();
        let serial = header.get_u32_le();
        let sequence = header.get_u32_le();
        let _crc = header.get_u32_le();
        let _segments = header.get_u8();

        let page = OggPage {
            version,
            header_type,
            granule,
            serial,
            sequence,
            segment_table: self.buffer[HEADER_BYTES..header_len].to_vec(),
            body: self.buffer[header_len..page_len].to_vec(),
        };
        self.buffer.drain(..page_len);
        PageOut::Page(page)
    }
}

fn find_capture(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(CAPTURE_PATTERN.len())
        .position(|w| w == CAPTURE_PATTERN)
}

// ============================================================================
// Packets
// ============================================================================

/// A codec-level unit reassembled from page segments.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Vec<u8>,
    /// Granule position attributed from the page, -1 when the page did not
    /// complete this packet last.
    pub granule: i64,
    pub bos: bool,
    pub eos: bool,
}

/// Result of pulling one packet from a stream reassembler.
#[derive(Debug)]
pub enum PacketOut {
    Packet(Packet),
    /// No complete packet buffered; feed more pages.
    NeedData,
    /// A page gap or lost packet head was detected. The reassembler has
    /// recovered; retry to continue with the next whole packet.
    Hole,
}

/// Per-stream packet reassembly, keyed by the stream serial number.
pub struct StreamState {
    serial: u32,
    packets: VecDeque<Packet>,
    /// Body of the packet currently being assembled.
    partial: Vec<u8>,
    /// True while `partial` holds the head of an unfinished packet.
    partial_active: bool,
    next_sequence: Option<u32>,
    holed: bool,
}

impl StreamState {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            packets: VecDeque::new(),
            partial: Vec::new(),
            partial_active: false,
            next_sequence: None,
            holed: false,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Clears buffered packets and resynchronization state. The reassembler
    /// accepts whatever page arrives next without reporting a hole.
    pub fn reset(&mut self) {
        self.packets.clear();
        self.partial.clear();
        self.partial_active = false;
        self.next_sequence = None;
        self.holed = false;
    }

    /// Feeds one page into the reassembler. Pages for other streams and
    /// stale replays of already-consumed pages are ignored.
    pub fn page_in(&mut self, page: &OggPage) {
        if page.serial != self.serial {
            return;
        }
        if let Some(expected) = self.next_sequence {
            let behind = page.sequence.wrapping_sub(expected) > u32::MAX / 2;
            if behind {
                return;
            }
            if page.sequence != expected {
                // Pages went missing; whatever we were assembling is lost.
                self.partial.clear();
                self.partial_active = false;
                self.holed = true;
            }
        }
        self.next_sequence = Some(page.sequence.wrapping_add(1));

        // A continued page without a packet in progress means the head was
        // on a page we never saw.
        let mut skip_continuation = page.continued() && !self.partial_active;
        if skip_continuation {
            self.holed = true;
        }
        if !page.continued() && self.partial_active {
            // The prior page promised a continuation that never came.
            self.partial.clear();
            self.partial_active = false;
            self.holed = true;
        }

        let last_complete = page.segment_table.iter().rposition(|&l| l < 255);
        let mut cursor = 0usize;
        for (index, &lace) in page.segment_table.iter().enumerate() {
            let segment = &page.body[cursor..cursor + lace as usize];
            cursor += lace as usize;
            if skip_continuation {
                if lace < 255 {
                    skip_continuation = false;
                }
                continue;
            }
            self.partial.extend_from_slice(segment);
            self.partial_active = true;
            if lace < 255 {
                let is_last = last_complete == Some(index);
                self.packets.push_back(Packet {
                    data: std::mem::take(&mut self.partial),
                    granule: if is_last { page.granule } else { -1 },
                    bos: page.bos(),
                    eos: page.eos() && is_last,
                });
                self.partial_active = false;
            }
        }
    }

    /// Returns the next complete packet, a request for more pages, or a
    /// one-shot hole report.
    pub fn packet_out(&mut self) -> PacketOut {
        if self.holed {
            self.holed = false;
            return PacketOut::Hole;
        }
        match self.packets.pop_front() {
            Some(packet) => PacketOut::Packet(packet),
            None => PacketOut::NeedData,
        }
    }
}

// ============================================================================
// Test mux helpers
// ============================================================================

#[cfg(test)]
pub(crate) mod mux {
    use super::*;

    pub struct PageSpec<'a> {
        pub serial: u32,
        pub sequence: u32,
        pub granule: i64,
        pub bos: bool,
        pub eos: bool,
        pub continued: bool,
        pub packets: &'a [&'a [u8]],
    }

    /// Builds one page holding whole packets.
    pub fn page(spec: &PageSpec<'_>) -> Vec<u8> {
        let mut table = Vec::new();
        let mut body = Vec::new();
        for packet in spec.packets {
            let mut remaining = packet.len();
            loop {
                let lace = remaining.min(255);
                table.push(lace as u8);
                remaining -= lace;
                if lace < 255 {
                    break;
                }
            }
            body.extend_from_slice(packet);
        }
        raw_page(spec, &table, &body)
    }

    /// Builds a page from an explicit segment table, for continuation tests.
    pub fn raw_page(spec: &PageSpec<'_>, table: &[u8], body: &[u8]) -> Vec<u8> {
        assert!(table.len() <= 255);
        assert_eq!(table.iter().map(|&l| l as usize).sum::<usize>(), body.len());
        let mut out = Vec::with_capacity(HEADER_BYTES + table.len() + body.len());
        out.extend_from_slice(CAPTURE_PATTERN);
        out.push(0); // version
        let mut flags = 0u8;
        if spec.continued {
            flags |= FLAG_CONTINUED;
        }
        if spec.bos {
            flags |= FLAG_BOS;
        }
        if spec.eos {
            flags |= FLAG_EOS;
        }
        out.push(flags);
        out.extend_from_slice(&spec.granule.to_le_bytes());
        out.extend_from_slice(&spec.serial.to_le_bytes());
        out.extend_from_slice(&spec.sequence.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]); // crc placeholder
        out.push(table.len() as u8);
        out.extend_from_slice(table);
        out.extend_from_slice(body);
        let crc = crc32(&out);
        out[22..26].copy_from_slice(&crc.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::mux::{page, raw_page, PageSpec};
    use super::*;
    use crate::source::MemoryDataSource;

    fn spec(serial: u32, sequence: u32) -> PageSpec<'static> {
        PageSpec {
            serial,
            sequence,
            granule: -1,
            bos: false,
            eos: false,
            continued: false,
            packets: &[],
        }
    }

    fn pump_all(sync: &mut SyncState, bytes: Vec<u8>) {
        let mut source = MemoryDataSource::new(bytes);
        loop {
            match sync.pump(&mut source, 4096) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => panic!("pump failed: {err}"),
            }
        }
    }

    fn expect_page(sync: &mut SyncState) -> OggPage {
        loop {
            match sync.page_out() {
                PageOut::Page(page) => return page,
                PageOut::Desync => continue,
                PageOut::NeedData => panic!("page incomplete"),
            }
        }
    }

    fn expect_packet(stream: &mut StreamState) -> Packet {
        match stream.packet_out() {
            PacketOut::Packet(packet) => packet,
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn captures_a_single_page() {
        let bytes = page(&PageSpec {
            granule: 42,
            bos: true,
            packets: &[b"hello"],
            ..spec(7, 0)
        });
        let mut sync = SyncState::new();
        pump_all(&mut sync, bytes);

        let page = expect_page(&mut sync);
        assert_eq!(page.serial(), 7);
        assert_eq!(page.granule(), 42);
        assert!(page.bos());
        assert!(!page.eos());
        assert!(matches!(sync.page_out(), PageOut::NeedData));
    }

    #[test]
    fn resynchronizes_after_garbage() {
        let mut bytes = b"garbage bytes before the page".to_vec();
        bytes.extend(page(&PageSpec {
            packets: &[b"x"],
            ..spec(1, 0)
        }));
        let mut sync = SyncState::new();
        pump_all(&mut sync, bytes);

        assert!(matches!(sync.page_out(), PageOut::Desync));
        let page = expect_page(&mut sync);
        assert_eq!(page.serial(), 1);
    }

    #[test]
    fn rejects_corrupt_checksum() {
        let mut bytes = page(&PageSpec {
            packets: &[b"payload"],
            ..spec(1, 0)
        });
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let mut sync = SyncState::new();
        pump_all(&mut sync, bytes);

        assert!(matches!(sync.page_out(), PageOut::Desync));
        assert!(matches!(sync.page_out(), PageOut::NeedData));
    }

    #[test]
    fn partial_page_waits_for_more_data() {
        let bytes = page(&PageSpec {
            packets: &[b"0123456789"],
            ..spec(1, 0)
        });
        let (head, tail) = bytes.split_at(20);

        let mut sync = SyncState::new();
        pump_all(&mut sync, head.to_vec());
        assert!(matches!(sync.page_out(), PageOut::NeedData));

        pump_all(&mut sync, tail.to_vec());
        let page = expect_page(&mut sync);
        assert_eq!(page.serial(), 1);
    }

    #[test]
    fn reassembles_packets_with_granule_on_last() {
        let bytes = page(&PageSpec {
            granule: 99,
            packets: &[b"first", b"second", b"third"],
            ..spec(5, 0)
        });
        let mut sync = SyncState::new();
        pump_all(&mut sync, bytes);
        let page = expect_page(&mut sync);

        let mut stream = StreamState::new(5);
        stream.page_in(&page);

        let first = expect_packet(&mut stream);
        assert_eq!(first.data, b"first");
        assert_eq!(first.granule, -1);
        let second = expect_packet(&mut stream);
        assert_eq!(second.granule, -1);
        let third = expect_packet(&mut stream);
        assert_eq!(third.data, b"third");
        assert_eq!(third.granule, 99);
        assert!(matches!(stream.packet_out(), PacketOut::NeedData));
    }

    #[test]
    fn reassembles_packet_continued_across_pages() {
        let payload: Vec<u8> = (0..400).map(|i| (i % 251) as u8).collect();
        // First page carries 255 bytes with an open lacing value; the second
        // page is flagged continued and closes the packet.
        let first = raw_page(&spec(9, 0), &[255], &payload[..255]);
        let second = raw_page(
            &PageSpec {
                granule: 10,
                continued: true,
                ..spec(9, 1)
            },
            &[145],
            &payload[255..],
        );

        let mut sync = SyncState::new();
        let mut bytes = first;
        bytes.extend(second);
        pump_all(&mut sync, bytes);

        let mut stream = StreamState::new(9);
        stream.page_in(&expect_page(&mut sync));
        assert!(matches!(stream.packet_out(), PacketOut::NeedData));
        stream.page_in(&expect_page(&mut sync));

        let packet = expect_packet(&mut stream);
        assert_eq!(packet.data, payload);
        assert_eq!(packet.granule, 10);
    }

    #[test]
    fn packet_length_multiple_of_255_gets_zero_lace() {
        let payload = vec![7u8; 510];
        let bytes = page(&PageSpec {
            packets: &[&payload],
            ..spec(3, 0)
        });
        let mut sync = SyncState::new();
        pump_all(&mut sync, bytes);
        let page = expect_page(&mut sync);
        assert_eq!(page.segment_table, &[255, 255, 0]);

        let mut stream = StreamState::new(3);
        stream.page_in(&page);
        assert_eq!(expect_packet(&mut stream).data, payload);
    }

    #[test]
    fn missing_page_reports_hole_once() {
        let page0 = page(&PageSpec {
            packets: &[b"a"],
            ..spec(2, 0)
        });
        let page2 = page(&PageSpec {
            packets: &[b"c"],
            ..spec(2, 2)
        });

        let mut sync = SyncState::new();
        let mut bytes = page0;
        bytes.extend(page2);
        pump_all(&mut sync, bytes);

        let mut stream = StreamState::new(2);
        stream.page_in(&expect_page(&mut sync));
        assert_eq!(expect_packet(&mut stream).data, b"a");
        stream.page_in(&expect_page(&mut sync));
        assert!(matches!(stream.packet_out(), PacketOut::Hole));
        assert_eq!(expect_packet(&mut stream).data, b"c");
    }

    #[test]
    fn stale_page_replay_is_ignored() {
        let page0 = page(&PageSpec {
            packets: &[b"a"],
            ..spec(2, 0)
        });
        let page1 = page(&PageSpec {
            packets: &[b"b"],
            ..spec(2, 1)
        });

        let mut sync = SyncState::new();
        let mut bytes = page0.clone();
        bytes.extend(page1);
        bytes.extend(page0);
        pump_all(&mut sync, bytes);

        let mut stream = StreamState::new(2);
        stream.page_in(&expect_page(&mut sync));
        stream.page_in(&expect_page(&mut sync));
        stream.page_in(&expect_page(&mut sync)); // replay of sequence 0

        assert_eq!(expect_packet(&mut stream).data, b"a");
        assert_eq!(expect_packet(&mut stream).data, b"b");
        assert!(matches!(stream.packet_out(), PacketOut::NeedData));
    }

    #[test]
    fn foreign_serial_is_ignored() {
        let bytes = page(&PageSpec {
            packets: &[b"x"],
            ..spec(100, 0)
        });
        let mut sync = SyncState::new();
        pump_all(&mut sync, bytes);

        let mut stream = StreamState::new(200);
        stream.page_in(&expect_page(&mut sync));
        assert!(matches!(stream.packet_out(), PacketOut::NeedData));
    }

    #[test]
    fn lost_head_of_continued_packet_is_skipped() {
        // The stream resumes mid-file on a continued page. The remnant of
        // the unseen packet is discarded and the next whole packet survives.
        let resumed = raw_page(
            &PageSpec {
                granule: 3,
                continued: true,
                ..spec(4, 17)
            },
            &[40, 5],
            &[&[1u8; 40][..], b"whole"].concat(),
        );
        let mut sync = SyncState::new();
        pump_all(&mut sync, resumed);

        let mut stream = StreamState::new(4);
        stream.page_in(&expect_page(&mut sync));
        assert!(matches!(stream.packet_out(), PacketOut::Hole));
        let packet = expect_packet(&mut stream);
        assert_eq!(packet.data, b"whole");
        assert_eq!(packet.granule, 3);
    }

    #[test]
    fn page_seek_discards_partial_leading_page() {
        let full = page(&PageSpec {
            packets: &[b"tail page"],
            ..spec(6, 1)
        });
        let mut bytes = vec![0xAB; 37]; // mid-page junk from a byte seek
        bytes.extend(full);

        let mut sync = SyncState::new();
        pump_all(&mut sync, bytes);
        sync.page_seek();
        let page = expect_page(&mut sync);
        assert_eq!(page.serial(), 6);
    }
}
