//! Coreboot Table Scanner
//!
//! Legacy-table platforms leave a linked list of tagged records in low memory.
//! The header is found by searching a small window in 16-byte steps for the
//! `LBIO` signature; both the header and the record area carry IP checksums.
//!
//! Scanning is best effort. A missing or corrupt table, a record that runs
//! off the end of the table, or a fact that cannot be stored is logged and
//! skipped, and the boot carries on with whatever was gathered.

use dc_common::memory::{MAX_RAM_RANGES, MemoryRange, PlatformMemory, RangeType};
use dc_fwdb::{Access, Fwdb};
use heapless::{String, Vec};
use zerocopy::byteorder::little_endian::{U32, U64};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::config::{self, names};
use crate::ram_map;

/// Header signature
pub const SIGNATURE: [u8; 4] = *b"LBIO";

/// Size of the table header
pub const HEADER_SIZE: usize = size_of::<CbHeader>();

/// Record tags understood by the scanner
pub mod tag {
    pub const MEMORY: u32 = 0x0001;
    pub const FORWARD: u32 = 0x0011;
    pub const GPIO: u32 = 0x0013;
    pub const VBOOT_HANDOFF: u32 = 0x0020;
    pub const DMA: u32 = 0x0022;
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[allow(dead_code)]
struct CbHeader {
    signature: [u8; 4],
    header_bytes: U32,
    header_checksum: U32,
    table_bytes: U32,
    table_checksum: U32,
    table_entries: U32,
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct CbRecord {
    tag: U32,
    size: U32,
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[allow(dead_code)]
struct CbForward {
    record: CbRecord,
    forward: U64,
}

/// Body shared by the DMA and verified boot handoff records
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[allow(dead_code)]
struct LbRange {
    record: CbRecord,
    range_start: U64,
    range_size: U32,
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct CbMemoryRange {
    start: U64,
    size: U64,
    kind: U32,
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[allow(dead_code)]
struct CbGpioTable {
    record: CbRecord,
    count: U32,
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct CbGpio {
    port: U32,
    polarity: U32,
    value: U32,
    name: [u8; GPIO_NAME_LEN],
}

const _: () = assert!(size_of::<CbHeader>() == 24);
const _: () = assert!(size_of::<LbRange>() == 20);
const _: () = assert!(size_of::<CbMemoryRange>() == 20);
const _: () = assert!(size_of::<CbGpio>() == 28);

const RECORD_HEADER: u64 = size_of::<CbRecord>() as u64;
const MEMORY_RANGE_SIZE: u64 = size_of::<CbMemoryRange>() as u64;
const GPIO_TABLE_HEADER: u64 = size_of::<CbGpioTable>() as u64;
const GPIO_SIZE: u64 = size_of::<CbGpio>() as u64;
const GPIO_NAME_LEN: usize = 16;
const GPIO_ACTIVE_LOW: u32 = 0;
const GPIO_ENTRY_NAME_LEN: usize = names::GPIO_PREFIX.len() + GPIO_NAME_LEN;

const VBOOT_INIT_PARAMS_SIZE: usize = 8;
const VBOOT_SHARED_DATA_OFFSET: u64 = 12;
/// Size of the verified boot shared data block
pub const VBOOT_SHARED_DATA_SIZE: usize = 3072;
/// Size the verified boot handoff range must have to be used
pub const VBOOT_HANDOFF_SIZE: u32 = (VBOOT_SHARED_DATA_OFFSET as usize + VBOOT_SHARED_DATA_SIZE) as u32;

/// Read access to physical memory.
pub trait PhysWindow {
    /// Copy the bytes at `addr` into `buf`. Returns `false` if any of them
    /// cannot be read.
    fn read(&self, addr: u64, buf: &mut [u8]) -> bool;

    /// Read a little-endian wire structure at `addr`.
    fn read_struct<T: FromBytes + IntoBytes>(&self, addr: u64) -> Option<T> {
        let mut value = T::new_zeroed();
        self.read(addr, value.as_mut_bytes()).then_some(value)
    }
}

/// [`PhysWindow`] over identity-mapped physical memory.
pub struct IdentityWindow {
    _private: (),
}

impl IdentityWindow {
    /// # Safety
    /// Every address the scanner may visit (the scan windows and anything the
    /// tables point at) must be identity mapped and readable.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PhysWindow for IdentityWindow {
    fn read(&self, addr: u64, buf: &mut [u8]) -> bool {
        let Ok(start) = usize::try_from(addr) else {
            return false;
        };
        if start.checked_add(buf.len()).is_none() {
            return false;
        }
        for (i, byte) in buf.iter_mut().enumerate() {
            // SAFETY: The constructor's caller guarantees the address is mapped
            *byte = unsafe { dc_arch::phys::read_u8(start + i) };
        }
        true
    }
}

/// Running 16-bit ones' complement checksum over a byte stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpChecksum {
    sum: u32,
    odd: bool,
}

impl IpChecksum {
    #[must_use]
    pub const fn new() -> Self {
        Self { sum: 0, odd: false }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let mut value = u32::from(byte);
            if self.odd {
                value <<= 8;
            }
            self.sum += value;
            if self.sum > 0xFFFF {
                self.sum = (self.sum + (self.sum >> 16)) & 0xFFFF;
            }
            self.odd = !self.odd;
        }
    }

    #[must_use]
    pub const fn finish(&self) -> u16 {
        !(self.sum as u16)
    }
}

/// IP checksum of `bytes`.
#[must_use]
pub fn ip_checksum(bytes: &[u8]) -> u16 {
    let mut sum = IpChecksum::new();
    sum.update(bytes);
    sum.finish()
}

/// What a scan found.
///
/// Counts cover every table reached through forward records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSummary {
    /// Address of the last table that was walked
    pub found_at: Option<u64>,
    /// Records visited
    pub records: usize,
    /// DMA windows registered with the memory ledger
    pub registered_dma: usize,
    /// RAM map ranges handed to the memory ledger
    pub ram_ranges: usize,
    /// GPIO entries published to the database
    pub gpios: usize,
    /// Verified boot handoff data published to the database
    pub vboot_handoff: bool,
}

/// Scan the well-known addresses for coreboot tables and record their facts.
///
/// Facts destined for the database are dropped when `db` is `None`.
pub fn scan<W: PhysWindow, M: PlatformMemory>(
    window: &W,
    memory: &mut M,
    mut db: Option<&mut Fwdb<'_>>,
) -> ScanSummary {
    for &addr in &config::TABLE_SCAN_ADDRESSES {
        if let Some(summary) =
            scan_at(window, addr, config::TABLE_SCAN_WINDOW, memory, db.as_deref_mut())
        {
            log::info!(
                "Coreboot tables at {:#x}: {} records",
                summary.found_at.unwrap_or(addr),
                summary.records
            );
            return summary;
        }
    }
    log::info!("No coreboot tables found");
    ScanSummary::default()
}

/// Scan `[start, start + len)` for a table and walk it.
///
/// Returns `None` when no valid table is found there.
pub fn scan_at<W: PhysWindow, M: PlatformMemory>(
    window: &W,
    start: u64,
    len: u64,
    memory: &mut M,
    db: Option<&mut Fwdb<'_>>,
) -> Option<ScanSummary> {
    let mut summary = ScanSummary::default();
    walk(window, start, len, memory, db, 0, &mut summary).then_some(summary)
}

/// Walk the table found in `[start, start + len)`, adding what it holds to
/// `summary`. Returns `false` if there is no valid table there.
fn walk<W: PhysWindow, M: PlatformMemory>(
    window: &W,
    start: u64,
    len: u64,
    memory: &mut M,
    mut db: Option<&mut Fwdb<'_>>,
    depth: usize,
    summary: &mut ScanSummary,
) -> bool {
    let Some(header_at) = find_signature(window, start, len) else {
        return false;
    };
    let Some(header) = read_header(window, header_at) else {
        return false;
    };

    let table_bytes = header.table_bytes.get();
    let (Some(table_start), Some(table_end)) = table_span(header_at, &header) else {
        log::warn!("Coreboot table at {:#x} wraps the address space", header_at);
        return false;
    };
    if table_bytes != 0
        && checksum_range(window, table_start, table_bytes as usize).map(u32::from)
            != Some(header.table_checksum.get())
    {
        log::warn!("Coreboot table checksum mismatch at {:#x}", header_at);
        return false;
    }
    summary.found_at = Some(header_at);
    if table_bytes == 0 {
        return true;
    }

    let mut rec = table_start;
    for _ in 0..header.table_entries.get() {
        let Some(record) = window.read_struct::<CbRecord>(rec) else {
            break;
        };
        let size = u64::from(record.size.get());
        let Some(next) = rec
            .checked_add(size)
            .filter(|&end| size >= RECORD_HEADER && end <= table_end)
        else {
            log::warn!("Coreboot record at {:#x} runs past the table", rec);
            break;
        };
        summary.records += 1;

        match record.tag.get() {
            tag::FORWARD => {
                if depth >= config::MAX_FORWARD_DEPTH {
                    log::warn!("Too many coreboot forward records");
                } else if let Some(forward) = window.read_struct::<CbForward>(rec) {
                    let target = forward.forward.get();
                    if !walk(window, target, len, memory, db, depth + 1, summary) {
                        log::warn!("No valid coreboot table at forward target {:#x}", target);
                    }
                }
                return true;
            }
            tag::MEMORY => summary.ram_ranges = parse_memory(window, rec, size, memory, db.as_deref_mut()),
            tag::GPIO => {
                if let Some(db) = db.as_deref_mut() {
                    summary.gpios += parse_gpios(window, rec, size, db);
                }
            }
            tag::VBOOT_HANDOFF => {
                if let Some(db) = db.as_deref_mut() {
                    summary.vboot_handoff |= parse_vboot_handoff(window, rec, db);
                }
            }
            tag::DMA => {
                if parse_dma(window, rec, memory) {
                    summary.registered_dma += 1;
                }
            }
            _ => {}
        }

        rec = next;
    }

    true
}

fn table_span(header_at: u64, header: &CbHeader) -> (Option<u64>, Option<u64>) {
    let start = header_at.checked_add(u64::from(header.header_bytes.get()));
    let end = start.and_then(|start| start.checked_add(u64::from(header.table_bytes.get())));
    (start, end)
}

fn find_signature<W: PhysWindow>(window: &W, start: u64, len: u64) -> Option<u64> {
    let mut offset = 0;
    while offset < len {
        let addr = start.checked_add(offset)?;
        let mut signature = [0u8; 4];
        if window.read(addr, &mut signature) && signature == SIGNATURE {
            return Some(addr);
        }
        offset += config::TABLE_SCAN_STRIDE;
    }
    None
}

fn read_header<W: PhysWindow>(window: &W, addr: u64) -> Option<CbHeader> {
    let mut raw = [0u8; HEADER_SIZE];
    if !window.read(addr, &mut raw) {
        return None;
    }
    if ip_checksum(&raw) != 0 {
        log::warn!("Coreboot header checksum mismatch at {:#x}", addr);
        return None;
    }
    CbHeader::read_from_prefix(&raw).ok().map(|(header, _)| header)
}

fn checksum_range<W: PhysWindow>(window: &W, start: u64, len: usize) -> Option<u16> {
    let mut sum = IpChecksum::new();
    let mut chunk = [0u8; 64];
    let mut done = 0;
    while done < len {
        let n = (len - done).min(chunk.len());
        let addr = start.checked_add(done as u64)?;
        if !window.read(addr, &mut chunk[..n]) {
            return None;
        }
        sum.update(&chunk[..n]);
        done += n;
    }
    Some(sum.finish())
}

/// Hand the record's ranges to the ledger and, when there is a database,
/// publish them as the RAM map entry.
fn parse_memory<W: PhysWindow, M: PlatformMemory>(
    window: &W,
    rec: u64,
    size: u64,
    memory: &mut M,
    db: Option<&mut Fwdb<'_>>,
) -> usize {
    // The record was checked to end inside the table, so offsets below `size`
    // cannot wrap
    let count = (size - RECORD_HEADER) / MEMORY_RANGE_SIZE;
    let mut ranges: Vec<MemoryRange, MAX_RAM_RANGES> = Vec::new();

    for i in 0..count {
        let Some(raw) = window.read_struct::<CbMemoryRange>(rec + RECORD_HEADER + i * MEMORY_RANGE_SIZE) else {
            break;
        };
        let tag = raw.kind.get();
        let range = MemoryRange {
            base: raw.start.get(),
            size: raw.size.get(),
            range_type: RangeType::from_coreboot(tag),
            handoff_tag: tag,
        };
        if ranges.push(range).is_err() {
            log::warn!("Coreboot memory map truncated at {} ranges", MAX_RAM_RANGES);
            break;
        }
    }

    if let Err(e) = memory.set_ram_map(&ranges) {
        log::warn!("Could not record RAM map: {}", e);
    }
    if let Some(db) = db
        && let Err(e) = ram_map::publish(db, &ranges)
    {
        log::warn!("Could not publish RAM map: {}", e);
    }
    ranges.len()
}

fn parse_gpios<W: PhysWindow>(window: &W, rec: u64, size: u64, db: &mut Fwdb<'_>) -> usize {
    let Some(table) = window.read_struct::<CbGpioTable>(rec) else {
        return 0;
    };
    let fits = size.saturating_sub(GPIO_TABLE_HEADER) / GPIO_SIZE;
    let count = u64::from(table.count.get()).min(fits);

    let mut published = 0;
    for i in 0..count {
        let Some(gpio) = window.read_struct::<CbGpio>(rec + GPIO_TABLE_HEADER + i * GPIO_SIZE) else {
            break;
        };
        let name_len = gpio.name.iter().position(|&b| b == 0).unwrap_or(GPIO_NAME_LEN);
        let Ok(name) = core::str::from_utf8(&gpio.name[..name_len]) else {
            log::warn!("Skipping GPIO on port {} with a malformed name", gpio.port.get());
            continue;
        };

        let mut entry_name: String<GPIO_ENTRY_NAME_LEN> = String::new();
        if entry_name.push_str(names::GPIO_PREFIX).is_err() || entry_name.push_str(name).is_err() {
            continue;
        }

        let value = gpio.value.get();
        let asserted = if gpio.polarity.get() == GPIO_ACTIVE_LOW {
            value == 0
        } else {
            value != 0
        };
        match db.access(&entry_name, Access::create_from(&[u8::from(asserted)])) {
            Ok(_) => published += 1,
            Err(e) => log::warn!("Could not publish {}: {}", entry_name.as_str(), e),
        }
    }
    published
}

fn parse_vboot_handoff<W: PhysWindow>(window: &W, rec: u64, db: &mut Fwdb<'_>) -> bool {
    let Some(range) = window.read_struct::<LbRange>(rec) else {
        return false;
    };
    let (start, size) = (range.range_start.get(), range.range_size.get());
    if size != VBOOT_HANDOFF_SIZE {
        log::warn!("Verified boot handoff has size {}, expected {}", size, VBOOT_HANDOFF_SIZE);
        return false;
    }
    let Some(shared_data) = start
        .checked_add(u64::from(size))
        .and(start.checked_add(VBOOT_SHARED_DATA_OFFSET))
    else {
        log::warn!("Verified boot handoff at {:#x} wraps the address space", start);
        return false;
    };

    publish_copy(window, db, names::VBOOT_SHARED_DATA, shared_data, VBOOT_SHARED_DATA_SIZE)
        && publish_copy(window, db, names::VBOOT_INIT_PARAMS, start, VBOOT_INIT_PARAMS_SIZE)
}

/// Copy `len` bytes at `src` into a new entry called `name`.
fn publish_copy<W: PhysWindow>(window: &W, db: &mut Fwdb<'_>, name: &str, src: u64, len: usize) -> bool {
    if src.checked_add(len as u64).is_none() {
        log::warn!("Source of {} at {:#x} wraps the address space", name, src);
        return false;
    }
    let entry = match db.access(name, Access::create_zeroed(len)) {
        Ok(entry) => entry,
        Err(e) => {
            log::warn!("Could not publish {}: {}", name, e);
            return false;
        }
    };

    let mut chunk = [0u8; 256];
    let mut done = 0;
    while done < len {
        let n = (len - done).min(chunk.len());
        if !window.read(src + done as u64, &mut chunk[..n]) || entry.write_at(done, &chunk[..n]).is_err() {
            log::warn!("Could not copy {} from {:#x}", name, src);
            return false;
        }
        done += n;
    }
    true
}

fn parse_dma<W: PhysWindow, M: PlatformMemory>(window: &W, rec: u64, memory: &mut M) -> bool {
    let Some(range) = window.read_struct::<LbRange>(rec) else {
        return false;
    };
    let (base, size) = (range.range_start.get(), range.range_size.get());
    match memory.add_dma_range(base, u64::from(size)) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Could not register DMA range {:#x}+{:#x}: {}", base, size, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use dc_common::MemoryLedger;
    use dc_common::memory::Span;
    use std::vec;
    use std::vec::Vec as StdVec;

    /// Physical memory backed by a byte buffer starting at `base`.
    struct BufferWindow<'a> {
        base: u64,
        bytes: &'a [u8],
    }

    impl PhysWindow for BufferWindow<'_> {
        fn read(&self, addr: u64, buf: &mut [u8]) -> bool {
            let Some(offset) = addr.checked_sub(self.base) else {
                return false;
            };
            let offset = offset as usize;
            let Some(end) = offset.checked_add(buf.len()) else {
                return false;
            };
            match self.bytes.get(offset..end) {
                Some(src) => {
                    buf.copy_from_slice(src);
                    true
                }
                None => false,
            }
        }
    }

    fn record(tag: u32, body: &[u8]) -> StdVec<u8> {
        let mut rec = StdVec::new();
        rec.extend_from_slice(&tag.to_le_bytes());
        rec.extend_from_slice(&(8 + body.len() as u32).to_le_bytes());
        rec.extend_from_slice(body);
        rec
    }

    fn range_record(tag: u32, start: u64, size: u32) -> StdVec<u8> {
        let mut body = StdVec::new();
        body.extend_from_slice(&start.to_le_bytes());
        body.extend_from_slice(&size.to_le_bytes());
        body.extend_from_slice(&[0u8; 4]);
        record(tag, &body)
    }

    fn table(records: &[StdVec<u8>]) -> StdVec<u8> {
        let body = records.concat();
        let mut header = vec![0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&SIGNATURE);
        header[4..8].copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        header[12..16].copy_from_slice(&(body.len() as u32).to_le_bytes());
        header[16..20].copy_from_slice(&u32::from(ip_checksum(&body)).to_le_bytes());
        header[20..24].copy_from_slice(&(records.len() as u32).to_le_bytes());
        let checksum = ip_checksum(&header);
        header[8..12].copy_from_slice(&u32::from(checksum).to_le_bytes());
        header.extend_from_slice(&body);
        header
    }

    fn memory_with_table_at(offset: usize, table: &[u8], size: usize) -> StdVec<u8> {
        let mut mem = vec![0u8; size];
        mem[offset..offset + table.len()].copy_from_slice(table);
        mem
    }

    #[test]
    fn test_header_checksum_sums_to_zero() {
        let table = table(&[record(0x99, &[1, 2, 3, 4])]);
        assert_eq!(ip_checksum(&table[..HEADER_SIZE]), 0);
    }

    #[test]
    fn test_dma_record_registers_one_range() {
        let mem = memory_with_table_at(0x40, &table(&[range_record(tag::DMA, 0x8000_0000, 0x10_0000)]), 0x1000);
        let window = BufferWindow { base: 0, bytes: &mem };
        let mut ledger = MemoryLedger::new();

        let summary = scan(&window, &mut ledger, None);

        assert_eq!(summary.found_at, Some(0x40));
        assert_eq!(summary.records, 1);
        assert_eq!(summary.registered_dma, 1);
        assert_eq!(
            ledger.dma_ranges(),
            &[Span {
                start: 0x8000_0000,
                end: 0x8010_0000
            }]
        );
    }

    #[test]
    fn test_unknown_tags_register_nothing() {
        let mem = memory_with_table_at(
            0,
            &table(&[record(0x99, &[0; 8]), range_record(0x1234, 0x1000, 0x1000)]),
            0x1000,
        );
        let window = BufferWindow { base: 0, bytes: &mem };
        let mut ledger = MemoryLedger::new();

        let summary = scan(&window, &mut ledger, None);

        assert_eq!(summary.found_at, Some(0));
        assert_eq!(summary.records, 2);
        assert_eq!(summary.registered_dma, 0);
        assert!(ledger.dma_ranges().is_empty());
        assert!(ledger.ram_map().is_empty());
    }

    #[test]
    fn test_no_table_is_not_an_error() {
        let mem = vec![0u8; 0x1000];
        let window = BufferWindow { base: 0, bytes: &mem };
        let mut ledger = MemoryLedger::new();

        assert_eq!(scan(&window, &mut ledger, None), ScanSummary::default());
    }

    #[test]
    fn test_corrupt_table_is_ignored() {
        let mut bytes = table(&[range_record(tag::DMA, 0x8000_0000, 0x1000)]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let mem = memory_with_table_at(0x10, &bytes, 0x1000);
        let window = BufferWindow { base: 0, bytes: &mem };
        let mut ledger = MemoryLedger::new();

        let summary = scan(&window, &mut ledger, None);
        assert_eq!(summary.found_at, None);
        assert!(ledger.dma_ranges().is_empty());
    }

    #[test]
    fn test_falls_back_to_second_address() {
        let mem = memory_with_table_at(0x20, &table(&[range_record(tag::DMA, 0x4000, 0x1000)]), 0x1000);
        let window = BufferWindow {
            base: 0xF_0000,
            bytes: &mem,
        };
        let mut ledger = MemoryLedger::new();

        let summary = scan(&window, &mut ledger, None);
        assert_eq!(summary.found_at, Some(0xF_0020));
        assert_eq!(summary.registered_dma, 1);
    }

    #[test]
    fn test_forward_record_is_followed() {
        let forward = record(tag::FORWARD, &0x2000u64.to_le_bytes());
        let mut mem = memory_with_table_at(0, &table(&[forward]), 0x3000);
        let target = table(&[range_record(tag::DMA, 0x9000, 0x1000)]);
        mem[0x2000..0x2000 + target.len()].copy_from_slice(&target);
        let window = BufferWindow { base: 0, bytes: &mem };
        let mut ledger = MemoryLedger::new();

        let summary = scan(&window, &mut ledger, None);
        assert_eq!(summary.found_at, Some(0x2000));
        assert_eq!(ledger.dma_ranges()[0].start, 0x9000);
    }

    #[test]
    fn test_forwarded_counts_are_added() {
        let forward = record(tag::FORWARD, &0x2000u64.to_le_bytes());
        let first = table(&[range_record(tag::DMA, 0x8000, 0x1000), forward]);
        let mut mem = memory_with_table_at(0, &first, 0x3000);
        let target = table(&[range_record(tag::DMA, 0x9000, 0x1000), record(0x99, &[0; 4])]);
        mem[0x2000..0x2000 + target.len()].copy_from_slice(&target);
        let window = BufferWindow { base: 0, bytes: &mem };
        let mut ledger = MemoryLedger::new();

        let summary = scan(&window, &mut ledger, None);

        assert_eq!(summary.found_at, Some(0x2000));
        assert_eq!(summary.records, 4);
        assert_eq!(summary.registered_dma, 2);
        assert_eq!(ledger.dma_ranges().len(), 2);
    }

    #[test]
    fn test_bad_forward_target_keeps_first_table() {
        let forward = record(tag::FORWARD, &0x2000u64.to_le_bytes());
        let first = table(&[range_record(tag::DMA, 0x8000, 0x1000), forward]);
        let mem = memory_with_table_at(0x40, &first, 0x3000);
        let window = BufferWindow { base: 0, bytes: &mem };
        let mut ledger = MemoryLedger::new();

        let summary = scan(&window, &mut ledger, None);

        assert_eq!(summary.found_at, Some(0x40));
        assert_eq!(summary.records, 2);
        assert_eq!(summary.registered_dma, 1);
    }

    #[test]
    fn test_vboot_handoff_at_top_of_memory_is_skipped() {
        let records = [
            range_record(tag::VBOOT_HANDOFF, u64::MAX - 4, VBOOT_HANDOFF_SIZE),
            range_record(tag::DMA, 0x4000, 0x1000),
        ];
        let mem = memory_with_table_at(0, &table(&records), 0x1000);
        let window = BufferWindow { base: 0, bytes: &mem };
        let mut ledger = MemoryLedger::new();
        let mut region = vec![0u8; 0x2000];
        let mut db = Fwdb::create(&mut region).unwrap();

        let summary = scan(&window, &mut ledger, Some(&mut db));

        assert!(!summary.vboot_handoff);
        assert_eq!(summary.records, 2);
        assert_eq!(summary.registered_dma, 1);
        assert_eq!(db.read(names::VBOOT_SHARED_DATA, None).err(), Some(dc_fwdb::FwdbError::EntryNotFound));
        assert_eq!(db.read(names::VBOOT_INIT_PARAMS, None).err(), Some(dc_fwdb::FwdbError::EntryNotFound));
    }

    #[test]
    fn test_dma_window_past_top_of_memory_is_skipped() {
        let mem = memory_with_table_at(0, &table(&[range_record(tag::DMA, u64::MAX - 4, 0x1000)]), 0x1000);
        let window = BufferWindow { base: 0, bytes: &mem };
        let mut ledger = MemoryLedger::new();

        let summary = scan(&window, &mut ledger, None);

        assert_eq!(summary.records, 1);
        assert_eq!(summary.registered_dma, 0);
        assert!(ledger.dma_ranges().is_empty());
    }

    #[test]
    fn test_record_past_table_end_stops_walk() {
        let mut bytes = table(&[range_record(tag::DMA, 0x4000, 0x1000)]);
        // Claim the DMA record is larger than the table, then fix the checksum
        bytes[HEADER_SIZE + 4] = 0xF0;
        let body_sum = ip_checksum(&bytes[HEADER_SIZE..]);
        bytes[16..20].copy_from_slice(&u32::from(body_sum).to_le_bytes());
        bytes[8..12].fill(0);
        let header_sum = ip_checksum(&bytes[..HEADER_SIZE]);
        bytes[8..12].copy_from_slice(&u32::from(header_sum).to_le_bytes());

        let mem = memory_with_table_at(0, &bytes, 0x1000);
        let window = BufferWindow { base: 0, bytes: &mem };
        let mut ledger = MemoryLedger::new();

        let summary = scan(&window, &mut ledger, None);
        assert_eq!(summary.found_at, Some(0));
        assert_eq!(summary.records, 0);
        assert!(ledger.dma_ranges().is_empty());
    }

    fn gpio(polarity: u32, value: u32, name: &str) -> StdVec<u8> {
        let mut raw = StdVec::new();
        raw.extend_from_slice(&7u32.to_le_bytes());
        raw.extend_from_slice(&polarity.to_le_bytes());
        raw.extend_from_slice(&value.to_le_bytes());
        let mut padded = [0u8; GPIO_NAME_LEN];
        padded[..name.len()].copy_from_slice(name.as_bytes());
        raw.extend_from_slice(&padded);
        raw
    }

    fn memory_range(base: u64, size: u64, kind: u32) -> StdVec<u8> {
        let mut raw = StdVec::new();
        raw.extend_from_slice(&base.to_le_bytes());
        raw.extend_from_slice(&size.to_le_bytes());
        raw.extend_from_slice(&kind.to_le_bytes());
        raw
    }

    #[test]
    fn test_facts_are_published() {
        let mut gpios = 2u32.to_le_bytes().to_vec();
        gpios.extend(gpio(GPIO_ACTIVE_LOW, 0, "lid"));
        gpios.extend(gpio(1, 1, "recovery"));

        let mut ranges = memory_range(0, 0x9F000, 1);
        ranges.extend(memory_range(0x7FF0_0000, 0x1_0000, 16));

        let records = [
            record(tag::GPIO, &gpios),
            record(tag::MEMORY, &ranges),
            range_record(tag::VBOOT_HANDOFF, 0x4000, VBOOT_HANDOFF_SIZE),
        ];
        let mut mem = memory_with_table_at(0x100, &table(&records), 0x5000);
        for (i, byte) in mem[0x4000..0x4000 + VBOOT_HANDOFF_SIZE as usize].iter_mut().enumerate() {
            *byte = i as u8;
        }
        let window = BufferWindow { base: 0, bytes: &mem };

        let mut ledger = MemoryLedger::new();
        let mut region = vec![0u8; 0x2000];
        let mut db = Fwdb::create(&mut region).unwrap();

        let summary = scan(&window, &mut ledger, Some(&mut db));

        assert_eq!(summary.gpios, 2);
        assert_eq!(summary.ram_ranges, 2);
        assert!(summary.vboot_handoff);

        assert_eq!(db.read(names::GPIO_LID, Some(1)).unwrap().read_u8(), Ok(1));
        assert_eq!(db.read(names::GPIO_RECOVERY, Some(1)).unwrap().read_u8(), Ok(1));

        let ram = ledger.ram_map();
        assert_eq!(ram.len(), 2);
        assert_eq!(ram_map::read(&db).unwrap().as_slice(), ram);
        assert_eq!(ram[0].range_type, RangeType::Ram);
        assert_eq!(ram[1].range_type, RangeType::Reserved);
        assert_eq!(ram[1].handoff_tag, 16);

        let mut init_params = [0u8; VBOOT_INIT_PARAMS_SIZE];
        db.read(names::VBOOT_INIT_PARAMS, Some(VBOOT_INIT_PARAMS_SIZE))
            .unwrap()
            .copy_to(&mut init_params)
            .unwrap();
        assert_eq!(init_params, [0, 1, 2, 3, 4, 5, 6, 7]);

        let shared = db.read(names::VBOOT_SHARED_DATA, Some(VBOOT_SHARED_DATA_SIZE)).unwrap();
        let mut first = [0u8; 2];
        shared.read_at(0, &mut first).unwrap();
        assert_eq!(first, [12, 13]);
    }

    #[test]
    fn test_ip_checksum_streaming_matches_oneshot() {
        let data: StdVec<u8> = (0..=200u8).collect();
        let mut sum = IpChecksum::new();
        sum.update(&data[..33]);
        sum.update(&data[33..]);
        assert_eq!(sum.finish(), ip_checksum(&data));
    }
}
