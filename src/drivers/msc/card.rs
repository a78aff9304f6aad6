//! Per-slot card registry
//!
//! Holds what identification learned about the card in each slot and the
//! flags negotiated along the way.

/// Sector size used for every transfer
pub const BLOCK_SIZE: usize = 512;

/// Transfer speed mantissas (x10) indexed by the CSD time-value field
const MANTISSA: [u32; 16] = [0, 10, 12, 13, 15, 20, 25, 30, 35, 40, 45, 50, 55, 60, 70, 80];

/// Powers of ten indexed by the CSD unit fields
const EXPONENT: [u32; 10] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
];

/// Mantissa times a power of ten, saturating on reserved unit codes
fn scaled(mantissa: u32, exponent: u32) -> u32 {
    let power = EXPONENT.get(exponent as usize).copied().unwrap_or(u32::MAX);
    MANTISSA[(mantissa & 0xF) as usize].saturating_mul(power)
}

/// How the card interprets data command addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardVersion {
    /// Standard capacity, byte addressed
    #[default]
    Legacy,
    /// High capacity, block addressed
    HighCapacity,
}

/// Everything known about the card in a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CardDescriptor {
    /// Operating-condition register
    pub ocr: u32,
    /// Card identification register, most significant word first
    pub cid: [u32; 4],
    /// Card-specific data register, most significant word first
    pub csd: [u32; 4],
    /// Relative card address, already in argument position (bits 31:16)
    pub rca: u32,
    /// Capacity in blocks
    pub block_count: u32,
    /// Bytes per block
    pub block_size: u32,
    /// Maximum transfer rate, bit/s
    pub speed: u32,
    /// Asynchronous data access time, ns
    pub taac: u32,
    /// Clock-dependent data access time, in clock cycles
    pub nsac: u32,
    /// Write speed factor (log2)
    pub r2w_factor: u8,
    pub initialized: bool,
    pub version: CardVersion,
}

impl CardDescriptor {
    pub const EMPTY: Self = Self {
        ocr: 0,
        cid: [0; 4],
        csd: [0; 4],
        rca: 0,
        block_count: 0,
        block_size: 0,
        speed: 0,
        taac: 0,
        nsac: 0,
        r2w_factor: 0,
        initialized: false,
        version: CardVersion::Legacy,
    };

    /// Derive geometry, timing and protocol version from the stored CSD
    pub fn apply_csd(&mut self) {
        let csd = self.csd;
        let structure = extract_bits(&csd, 127, 2);

        self.speed = scaled(extract_bits(&csd, 102, 4), extract_bits(&csd, 98, 3) + 4);
        self.nsac = 100 * extract_bits(&csd, 111, 8);
        self.taac = scaled(extract_bits(&csd, 118, 4), extract_bits(&csd, 114, 3));
        self.r2w_factor = extract_bits(&csd, 28, 3) as u8;
        self.block_size = BLOCK_SIZE as u32;

        if structure == 1 {
            // CSD version 2.0: C_SIZE counts 512 KiB units. The largest
            // value is one block past what a 32-bit block number reaches.
            let c_size = extract_bits(&csd, 69, 22);
            self.block_count = (c_size + 1).saturating_mul(1024);
            self.version = CardVersion::HighCapacity;
        } else {
            let c_size = extract_bits(&csd, 73, 12) + 1;
            let mult = 4u32 << extract_bits(&csd, 49, 3);
            let read_bl_len = 1u32 << extract_bits(&csd, 83, 4);
            self.block_count = c_size * mult * (read_bl_len / BLOCK_SIZE as u32);
            self.version = CardVersion::Legacy;
        }

        log::debug!(
            "MSC: CSD v{}.0: {} blocks, {} bit/s, taac {} ns, nsac {}",
            structure + 1,
            self.block_count,
            self.speed,
            self.taac,
            self.nsac
        );
    }

    /// Card size in bytes
    pub fn capacity_bytes(&self) -> u64 {
        self.block_count as u64 * self.block_size as u64
    }

    /// Manufacturer ID from the CID
    pub fn manufacturer_id(&self) -> u8 {
        extract_bits(&self.cid, 127, 8) as u8
    }

    /// Five-character product name from the CID
    pub fn product_name(&self) -> [u8; 5] {
        let mut name = [0u8; 5];
        for (i, c) in name.iter_mut().enumerate() {
            *c = extract_bits(&self.cid, 103 - 8 * i as u32, 8) as u8;
        }
        name
    }
}

/// Extract `width` bits whose most significant bit is `msb` from a 128-bit
/// register stored most significant word first
pub fn extract_bits(reg: &[u32; 4], msb: u32, width: u32) -> u32 {
    debug_assert!(width > 0 && width <= 32 && msb < 128 && width <= msb + 1);

    let value = reg.iter().fold(0u128, |acc, &w| (acc << 32) | w as u128);
    let mask = (1u128 << width) - 1;
    ((value >> (msb + 1 - width)) & mask) as u32
}

/// Flags negotiated while identifying and selecting a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiationFlags {
    /// Data phases use the 4-bit bus
    pub wide_bus: bool,
    /// High-speed switch probes issued so far
    pub switch_probes: u8,
    /// Card reported CSD version 2.0
    pub high_capacity: bool,
}

impl NegotiationFlags {
    pub const fn new() -> Self {
        Self {
            wide_bus: false,
            switch_probes: 0,
            high_capacity: false,
        }
    }
}

/// State guarded by a slot's lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotState {
    pub card: CardDescriptor,
    pub flags: NegotiationFlags,
}

impl SlotState {
    pub const fn new() -> Self {
        Self {
            card: CardDescriptor::EMPTY,
            flags: NegotiationFlags::new(),
        }
    }

    /// Forget the card and everything negotiated with it
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
