//! Card response decoding
//!
//! Short responses are 5 bytes (index byte, 32-bit payload), long responses
//! 17 bytes (header byte, 128-bit register). Multi-byte fields are big
//! endian on the wire.

use super::SdError;
use super::command::CommandRequest;
use bitflags::bitflags;
use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

/// Header byte of R2 (CID/CSD) and R3 (OCR) responses
pub const R3_HEADER: u8 = 0x3F;

bitflags! {
    /// Card status word carried by R1 responses
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CardStatus: u32 {
        const OUT_OF_RANGE = 1 << 31;
        const ADDRESS_ERROR = 1 << 30;
        const BLOCK_LEN_ERROR = 1 << 29;
        const ERASE_SEQ_ERROR = 1 << 28;
        const ERASE_PARAM = 1 << 27;
        const WP_VIOLATION = 1 << 26;
        const CARD_IS_LOCKED = 1 << 25;
        const LOCK_UNLOCK_FAILED = 1 << 24;
        const COM_CRC_ERROR = 1 << 23;
        const ILLEGAL_COMMAND = 1 << 22;
        const CARD_ECC_FAILED = 1 << 21;
        const CC_ERROR = 1 << 20;
        const ERROR = 1 << 19;
        const UNDERRUN = 1 << 18;
        const OVERRUN = 1 << 17;
        const CID_CSD_OVERWRITE = 1 << 16;
        const WP_ERASE_SKIP = 1 << 15;
        const CARD_ECC_DISABLED = 1 << 14;
        const ERASE_RESET = 1 << 13;
        const READY_FOR_DATA = 1 << 8;
        const APP_CMD = 1 << 5;

        // CURRENT_STATE (12:9) and reserved bits
        const _ = !0;
    }
}

/// Error bits in the order they are reported
///
/// CARD_IS_LOCKED is a status bit: a locked card still answers commands.
const STATUS_ERRORS: [(CardStatus, SdError); 15] = [
    (CardStatus::OUT_OF_RANGE, SdError::AddressOutOfRange),
    (CardStatus::ADDRESS_ERROR, SdError::AddressError),
    (CardStatus::BLOCK_LEN_ERROR, SdError::BlockLenError),
    (CardStatus::ERASE_SEQ_ERROR, SdError::EraseSeqError),
    (CardStatus::ERASE_PARAM, SdError::EraseParam),
    (CardStatus::WP_VIOLATION, SdError::WpViolation),
    (CardStatus::LOCK_UNLOCK_FAILED, SdError::LockUnlockFailed),
    (CardStatus::COM_CRC_ERROR, SdError::ComCrcError),
    (CardStatus::ILLEGAL_COMMAND, SdError::IllegalCommand),
    (CardStatus::CARD_ECC_FAILED, SdError::CardEccFailed),
    (CardStatus::CC_ERROR, SdError::CcError),
    (CardStatus::ERROR, SdError::GeneralError),
    (CardStatus::UNDERRUN, SdError::Underrun),
    (CardStatus::OVERRUN, SdError::Overrun),
    (CardStatus::CID_CSD_OVERWRITE, SdError::CidCsdOverwrite),
];

impl CardStatus {
    /// First error bit set, in reporting priority
    pub fn first_error(self) -> Option<SdError> {
        STATUS_ERRORS
            .iter()
            .find(|(bit, _)| self.contains(*bit))
            .map(|&(_, err)| err)
    }

    /// CURRENT_STATE field
    pub fn current_state(self) -> CardState {
        CardState::from_bits((self.bits() >> 9) & 0xF)
    }
}

/// Card state machine position reported in the status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Idle,
    Ready,
    Identification,
    Standby,
    Transfer,
    SendingData,
    ReceivingData,
    Programming,
    Disconnected,
    Reserved(u32),
}

impl CardState {
    fn from_bits(value: u32) -> Self {
        match value {
            0 => CardState::Idle,
            1 => CardState::Ready,
            2 => CardState::Identification,
            3 => CardState::Standby,
            4 => CardState::Transfer,
            5 => CardState::SendingData,
            6 => CardState::ReceivingData,
            7 => CardState::Programming,
            8 => CardState::Disconnected,
            other => CardState::Reserved(other),
        }
    }
}

// ============================================================================
// Wire Layouts
// ============================================================================

#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct ShortResponse {
    index: u8,
    payload: U32<BigEndian>,
}

#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct PublishedRca {
    _index: u8,
    rca: U16<BigEndian>,
    _status: U16<BigEndian>,
}

#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct LongResponse {
    _header: u8,
    register: [U32<BigEndian>; 4],
}

// ============================================================================
// Decoded Views
// ============================================================================

/// Normal response: echoed command index plus card status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct R1 {
    pub index: u8,
    pub status: CardStatus,
}

impl R1 {
    /// Check the card reports the expected state
    pub fn expect_state(self, state: CardState) -> Result<Self, SdError> {
        if self.status.current_state() == state {
            Ok(self)
        } else {
            Err(SdError::StateMismatch)
        }
    }
}

/// Operating-condition register response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct R3 {
    pub ocr: u32,
}

/// Published relative card address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct R6 {
    pub rca: u16,
    pub r1: R1,
}

fn short<'r>(req: &'r CommandRequest<'_>) -> Result<&'r ShortResponse, SdError> {
    ShortResponse::ref_from_prefix(&req.response)
        .map(|(resp, _)| resp)
        .map_err(|_| SdError::DriverFailure)
}

/// Decode an R1/R1b response
///
/// Status errors take precedence over a mismatched command echo.
pub fn decode_r1(req: &CommandRequest<'_>) -> Result<R1, SdError> {
    req.result?;

    let resp = short(req)?;
    let status = CardStatus::from_bits_retain(resp.payload.get());
    if let Some(err) = status.first_error() {
        return Err(err);
    }
    if resp.index != req.command.index() {
        return Err(SdError::HeaderMismatch);
    }

    Ok(R1 {
        index: resp.index,
        status,
    })
}

/// Decode an R3 response
pub fn decode_r3(req: &CommandRequest<'_>) -> Result<R3, SdError> {
    req.result?;

    let resp = short(req)?;
    if resp.index != R3_HEADER {
        return Err(SdError::HeaderMismatch);
    }
    Ok(R3 {
        ocr: resp.payload.get(),
    })
}

/// Decode an R6 response
///
/// The RCA bytes are zeroed in the raw buffer before the remaining status
/// is checked as an R1.
pub fn decode_r6(req: &mut CommandRequest<'_>) -> Result<R6, SdError> {
    req.result?;

    let rca = PublishedRca::ref_from_prefix(&req.response)
        .map(|(resp, _)| resp.rca.get())
        .map_err(|_| SdError::DriverFailure)?;
    req.response[1] = 0;
    req.response[2] = 0;

    Ok(R6 {
        rca,
        r1: decode_r1(req)?,
    })
}

/// Extract the 128-bit register from an R2 response, most significant word
/// first
pub fn decode_r2(req: &CommandRequest<'_>) -> Result<[u32; 4], SdError> {
    req.result?;

    let resp = LongResponse::ref_from_prefix(&req.response)
        .map(|(resp, _)| resp)
        .map_err(|_| SdError::DriverFailure)?;
    Ok(resp.register.map(|word| word.get()))
}
