//! MSC (MMC/SD controller) and DMA register definitions using tock-registers
//!
//! Offsets are relative to the base of one controller channel or one DMA
//! channel. The board maps them onto its MMIO window.

use tock_registers::register_bitfields;

// ============================================================================
// Register Offsets
// ============================================================================

/// Controller register, addressed relative to a channel's base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MscReg {
    /// Start/stop clock and operation control
    Strpcl = 0x00,
    /// Status
    Stat = 0x04,
    /// Clock rate divider
    Clkrt = 0x08,
    /// Command data control
    Cmdat = 0x0C,
    /// Response timeout
    Resto = 0x10,
    /// Read timeout
    Rdto = 0x14,
    /// Block length
    Blklen = 0x18,
    /// Number of blocks
    Nob = 0x1C,
    /// Interrupt mask
    Imask = 0x24,
    /// Interrupt flags (write 1 to clear)
    Ireg = 0x28,
    /// Command index
    Cmd = 0x2C,
    /// Command argument
    Arg = 0x30,
    /// Response FIFO (16 bits per read)
    Res = 0x34,
    /// Receive data FIFO
    RxFifo = 0x38,
    /// Transmit data FIFO
    TxFifo = 0x3C,
}

impl MscReg {
    /// Byte offset from the channel base
    pub const fn offset(self) -> u32 {
        self as u32
    }
}

/// DMA channel register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaReg {
    /// Source address
    Dsar,
    /// Target address
    Dtar,
    /// Transfer count, in transfer units
    Dtcr,
    /// Request source
    Drsr,
    /// Channel control/status
    Dccsr,
    /// Channel command
    Dcmd,
}

/// Value written to `IREG` to acknowledge every pending flag
pub const IREG_CLEAR_ALL: u32 = 0xFFFF;

/// Value written to `IMASK` to mask every interrupt source
pub const IMASK_ALL: u32 = 0xFFFF;

// ============================================================================
// Controller Bitfield Definitions
// ============================================================================

register_bitfields! [
    u32,
    /// Start/Stop Clock and Operation Control (STRPCL)
    pub STRPCL [
        /// Bus clock control
        CLOCK_CONTROL OFFSET(0) NUMBITS(2) [
            Stop = 1,
            Start = 2
        ],
        /// Issue the programmed command
        START_OP OFFSET(2) NUMBITS(1) [],
        /// Controller reset
        RESET OFFSET(3) NUMBITS(1) [],
        /// Start SDIO read wait
        START_READWAIT OFFSET(5) NUMBITS(1) [],
        /// Stop SDIO read wait
        STOP_READWAIT OFFSET(6) NUMBITS(1) [],
        /// Abort the current multi-block transfer
        EXIT_TRANSFER OFFSET(7) NUMBITS(1) []
    ],

    /// Status (STAT)
    pub STAT [
        /// Data read timed out
        TIME_OUT_READ OFFSET(0) NUMBITS(1) [],
        /// Response timed out
        TIME_OUT_RES OFFSET(1) NUMBITS(1) [],
        /// CRC error on written data
        CRC_WRITE_ERROR OFFSET(2) NUMBITS(2) [],
        /// CRC error on read data
        CRC_READ_ERROR OFFSET(4) NUMBITS(1) [],
        /// CRC error on the response
        CRC_RES_ERR OFFSET(5) NUMBITS(1) [],
        /// Data FIFO empty
        DATA_FIFO_EMPTY OFFSET(6) NUMBITS(1) [],
        /// Data FIFO full
        DATA_FIFO_FULL OFFSET(7) NUMBITS(1) [],
        /// Bus clock running
        CLK_EN OFFSET(8) NUMBITS(1) [],
        /// Command and response phase finished
        END_CMD_RES OFFSET(11) NUMBITS(1) [],
        /// Data phase finished
        DATA_TRAN_DONE OFFSET(12) NUMBITS(1) [],
        /// Card finished programming
        PRG_DONE OFFSET(13) NUMBITS(1) [],
        /// Controller reset in progress
        IS_RESETTING OFFSET(15) NUMBITS(1) []
    ],

    /// Clock Rate (CLKRT)
    pub CLKRT [
        /// Divide the source clock by 2^CLK_RATE
        CLK_RATE OFFSET(0) NUMBITS(3) []
    ],

    /// Command Data Control (CMDAT)
    pub CMDAT [
        /// Expected response format
        RESPONSE_FORMAT OFFSET(0) NUMBITS(3) [
            NoResponse = 0,
            R1 = 1,
            R2 = 2,
            R3 = 3,
            R4 = 4,
            R5 = 5,
            R6 = 6
        ],
        /// Command has a data phase
        DATA_EN OFFSET(3) NUMBITS(1) [],
        /// Data phase direction is host to card
        WRITE OFFSET(4) NUMBITS(1) [],
        /// Stream instead of block transfer
        STREAM_BLOCK OFFSET(5) NUMBITS(1) [],
        /// Card signals busy after the response
        BUSY OFFSET(6) NUMBITS(1) [],
        /// Send 80 initialization clocks before the command
        INIT OFFSET(7) NUMBITS(1) [],
        /// Data phase served by DMA
        DMA_EN OFFSET(8) NUMBITS(1) [],
        /// Data bus width
        BUS_WIDTH OFFSET(9) NUMBITS(2) [
            OneBit = 0,
            FourBit = 2
        ]
    ],

    /// Interrupt Flags (IREG) and Interrupt Mask (IMASK)
    pub IREG [
        /// Data phase finished
        DATA_TRAN_DONE OFFSET(0) NUMBITS(1) [],
        /// Card finished programming
        PRG_DONE OFFSET(1) NUMBITS(1) [],
        /// Command and response phase finished
        END_CMD_RES OFFSET(2) NUMBITS(1) [],
        /// Receive FIFO needs draining
        RXFIFO_RD_REQ OFFSET(5) NUMBITS(1) [],
        /// Transmit FIFO needs filling
        TXFIFO_WR_REQ OFFSET(6) NUMBITS(1) [],
        /// SDIO interrupt
        SDIO OFFSET(7) NUMBITS(1) []
    ]
];

// ============================================================================
// DMA Bitfield Definitions
// ============================================================================

register_bitfields! [
    u32,
    /// Channel Control/Status (DCCSR)
    pub DCCSR [
        /// Channel enable
        EN OFFSET(0) NUMBITS(1) [],
        /// Channel halted on error
        HLT OFFSET(2) NUMBITS(1) [],
        /// Transfer terminated
        TT OFFSET(3) NUMBITS(1) [],
        /// Address error
        AR OFFSET(4) NUMBITS(1) [],
        /// No-descriptor (register) transfer mode
        NDES OFFSET(31) NUMBITS(1) []
    ],

    /// Channel Command (DCMD)
    pub DCMD [
        /// Link to the next descriptor
        LINK OFFSET(0) NUMBITS(1) [],
        /// Interrupt on transfer end
        TIE OFFSET(1) NUMBITS(1) [],
        /// Transfer unit size
        DS OFFSET(8) NUMBITS(3) [
            Bits32 = 0,
            Bits8 = 1,
            Bits16 = 2,
            Bytes16 = 3,
            Bytes32 = 4
        ],
        /// Destination port width
        DWDH OFFSET(12) NUMBITS(2) [
            Bits32 = 0,
            Bits8 = 1,
            Bits16 = 2
        ],
        /// Source port width
        SWDH OFFSET(14) NUMBITS(2) [
            Bits32 = 0,
            Bits8 = 1,
            Bits16 = 2
        ],
        /// Destination address increment
        DAI OFFSET(22) NUMBITS(1) [],
        /// Source address increment
        SAI OFFSET(23) NUMBITS(1) []
    ]
];

/// DMA request source (DRSR) for the controller FIFOs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RequestSource {
    Msc0Out = 26,
    Msc0In = 27,
    Msc1Out = 28,
    Msc1In = 29,
    Msc2Out = 30,
    Msc2In = 31,
}
