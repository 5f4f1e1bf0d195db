//! Flash geometry and transfer pacing.
//!
//! While the bootloader erases or writes flash its CPU is stalled and the
//! UART receive buffer is tiny, so the sender must pace itself against the
//! documented flash timings instead of trusting the wire. The numbers here
//! are the nRF52 worst cases: page erase takes 2.05-89.7 ms on the nRF52832
//! and up to ~85 ms on the nRF52840; a word write takes 67.5-338 us and
//! ~41 us respectively.

use std::time::Duration;

/// Flash page size in bytes.
pub const FLASH_PAGE_SIZE: usize = 4096;

/// Worst-case time to erase one flash page.
pub const FLASH_PAGE_ERASE_TIME: Duration = Duration::from_micros(89_700);

/// Worst-case time to write one 32-bit word to flash.
pub const FLASH_WORD_WRITE_TIME: Duration = Duration::from_micros(100);

/// Lower bound on the post-START erase wait; even a single-page erase is
/// not instantaneous.
pub const MIN_ERASE_WAIT: Duration = Duration::from_millis(500);

/// Flash timing model used to derive transmit-side delays.
#[derive(Debug, Clone)]
pub struct FlashTiming {
    /// Page size in bytes.
    pub page_size: usize,
    /// Worst-case single page erase time.
    pub page_erase_time: Duration,
    /// Worst-case single word write time.
    pub word_write_time: Duration,
}

impl Default for FlashTiming {
    fn default() -> Self {
        Self {
            page_size: FLASH_PAGE_SIZE,
            page_erase_time: FLASH_PAGE_ERASE_TIME,
            word_write_time: FLASH_WORD_WRITE_TIME,
        }
    }
}

impl FlashTiming {
    /// Number of pages the bootloader will touch for an image of
    /// `total_size` bytes.
    ///
    /// One page more than the exact quotient: the bootloader starts erasing
    /// before the size is known precisely, and over-waiting a page is
    /// harmless where under-waiting corrupts the transfer.
    #[allow(clippy::cast_possible_truncation)] // image sizes are far below u32::MAX pages
    fn pages(&self, total_size: usize) -> u32 {
        (total_size / self.page_size + 1) as u32
    }

    /// Time to write one full page, word by word.
    #[allow(clippy::cast_possible_truncation)]
    pub fn page_write_time(&self) -> Duration {
        self.word_write_time * (self.page_size / 4) as u32
    }

    /// How long to wait after the START packet while the bootloader erases
    /// room for `total_size` bytes. Never less than [`MIN_ERASE_WAIT`].
    pub fn erase_wait_time(&self, total_size: usize) -> Duration {
        MIN_ERASE_WAIT.max(self.page_erase_time * self.pages(total_size))
    }

    /// How long activation takes for an image of `total_size` bytes.
    ///
    /// With `skip_bank_copy` (single-bank layout and no softdevice in the
    /// package) the staged image is already in place and only the
    /// bootloader settings page is rewritten; otherwise the bootloader
    /// erases bank 0 and copies the whole image across from bank 1.
    pub fn activate_wait_time(&self, total_size: usize, skip_bank_copy: bool) -> Duration {
        if skip_bank_copy {
            self.page_erase_time + self.page_write_time()
        } else {
            self.erase_wait_time(total_size) + self.page_write_time() * self.pages(total_size)
        }
    }
}
