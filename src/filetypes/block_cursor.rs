use super::BlockCursor;

use crate::structs::Layout;

impl BlockCursor {
    pub fn new(layout: &Layout) -> Self {
        Self {
            block_size: layout.block_size() as usize,
            current_block: 0,
            current_byte: 0,
        }
    }

    pub fn advance(&mut self, bytes: u64) -> u64 {
        let remaining_bytes = (self.block_size - self.current_byte) as u64;
        if bytes < remaining_bytes {
            self.current_byte += bytes as usize;
            return self.position();
        }
        let advance_blocks = (bytes - remaining_bytes) / self.block_size as u64 + 1;
        let advance_bytes = (bytes - remaining_bytes) % self.block_size as u64;
        self.current_block += advance_blocks;
        self.current_byte = advance_bytes as usize;
        self.position()
    }

    pub fn set(&mut self, bytes: u64) -> u64 {
        self.reset();
        self.advance(bytes)
    }

    pub fn reset(&mut self) {
        self.current_block = 0;
        self.current_byte = 0;
    }

    /// Index of the current block within the file's block list
    pub fn block(&self) -> u64 {
        self.current_block
    }

    /// Offset inside the current block
    pub fn byte(&self) -> usize {
        self.current_byte
    }

    pub fn position(&self) -> u64 {
        self.current_block * self.block_size as u64 + self.current_byte as u64
    }
}
