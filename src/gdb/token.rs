//! Correlation token generator
//!
//! Tokens are drawn three bytes at a time from a pool filled by the OS
//! random source. Zero is never handed out since an untokened reply would be
//! indistinguishable from it.

use crate::gdb::types::Token;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Mutex;

const POOL_SIZE: usize = 2048;
const TOKEN_BYTES: usize = 3;

struct Pool {
    bytes: [u8; POOL_SIZE],
    offset: usize,
}

impl Pool {
    fn refill(&mut self) {
        OsRng.fill_bytes(&mut self.bytes);
        self.offset = 0;
    }

    fn draw(&mut self) -> Token {
        if self.offset >= POOL_SIZE - TOKEN_BYTES {
            self.refill();
        }
        let chunk = &self.bytes[self.offset..self.offset + TOKEN_BYTES];
        self.offset += TOKEN_BYTES;
        u32::from_le_bytes([chunk[0], chunk[1], chunk[2], 0])
    }
}

pub struct TokenPool {
    inner: Mutex<Pool>,
}

impl TokenPool {
    pub fn new() -> Self {
        let mut pool = Pool {
            bytes: [0; POOL_SIZE],
            offset: 0,
        };
        pool.refill();
        Self {
            inner: Mutex::new(pool),
        }
    }

    /// Next non-zero token in `1..2^24`
    pub fn next_token(&self) -> Token {
        let mut pool = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let token = pool.draw();
            if token != 0 {
                return token;
            }
        }
    }
}

impl Default for TokenPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tokens_are_nonzero_and_24_bit() {
        let pool = TokenPool::new();
        // Enough draws to cross several refills
        for _ in 0..(POOL_SIZE * 3) {
            let token = pool.next_token();
            assert_ne!(token, 0);
            assert!(token < (1 << 24));
        }
    }

    #[test]
    fn test_consecutive_tokens_differ() {
        let pool = TokenPool::new();
        let tokens: HashSet<Token> = (0..64).map(|_| pool.next_token()).collect();
        // 64 draws out of 2^24 values; a collision here means the pool is stuck
        assert!(tokens.len() > 60);
    }
}
