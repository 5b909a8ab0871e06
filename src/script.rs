//! Indentation-aware accumulator for generated pipeline scripts.
//!
//! Translators only ever describe relative structure: "open a block" (the
//! *next* block is indented one level deeper) or "close a block" (this block
//! sits one level shallower). [`Script`] turns that into consistently
//! indented text when rendered.

use std::fmt;

/// Default indent unit, in spaces.
pub const DEFAULT_INDENT_WIDTH: usize = 4;

/// Where an appended block is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Previous block's level plus its pending delta.
    Chain,
    /// One level below [`Script::current_level`], never below zero.
    Dedent,
    /// Exactly this level, ignoring the chain.
    Level(usize),
}

/// One unit of generated text at a fixed indentation level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub text: String,
    pub level: usize,
    /// Applied to the block that follows this one.
    pub pending_delta: i32,
}

#[derive(Debug, Clone)]
pub struct Script {
    blocks: Vec<Block>,
    indent_width: usize,
    size_estimate: usize,
}

impl Default for Script {
    fn default() -> Self {
        Self::new()
    }
}

impl Script {
    pub fn new() -> Self {
        Self::with_indent_width(DEFAULT_INDENT_WIDTH)
    }

    pub fn with_indent_width(indent_width: usize) -> Self {
        Self {
            blocks: Vec::new(),
            indent_width,
            size_estimate: 0,
        }
    }

    /// The level the next block receives when appended with
    /// [`Placement::Chain`].
    pub fn current_level(&self) -> usize {
        match self.blocks.last() {
            Some(last) => (last.level as i64 + i64::from(last.pending_delta)).max(0) as usize,
            None => 0,
        }
    }

    /// Append a block. `delta` does not affect this block; it shifts the
    /// chained level of the block after it.
    pub fn append(&mut self, text: impl Into<String>, delta: i32, placement: Placement) {
        let level = match placement {
            Placement::Chain => self.current_level(),
            Placement::Dedent => self.current_level().saturating_sub(1),
            Placement::Level(level) => level,
        };
        let text = text.into();
        self.size_estimate += text.len();
        self.blocks.push(Block {
            text,
            level,
            pending_delta: delta,
        });
    }

    /// Append at the current level.
    pub fn push(&mut self, text: impl Into<String>) {
        self.append(text, 0, Placement::Chain);
    }

    /// Append at the current level and indent everything after it.
    pub fn open(&mut self, text: impl Into<String>) {
        self.append(text, 1, Placement::Chain);
    }

    /// Append one level shallower than the current level.
    pub fn close(&mut self, text: impl Into<String>) {
        self.append(text, 0, Placement::Dedent);
    }

    /// Emit `closer` blocks until the current level is back to `level`.
    pub fn close_to(&mut self, level: usize, closer: &str) {
        while self.current_level() > level {
            self.close(closer);
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop every block after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        for block in self.blocks.drain(len.min(self.blocks.len())..) {
            self.size_estimate -= block.text.len();
        }
    }

    /// Render all blocks in order. Every non-empty line of a block gets the
    /// block's indent prefix; each block ends with a newline.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.size_estimate * 2);
        let mut prefix = String::new();

        for block in &self.blocks {
            let width = block.level * self.indent_width;
            if prefix.len() != width {
                prefix = " ".repeat(width);
            }

            for (i, line) in block.text.split('\n').enumerate() {
                if i > 0 {
                    out.push('\n');
                }
                if !line.is_empty() {
                    out.push_str(&prefix);
                }
                out.push_str(line);
            }
            out.push('\n');
        }

        out
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
