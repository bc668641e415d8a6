//! 定长帧同步器
//!
//! 从字节流中恢复定长二进制帧（长度 L、已知起始标记）的边界。
//! 每次 `feed` 要么输出帧，要么严格缩短缓冲区，不会在坏数据上空转。
//!
//! ```text
//! [tag ....... L] [garbage] [tag ....... L]
//!        │            │            │
//!      emit        discard       emit
//! ```

use tracing::{debug, warn};

/// 连续丢弃次数超过该值时请求重启。
pub const DEFAULT_CORRUPTION_THRESHOLD: u32 = 10;

/// 一次 feed 中的丢弃汇总。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorruptionEvent {
    /// 本次丢弃的字节数
    pub discarded: usize,
    /// 当前连续丢弃计数
    pub count: u32,
}

/// feed 的输出。
#[derive(Debug, Default)]
pub struct SyncOutput {
    pub frames: Vec<Vec<u8>>,
    pub corruption: Option<CorruptionEvent>,
    /// 连续丢弃计数超过阈值
    pub restart_requested: bool,
}

/// 定长帧同步器。
#[derive(Debug, Clone)]
pub struct FrameSynchronizer {
    tag: Vec<u8>,
    frame_len: usize,
    threshold: u32,
    buffer: Vec<u8>,
    corruption_count: u32,
}

impl FrameSynchronizer {
    /// 标记必须非空且不长于帧。
    pub fn new(tag: impl Into<Vec<u8>>, frame_len: usize) -> Option<Self> {
        let tag = tag.into();
        if tag.is_empty() || tag.len() > frame_len {
            return None;
        }
        Some(Self {
            tag,
            frame_len,
            threshold: DEFAULT_CORRUPTION_THRESHOLD,
            buffer: Vec::with_capacity(frame_len * 2),
            corruption_count: 0,
        })
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// 尚未成帧的剩余字节。
    pub fn remaining(&self) -> &[u8] {
        &self.buffer
    }

    pub fn corruption_count(&self) -> u32 {
        self.corruption_count
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.corruption_count = 0;
    }

    /// 追加字节并尽可能多地切出完整帧。
    pub fn feed(&mut self, chunk: &[u8]) -> SyncOutput {
        self.buffer.extend_from_slice(chunk);
        let mut out = SyncOutput::default();
        let mut discarded = 0usize;

        while !self.buffer.is_empty() {
            if !self.buffer.starts_with(&self.tag) {
                if self.tag.starts_with(&self.buffer) {
                    // 缓冲区本身是标记的前缀，等待更多字节
                    break;
                }
                let cut = match find(&self.buffer, &self.tag, 1) {
                    Some(position) => position,
                    None => self.buffer.len() - tag_prefix_suffix(&self.buffer, &self.tag),
                };
                discarded += self.discard(cut);
                continue;
            }

            let len = self.buffer.len();
            if len < self.frame_len {
                break;
            }
            if len % self.frame_len == 0 && self.blocks_aligned() {
                self.emit(&mut out);
                continue;
            }
            // 长度不是 L 的整数倍或某个子块未对齐：若下一个标记落在本帧内，说明本帧被截断
            match find(&self.buffer, &self.tag, self.tag.len()) {
                Some(position) if position < self.frame_len => {
                    discarded += self.discard(position);
                }
                _ => self.emit(&mut out),
            }
        }

        if discarded > 0 {
            out.corruption = Some(CorruptionEvent {
                discarded,
                count: self.corruption_count,
            });
        }
        out.restart_requested = self.corruption_count > self.threshold;
        if out.restart_requested {
            warn!(
                target: "magbus.sync",
                count = self.corruption_count,
                threshold = self.threshold,
                "frame_sync_restart_requested"
            );
        }
        out
    }

    // 每个长度为 L 的子块都以标记开头
    fn blocks_aligned(&self) -> bool {
        self.buffer
            .chunks(self.frame_len)
            .all(|block| block.starts_with(&self.tag))
    }

    fn emit(&mut self, out: &mut SyncOutput) {
        let rest = self.buffer.split_off(self.frame_len);
        let frame = std::mem::replace(&mut self.buffer, rest);
        out.frames.push(frame);
        self.corruption_count = 0;
    }

    fn discard(&mut self, count: usize) -> usize {
        self.buffer.drain(..count);
        self.corruption_count += 1;
        debug!(
            target: "magbus.sync",
            discarded = count,
            count = self.corruption_count,
            "frame_sync_discard"
        );
        count
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.len() > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|position| position + from)
}

// 缓冲区末尾可能是下一个标记的开头，保留这部分。
fn tag_prefix_suffix(buffer: &[u8], tag: &[u8]) -> usize {
    let max = (tag.len() - 1).min(buffer.len());
    (1..=max)
        .rev()
        .find(|k| buffer.ends_with(&tag[..*k]))
        .unwrap_or(0)
}
