//! 文档分块
//!
//! 按目标字符数切块，优先在段落/句子分隔符处断开，相邻块带重叠。
//! 全程按 char 迭代，UTF-8 安全。

/// 知识块
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 块 ID：{文档名}_{序号}
    pub id: String,
    pub text: String,
    /// 来源文档名
    pub source: String,
    /// 在原文档中的字节偏移
    pub offset: usize,
}

/// 分隔符优先级（从高到低）
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " "];

/// 文档分块器
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    /// 将文档切成块
    pub fn chunk(&self, doc_id: &str, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();

        if total == 0 {
            return chunks;
        }

        let mut current = 0;
        let mut chunk_idx = 0;

        while current < total {
            let target_end = (current + self.chunk_size).min(total);
            let mut end = target_end;

            // 不是文档末尾时，尽量在分隔符处断开
            if target_end < total {
                let window: String = chars[current..target_end].iter().collect();
                for sep in SEPARATORS {
                    if let Some(pos) = window.rfind(sep) {
                        let chars_to_sep = window[..pos].chars().count() + sep.chars().count();
                        if chars_to_sep > 0 {
                            end = current + chars_to_sep;
                            break;
                        }
                    }
                }
            }

            if end <= current {
                end = (current + 1).min(total);
            }

            let piece: String = chars[current..end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                let byte_offset: usize = chars[..current].iter().map(|c| c.len_utf8()).sum();
                chunks.push(Chunk {
                    id: format!("{}_{}", doc_id, chunk_idx),
                    text: trimmed.to_string(),
                    source: doc_id.to_string(),
                    offset: byte_offset,
                });
                chunk_idx += 1;
            }

            let overlap = self.chunk_overlap.min(end - current);
            let next = end.saturating_sub(overlap);
            current = if next > current { next } else { end };
        }

        chunks
    }
}
